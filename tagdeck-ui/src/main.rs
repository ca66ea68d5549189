//! tagdeck-ui - headless entry point
//!
//! Runs the selection & mutation layer against a live backend without a
//! GUI: `watch` mirrors push updates into the cache, `tag` and `delete`
//! drive the same context-menu actions a row selection would.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tagdeck_common::config::{resolve_backend_url, TomlConfig, BACKEND_URL_ENV};
use tagdeck_common::events::{EventBus, Namespace};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagdeck_ui::actions::{ActionDeps, ActionKind, Trigger};
use tagdeck_ui::api::{LibraryApi, LibraryClient};
use tagdeck_ui::cache::{CacheKey, QueryCache};
use tagdeck_ui::connection::ConnectionManager;
use tagdeck_ui::listener::PushUpdateListener;
use tagdeck_ui::scope::{MountedRow, SelectionCapabilities};
use tagdeck_ui::session::{trigger_action, ViewSession};

const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for tagdeck-ui
#[derive(Parser, Debug)]
#[command(name = "tagdeck-ui")]
#[command(about = "Selection and mutation client for the beets tagging backend")]
#[command(version)]
struct Args {
    /// Backend server root, e.g. http://localhost:5001
    #[arg(long)]
    backend_url: Option<String>,

    /// TOML config file (defaults to ~/.config/tagdeck/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow push updates and keep the local cache current
    Watch,
    /// Look up (preview) or import inbox folders
    Tag {
        #[arg(long, value_enum, default_value_t = KindArg::Preview)]
        kind: KindArg,
        #[arg(required = true)]
        folders: Vec<String>,
    },
    /// Delete inbox folders
    Delete {
        /// Only delete folders whose tag has one of these statuses
        #[arg(long = "with-status")]
        with_status: Vec<String>,
        #[arg(required = true)]
        folders: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Preview,
    Import,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let level = toml_config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tagdeck_ui={level},tagdeck_common={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend_url = resolve_backend_url(args.backend_url.as_deref(), BACKEND_URL_ENV, &toml_config);
    info!("Starting tagdeck-ui against {}", backend_url);

    let api = Arc::new(
        LibraryClient::new(&backend_url, &toml_config.api_prefix).context("Failed to create backend client")?,
    );

    match args.command {
        Command::Watch => watch(&backend_url, &toml_config, api).await,
        Command::Tag { kind, folders } => {
            let action = match kind {
                KindArg::Preview => ActionKind::Retag,
                KindArg::Import => ActionKind::Import,
            };
            run_action(&toml_config, api.as_ref(), action, &folders, Vec::new()).await
        }
        Command::Delete { with_status, folders } => {
            run_action(&toml_config, api.as_ref(), ActionKind::Delete, &folders, with_status).await
        }
    }
}

async fn watch(backend_url: &str, config: &TomlConfig, api: Arc<LibraryClient>) -> Result<()> {
    let cache = Arc::new(Mutex::new(QueryCache::new()));
    prime_listings(api.as_ref(), &cache).await;

    let manager = ConnectionManager::new(backend_url, config.reconnect, EventBus::new(EVENT_BUS_CAPACITY))
        .context("Failed to create connection manager")?;
    let listener = PushUpdateListener::new(api).with_discovery();
    let events = manager.subscribe();
    let _status = manager.acquire(Namespace::Status);
    manager.connect();
    info!(socket = %manager.socket_url(), "Watching status channel");

    let outcome = tokio::select! {
        result = listener.run(events, cache.clone()) => result.context("Push-update listener stopped"),
        _ = shutdown_signal() => Ok(()),
    };

    manager.disconnect();
    let cache = cache.lock().await;
    info!(tags = cache.num_tags(), "Watch finished");
    outcome
}

/// Initial fetch; failures leave the listing stale for the listener to retry
async fn prime_listings(api: &LibraryClient, cache: &Mutex<QueryCache>) {
    match api.fetch_inbox().await {
        Ok(inbox) => cache.lock().await.set_listing(CacheKey::Inbox, inbox),
        Err(e) => {
            warn!(error = %e, "Initial inbox fetch failed");
            cache.lock().await.mark_stale(CacheKey::Inbox);
        }
    }
    match api.fetch_tag_groups().await {
        Ok(groups) => cache.lock().await.set_listing(CacheKey::TagGroups, groups),
        Err(e) => {
            warn!(error = %e, "Initial tag-group fetch failed");
            cache.lock().await.mark_stale(CacheKey::TagGroups);
        }
    }
}

/// Select `folders` in a fresh view and trigger `action` on them
async fn run_action(
    config: &TomlConfig,
    api: &LibraryClient,
    action: ActionKind,
    folders: &[String],
    delete_with_status: Vec<String>,
) -> Result<()> {
    let mut session = ViewSession::new(config.interaction, delete_with_status);
    let mut rows = Vec::with_capacity(folders.len());
    for folder in folders {
        let row = MountedRow::mount(&mut session.scope, folder)?;
        if !session.scope.is_selected(folder)? {
            row.on_click(&mut session.scope)?;
        }
        rows.push(row);
    }

    let session = Mutex::new(session);
    let cache = Mutex::new(QueryCache::new());
    let trigger = trigger_action(&session, &cache, action, &ActionDeps::new(api)).await?;
    if !matches!(trigger, Trigger::Started(_)) {
        bail!("{:?} did not start ({:?})", action, trigger);
    }

    if let Some(dialog) = session.lock().await.error_dialog() {
        bail!("{:?} failed: {}", dialog.action, dialog.message);
    }
    info!(?action, folders = folders.len(), "Request accepted by backend");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
