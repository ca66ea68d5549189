//! Socket connection manager
//!
//! One process-wide service owns every socket to the backend. Consumers take
//! a [`ConnectionLease`] per namespace; the first lease starts that
//! namespace's socket task and dropping the last one stops it. Incoming
//! events are decoded and published on the [`EventBus`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use tagdeck_common::config::ReconnectConfig;
use tagdeck_common::events::{EventBus, Namespace, StatusEvent, TagdeckEvent, TerminalEvent};
use tagdeck_common::{Error, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::engineio::{EnginePacket, SocketPacket};

/// Event queued for emission on a namespace
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub name: String,
    pub payload: Value,
}

struct Slot {
    refs: usize,
    task: Option<RunningTask>,
}

struct RunningTask {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    connected: bool,
    slots: HashMap<Namespace, Slot>,
    /// Set once a namespace has been joined; survives disconnect and release
    joined: HashMap<Namespace, Arc<AtomicBool>>,
}

fn joined_flag(joined: &mut HashMap<Namespace, Arc<AtomicBool>>, namespace: Namespace) -> Arc<AtomicBool> {
    joined.entry(namespace).or_default().clone()
}

struct ManagerInner {
    socket_url: String,
    reconnect: ReconnectConfig,
    bus: EventBus,
    state: Mutex<ManagerState>,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_task(&self, namespace: Namespace, joined: Arc<AtomicBool>) -> RunningTask {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_namespace(
            self.socket_url.clone(),
            namespace,
            self.bus.clone(),
            rx,
            self.reconnect,
            joined,
        ));
        info!(namespace = %namespace, "socket task started");
        RunningTask {
            outgoing: tx,
            handle,
        }
    }

    fn stop_task(&self, namespace: Namespace, task: RunningTask, reason: &str) {
        task.handle.abort();
        info!(namespace = %namespace, reason, "socket task stopped");
        self.bus.emit_lossy(TagdeckEvent::Disconnected {
            namespace,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn release(&self, namespace: Namespace) {
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(&namespace) else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            if let Some(slot) = state.slots.remove(&namespace) {
                if let Some(task) = slot.task {
                    self.stop_task(namespace, task, "last consumer released");
                }
            }
        }
    }
}

/// Process-wide owner of backend sockets
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// `backend_url` is the http(s) server root; the socket endpoint is
    /// derived from it.
    pub fn new(backend_url: &str, reconnect: ReconnectConfig, bus: EventBus) -> Result<Self> {
        let socket_url = socket_url(backend_url)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                socket_url,
                reconnect,
                bus,
                state: Mutex::new(ManagerState::default()),
            }),
        })
    }

    pub fn socket_url(&self) -> &str {
        &self.inner.socket_url
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TagdeckEvent> {
        self.inner.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Start sockets for every namespace that has consumers. Must be called
    /// from within a tokio runtime.
    pub fn connect(&self) {
        let mut state = self.inner.lock();
        let ManagerState {
            connected,
            slots,
            joined,
        } = &mut *state;
        *connected = true;
        for (namespace, slot) in slots.iter_mut() {
            if slot.refs > 0 && slot.task.is_none() {
                let flag = joined_flag(joined, *namespace);
                slot.task = Some(self.inner.spawn_task(*namespace, flag));
            }
        }
    }

    /// Stop every socket. Leases stay valid and reconnect on the next `connect()`.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.connected = false;
        for (namespace, slot) in state.slots.iter_mut() {
            if let Some(task) = slot.task.take() {
                self.inner.stop_task(*namespace, task, "client disconnect");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Register a consumer of `namespace`
    pub fn acquire(&self, namespace: Namespace) -> ConnectionLease {
        let mut state = self.inner.lock();
        let ManagerState {
            connected,
            slots,
            joined,
        } = &mut *state;
        let slot = slots.entry(namespace).or_insert(Slot { refs: 0, task: None });
        slot.refs += 1;
        if *connected && slot.task.is_none() {
            let flag = joined_flag(joined, namespace);
            slot.task = Some(self.inner.spawn_task(namespace, flag));
        }
        debug!(namespace = %namespace, refs = slot.refs, "connection lease acquired");
        ConnectionLease {
            manager: Arc::downgrade(&self.inner),
            namespace,
        }
    }

    pub fn ref_count(&self, namespace: Namespace) -> usize {
        self.inner.lock().slots.get(&namespace).map(|s| s.refs).unwrap_or(0)
    }

    /// Whether `namespace` has been joined at least once. The next join
    /// after that, from any task, reports `reconnect: true`.
    pub fn has_joined(&self, namespace: Namespace) -> bool {
        self.inner
            .lock()
            .joined
            .get(&namespace)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn is_running(&self, namespace: Namespace) -> bool {
        self.inner
            .lock()
            .slots
            .get(&namespace)
            .is_some_and(|s| s.task.is_some())
    }
}

/// A consumer's hold on one namespace; dropping it releases the hold
#[must_use = "dropping the lease releases the connection"]
pub struct ConnectionLease {
    manager: Weak<ManagerInner>,
    namespace: Namespace,
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ConnectionLease {
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Queue an event for the namespace's socket.
    ///
    /// Queued events are sent once the namespace is joined; fails if the
    /// manager is gone or disconnected.
    pub fn emit(&self, name: &str, payload: Value) -> Result<()> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| Error::Network("connection manager shut down".to_string()))?;
        let state = manager.lock();
        let task = state
            .slots
            .get(&self.namespace)
            .and_then(|slot| slot.task.as_ref())
            .ok_or_else(|| Error::Network(format!("{} is not connected", self.namespace)))?;
        task.outgoing
            .send(Outgoing {
                name: name.to_string(),
                payload,
            })
            .map_err(|_| Error::Network(format!("{} socket task ended", self.namespace)))
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(self.namespace);
        }
    }
}

/// http://host:port -> ws://host:port/socket.io/?EIO=4&transport=websocket
pub fn socket_url(backend_url: &str) -> Result<String> {
    let mut url = Url::parse(backend_url)
        .map_err(|e| Error::Config(format!("Invalid backend URL {:?}: {}", backend_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::Config(format!("Unsupported backend URL scheme {:?}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot derive socket URL from {:?}", backend_url)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url.to_string())
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

enum SessionEnd {
    /// Every sender of the outgoing queue is gone; stop for good
    ClientGone,
    /// Socket closed after the namespace was joined
    Closed(String),
}

/// Reconnect loop for one namespace
async fn run_namespace(
    url: String,
    namespace: Namespace,
    bus: EventBus,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    reconnect: ReconnectConfig,
    joined: Arc<AtomicBool>,
) {
    let initial = Duration::from_millis(reconnect.initial_backoff_ms);
    let max = Duration::from_millis(reconnect.max_backoff_ms);
    let mut backoff = initial;

    loop {
        match run_session(&url, namespace, &bus, &mut outgoing, &joined).await {
            Ok(SessionEnd::ClientGone) => return,
            Ok(SessionEnd::Closed(reason)) => {
                backoff = initial;
                warn!(namespace = %namespace, reason = %reason, "socket closed; reconnecting");
                bus.emit_lossy(TagdeckEvent::Disconnected {
                    namespace,
                    reason,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                warn!(namespace = %namespace, error = %e, backoff_ms = backoff.as_millis() as u64, "socket connect failed");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, max);
    }
}

/// One connection: handshake, join the namespace, then pump frames both ways
async fn run_session(
    url: &str,
    namespace: Namespace,
    bus: &EventBus,
    outgoing: &mut mpsc::UnboundedReceiver<Outgoing>,
    joined: &AtomicBool,
) -> Result<SessionEnd> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let send_err = |e: tokio_tungstenite::tungstenite::Error| Error::Network(e.to_string());

    // Engine handshake
    let handshake = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                EnginePacket::Open(h) => break h,
                other => debug!(?other, "frame before handshake ignored"),
            },
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::Network(e.to_string())),
            None => return Err(Error::Network("socket closed during handshake".to_string())),
        }
    };
    debug!(sid = %handshake.sid, "engine.io handshake complete");

    // Namespace join
    sink.send(Message::Text(SocketPacket::connect(namespace.path()).encode()))
        .await
        .map_err(send_err)?;
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                EnginePacket::Ping => sink
                    .send(Message::Text(EnginePacket::Pong.encode()))
                    .await
                    .map_err(send_err)?,
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { namespace: ns, .. } if ns == namespace.path() => break,
                    SocketPacket::ConnectError { message, .. } => {
                        return Err(Error::Protocol(format!("{} refused: {}", namespace, message)))
                    }
                    other => debug!(?other, "packet before namespace join ignored"),
                },
                EnginePacket::Close => {
                    return Err(Error::Network("server closed during namespace join".to_string()))
                }
                _ => {}
            },
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::Network(e.to_string())),
            None => return Err(Error::Network("socket closed during namespace join".to_string())),
        }
    }

    let reconnect = joined.swap(true, Ordering::SeqCst);
    info!(namespace = %namespace, reconnect, "namespace joined");
    bus.emit_lossy(TagdeckEvent::Connected {
        namespace,
        reconnect,
        timestamp: chrono::Utc::now(),
    });

    // Server pings every ping_interval; silence past interval + timeout means a dead peer.
    let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);

    loop {
        tokio::select! {
            frame = next_frame(&mut stream, liveness) => {
                let text = match frame {
                    Ok(Some(Message::Text(text))) => text,
                    Ok(Some(Message::Close(_))) | Ok(None) => {
                        return Ok(SessionEnd::Closed("socket closed".to_string()))
                    }
                    Ok(Some(_)) => continue,
                    Err(e) => return Ok(SessionEnd::Closed(e.to_string())),
                };
                let packet = match EnginePacket::decode(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(namespace = %namespace, error = %e, "undecodable frame dropped");
                        continue;
                    }
                };
                match packet {
                    EnginePacket::Ping => {
                        if let Err(e) = sink.send(Message::Text(EnginePacket::Pong.encode())).await {
                            return Ok(SessionEnd::Closed(e.to_string()));
                        }
                    }
                    EnginePacket::Close => return Ok(SessionEnd::Closed("server close".to_string())),
                    EnginePacket::Message(body) => {
                        if let Some(end) = dispatch(namespace, &body, bus) {
                            return Ok(end);
                        }
                    }
                    _ => {}
                }
            }
            out = outgoing.recv() => {
                let Some(out) = out else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::ClientGone);
                };
                let frame = SocketPacket::event(namespace.path(), &out.name, out.payload).encode();
                debug!(namespace = %namespace, event = %out.name, "emit");
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    // In-flight emissions during a disconnect are lost.
                    return Ok(SessionEnd::Closed(e.to_string()));
                }
            }
        }
    }
}

async fn next_frame<S>(stream: &mut S, liveness: Duration) -> Result<Option<Message>>
where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let next = if liveness.is_zero() {
        stream.next().await
    } else {
        tokio::time::timeout(liveness, stream.next())
            .await
            .map_err(|_| Error::Network("ping timeout".to_string()))?
    };
    match next {
        Some(Ok(message)) => Ok(Some(message)),
        Some(Err(e)) => Err(Error::Network(e.to_string())),
        None => Ok(None),
    }
}

/// Decode a socket packet and publish it. Returns `Some` when the server
/// ended the namespace.
fn dispatch(namespace: Namespace, body: &str, bus: &EventBus) -> Option<SessionEnd> {
    let packet = match SocketPacket::decode(body) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "undecodable packet dropped");
            return None;
        }
    };
    if packet.namespace() != namespace.path() {
        debug!(packet_namespace = %packet.namespace(), "packet for other namespace ignored");
        return None;
    }
    match packet {
        SocketPacket::Event { name, payload, .. } => {
            let decoded = match namespace {
                Namespace::Status => StatusEvent::from_socket_event(&name, payload)
                    .map(|e| e.map(|event| TagdeckEvent::Status { event })),
                Namespace::Terminal => TerminalEvent::from_socket_event(&name, payload)
                    .map(|e| e.map(|event| TagdeckEvent::Terminal { event })),
            };
            match decoded {
                Ok(Some(event)) => bus.emit_lossy(event),
                Ok(None) => debug!(namespace = %namespace, event = %name, "unhandled event"),
                Err(e) => warn!(namespace = %namespace, event = %name, error = %e, "malformed event payload"),
            }
            None
        }
        SocketPacket::Disconnect { .. } => Some(SessionEnd::Closed("server left namespace".to_string())),
        _ => None,
    }
}
