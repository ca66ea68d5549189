//! Common error types for tagdeck

use thiserror::Error;

/// Common result type for tagdeck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across tagdeck crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to the backend (connect, timeout, socket closed)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success HTTP status
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Malformed frame or payload on a socket channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Push message shape the client does not implement.
    ///
    /// Raised instead of dropping the message: a dropped update leaves the
    /// view stale with no way to notice.
    #[error("Unsupported push update: {0}")]
    UnsupportedPush(String),

    /// A component asked for a provider that was never installed in its scope
    #[error("Missing context: {0}")]
    MissingContext(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}
