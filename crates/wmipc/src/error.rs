//! Error types for IPC operations

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::MessageType;

/// Error returned by a registered event handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Violations of the wire protocol
///
/// These indicate a corrupted stream or an incompatible peer and are never
/// retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame did not start with the `i3-ipc` magic string
    #[error("Invalid frame magic {found:?}, expected \"i3-ipc\"")]
    BadMagic { found: [u8; 6] },

    /// The reply tag does not match the request that produced it
    #[error("Reply type {actual} does not match request {expected:?}")]
    ReplyMismatch { expected: MessageType, actual: u32 },

    /// The header announced a payload larger than we are willing to buffer
    #[error("Payload of {length} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { length: u32, limit: u32 },
}

/// A connect or reconnect cycle that gave up
///
/// The same value is handed to every caller that waited on the cycle, so it
/// is cheap to clone.
#[derive(Debug, Clone, Error)]
#[error("Failed to connect to the IPC socket after {attempts} attempt(s): {last_error}")]
pub struct ReconnectError {
    /// Number of connection attempts made
    pub attempts: u32,
    /// The error from the final attempt
    #[source]
    pub last_error: Arc<IpcError>,
}

/// Errors that can occur when talking to the compositor
#[derive(Debug, Error)]
pub enum IpcError {
    /// No socket path was configured and none could be discovered
    #[error("No IPC socket found - set I3SOCK or SWAYSOCK, or pass a socket path")]
    SocketNotFound,

    /// Failed to open a socket
    #[error("Failed to connect to IPC socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The socket broke while reading or writing
    #[error("Connection to the compositor lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    /// The peer closed the socket in the middle of a frame
    #[error("Premature end of message ({remaining} of {expected} bytes missing)")]
    PrematureEnd { expected: usize, remaining: usize },

    /// The operation needs a live connection
    #[error("Not connected to the compositor")]
    NotConnected,

    /// `connect()` was called while a scope is already running
    #[error("Connection is already active")]
    AlreadyConnected,

    /// The wire protocol was violated
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Reconnecting failed
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),

    /// A reply or event payload did not match its expected shape
    #[error("Failed to decode {what} payload: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize a request payload
    #[error("Failed to encode request payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// SUBSCRIBE may only be sent on the subscription socket
    #[error("Cannot send SUBSCRIBE on the command socket; use subscribe() instead")]
    SubscribeOnCommandSocket,

    /// Only base event categories can be sent to the compositor
    #[error("Only non-detailed events are subscribable (use `{base}` instead of `{event}`)")]
    DetailedSubscription { event: String, base: String },

    /// The event name is not a known category
    #[error("Unknown event `{0}`")]
    UnknownEvent(String),

    /// A registered event handler returned an error
    #[error("Event handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// A task in the connection scope panicked
    #[error("A task in the connection scope panicked")]
    TaskPanicked,

    /// The connection scope ended without an error
    #[error("Connection closed")]
    Closed,
}

impl IpcError {
    /// Whether the error means the transport went away
    ///
    /// Only these errors are recovered by reconnecting.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            IpcError::ConnectionLost(_) | IpcError::PrematureEnd { .. }
        )
    }

    /// Whether a reconnect cycle should keep trying after this error
    pub(crate) fn is_retryable(&self) -> bool {
        !matches!(self, IpcError::SocketNotFound)
    }

    pub(crate) fn decode(what: &'static str) -> impl FnOnce(serde_json::Error) -> IpcError {
        move |source| IpcError::Decode { what, source }
    }
}
