//! Connection settings

use std::path::PathBuf;
use std::time::Duration;

/// Default number of reconnect attempts before giving up
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 250;

/// Default fixed delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(10);

/// Default number of attempts for a single command exchange
pub const DEFAULT_COMMAND_ATTEMPTS: u32 = 5;

/// How a lost connection is re-established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connection attempts per reconnect cycle
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Settings for a [`Connection`](crate::Connection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Socket to connect to; discovered from the environment when `None`
    pub socket_path: Option<PathBuf>,
    /// Reconnect transparently when the compositor drops the socket
    pub auto_reconnect: bool,
    /// Retry behaviour of a reconnect cycle
    pub reconnect: ReconnectPolicy,
    /// Total attempts for one command exchange when auto-reconnect is on
    pub command_attempts: u32,
    /// Ask `i3`/`sway --get-socketpath` when the environment has no socket
    pub query_compositor: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            auto_reconnect: false,
            reconnect: ReconnectPolicy::default(),
            command_attempts: DEFAULT_COMMAND_ATTEMPTS,
            query_compositor: true,
        }
    }
}

impl ConnectionConfig {
    /// Settings for a fixed socket path
    pub fn with_socket_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Enable or disable auto-reconnect
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}
