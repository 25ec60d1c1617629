//! Configuration data model

use std::path::PathBuf;

/// Default fixed delay between reconnect attempts, in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 10;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub global: GlobalConfig,
    pub connection: ConnectionSettings,
}

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// The level as a `tracing` filter directive
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// How to reach the compositor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Explicit socket path; discovered from the environment when unset
    pub socket_path: Option<PathBuf>,
    pub auto_reconnect: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub command_attempts: u32,
    /// Fall back to `i3`/`sway --get-socketpath`
    pub query_compositor: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            auto_reconnect: false,
            reconnect_attempts: 250,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            command_attempts: 5,
            query_compositor: true,
        }
    }
}
