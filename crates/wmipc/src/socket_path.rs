//! IPC socket discovery
//!
//! The compositor advertises its socket through the environment. i3 sets
//! `I3SOCK`, sway sets `SWAYSOCK` (and usually `I3SOCK` too). When neither is
//! usable the compositor binaries can be asked with `--get-socketpath`.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::IpcError;

/// Environment variables checked, in priority order
pub const SOCKET_ENV_VARS: [&str; 2] = ["I3SOCK", "SWAYSOCK"];

/// Compositor binaries queried when the environment has no usable socket
pub const COMPOSITOR_BINARIES: [&str; 2] = ["i3", "sway"];

/// Find the socket path from the environment
///
/// Returns the first variable of [`SOCKET_ENV_VARS`] that is set and points
/// at an existing path.
pub fn socket_path_from_env() -> Option<PathBuf> {
    for var in SOCKET_ENV_VARS {
        let Ok(value) = std::env::var(var) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }

        let path = PathBuf::from(value);
        if path.exists() {
            info!("Using socket path from {}: {}", var, path.display());
            return Some(path);
        }
        debug!("{} points at a missing file: {}", var, path.display());
    }

    None
}

/// Ask a compositor binary for its socket path
async fn socket_path_from_binary(binary: &str) -> Option<PathBuf> {
    let output = match Command::new(binary).arg("--get-socketpath").output().await {
        Ok(output) => output,
        Err(e) => {
            debug!("Could not run {} --get-socketpath: {}", binary, e);
            return None;
        }
    };

    if !output.status.success() {
        debug!("{} --get-socketpath exited with {}", binary, output.status);
        return None;
    }

    let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    if path.as_os_str().is_empty() || !path.exists() {
        debug!("{} reported an unusable socket path: {}", binary, path.display());
        return None;
    }

    info!("Using socket path reported by {}: {}", binary, path.display());
    Some(path)
}

/// Resolve the compositor's IPC socket
///
/// Checks [`SOCKET_ENV_VARS`] in order, then (when `query_compositor` is set)
/// the output of each of [`COMPOSITOR_BINARIES`].
///
/// # Errors
///
/// Returns `IpcError::SocketNotFound` if no candidate exists.
pub async fn find_socket_path(query_compositor: bool) -> Result<PathBuf, IpcError> {
    if let Some(path) = socket_path_from_env() {
        return Ok(path);
    }

    if query_compositor {
        for binary in COMPOSITOR_BINARIES {
            if let Some(path) = socket_path_from_binary(binary).await {
                return Ok(path);
            }
        }
    }

    info!("Could not find an IPC socket path");
    Err(IpcError::SocketNotFound)
}
