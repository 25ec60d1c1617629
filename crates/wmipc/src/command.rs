//! Request/reply exchanges on the command socket

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{IpcError, ProtocolError};
use crate::protocol::{encode, MessageType};
use crate::reconnect::{Link, Reconnector};

/// The command socket of a link
///
/// An exchange that was cancelled half-way leaves its request or reply on
/// the socket. The socket is then marked interrupted and reopened on next
/// use, so the stale reply never reaches the next request. The subscription
/// socket of the link is not affected.
#[derive(Debug)]
pub(crate) struct CommandSocket {
    channel: Channel,
    path: PathBuf,
    interrupted: bool,
}

impl CommandSocket {
    pub(crate) fn new(channel: Channel, path: PathBuf) -> Self {
        Self {
            channel,
            path,
            interrupted: false,
        }
    }

    pub(crate) async fn close(&mut self) {
        self.channel.close().await;
    }

    async fn reopen(&mut self) -> Result<(), IpcError> {
        debug!(path = %self.path.display(), "Previous request was cancelled, reopening command socket");
        let channel = Channel::connect(&self.path).await.map_err(|e| match e {
            // The compositor went away; let the caller treat it as a lost link
            IpcError::ConnectionFailed { source, .. } => IpcError::ConnectionLost(source),
            e => e,
        })?;

        let mut stale = std::mem::replace(&mut self.channel, channel);
        stale.close().await;
        self.interrupted = false;
        Ok(())
    }

    async fn exchange(&mut self, kind: MessageType, frame: &[u8]) -> Result<Vec<u8>, IpcError> {
        if self.interrupted {
            self.reopen().await?;
        }

        self.interrupted = true;
        self.channel.send(frame).await?;
        let header = self.channel.read_header().await?;
        if header.tag != kind.code() {
            return Err(ProtocolError::ReplyMismatch {
                expected: kind,
                actual: header.tag,
            }
            .into());
        }
        let payload = self.channel.receive(header.length as usize).await?;
        self.interrupted = false;

        Ok(payload)
    }
}

/// Serializes requests and retries them across reconnects
pub(crate) struct CommandSession {
    reconnector: Arc<Reconnector>,
    lock: Arc<Mutex<()>>,
}

impl CommandSession {
    pub(crate) fn new(reconnector: Arc<Reconnector>) -> Self {
        Self {
            reconnector,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The exclusive-access lock shared by requests and subscribe frames
    pub(crate) fn lock(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }

    /// Send one request and return the raw reply payload
    ///
    /// With auto-reconnect enabled a lost connection is re-established and
    /// the request sent again, up to the configured number of attempts.
    pub(crate) async fn execute(
        &self,
        kind: MessageType,
        payload: &str,
    ) -> Result<Vec<u8>, IpcError> {
        if kind == MessageType::Subscribe {
            return Err(IpcError::SubscribeOnCommandSocket);
        }

        let frame = encode(kind, payload);
        let max_attempts = self.reconnector.config().command_attempts.max(1);
        let _guard = self.lock.lock().await;

        let mut attempt = 1;
        loop {
            let link = self.reconnector.current().ok_or(IpcError::NotConnected)?;

            match exchange(&link, kind, &frame).await {
                Ok(reply) => {
                    debug!(?kind, length = reply.len(), "Received reply");
                    return Ok(reply);
                }
                Err(e)
                    if e.is_connection_error()
                        && self.reconnector.auto_reconnect()
                        && attempt < max_attempts =>
                {
                    warn!(
                        "Request {:?} failed (attempt {}/{}): {}; reconnecting",
                        kind, attempt, max_attempts, e
                    );
                    self.reconnector
                        .ensure_connected(Some(link.generation))
                        .await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn exchange(link: &Link, kind: MessageType, frame: &[u8]) -> Result<Vec<u8>, IpcError> {
    debug!(?kind, generation = link.generation, "Sending request");
    link.command.lock().await.exchange(kind, frame).await
}
