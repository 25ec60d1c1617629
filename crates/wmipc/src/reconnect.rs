//! Connection establishment and single-flight reconnects
//!
//! A [`Link`] is one physical connection: a command socket and a
//! subscription socket opened together. Each link gets a new generation
//! number. When any task sees a link fail it calls
//! [`Reconnector::ensure_connected`] with that link's generation; all tasks
//! that arrive while a cycle is running wait on the same shared future, so
//! the compositor sees exactly one reconnect and one replayed SUBSCRIBE.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::{Channel, SocketReader, SocketWriter};
use crate::command::CommandSocket;
use crate::config::ConnectionConfig;
use crate::connection::ConnectionState;
use crate::error::{IpcError, ReconnectError};
use crate::protocol::{encode, subscribe_payload, EventType, MessageType};
use crate::socket_path::find_socket_path;

type CycleFuture = Shared<BoxFuture<'static, Result<Arc<Link>, ReconnectError>>>;

/// One physical connection to the compositor
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) generation: u64,
    pub(crate) command: tokio::sync::Mutex<CommandSocket>,
    pub(crate) events_writer: tokio::sync::Mutex<SocketWriter>,
    pub(crate) events_reader: tokio::sync::Mutex<SocketReader>,
}

impl Link {
    /// Shut down both sockets unless another task is using them
    async fn shutdown(&self) {
        if let Ok(mut command) = self.command.try_lock() {
            command.close().await;
        }
        if let Ok(mut writer) = self.events_writer.try_lock() {
            writer.close().await;
        }
    }
}

/// Owns the current link, the subscription set and the reconnect latch
pub(crate) struct Reconnector {
    config: ConnectionConfig,
    resolved_path: Mutex<Option<PathBuf>>,
    link: RwLock<Option<Arc<Link>>>,
    in_flight: Mutex<Option<(u64, CycleFuture)>>,
    cycles: AtomicU64,
    generation: AtomicU64,
    published: watch::Sender<u64>,
    active: AtomicBool,
    subscriptions: Mutex<BTreeSet<EventType>>,
    state: watch::Sender<ConnectionState>,
}

impl Reconnector {
    pub(crate) fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (published, _) = watch::channel(0);
        Self {
            resolved_path: Mutex::new(config.socket_path.clone()),
            config,
            link: RwLock::new(None),
            in_flight: Mutex::new(None),
            cycles: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            published,
            active: AtomicBool::new(false),
            subscriptions: Mutex::new(BTreeSet::new()),
            state,
        }
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn auto_reconnect(&self) -> bool {
        self.config.auto_reconnect
    }

    /// The socket path in use, once known
    pub(crate) fn socket_path(&self) -> Option<PathBuf> {
        self.resolved_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receiver of the generation of each newly published link
    pub(crate) fn watch_generation(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }

    /// The link currently published, if any
    pub(crate) fn current(&self) -> Option<Arc<Link>> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the subscription set
    pub(crate) fn subscriptions(&self) -> BTreeSet<EventType> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add categories to the subscription set
    ///
    /// Unless `force` is set, only the categories not yet in the set are
    /// returned; those are the ones that still have to be sent.
    pub(crate) fn record_subscriptions(
        &self,
        events: &BTreeSet<EventType>,
        force: bool,
    ) -> BTreeSet<EventType> {
        let mut current = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let pending: BTreeSet<EventType> = if force {
            events.clone()
        } else {
            events.difference(&current).copied().collect()
        };
        current.extend(pending.iter().copied());
        pending
    }

    /// Open the first link of a connection scope
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<Arc<Link>, IpcError> {
        self.active.store(true, Ordering::SeqCst);
        self.ensure_connected(None).await
    }

    /// Return a usable link, reconnecting if needed
    ///
    /// `stale` is the generation of the link the caller saw fail. If a newer
    /// link already exists it is returned right away; otherwise the caller
    /// joins the running cycle or starts one.
    pub(crate) async fn ensure_connected(
        self: &Arc<Self>,
        stale: Option<u64>,
    ) -> Result<Arc<Link>, IpcError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(IpcError::NotConnected);
        }

        let cycle = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(link) = self.current() {
                if Some(link.generation) != stale {
                    return Ok(link);
                }
            }

            match in_flight.as_ref() {
                Some((_, cycle)) => {
                    debug!("Joining reconnect already in progress");
                    cycle.clone()
                }
                None => {
                    let id = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
                    let this = Arc::clone(self);
                    let cycle = async move { this.run_cycle(id).await }.boxed().shared();
                    *in_flight = Some((id, cycle.clone()));
                    cycle
                }
            }
        };

        Ok(cycle.await?)
    }

    /// Forget the current link without waiting for its sockets
    ///
    /// The sockets close once the last task holding the link lets go of it.
    pub(crate) fn detach(&self) -> Option<Arc<Link>> {
        self.active.store(false, Ordering::SeqCst);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let link = self
            .link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.send_replace(ConnectionState::Disconnected);
        link
    }

    /// Close and forget the current link
    pub(crate) async fn close(&self) {
        if let Some(link) = self.detach() {
            link.shutdown().await;
            info!(generation = link.generation, "Closed IPC connection");
        }
    }

    /// One connect cycle; `id` identifies it in the in-flight slot
    ///
    /// A cycle that is no longer in the slot (its scope was closed while it
    /// ran) neither publishes its link nor touches the slot.
    async fn run_cycle(self: Arc<Self>, id: u64) -> Result<Arc<Link>, ReconnectError> {
        self.state.send_replace(ConnectionState::Connecting);

        let policy = self.config.reconnect;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            if !self.active.load(Ordering::SeqCst) {
                break Err(IpcError::NotConnected);
            }

            match self.open_link().await {
                Ok(link) => break Ok(link),
                Err(e) if !e.is_retryable() || attempts >= max_attempts => break Err(e),
                Err(e) => {
                    debug!("Connection attempt {}/{} failed: {}", attempts, max_attempts, e);
                    tokio::time::sleep(policy.delay).await;
                }
            }
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let current = matches!(in_flight.as_ref(), Some((slot, _)) if *slot == id);
        if !current {
            debug!(cycle = id, "Discarding result of superseded connect cycle");
            return Err(ReconnectError {
                attempts,
                last_error: Arc::new(IpcError::NotConnected),
            });
        }

        let result = match outcome {
            Ok(link) if self.active.load(Ordering::SeqCst) => {
                *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link.clone());
                self.published.send_replace(link.generation);
                self.state.send_replace(ConnectionState::Connected);
                info!(
                    generation = link.generation,
                    attempts, "Connected to IPC socket"
                );
                Ok(link)
            }
            Ok(_) => Err(ReconnectError {
                attempts,
                last_error: Arc::new(IpcError::NotConnected),
            }),
            Err(e) => {
                warn!("Giving up connecting after {} attempt(s): {}", attempts, e);
                self.state.send_replace(ConnectionState::Disconnected);
                Err(ReconnectError {
                    attempts,
                    last_error: Arc::new(e),
                })
            }
        };
        *in_flight = None;
        result
    }

    /// Open both sockets and replay the subscription set
    ///
    /// The SUBSCRIBE goes out on the new subscription socket before the link
    /// is visible to any other task.
    async fn open_link(&self) -> Result<Arc<Link>, IpcError> {
        let path = self.resolve_path().await?;

        let command = Channel::connect(&path).await?;
        let (reader, mut writer) = Channel::connect(&path).await?.into_split();

        let subscriptions = self.subscriptions();
        if !subscriptions.is_empty() {
            let payload = subscribe_payload(&subscriptions)?;
            writer.send(&encode(MessageType::Subscribe, &payload)).await?;
            debug!("Replayed subscriptions: {}", payload);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Link {
            generation,
            command: tokio::sync::Mutex::new(CommandSocket::new(command, path)),
            events_writer: tokio::sync::Mutex::new(writer),
            events_reader: tokio::sync::Mutex::new(reader),
        }))
    }

    async fn resolve_path(&self) -> Result<PathBuf, IpcError> {
        if let Some(path) = self.socket_path() {
            return Ok(path);
        }

        let path = find_socket_path(self.config.query_compositor).await?;
        *self
            .resolved_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(path.clone());
        Ok(path)
    }
}
