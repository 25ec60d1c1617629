//! The public connection handle

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, EventKey, Handler};
use crate::command::CommandSession;
use crate::config::ConnectionConfig;
use crate::error::IpcError;
use crate::event_loop;
use crate::protocol::{encode, subscribe_payload, EventType, MessageType};
use crate::reconnect::Reconnector;
use crate::replies::{
    decode_reply, BarConfigReply, CommandReply, ConfigReply, InputReply, Node, OutputReply,
    SeatReply, TickReply, VersionReply, WorkspaceReply,
};
use crate::scope::{self, TaskSpawner};
use crate::stream::EventStream;

/// Lifecycle of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    reconnector: Arc<Reconnector>,
    commands: CommandSession,
    bus: Arc<EventBus>,
    spawner: Mutex<Option<TaskSpawner>>,
}

/// A client connection to i3 or sway
///
/// Cheap to clone; clones share the sockets, the subscription set and the
/// registered handlers.
///
/// ```no_run
/// use wmipc::{Connection, ConnectionConfig, Handler, IpcEvent, IpcError};
///
/// # async fn example() -> Result<(), IpcError> {
/// let conn = Connection::new(ConnectionConfig::default());
/// conn.run(|conn| async move {
///     let on_new = Handler::sync(|event| {
///         if let IpcEvent::Window(window) = event {
///             println!("new window: {:?}", window.container.app_id);
///         }
///         Ok(())
///     });
///     conn.on("window::new", &on_new)?;
///     conn.command("workspace 1").await?;
///     std::future::pending::<Result<(), IpcError>>().await
/// })
/// .await
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        let reconnector = Arc::new(Reconnector::new(config));
        Self {
            inner: Arc::new(Inner {
                commands: CommandSession::new(reconnector.clone()),
                reconnector,
                bus: Arc::new(EventBus::default()),
                spawner: Mutex::new(None),
            }),
        }
    }

    /// The socket path, once configured or discovered
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.inner.reconnector.socket_path()
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.reconnector.auto_reconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.reconnector.state()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.reconnector.watch_state()
    }

    /// Categories the compositor has been asked to send
    pub fn subscriptions(&self) -> BTreeSet<EventType> {
        self.inner.reconnector.subscriptions()
    }

    /// Connect and start receiving events
    ///
    /// Events are only delivered while the returned scope is alive. The
    /// scope ends when it is closed or dropped, or when a handler fails.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::AlreadyConnected` if a scope is already running,
    /// or `IpcError::Reconnect` if no connection could be established.
    pub async fn connect(&self) -> Result<ConnectionScope, IpcError> {
        let (spawner, handle) = scope::start();
        {
            let mut slot = self.spawner_slot();
            if slot.is_some() {
                handle.abort();
                return Err(IpcError::AlreadyConnected);
            }
            *slot = Some(spawner.clone());
        }

        if let Err(e) = self.inner.reconnector.connect().await {
            handle.abort();
            self.detach();
            return Err(e);
        }

        spawner.spawn(event_loop::run(
            self.inner.reconnector.clone(),
            self.inner.bus.clone(),
            spawner.clone(),
        ));

        Ok(ConnectionScope {
            conn: self.clone(),
            handle: Some(handle),
            closed: false,
        })
    }

    /// Connect, run `body` and close again
    ///
    /// If the scope fails while `body` is running (a handler returned an
    /// error, reconnecting gave up) `body` is cancelled and the failure is
    /// returned instead.
    pub async fn run<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<IpcError>,
    {
        let mut scope = self.connect().await?;

        let result = tokio::select! {
            result = body(self.clone()) => result,
            outcome = scope.join() => Err(E::from(outcome.err().unwrap_or(IpcError::Closed))),
        };

        let closed = scope.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _) => Err(e),
        }
    }

    /// Register `handler` for `event` (`"window"` or `"window::new"`)
    ///
    /// The base category is subscribed to in the background. Without a
    /// running scope the category is recorded and subscribed on connect.
    pub fn on(&self, event: &str, handler: &Handler) -> Result<(), IpcError> {
        let key: EventKey = event.parse()?;
        let category = key.category;
        self.inner.bus.subscribe(key, handler.clone());

        let spawner = self.spawner_slot().clone();
        match spawner {
            Some(spawner) => {
                let conn = self.clone();
                spawner.spawn(async move { conn.subscribe([category], false).await });
            }
            None => {
                self.inner
                    .reconnector
                    .record_subscriptions(&BTreeSet::from([category]), false);
            }
        }

        Ok(())
    }

    /// Remove `handler` from every event it was registered for
    ///
    /// Returns the number of registrations removed. The compositor keeps
    /// sending the categories; they are no longer delivered to this handler.
    pub fn off(&self, handler: &Handler) -> usize {
        self.inner.bus.unsubscribe(handler)
    }

    /// Ask the compositor to send events of the given categories
    ///
    /// Categories already subscribed are skipped unless `force` is set; if
    /// nothing is left no request is sent. Only base categories are accepted.
    pub async fn subscribe<I>(&self, events: I, force: bool) -> Result<(), IpcError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut categories = BTreeSet::new();
        for event in events {
            let key: EventKey = event.as_ref().parse()?;
            if key.is_detailed() {
                return Err(IpcError::DetailedSubscription {
                    event: key.to_string(),
                    base: key.category.to_string(),
                });
            }
            categories.insert(key.category);
        }

        let pending = self
            .inner
            .reconnector
            .record_subscriptions(&categories, force);
        if pending.is_empty() {
            debug!("No new subscriptions");
            return Ok(());
        }

        self.send_subscribe(&pending).await
    }

    async fn send_subscribe(&self, events: &BTreeSet<EventType>) -> Result<(), IpcError> {
        let payload = subscribe_payload(events)?;
        let frame = encode(MessageType::Subscribe, &payload);
        let reconnector = &self.inner.reconnector;
        let max_attempts = reconnector.config().command_attempts.max(1);
        let _guard = self.inner.commands.lock().lock().await;

        let mut link = match reconnector.current() {
            Some(link) => link,
            None => {
                debug!("Not connected, subscriptions {} sent on connect", payload);
                return Ok(());
            }
        };

        let mut attempt = 1;
        loop {
            let sent = link.events_writer.lock().await.send(&frame).await;
            match sent {
                Ok(()) => {
                    debug!("Subscribed to {}", payload);
                    return Ok(());
                }
                Err(e)
                    if e.is_connection_error()
                        && reconnector.auto_reconnect()
                        && attempt < max_attempts =>
                {
                    warn!("Sending subscription failed: {}; reconnecting", e);
                    link = reconnector.ensure_connected(Some(link.generation)).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stream of events matching `event`
    ///
    /// The stream unregisters itself when dropped.
    pub fn events(&self, event: &str) -> Result<EventStream, IpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Handler::new(move |event| {
            let _ = tx.send(event);
            std::future::ready(Ok(()))
        });

        self.on(event, &handler)?;
        Ok(EventStream::new(self.clone(), handler, rx))
    }

    /// Send a raw request and return the reply payload
    pub async fn message(&self, kind: MessageType, payload: &str) -> Result<Vec<u8>, IpcError> {
        self.inner.commands.execute(kind, payload).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        kind: MessageType,
        payload: &str,
        what: &'static str,
    ) -> Result<T, IpcError> {
        let reply = self.message(kind, payload).await?;
        decode_reply(what, &reply)
    }

    /// Run a command string; one result per command it contains
    pub async fn command(&self, command: &str) -> Result<Vec<CommandReply>, IpcError> {
        let reply = self.message(MessageType::RunCommand, command).await?;
        if reply.is_empty() {
            return Ok(Vec::new());
        }
        decode_reply("command", &reply)
    }

    pub async fn get_version(&self) -> Result<VersionReply, IpcError> {
        self.request(MessageType::GetVersion, "", "version").await
    }

    /// Ids of all configured bars
    pub async fn get_bar_config_list(&self) -> Result<Vec<String>, IpcError> {
        self.request(MessageType::GetBarConfig, "", "bar config list")
            .await
    }

    /// Configuration of the bar with `id`, or of the first bar
    ///
    /// Returns `None` when `id` is not given and no bar is configured.
    pub async fn get_bar_config(&self, id: Option<&str>) -> Result<Option<BarConfigReply>, IpcError> {
        let id = match id {
            Some(id) => id.to_string(),
            None => match self.get_bar_config_list().await?.into_iter().next() {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        self.request(MessageType::GetBarConfig, &id, "bar config")
            .await
            .map(Some)
    }

    pub async fn get_outputs(&self) -> Result<Vec<OutputReply>, IpcError> {
        self.request(MessageType::GetOutputs, "", "outputs").await
    }

    pub async fn get_workspaces(&self) -> Result<Vec<WorkspaceReply>, IpcError> {
        self.request(MessageType::GetWorkspaces, "", "workspaces")
            .await
    }

    /// The layout tree as untyped JSON
    pub async fn get_raw_tree(&self) -> Result<serde_json::Value, IpcError> {
        self.request(MessageType::GetTree, "", "tree").await
    }

    pub async fn get_tree(&self) -> Result<Node, IpcError> {
        self.request(MessageType::GetTree, "", "tree").await
    }

    pub async fn get_marks(&self) -> Result<Vec<String>, IpcError> {
        self.request(MessageType::GetMarks, "", "marks").await
    }

    pub async fn get_binding_modes(&self) -> Result<Vec<String>, IpcError> {
        self.request(MessageType::GetBindingModes, "", "binding modes")
            .await
    }

    /// The last loaded configuration file
    pub async fn get_config(&self) -> Result<ConfigReply, IpcError> {
        self.request(MessageType::GetConfig, "", "config").await
    }

    /// Broadcast a tick event with `payload` to every subscribed client
    pub async fn send_tick(&self, payload: &str) -> Result<TickReply, IpcError> {
        self.request(MessageType::SendTick, payload, "tick").await
    }

    /// Input devices (sway only)
    pub async fn get_inputs(&self) -> Result<Vec<InputReply>, IpcError> {
        self.request(MessageType::GetInputs, "", "inputs").await
    }

    /// Seats (sway only)
    pub async fn get_seats(&self) -> Result<Vec<SeatReply>, IpcError> {
        self.request(MessageType::GetSeats, "", "seats").await
    }

    fn spawner_slot(&self) -> std::sync::MutexGuard<'_, Option<TaskSpawner>> {
        self.inner
            .spawner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self) {
        self.spawner_slot().take();
        self.inner.reconnector.detach();
    }

    async fn teardown(&self) {
        self.spawner_slot().take();
        self.inner.reconnector.close().await;
    }
}

/// A running connection: the receive loop and its handler tasks
///
/// Dropping the scope aborts its tasks and closes the sockets.
pub struct ConnectionScope {
    conn: Connection,
    handle: Option<JoinHandle<Result<(), IpcError>>>,
    closed: bool,
}

impl ConnectionScope {
    /// Wait until the scope fails
    ///
    /// Resolves with the first task error: a failed handler, an exhausted
    /// reconnect or a protocol violation. Cancel-safe.
    pub async fn join(&mut self) -> Result<(), IpcError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };

        let outcome = flatten(handle.await);
        self.handle = None;
        outcome
    }

    /// Stop the scope and close the sockets
    ///
    /// Returns the scope's failure if it had already failed.
    pub async fn close(mut self) -> Result<(), IpcError> {
        let outcome = match self.handle.take() {
            Some(handle) if handle.is_finished() => flatten(handle.await),
            Some(handle) => {
                handle.abort();
                let _ = handle.await;
                Ok(())
            }
            None => Ok(()),
        };

        self.closed = true;
        self.conn.teardown().await;
        info!("Connection scope closed");
        outcome
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.conn.detach();
    }
}

fn flatten(
    joined: Result<Result<(), IpcError>, tokio::task::JoinError>,
) -> Result<(), IpcError> {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(IpcError::TaskPanicked),
        Err(_) => Ok(()),
    }
}
