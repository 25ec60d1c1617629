//! Event handler registry and dispatch

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tracing::trace;

use crate::error::{HandlerError, IpcError};
use crate::events::IpcEvent;
use crate::protocol::EventType;
use crate::scope::TaskSpawner;

type HandlerFn = dyn Fn(Arc<IpcEvent>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync;

/// A callback invoked for matching events
///
/// Clones share identity: a clone of the handler passed to
/// [`Connection::on`](crate::Connection::on) can later be passed to
/// [`Connection::off`](crate::Connection::off).
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap an asynchronous callback
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<IpcEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |event| -> BoxFuture<'static, Result<(), HandlerError>> {
                Box::pin(f(event))
            }),
        }
    }

    /// Wrap a synchronous callback
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&IpcEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(move |event: Arc<IpcEvent>| -> BoxFuture<'static, Result<(), HandlerError>> {
                Box::pin(std::future::ready(f(&event)))
            }),
        }
    }

    pub(crate) fn call(&self, event: Arc<IpcEvent>) -> BoxFuture<'static, Result<(), HandlerError>> {
        (self.inner)(event)
    }

    fn id(&self) -> *const () {
        Arc::as_ptr(&self.inner) as *const ()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id()).finish()
    }
}

/// An event name: a category, optionally narrowed to one detail
///
/// Parsed from `"window"` or `"window::new"`; `-` is accepted in place of `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub category: EventType,
    pub detail: Option<String>,
}

impl EventKey {
    /// Key matching every event of `category`
    pub fn category(category: EventType) -> Self {
        Self {
            category,
            detail: None,
        }
    }

    /// Whether the key is narrowed to a detail
    pub fn is_detailed(&self) -> bool {
        self.detail.is_some()
    }
}

impl From<EventType> for EventKey {
    fn from(category: EventType) -> Self {
        Self::category(category)
    }
}

impl FromStr for EventKey {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, detail) = match s.split_once("::") {
            Some((category, detail)) => (category, Some(detail)),
            None => (s, None),
        };

        let category = category
            .parse::<EventType>()
            .map_err(|_| IpcError::UnknownEvent(s.to_string()))?;
        let detail = detail
            .filter(|d| !d.is_empty())
            .map(|d| d.replace('-', "_"));

        Ok(Self { category, detail })
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}::{}", self.category, detail),
            None => write!(f, "{}", self.category),
        }
    }
}

/// Handler registrations of one connection
#[derive(Default)]
pub(crate) struct EventBus {
    handlers: RwLock<HashMap<EventKey, Vec<Handler>>>,
}

impl EventBus {
    /// Register `handler` for `key`; registering it twice on one key is a no-op
    pub(crate) fn subscribe(&self, key: EventKey, handler: Handler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = handlers.entry(key).or_default();
        if !bucket.contains(&handler) {
            bucket.push(handler);
        }
    }

    /// Remove `handler` from every key; returns how many registrations went away
    pub(crate) fn unsubscribe(&self, handler: &Handler) -> usize {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        handlers.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|h| h != handler);
            removed += before - bucket.len();
            !bucket.is_empty()
        });

        removed
    }

    /// Handlers interested in an event of `category` with the given detail
    pub(crate) fn handlers_for(&self, category: EventType, detail: Option<&str>) -> Vec<Handler> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut matched = Vec::new();

        if let Some(bucket) = handlers.get(&EventKey::category(category)) {
            matched.extend(bucket.iter().cloned());
        }

        if let Some(detail) = detail {
            let key = EventKey {
                category,
                detail: Some(detail.to_string()),
            };
            if let Some(bucket) = handlers.get(&key) {
                matched.extend(bucket.iter().cloned());
            }
        }

        matched
    }

    /// Deliver `event` to every matching handler
    ///
    /// A single handler runs inline and its error is returned. With several,
    /// each runs as its own task in the scope and errors fail the scope.
    pub(crate) async fn dispatch(
        &self,
        event: Arc<IpcEvent>,
        spawner: &TaskSpawner,
    ) -> Result<(), IpcError> {
        let mut handlers = self.handlers_for(event.event_type(), event.change());
        trace!(
            event = %event.event_type(),
            detail = event.change().unwrap_or(""),
            handlers = handlers.len(),
            "Dispatching event"
        );

        if handlers.len() == 1 {
            if let Some(handler) = handlers.pop() {
                handler.call(event).await.map_err(IpcError::Handler)?;
            }
            return Ok(());
        }

        for handler in handlers {
            let event = Arc::clone(&event);
            spawner.spawn(async move { handler.call(event).await.map_err(IpcError::Handler) });
        }

        Ok(())
    }
}
