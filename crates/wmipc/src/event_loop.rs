//! Receive loop of the subscription socket

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::bus::EventBus;
use crate::error::IpcError;
use crate::events::IpcEvent;
use crate::protocol::EventType;
use crate::reconnect::Reconnector;
use crate::scope::TaskSpawner;

/// Read frames from the subscription socket and dispatch events until the
/// connection fails
///
/// Replies to SUBSCRIBE arrive on the same socket and are discarded. Without
/// auto-reconnect a lost socket ends the loop with the connection error.
///
/// When another task publishes a newer link (a reconnect started from the
/// command side) the loop moves over to it; the new subscription socket is
/// the one that carries the replayed and any later subscriptions.
pub(crate) async fn run(
    reconnector: Arc<Reconnector>,
    bus: Arc<EventBus>,
    spawner: TaskSpawner,
) -> Result<(), IpcError> {
    let mut generations = reconnector.watch_generation();

    loop {
        let link = reconnector.current().ok_or(IpcError::NotConnected)?;
        let frame = {
            let mut reader = link.events_reader.lock().await;
            tokio::select! {
                frame = reader.read_frame() => frame,
                () = superseded(&mut generations, link.generation) => {
                    debug!(generation = link.generation, "Subscription socket superseded by a newer link");
                    continue;
                }
            }
        };

        let (header, payload) = match frame {
            Ok(frame) => frame,
            Err(e) if e.is_connection_error() && reconnector.auto_reconnect() => {
                warn!("Subscription socket lost: {}; reconnecting", e);
                reconnector.ensure_connected(Some(link.generation)).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        if !header.is_event() {
            trace!(
                tag = header.tag,
                "Discarding reply on subscription socket: {}",
                String::from_utf8_lossy(&payload)
            );
            continue;
        }

        let Some(category) = EventType::from_tag(header.tag) else {
            debug!(tag = header.tag, "Ignoring event of unknown category");
            continue;
        };

        let event = match IpcEvent::decode(category, &payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping {} event: {}", category, e);
                continue;
            }
        };

        debug!(event = %category, detail = event.change().unwrap_or(""), "Received event");
        bus.dispatch(Arc::new(event), &spawner).await?;
    }
}

/// Resolves once a link newer than `generation` has been published
async fn superseded(generations: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        let published = *generations.borrow_and_update();
        if published > generation {
            return;
        }
        if generations.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Handler;
    use crate::config::ConnectionConfig;
    use crate::protocol::{encode, subscribe_payload, MessageType};
    use crate::scope;
    use crate::test_support::FakeCompositor;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        fake: FakeCompositor,
        reconnector: Arc<Reconnector>,
        bus: Arc<EventBus>,
        events: mpsc::UnboundedReceiver<Arc<IpcEvent>>,
    }

    async fn harness(categories: &[EventType]) -> Harness {
        let fake = FakeCompositor::start().await;
        let reconnector = Arc::new(Reconnector::new(ConnectionConfig::with_socket_path(
            fake.path(),
        )));
        let link = reconnector.connect().await.unwrap();

        let bus = Arc::new(EventBus::default());
        let (tx, events) = mpsc::unbounded_channel();
        for category in categories {
            let tx = tx.clone();
            bus.subscribe(
                (*category).into(),
                Handler::new(move |event| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(event);
                        Ok(())
                    }
                }),
            );
        }

        let payload = subscribe_payload(categories).unwrap();
        link.events_writer
            .lock()
            .await
            .send(&encode(MessageType::Subscribe, &payload))
            .await
            .unwrap();
        fake.wait_for_subscribes(1).await;

        Harness {
            fake,
            reconnector,
            bus,
            events,
        }
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<Arc<IpcEvent>>) -> Arc<IpcEvent> {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("no event received")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_events_are_decoded_and_dispatched() {
        let mut h = harness(&[EventType::Window]).await;
        let (spawner, _scope) = scope::start();
        let task = tokio::spawn(run(h.reconnector.clone(), h.bus.clone(), spawner));

        h.fake
            .emit(EventType::Window, r#"{"change":"focus","container":{"id":5}}"#)
            .await;

        let event = next(&mut h.events).await;
        assert_eq!(event.change(), Some("focus"));
        task.abort();
    }

    #[tokio::test]
    async fn test_undecodable_event_is_skipped() {
        let mut h = harness(&[EventType::Mode]).await;
        let (spawner, _scope) = scope::start();
        let task = tokio::spawn(run(h.reconnector.clone(), h.bus.clone(), spawner));

        h.fake.emit(EventType::Mode, "{not json").await;
        h.fake.emit(EventType::Mode, r#"{"change":"resize"}"#).await;

        let event = next(&mut h.events).await;
        assert_eq!(event.change(), Some("resize"));
        task.abort();
    }

    #[tokio::test]
    async fn test_unknown_category_is_ignored() {
        let mut h = harness(&[EventType::Output]).await;
        let (spawner, _scope) = scope::start();
        let task = tokio::spawn(run(h.reconnector.clone(), h.bus.clone(), spawner));

        h.fake.emit_raw(crate::protocol::EVENT_FLAG | 20, "{}").await;
        h.fake.emit(EventType::Output, r#"{"change":"unspecified"}"#).await;

        let event = next(&mut h.events).await;
        assert_eq!(event.event_type(), EventType::Output);
        task.abort();
    }

    #[tokio::test]
    async fn test_lost_socket_ends_loop_without_auto_reconnect() {
        let h = harness(&[EventType::Window]).await;
        let (spawner, _scope) = scope::start();
        let task = tokio::spawn(run(h.reconnector.clone(), h.bus.clone(), spawner));

        h.fake.drop_connections().await;

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop kept running")
            .unwrap();
        assert!(result.unwrap_err().is_connection_error());
    }

    #[tokio::test]
    async fn test_bad_magic_ends_loop() {
        let h = harness(&[EventType::Tick]).await;
        let (spawner, _scope) = scope::start();
        let task = tokio::spawn(run(h.reconnector.clone(), h.bus.clone(), spawner));

        h.fake.emit_corrupt().await;

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop kept running")
            .unwrap();
        assert!(matches!(result, Err(IpcError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_loop_follows_link_published_elsewhere() {
        let mut h = harness(&[EventType::Window]).await;
        h.reconnector
            .record_subscriptions(&BTreeSet::from([EventType::Window]), false);
        let (spawner, _scope) = scope::start();
        let task = tokio::spawn(run(h.reconnector.clone(), h.bus.clone(), spawner));

        // A reconnect started by another task, with the old sockets still open.
        let link = h.reconnector.ensure_connected(Some(1)).await.unwrap();
        assert_eq!(link.generation, 2);
        h.fake.wait_until_subscribed_after(2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.fake
            .emit(EventType::Window, r#"{"change":"new","container":{"id":7}}"#)
            .await;

        let event = next(&mut h.events).await;
        assert_eq!(event.change(), Some("new"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err(), "event delivered twice");
        task.abort();
    }
}
