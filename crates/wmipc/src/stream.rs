//! Events as a `futures::Stream`

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::bus::Handler;
use crate::connection::Connection;
use crate::events::IpcEvent;

/// Events matching one name, as returned by
/// [`Connection::events`](crate::Connection::events)
///
/// The stream never ends on its own; dropping it removes its handler.
pub struct EventStream {
    events: UnboundedReceiverStream<Arc<IpcEvent>>,
    conn: Connection,
    handler: Handler,
}

impl EventStream {
    pub(crate) fn new(
        conn: Connection,
        handler: Handler,
        rx: mpsc::UnboundedReceiver<Arc<IpcEvent>>,
    ) -> Self {
        Self {
            events: UnboundedReceiverStream::new(rx),
            conn,
            handler,
        }
    }
}

impl Stream for EventStream {
    type Item = Arc<IpcEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.conn.off(&self.handler);
    }
}
