//! Async client for the i3 and sway IPC protocol
//!
//! The compositor exposes a Unix socket (advertised through `$I3SOCK` or
//! `$SWAYSOCK`). A client sends framed JSON requests on one connection and
//! receives pushed events on a second one after sending `SUBSCRIBE`.
//!
//! ## Architecture
//!
//! - `Connection`: cloneable handle for requests, subscriptions and handlers
//! - `ConnectionScope`: the running receive loop and handler tasks
//! - `Handler`: an event callback; identity survives cloning, for `off()`
//! - `EventStream`: events of one name as a `futures::Stream`
//! - `IpcError`: error type for every operation
//! - `Node`: the layout tree, with search helpers such as `find_focused()`
//!
//! ## Reconnecting
//!
//! With `auto_reconnect` enabled a dropped socket (for example during an
//! in-place compositor restart) is re-established transparently. Concurrent
//! tasks share a single reconnect, and the full subscription set is sent
//! again on the new subscription socket before anyone else can use it.

mod bus;
mod channel;
mod command;
mod config;
mod connection;
mod error;
mod event_loop;
mod events;
mod protocol;
mod reconnect;
mod replies;
mod scope;
mod socket_path;
mod stream;
mod tree;

#[cfg(test)]
mod test_support;

pub use bus::{EventKey, Handler};
pub use channel::{Channel, SocketReader, SocketWriter};
pub use config::{
    ConnectionConfig, ReconnectPolicy, DEFAULT_COMMAND_ATTEMPTS, DEFAULT_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY,
};
pub use connection::{Connection, ConnectionScope, ConnectionState};
pub use error::{HandlerError, IpcError, ProtocolError, ReconnectError};
pub use events::{
    BindingEvent, BindingInfo, InputEvent, IpcEvent, ModeEvent, OutputEvent, ShutdownEvent,
    TickEvent, WindowEvent, WorkspaceEvent,
};
pub use protocol::{
    decode_header, encode, encode_frame, subscribe_payload, EventType, Header, MessageType,
    EVENT_FLAG, HEADER_SIZE, MAGIC, MAX_PAYLOAD,
};
pub use replies::{
    decode_reply, BarColors, BarConfigReply, CommandReply, ConfigReply, InputReply, Node,
    OutputReply, Rect, SeatReply, SubscribeReply, TickReply, VersionReply, WorkspaceReply,
};
pub use socket_path::{find_socket_path, socket_path_from_env, COMPOSITOR_BINARIES, SOCKET_ENV_VARS};
pub use stream::EventStream;
pub use tree::SCRATCHPAD_WORKSPACE;

pub use regex::Regex;
