//! Wire format of the i3/sway IPC protocol
//!
//! Every message on either socket is a frame:
//!
//! ```text
//! +----------+-------------+-----------+-----------------+
//! | "i3-ipc" | length: u32 | type: u32 | payload (UTF-8) |
//! +----------+-------------+-----------+-----------------+
//! ```
//!
//! Header integers use the host byte order, as the compositor does. Frames
//! arriving on the subscription socket with bit 31 of the type set are events;
//! the low seven bits index the event category.
//!
//! Everything in this module is pure: no I/O, no state.

use std::fmt;
use std::str::FromStr;

use crate::error::{IpcError, ProtocolError};

/// Magic string at the start of every frame
pub const MAGIC: &[u8; 6] = b"i3-ipc";

/// Size of the fixed frame header: magic, length and type
pub const HEADER_SIZE: usize = MAGIC.len() + 4 + 4;

/// Bit set in the type tag of event frames
pub const EVENT_FLAG: u32 = 1 << 31;

/// Largest payload we accept (64 MiB); anything bigger is a corrupted length field
pub const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// Request message kinds
///
/// The numeric values are fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    RunCommand = 0,
    GetWorkspaces = 1,
    Subscribe = 2,
    GetOutputs = 3,
    GetTree = 4,
    GetMarks = 5,
    GetBarConfig = 6,
    GetVersion = 7,
    GetBindingModes = 8,
    GetConfig = 9,
    SendTick = 10,
    GetInputs = 100,
    GetSeats = 101,
}

impl MessageType {
    /// Every message kind, in protocol order
    pub const ALL: [MessageType; 13] = [
        MessageType::RunCommand,
        MessageType::GetWorkspaces,
        MessageType::Subscribe,
        MessageType::GetOutputs,
        MessageType::GetTree,
        MessageType::GetMarks,
        MessageType::GetBarConfig,
        MessageType::GetVersion,
        MessageType::GetBindingModes,
        MessageType::GetConfig,
        MessageType::SendTick,
        MessageType::GetInputs,
        MessageType::GetSeats,
    ];

    /// The type tag written on the wire
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up a message kind by its wire tag
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// Event categories a client can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Workspace,
    Output,
    Mode,
    Window,
    BarconfigUpdate,
    Binding,
    Shutdown,
    Tick,
    Input,
}

impl EventType {
    /// Every category, ordered by bit position
    pub const ALL: [EventType; 9] = [
        EventType::Workspace,
        EventType::Output,
        EventType::Mode,
        EventType::Window,
        EventType::BarconfigUpdate,
        EventType::Binding,
        EventType::Shutdown,
        EventType::Tick,
        EventType::Input,
    ];

    fn index(self) -> u32 {
        match self {
            EventType::Workspace => 0,
            EventType::Output => 1,
            EventType::Mode => 2,
            EventType::Window => 3,
            EventType::BarconfigUpdate => 4,
            EventType::Binding => 5,
            EventType::Shutdown => 6,
            EventType::Tick => 7,
            EventType::Input => 8,
        }
    }

    /// The category's bit value (`workspace = 1 << 0` ... `input = 1 << 8`)
    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    /// The type tag the compositor uses for events of this category
    pub fn tag(self) -> u32 {
        EVENT_FLAG | self.index()
    }

    /// Look up a category by its bit value
    pub fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.bit() == bit)
    }

    /// Derive the category of an event frame from its type tag
    ///
    /// Returns `None` for categories this library does not know about.
    pub fn from_tag(tag: u32) -> Option<Self> {
        1u32.checked_shl(tag & 0x7F).and_then(Self::from_bit)
    }

    /// The lower-case name used in SUBSCRIBE payloads
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Workspace => "workspace",
            EventType::Output => "output",
            EventType::Mode => "mode",
            EventType::Window => "window",
            EventType::BarconfigUpdate => "barconfig_update",
            EventType::Binding => "binding",
            EventType::Shutdown => "shutdown",
            EventType::Tick => "tick",
            EventType::Input => "input",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for EventType {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == normalized)
            .ok_or_else(|| IpcError::UnknownEvent(s.to_string()))
    }
}

/// A decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Number of payload bytes following the header
    pub length: u32,
    /// Message or event type tag
    pub tag: u32,
}

impl Header {
    /// Whether this frame carries an event rather than a reply
    pub fn is_event(&self) -> bool {
        self.tag & EVENT_FLAG != 0
    }
}

/// Encode a request frame
pub fn encode(kind: MessageType, payload: &str) -> Vec<u8> {
    encode_frame(kind.code(), payload.as_bytes())
}

/// Encode a frame with an arbitrary type tag
pub fn encode_frame(tag: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    frame.extend_from_slice(&tag.to_ne_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode a frame header
///
/// Fails with [`ProtocolError::BadMagic`] if the frame does not start with
/// [`MAGIC`] and with [`ProtocolError::PayloadTooLarge`] for absurd lengths.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> Result<Header, ProtocolError> {
    let mut found = [0u8; 6];
    found.copy_from_slice(&bytes[..6]);
    if &found != MAGIC {
        return Err(ProtocolError::BadMagic { found });
    }

    let length = u32::from_ne_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let tag = u32::from_ne_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);

    if length > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            length,
            limit: MAX_PAYLOAD,
        });
    }

    Ok(Header { length, tag })
}

/// Build the JSON payload of a SUBSCRIBE request
pub fn subscribe_payload<'a, I>(events: I) -> Result<String, IpcError>
where
    I: IntoIterator<Item = &'a EventType>,
{
    let names: Vec<&str> = events.into_iter().map(|event| event.as_str()).collect();
    serde_json::to_string(&names).map_err(IpcError::Encode)
}
