//! Typed event records
//!
//! One variant per event category. Each category with a `change` field
//! exposes it through [`IpcEvent::change`], which the event bus uses as the
//! detail for `category::detail` handler filters.

use serde::{Deserialize, Serialize};

use crate::error::IpcError;
use crate::protocol::EventType;
use crate::replies::{BarConfigReply, InputReply, Node};

/// `workspace` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceEvent {
    /// `focus`, `init`, `empty`, `urgent`, `rename`, `reload`, `restored` or `move`
    pub change: String,
    pub current: Option<Node>,
    pub old: Option<Node>,
}

/// `output` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputEvent {
    pub change: String,
}

/// `mode` event; `change` is the name of the new binding mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeEvent {
    pub change: String,
    pub pango_markup: bool,
}

/// `window` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowEvent {
    /// `new`, `close`, `focus`, `title`, `fullscreen_mode`, `move`,
    /// `floating`, `urgent` or `mark`
    pub change: String,
    pub container: Node,
}

/// The binding that triggered a `binding` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingInfo {
    pub command: String,
    pub event_state_mask: Vec<String>,
    pub input_code: i64,
    pub symbol: Option<String>,
    pub input_type: String,
}

/// `binding` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingEvent {
    pub change: String,
    pub binding: BindingInfo,
}

/// `shutdown` event; `change` is `restart` or `exit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownEvent {
    pub change: String,
}

/// `tick` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickEvent {
    /// Set on the tick the compositor sends right after subscribing
    pub first: bool,
    pub payload: String,
}

/// `input` event (sway only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputEvent {
    pub change: String,
    pub input: InputReply,
}

/// An event pushed on the subscription socket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum IpcEvent {
    Workspace(WorkspaceEvent),
    Output(OutputEvent),
    Mode(ModeEvent),
    Window(WindowEvent),
    BarconfigUpdate(BarConfigReply),
    Binding(BindingEvent),
    Shutdown(ShutdownEvent),
    Tick(TickEvent),
    Input(InputEvent),
}

impl IpcEvent {
    /// Decode the payload of an event frame of the given category
    pub fn decode(category: EventType, payload: &[u8]) -> Result<Self, IpcError> {
        let what = category.as_str();
        let event = match category {
            EventType::Workspace => IpcEvent::Workspace(from_slice(what, payload)?),
            EventType::Output => IpcEvent::Output(from_slice(what, payload)?),
            EventType::Mode => IpcEvent::Mode(from_slice(what, payload)?),
            EventType::Window => IpcEvent::Window(from_slice(what, payload)?),
            EventType::BarconfigUpdate => IpcEvent::BarconfigUpdate(from_slice(what, payload)?),
            EventType::Binding => IpcEvent::Binding(from_slice(what, payload)?),
            EventType::Shutdown => IpcEvent::Shutdown(from_slice(what, payload)?),
            EventType::Tick => IpcEvent::Tick(from_slice(what, payload)?),
            EventType::Input => IpcEvent::Input(from_slice(what, payload)?),
        };
        Ok(event)
    }

    /// The category this event belongs to
    pub fn event_type(&self) -> EventType {
        match self {
            IpcEvent::Workspace(_) => EventType::Workspace,
            IpcEvent::Output(_) => EventType::Output,
            IpcEvent::Mode(_) => EventType::Mode,
            IpcEvent::Window(_) => EventType::Window,
            IpcEvent::BarconfigUpdate(_) => EventType::BarconfigUpdate,
            IpcEvent::Binding(_) => EventType::Binding,
            IpcEvent::Shutdown(_) => EventType::Shutdown,
            IpcEvent::Tick(_) => EventType::Tick,
            IpcEvent::Input(_) => EventType::Input,
        }
    }

    /// The event's detail (its `change` field), if the category has one
    pub fn change(&self) -> Option<&str> {
        let change = match self {
            IpcEvent::Workspace(e) => &e.change,
            IpcEvent::Output(e) => &e.change,
            IpcEvent::Mode(e) => &e.change,
            IpcEvent::Window(e) => &e.change,
            IpcEvent::Binding(e) => &e.change,
            IpcEvent::Shutdown(e) => &e.change,
            IpcEvent::Input(e) => &e.change,
            IpcEvent::BarconfigUpdate(_) | IpcEvent::Tick(_) => return None,
        };
        Some(change.as_str()).filter(|c| !c.is_empty())
    }
}

fn from_slice<'de, T: Deserialize<'de>>(what: &'static str, payload: &'de [u8]) -> Result<T, IpcError> {
    serde_json::from_slice(payload).map_err(IpcError::decode(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_window_event() {
        let payload = br#"{"change":"new","container":{"id":94,"type":"con","app_id":"foot"}}"#;
        let event = IpcEvent::decode(EventType::Window, payload).unwrap();

        assert_eq!(event.event_type(), EventType::Window);
        assert_eq!(event.change(), Some("new"));
        match event {
            IpcEvent::Window(window) => {
                assert_eq!(window.container.id, 94);
                assert_eq!(window.container.app_id.as_deref(), Some("foot"));
            }
            other => panic!("Expected window event, got: {:?}", other),
        }
    }

    #[test]
    fn test_tick_has_no_detail() {
        let event = IpcEvent::decode(EventType::Tick, br#"{"first":true,"payload":""}"#).unwrap();
        assert_eq!(event.change(), None);
        assert_eq!(
            event,
            IpcEvent::Tick(TickEvent {
                first: true,
                payload: String::new(),
            })
        );
    }

    #[test]
    fn test_workspace_event_with_null_old() {
        let payload = br#"{"change":"focus","current":{"id":7,"type":"workspace","name":"12","num":12},"old":null}"#;
        let event = IpcEvent::decode(EventType::Workspace, payload).unwrap();

        match event {
            IpcEvent::Workspace(ws) => {
                assert_eq!(ws.current.unwrap().name.as_deref(), Some("12"));
                assert!(ws.old.is_none());
            }
            other => panic!("Expected workspace event, got: {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_detail() {
        let event = IpcEvent::decode(EventType::Shutdown, br#"{"change":"restart"}"#).unwrap();
        assert_eq!(event.change(), Some("restart"));
    }

    #[test]
    fn test_binding_event() {
        let payload = br#"{"change":"run","binding":{"command":"nop","event_state_mask":["Mod4"],
            "input_code":0,"symbol":"t","input_type":"keyboard"}}"#;
        let event = IpcEvent::decode(EventType::Binding, payload).unwrap();
        match event {
            IpcEvent::Binding(b) => {
                assert_eq!(b.binding.symbol.as_deref(), Some("t"));
                assert_eq!(b.binding.event_state_mask, vec!["Mod4".to_string()]);
            }
            other => panic!("Expected binding event, got: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        let err = IpcEvent::decode(EventType::Mode, b"not json").unwrap_err();
        assert!(matches!(err, IpcError::Decode { what: "mode", .. }));
    }

    #[test]
    fn test_serializes_with_event_name() {
        let event = IpcEvent::Output(OutputEvent {
            change: "unspecified".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "output");
        assert_eq!(json["payload"]["change"], "unspecified");
    }
}
