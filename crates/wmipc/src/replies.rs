//! Typed reply records
//!
//! These mirror the JSON objects the compositor sends back on the command
//! socket. Unknown fields are ignored and optional fields default, so replies
//! from both i3 and sway decode into the same types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::IpcError;

/// Decode a reply payload into `T`
pub fn decode_reply<T: DeserializeOwned>(what: &'static str, payload: &[u8]) -> Result<T, IpcError> {
    serde_json::from_slice(payload).map_err(IpcError::decode(what))
}

/// A rectangle in compositor coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Result of one command in a RUN_COMMAND request
///
/// A command string may contain several commands separated by `;` or `,`;
/// the compositor answers with one result for each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    /// Human-readable description of the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the command could not be parsed
    #[serde(default)]
    pub parse_error: bool,
    /// The command text that failed to parse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Marker string pointing at the position of the parse error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errorposition: Option<String>,
}

/// A workspace as returned by GET_WORKSPACES
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceReply {
    pub id: Option<i64>,
    pub num: i32,
    pub name: String,
    pub visible: bool,
    pub focused: bool,
    pub urgent: bool,
    pub rect: Rect,
    pub output: String,
}

/// An output as returned by GET_OUTPUTS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputReply {
    pub name: String,
    pub active: bool,
    pub primary: bool,
    pub current_workspace: Option<String>,
    pub rect: Rect,
    pub make: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub scale: Option<f64>,
    pub transform: Option<String>,
}

/// Colors of a bar configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarColors {
    pub background: Option<String>,
    pub statusline: Option<String>,
    pub separator: Option<String>,
    pub focused_workspace_text: Option<String>,
    pub focused_workspace_bg: Option<String>,
    pub focused_workspace_border: Option<String>,
    pub active_workspace_text: Option<String>,
    pub active_workspace_bg: Option<String>,
    pub active_workspace_border: Option<String>,
    pub inactive_workspace_text: Option<String>,
    pub inactive_workspace_bg: Option<String>,
    pub inactive_workspace_border: Option<String>,
    pub urgent_workspace_text: Option<String>,
    pub urgent_workspace_bg: Option<String>,
    pub urgent_workspace_border: Option<String>,
    pub binding_mode_text: Option<String>,
    pub binding_mode_bg: Option<String>,
    pub binding_mode_border: Option<String>,
}

/// A bar configuration (GET_BAR_CONFIG with an id, and barconfig_update events)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfigReply {
    pub id: String,
    pub mode: String,
    pub position: String,
    pub status_command: Option<String>,
    pub font: String,
    pub workspace_buttons: bool,
    pub binding_mode_indicator: bool,
    pub verbose: bool,
    pub colors: BarColors,
    pub separator_symbol: Option<String>,
    pub hidden_state: Option<String>,
}

/// Compositor version (GET_VERSION)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionReply {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub human_readable: String,
    pub loaded_config_file_name: String,
}

/// The last loaded configuration (GET_CONFIG)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReply {
    pub config: String,
}

/// Acknowledgement of SEND_TICK
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReply {
    pub success: bool,
}

/// Acknowledgement of SUBSCRIBE
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeReply {
    pub success: bool,
}

/// An input device (sway only, GET_INPUTS)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputReply {
    pub identifier: String,
    pub name: String,
    pub vendor: i64,
    pub product: i64,
    #[serde(rename = "type")]
    pub input_type: String,
    pub xkb_active_layout_name: Option<String>,
    pub xkb_layout_names: Vec<String>,
    pub xkb_active_layout_index: Option<i64>,
    pub libinput: Option<serde_json::Value>,
}

/// A seat (sway only, GET_SEATS)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeatReply {
    pub name: String,
    pub capabilities: i64,
    pub focus: i64,
    pub devices: Vec<InputReply>,
}

/// A container of the layout tree
///
/// See the `impl Node` search helpers (`leaves()`, `find_focused()`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: i64,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    pub layout: String,
    pub orientation: Option<String>,
    pub border: Option<String>,
    pub current_border_width: Option<i32>,
    pub percent: Option<f64>,
    pub rect: Rect,
    pub window_rect: Rect,
    pub deco_rect: Rect,
    pub focused: bool,
    pub urgent: bool,
    pub sticky: bool,
    pub floating: Option<String>,
    pub fullscreen_mode: i32,
    pub scratchpad_state: Option<String>,
    pub focus: Vec<i64>,
    pub marks: Vec<String>,
    pub num: Option<i32>,
    pub output: Option<String>,
    /// X11 window id, if the container holds an X11 window
    pub window: Option<i64>,
    pub window_properties: Option<serde_json::Value>,
    /// Wayland app id (sway)
    pub app_id: Option<String>,
    pub pid: Option<i64>,
    pub nodes: Vec<Node>,
    pub floating_nodes: Vec<Node>,
}
