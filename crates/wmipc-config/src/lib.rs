//! Configuration parsing for wmipc
//!
//! This crate handles parsing the KDL configuration file shared by the
//! wmipc tools: log level and how to reach the compositor's IPC socket.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
