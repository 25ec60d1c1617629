//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl reports spans with its own miette version
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "connection" => {
                config.connection = parse_connection(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    let val = string_value(child, "global.log-level")?;
                    global.log_level = val
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_connection(node: &kdl::KdlNode) -> Result<ConnectionSettings, ConfigError> {
    let mut connection = ConnectionSettings::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "socket-path" => {
                    let val = string_value(child, "connection.socket-path")?;
                    connection.socket_path = Some(shellexpand::tilde(val).into_owned().into());
                }
                "auto-reconnect" => {
                    connection.auto_reconnect = bool_value(child, "connection.auto-reconnect")?;
                }
                "reconnect-attempts" => {
                    connection.reconnect_attempts =
                        count_value(child, "connection.reconnect-attempts")?;
                }
                "reconnect-delay-ms" => {
                    connection.reconnect_delay_ms =
                        count_value::<u64>(child, "connection.reconnect-delay-ms")?;
                }
                "command-attempts" => {
                    connection.command_attempts =
                        count_value(child, "connection.command-attempts")?;
                }
                "query-compositor" => {
                    connection.query_compositor =
                        bool_value(child, "connection.query-compositor")?;
                }
                name => {
                    tracing::warn!("Unknown connection option: {}", name);
                }
            }
        }
    }

    Ok(connection)
}

fn first_value<'a>(node: &'a kdl::KdlNode, field: &str) -> Result<&'a kdl::KdlValue, ConfigError> {
    node.entries()
        .first()
        .map(|entry| entry.value())
        .ok_or_else(|| ConfigError::MissingValue {
            field: field.to_string(),
        })
}

fn string_value<'a>(node: &'a kdl::KdlNode, field: &str) -> Result<&'a str, ConfigError> {
    first_value(node, field)?
        .as_string()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("{} must be a string", field),
        })
}

fn bool_value(node: &kdl::KdlNode, field: &str) -> Result<bool, ConfigError> {
    first_value(node, field)?
        .as_bool()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("{} must be true or false", field),
        })
}

/// A positive integer that fits `T`
fn count_value<T: TryFrom<i64>>(node: &kdl::KdlNode, field: &str) -> Result<T, ConfigError> {
    let invalid = || ConfigError::Invalid {
        message: format!("{} must be a positive integer", field),
    };

    let val = first_value(node, field)?.as_i64().ok_or_else(invalid)?;
    if val < 1 {
        return Err(invalid());
    }
    T::try_from(val).map_err(|_| invalid())
}
