//! wmipc CLI
//!
//! Talks to a running i3 or sway instance over its IPC socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::debug;
use wmipc::{Connection, ConnectionConfig, EventType, ReconnectPolicy};
use wmipc_config::{Config, ConfigError, ConnectionSettings, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "wmipc")]
#[command(about = "Client for the i3/sway IPC socket")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/wmipc/config.kdl")]
    config: String,

    /// IPC socket to use instead of $I3SOCK / $SWAYSOCK
    #[arg(short, long)]
    socket: Option<String>,

    /// Reconnect when the compositor drops the connection
    #[arg(long)]
    auto_reconnect: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command, e.g. `wmipc command workspace 2`
    Command {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },

    /// Query compositor state and print it as JSON
    Get {
        #[command(subcommand)]
        what: GetTarget,
    },

    /// Send a tick event to all subscribers
    Tick {
        #[arg(default_value = "")]
        payload: String,
    },

    /// Print events as JSON lines until interrupted
    Trace {
        /// Event names such as `window` or `workspace::focus` (default: all)
        events: Vec<String>,
    },

    /// Validate the configuration file
    Validate,
}

#[derive(Subcommand, Debug)]
enum GetTarget {
    Workspaces,
    Outputs,
    Tree {
        /// Print the tree exactly as received
        #[arg(long)]
        raw: bool,
    },
    Marks,
    BindingModes,
    Config,
    Version,
    /// Configuration of one bar (default: the first one)
    BarConfig {
        id: Option<String>,
    },
    BarConfigList,
    Inputs,
    Seats,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();
    let loaded = load_config(&config_path);

    let level = loaded
        .as_ref()
        .map(|config| config.global.log_level)
        .unwrap_or_default();
    init_tracing(level);

    if let Commands::Validate = cli.command {
        return cmd_validate(&config_path);
    }

    let config = loaded?;
    let conn = Connection::new(connection_config(&config.connection, &cli));

    let outcome = match cli.command {
        Commands::Command { words } => cmd_command(&conn, words.join(" ")).await,
        Commands::Get { what } => cmd_get(&conn, what).await,
        Commands::Tick { payload } => cmd_tick(&conn, payload).await,
        Commands::Trace { events } => cmd_trace(&conn, events).await,
        Commands::Validate => Ok(()),
    };

    outcome.map_err(|e| miette::miette!("{:#}", e))
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str())),
        )
        .init();
}

/// A missing file is not an error; everything has a default
fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    wmipc_config::parse_config(path)
}

fn connection_config(settings: &ConnectionSettings, cli: &Cli) -> ConnectionConfig {
    let socket_path = cli
        .socket
        .as_deref()
        .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
        .or_else(|| settings.socket_path.clone());

    ConnectionConfig {
        socket_path,
        auto_reconnect: cli.auto_reconnect || settings.auto_reconnect,
        reconnect: ReconnectPolicy {
            max_attempts: settings.reconnect_attempts,
            delay: Duration::from_millis(settings.reconnect_delay_ms),
        },
        command_attempts: settings.command_attempts,
        query_compositor: settings.query_compositor,
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = wmipc_config::parse_config(config_path)?;
    let connection = &config.connection;

    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_str());
    match &connection.socket_path {
        Some(path) => println!("  Socket: {}", path.display()),
        None => println!("  Socket: <from environment>"),
    }
    println!("  Auto-reconnect: {}", connection.auto_reconnect);
    println!(
        "  Reconnect: {} attempt(s), {}ms apart",
        connection.reconnect_attempts, connection.reconnect_delay_ms
    );
    println!("  Command attempts: {}", connection.command_attempts);
    Ok(())
}

async fn cmd_command(conn: &Connection, command: String) -> anyhow::Result<()> {
    debug!("Running command: {}", command);

    let replies = conn
        .run(|conn| async move { Ok::<_, anyhow::Error>(conn.command(&command).await?) })
        .await?;

    let mut failed = 0;
    for reply in &replies {
        if reply.success {
            println!("ok");
            continue;
        }

        failed += 1;
        let message = reply.error.as_deref().unwrap_or("unknown error");
        match (&reply.input, &reply.errorposition) {
            (Some(input), Some(position)) if reply.parse_error => {
                eprintln!("error: {}\n  {}\n  {}", message, input, position);
            }
            _ => eprintln!("error: {}", message),
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} command(s) failed", failed, replies.len());
    }
    Ok(())
}

async fn cmd_get(conn: &Connection, what: GetTarget) -> anyhow::Result<()> {
    let value = conn
        .run(|conn| async move { query(&conn, what).await })
        .await?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn query(conn: &Connection, what: GetTarget) -> anyhow::Result<serde_json::Value> {
    let value = match what {
        GetTarget::Workspaces => serde_json::to_value(conn.get_workspaces().await?)?,
        GetTarget::Outputs => serde_json::to_value(conn.get_outputs().await?)?,
        GetTarget::Tree { raw: true } => conn.get_raw_tree().await?,
        GetTarget::Tree { raw: false } => serde_json::to_value(conn.get_tree().await?)?,
        GetTarget::Marks => serde_json::to_value(conn.get_marks().await?)?,
        GetTarget::BindingModes => serde_json::to_value(conn.get_binding_modes().await?)?,
        GetTarget::Config => serde_json::to_value(conn.get_config().await?)?,
        GetTarget::Version => serde_json::to_value(conn.get_version().await?)?,
        GetTarget::BarConfig { id } => {
            serde_json::to_value(conn.get_bar_config(id.as_deref()).await?)?
        }
        GetTarget::BarConfigList => serde_json::to_value(conn.get_bar_config_list().await?)?,
        GetTarget::Inputs => serde_json::to_value(conn.get_inputs().await?)?,
        GetTarget::Seats => serde_json::to_value(conn.get_seats().await?)?,
    };
    Ok(value)
}

async fn cmd_tick(conn: &Connection, payload: String) -> anyhow::Result<()> {
    let reply = conn
        .run(|conn| async move { Ok::<_, anyhow::Error>(conn.send_tick(&payload).await?) })
        .await?;

    if !reply.success {
        anyhow::bail!("Compositor rejected the tick");
    }
    println!("ok");
    Ok(())
}

async fn cmd_trace(conn: &Connection, events: Vec<String>) -> anyhow::Result<()> {
    let names: Vec<String> = if events.is_empty() {
        EventType::ALL.iter().map(|event| event.to_string()).collect()
    } else {
        events
    };

    conn.run(|conn| async move {
        let mut streams = Vec::with_capacity(names.len());
        for name in &names {
            streams.push(conn.events(name)?);
        }
        let mut events = futures::stream::select_all(streams);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    println!("{}", serde_json::to_string(&*event)?);
                }
            }
        }

        debug!("Trace interrupted");
        Ok::<_, anyhow::Error>(())
    })
    .await
}
