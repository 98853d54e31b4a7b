//! hub-chat: a terminal chat client for a JSON hub.
//!
//! Connects to the hub, joins a group, prints every chat event it receives,
//! and sends each line typed on stdin to the current group.
//!
//! # Usage
//!
//! ```text
//! hub-chat [OPTIONS]
//!
//! Options:
//!   --url <URL>               Hub endpoint (ws, wss, http or https)
//!   --config <PATH>           Config file [default: platform config dir]
//!   --name <NAME>             Sender name for outgoing messages
//!   --group <GROUP>           Group joined after connecting
//!   --invoke-timeout <SECS>   How long to wait for each hub call
//!   --debug                   Log at debug level unless RUST_LOG is set
//! ```
//!
//! Lines starting with `/` are commands:
//!
//! | Command          | Effect                                   |
//! |------------------|------------------------------------------|
//! | `/join <group>`  | join `group` and make it the current one |
//! | `/leave <group>` | leave `group`                            |
//! | `/quit`          | disconnect and exit                      |
//!
//! # Environment variable overrides
//!
//! | Variable     | Description                 |
//! |--------------|-----------------------------|
//! | `HUB_URL`    | Same as `--url`             |
//! | `HUB_CONFIG` | Same as `--config`          |
//! | `RUST_LOG`   | `tracing` filter, wins over `--debug` and the config file |
//!
//! Precedence for every setting: CLI flag, then environment, then config file,
//! then built-in default.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

use hub_client::infrastructure::config::{
    default_config_path, load_config, load_or_init_config, ClientConfig, ConfigError,
};
use hub_client::{normalize_hub_url, ChatHub, ConnectionDelegate, HubConnectionBuilder, HubError};
use hub_core::{ChatGroup, ChatMessage};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Terminal chat client for a JSON hub.
#[derive(Debug, Parser)]
#[command(name = "hub-chat", about = "Terminal chat client for a JSON hub", version)]
struct Cli {
    /// Hub endpoint, for example `wss://chat.example.com/chathub`.
    ///
    /// Overrides `[hub] url` from the config file.
    #[arg(long, env = "HUB_URL")]
    url: Option<String>,

    /// Path of the TOML config file.
    #[arg(long, env = "HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Sender name for outgoing messages.
    #[arg(long)]
    name: Option<String>,

    /// Group joined right after connecting.
    #[arg(long)]
    group: Option<String>,

    /// Seconds to wait for each hub call before giving up on it.
    #[arg(long)]
    invoke_timeout: Option<u64>,

    /// Log at debug level (ignored when `RUST_LOG` is set).
    #[arg(long)]
    debug: bool,
}

/// Effective settings after merging the CLI over the config file.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    url: Url,
    connect_timeout: Duration,
    invoke_timeout: Duration,
    user_name: String,
    group: String,
    log_filter: String,
}

impl Cli {
    /// Loads the config file named by `--config`, or the platform default.
    ///
    /// A missing platform default file is created with default values; a
    /// missing `--config` file just yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the default file cannot be written.
    fn load_file_config(&self) -> anyhow::Result<ClientConfig> {
        if let Some(path) = &self.config {
            return read_config(path);
        }
        match default_config_path() {
            Ok(path) => load_or_init_config(&path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            Err(ConfigError::NoPlatformConfigDir) => Ok(ClientConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merges the CLI arguments over `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting hub URL is invalid.
    fn into_settings(self, file: ClientConfig) -> anyhow::Result<Settings> {
        let raw_url = self.url.unwrap_or(file.hub.url);
        let url = normalize_hub_url(&raw_url)
            .with_context(|| format!("invalid hub url: '{raw_url}'"))?;
        let log_filter = if self.debug {
            "debug".to_string()
        } else {
            file.logging.level
        };
        Ok(Settings {
            url,
            connect_timeout: Duration::from_secs(file.hub.connect_timeout_secs),
            invoke_timeout: Duration::from_secs(
                self.invoke_timeout.unwrap_or(file.hub.invoke_timeout_secs),
            ),
            user_name: self.name.unwrap_or(file.chat.user_name),
            group: self.group.unwrap_or(file.chat.default_group),
            log_filter,
        })
    }
}

fn read_config(path: &Path) -> anyhow::Result<ClientConfig> {
    load_config(path).with_context(|| format!("failed to load config from {}", path.display()))
}

// ── Input commands ────────────────────────────────────────────────────────────

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Say(String),
    Join(String),
    Leave(String),
    Quit,
    Empty,
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (verb, argument) = match rest.split_once(char::is_whitespace) {
        Some((verb, argument)) => (verb, argument.trim()),
        None => (rest, ""),
    };
    match (verb, argument) {
        ("quit", _) => Command::Quit,
        ("join", group) if !group.is_empty() => Command::Join(group.to_string()),
        ("leave", group) if !group.is_empty() => Command::Leave(group.to_string()),
        ("join" | "leave", _) => Command::Invalid(format!("usage: /{verb} <group>")),
        _ => Command::Invalid(format!("unknown command: /{verb}")),
    }
}

// ── Connection observer ───────────────────────────────────────────────────────

/// Prints lifecycle changes and wakes the input loop when the hub goes away.
struct ConsoleDelegate {
    closed: Arc<Notify>,
}

impl ConnectionDelegate for ConsoleDelegate {
    fn on_connected(&self) {
        info!("connected to hub");
    }

    fn on_closed(&self, error: Option<HubError>) {
        match error {
            Some(e) => eprintln!("* disconnected: {e}"),
            None => info!("connection closed"),
        }
        self.closed.notify_one();
    }

    fn on_decode_error(&self, error: &HubError) {
        warn!("dropped an unreadable frame: {error}");
    }
}

/// Runs one hub call with the configured timeout, reporting failures on
/// stderr.  Returns whether the call succeeded.
async fn report<F>(what: &str, limit: Duration, call: F) -> bool
where
    F: Future<Output = Result<(), HubError>>,
{
    match timeout(limit, call).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            eprintln!("* {what} failed: {e}");
            false
        }
        Err(_) => {
            eprintln!("* {what} timed out after {}s", limit.as_secs());
            false
        }
    }
}

fn register_printers(hub: &ChatHub) {
    hub.on_receive_message(|message| {
        let place = if message.group.is_empty() {
            "direct".to_string()
        } else {
            message.group
        };
        println!("[{place}] {}: {}", message.sender, message.body);
    });
    hub.on_user_joined_group(|group| println!("* {} joined {}", group.participant, group.name));
    hub.on_user_left_group(|group| println!("* {} left {}", group.participant, group.name));
    hub.on_user_connected(|user| println!("* {} is online", user.name));
    hub.on_user_disconnected(|user| println!("* {} went offline", user.name));
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged over the config file.
/// 2. `tracing_subscriber` is initialised from `RUST_LOG`, falling back to
///    `--debug` or the config's `[logging] level`.
/// 3. The connection is built, chat printers are registered, and the
///    handshake is awaited.
/// 4. The default group is joined and stdin lines are relayed until `/quit`,
///    end of input, Ctrl+C, or the hub closing the connection.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_config = cli.load_file_config()?;
    let settings = cli.into_settings(file_config)?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(url = %settings.url, user = %settings.user_name, "hub-chat starting");

    // ── Connect ───────────────────────────────────────────────────────────────
    let closed = Arc::new(Notify::new());
    let connection = Arc::new(
        HubConnectionBuilder::new()
            .with_url(settings.url.as_str())
            .with_connect_timeout(settings.connect_timeout)
            .with_delegate(Arc::new(ConsoleDelegate {
                closed: Arc::clone(&closed),
            }))
            .build()?,
    );
    let hub = ChatHub::new(Arc::clone(&connection));
    register_printers(&hub);

    connection
        .start()
        .await
        .with_context(|| format!("failed to connect to {}", settings.url))?;
    timeout(settings.connect_timeout, connection.wait_connected())
        .await
        .context("timed out waiting for the hub handshake")?
        .context("hub handshake failed")?;

    let mut group = settings.group.clone();
    let limit = settings.invoke_timeout;
    if report(
        "join",
        limit,
        hub.join_group(&ChatGroup::new(&group, &settings.user_name)),
    )
    .await
    {
        println!("* joined {group}");
    }

    // ── Input loop ────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = &mut ctrl_c => {
                info!("received Ctrl+C, disconnecting");
                break;
            }
            _ = closed.notified() => break,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Invalid(message) => eprintln!("* {message}"),
            Command::Say(text) => {
                let message = ChatMessage::new(Uuid::new_v4().to_string(), &settings.user_name)
                    .to_group(&group)
                    .with_body(text);
                report("send", limit, hub.send_message_to_group(&message)).await;
            }
            Command::Join(name) => {
                let target = ChatGroup::new(&name, &settings.user_name);
                if report("join", limit, hub.join_group(&target)).await {
                    println!("* joined {name}");
                    group = name;
                }
            }
            Command::Leave(name) => {
                let target = ChatGroup::new(&name, &settings.user_name);
                if report("leave", limit, hub.leave_group(&target)).await {
                    println!("* left {name}");
                }
            }
        }
    }

    connection.stop();
    info!("hub-chat stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("hub-chat").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_defaults_leave_everything_to_the_config_file() {
        let cli = cli(&["--config", "/nonexistent/hub.toml"]);
        assert_eq!(cli.name, None);
        assert_eq!(cli.group, None);
        assert_eq!(cli.invoke_timeout, None);
        assert!(!cli.debug);
    }

    #[test]
    fn test_settings_from_default_config() {
        // Arrange
        let cli = cli(&["--url", "ws://localhost:5000/chathub"]);

        // Act
        let settings = cli.into_settings(ClientConfig::default()).expect("settings");

        // Assert
        assert_eq!(settings.url.as_str(), "ws://localhost:5000/chathub");
        assert_eq!(settings.user_name, "anonymous");
        assert_eq!(settings.group, "global");
        assert_eq!(settings.invoke_timeout, Duration::from_secs(30));
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        // Arrange
        let mut file = ClientConfig::default();
        file.chat.user_name = "from-file".to_string();
        file.chat.default_group = "file-group".to_string();
        let cli = cli(&[
            "--url",
            "https://chat.example.com/chathub",
            "--name",
            "alice",
            "--group",
            "rustaceans",
            "--invoke-timeout",
            "5",
            "--debug",
        ]);

        // Act
        let settings = cli.into_settings(file).expect("settings");

        // Assert
        assert_eq!(settings.url.as_str(), "wss://chat.example.com/chathub");
        assert_eq!(settings.user_name, "alice");
        assert_eq!(settings.group, "rustaceans");
        assert_eq!(settings.invoke_timeout, Duration::from_secs(5));
        assert_eq!(settings.log_filter, "debug");
    }

    #[test]
    fn test_config_file_values_apply_without_flags() {
        let mut file = ClientConfig::default();
        file.hub.url = "ws://hub.internal:8080/chat".to_string();
        file.chat.user_name = "bob".to_string();
        file.logging.level = "warn".to_string();
        let cli = Cli {
            url: None,
            config: None,
            name: None,
            group: None,
            invoke_timeout: None,
            debug: false,
        };

        let settings = cli.into_settings(file).expect("settings");

        assert_eq!(settings.url.as_str(), "ws://hub.internal:8080/chat");
        assert_eq!(settings.user_name, "bob");
        assert_eq!(settings.log_filter, "warn");
    }

    #[test]
    fn test_invalid_url_returns_error() {
        let cli = cli(&["--url", "ftp://example.com/chathub"]);
        let result = cli.into_settings(ClientConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file_loads_defaults() {
        let cli = cli(&["--config", "/nonexistent/hub-chat/config.toml"]);
        let file = cli.load_file_config().expect("load");
        assert_eq!(file, ClientConfig::default());
        // An explicit path is never created on the user's behalf.
        assert!(!Path::new("/nonexistent/hub-chat/config.toml").exists());
    }

    #[test]
    fn test_plain_line_is_a_message() {
        assert_eq!(parse_command("  hello there "), Command::Say("hello there".into()));
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn test_group_commands_need_a_group_name() {
        assert_eq!(parse_command("/join rust"), Command::Join("rust".into()));
        assert_eq!(parse_command("/leave  rust "), Command::Leave("rust".into()));
        assert!(matches!(parse_command("/join"), Command::Invalid(_)));
        assert!(matches!(parse_command("/leave   "), Command::Invalid(_)));
    }

    #[test]
    fn test_quit_and_unknown_commands() {
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(
            parse_command("/dance"),
            Command::Invalid("unknown command: /dance".into())
        );
    }
}
