//! Configuration for the socketry binary.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use crate::client::{ClientConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::Error;
use crate::server::{ListenConfig, DEFAULT_BUFFER_SIZE};
use crate::socket::{Address, DEFAULT_HOST, LISTEN_BACKLOG_DEFAULT};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Default port of the stream server.
pub const DEFAULT_TCP_PORT: i64 = 1234;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "socketry")]
#[command(version = "0.1.0")]
#[command(about = "Thread-per-connection TCP/UDP echo servers and client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the stream (TCP) echo server
    TcpServer(ServerArgs),
    /// Run the datagram (UDP) echo listeners
    UdpServer(ServerArgs),
    /// Connect to an echo server and send a message repeatedly
    TcpClient(ClientArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServerArgs {
    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Local port
    #[arg(short, long, allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// SO_REUSEADDR on (`--reuseaddr=false` turns off a value set in the config file)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub reuseaddr: Option<bool>,

    /// SO_REUSEPORT on (`--reuseport=false` turns off a value set in the config file)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub reuseport: Option<bool>,

    /// Listen backlog (tcp only)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Scratch buffer size per connection/listener
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Number of listener threads (udp only)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct ClientArgs {
    /// Server address to connect to
    #[arg(long)]
    pub host: Option<String>,

    /// Local port to bind before connecting
    #[arg(short, long, allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// Remote port
    #[arg(short, long, allow_negative_numbers = true)]
    pub dstport: Option<i64>,

    /// Message to send
    #[arg(short, long)]
    pub msg: Option<String>,

    /// SO_REUSEADDR on (`--reuseaddr=false` turns off a value set in the config file)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub reuseaddr: Option<bool>,

    /// SO_REUSEPORT on (`--reuseport=false` turns off a value set in the config file)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub reuseport: Option<bool>,

    /// Receive timeout in seconds (non-positive = none)
    #[arg(long, allow_negative_numbers = true)]
    pub rcv_timeout: Option<i64>,

    /// Send timeout in seconds (non-positive = none)
    #[arg(long, allow_negative_numbers = true)]
    pub snd_timeout: Option<i64>,

    /// Delay between messages in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Number of messages to send (0 = until an error)
    #[arg(long)]
    pub count: Option<u64>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub reuseaddr: Option<bool>,
    pub reuseport: Option<bool>,
    pub backlog: Option<i32>,
    pub buffer_size: Option<usize>,
    pub threads: Option<usize>,
}

/// Client-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ClientSection {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub dstport: Option<i64>,
    pub msg: Option<String>,
    pub reuseaddr: Option<bool>,
    pub reuseport: Option<bool>,
    pub rcv_timeout: Option<i64>,
    pub snd_timeout: Option<i64>,
    pub interval_ms: Option<u64>,
    pub count: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What the binary should run, fully resolved.
#[derive(Debug, Clone)]
pub enum Mode {
    TcpServer(ListenConfig),
    UdpServer { listen: ListenConfig, threads: usize },
    TcpClient(ClientRun),
}

/// Client settings plus the send loop parameters.
#[derive(Debug, Clone)]
pub struct ClientRun {
    pub client: ClientConfig,
    pub msg: String,
    pub interval: Duration,
    /// 0 means until an error.
    pub count: u64,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    ///
    /// Malformed command lines make clap print usage to stderr and exit
    /// with a non-zero status.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli.command, cli.log_level, toml_config)
    }

    /// Merge CLI values over file values over defaults.
    pub fn merge(
        command: Command,
        log_level: Option<String>,
        toml_config: TomlConfig,
    ) -> Result<Self, ConfigError> {
        let mode = match command {
            Command::TcpServer(args) => Mode::TcpServer(resolve_listen(
                &args,
                &toml_config.server,
                Some(DEFAULT_TCP_PORT),
            )?),
            Command::UdpServer(args) => {
                let listen = resolve_listen(&args, &toml_config.server, None)?;
                let threads = args.threads.or(toml_config.server.threads).unwrap_or(1);
                if threads == 0 {
                    return Err(ConfigError::InvalidValue("threads", "0".to_string()));
                }
                Mode::UdpServer { listen, threads }
            }
            Command::TcpClient(args) => Mode::TcpClient(resolve_client(args, toml_config.client)?),
        };

        Ok(Config {
            mode,
            log_level: log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

fn resolve_listen(
    args: &ServerArgs,
    file: &ServerSection,
    default_port: Option<i64>,
) -> Result<ListenConfig, ConfigError> {
    let host = args
        .host
        .as_deref()
        .or(file.host.as_deref())
        .unwrap_or(DEFAULT_HOST);
    let port = check_port(args.port.or(file.port).or(default_port))?;
    let addr = Address::v4(port, host).map_err(ConfigError::Address)?;

    let mut listen = ListenConfig::new(addr);
    listen.reuse_addr = args.reuseaddr.or(file.reuseaddr).unwrap_or(false);
    listen.reuse_port = args.reuseport.or(file.reuseport).unwrap_or(false);
    listen.backlog = args.backlog.or(file.backlog).unwrap_or(LISTEN_BACKLOG_DEFAULT);
    listen.buffer_size = buffer_size(args.buffer_size.or(file.buffer_size))?;
    Ok(listen)
}

fn resolve_client(args: ClientArgs, file: ClientSection) -> Result<ClientRun, ConfigError> {
    let host = args
        .host
        .or(file.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let remote_port = check_port(args.dstport.or(file.dstport))?;
    let remote = Address::v4(remote_port, &host).map_err(ConfigError::Address)?;

    let mut client = ClientConfig::new(remote);
    // The local bind uses the wildcard address so any route to `host` works.
    client.local = match args.port.or(file.port) {
        Some(port) => Some(Address::from(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            check_port(Some(port))?,
        ))),
        None => None,
    };
    client.reuse_addr = args.reuseaddr.or(file.reuseaddr).unwrap_or(false);
    client.reuse_port = args.reuseport.or(file.reuseport).unwrap_or(false);
    client.rcv_timeout_secs = args
        .rcv_timeout
        .or(file.rcv_timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    client.snd_timeout_secs = args
        .snd_timeout
        .or(file.snd_timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    let msg = args.msg.or(file.msg).unwrap_or_default();
    if msg.is_empty() {
        return Err(ConfigError::InvalidValue("msg", msg));
    }

    Ok(ClientRun {
        client,
        msg,
        interval: Duration::from_millis(args.interval_ms.or(file.interval_ms).unwrap_or(1000)),
        count: args.count.or(file.count).unwrap_or(0),
    })
}

fn check_port(port: Option<i64>) -> Result<u16, ConfigError> {
    match port {
        None => Err(ConfigError::InvalidPort(-1)),
        Some(p) => u16::try_from(p).map_err(|_| ConfigError::InvalidPort(p)),
    }
}

fn buffer_size(size: Option<usize>) -> Result<usize, ConfigError> {
    match size {
        None => Ok(DEFAULT_BUFFER_SIZE),
        Some(0) => Err(ConfigError::InvalidValue("buffer-size", "0".to_string())),
        Some(n) => Ok(n),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidPort(i64),
    InvalidValue(&'static str, String),
    Address(Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidPort(port) => write!(f, "invalid parameter port '{port}'"),
            ConfigError::InvalidValue(name, value) => {
                write!(f, "invalid parameter {name} '{value}'")
            }
            ConfigError::Address(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("socketry").chain(args.iter().copied()))
    }

    fn resolve(args: &[&str]) -> Result<Config, ConfigError> {
        let cli = parse(args).unwrap();
        Config::merge(cli.command, cli.log_level, TomlConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert!(config.server.port.is_none());
        assert!(config.server.reuseaddr.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_tcp_server_defaults() {
        let config = resolve(&["tcp-server"]).unwrap();
        assert_eq!(config.log_level, "info");
        match config.mode {
            Mode::TcpServer(listen) => {
                assert_eq!(listen.addr, Address::localhost(1234));
                assert!(!listen.reuse_addr);
                assert!(!listen.reuse_port);
                assert_eq!(listen.backlog, 64);
                assert_eq!(listen.buffer_size, 1024);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_udp_server_requires_port() {
        let err = resolve(&["udp-server"]).unwrap_err();
        assert_eq!(err.to_string(), "invalid parameter port '-1'");

        let err = resolve(&["udp-server", "--port", "-1"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(-1)));

        let err = resolve(&["udp-server", "--port", "70000"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(70000)));
    }

    #[test]
    fn test_udp_server_flags() {
        let config = resolve(&[
            "udp-server",
            "--port",
            "9000",
            "--reuseport",
            "--threads",
            "4",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(config.log_level, "debug");
        match config.mode {
            Mode::UdpServer { listen, threads } => {
                assert_eq!(listen.addr.port(), 9000);
                assert!(listen.reuse_port);
                assert!(!listen.reuse_addr);
                assert_eq!(threads, 4);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_client_flags() {
        let config = resolve(&[
            "tcp-client",
            "--dstport",
            "9000",
            "--port",
            "9001",
            "--msg",
            "ping",
            "--rcv-timeout",
            "0",
            "--count",
            "3",
        ])
        .unwrap();
        match config.mode {
            Mode::TcpClient(run) => {
                assert_eq!(run.client.remote, Address::localhost(9000));
                let local = run.client.local.unwrap();
                assert_eq!(local.ip(), Ipv4Addr::UNSPECIFIED);
                assert_eq!(local.port(), 9001);
                assert_eq!(run.client.rcv_timeout_secs, 0);
                assert_eq!(run.client.snd_timeout_secs, 2);
                assert_eq!(run.msg, "ping");
                assert_eq!(run.count, 3);
                assert_eq!(run.interval, Duration::from_secs(1));
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_client_requires_message() {
        let err = resolve(&["tcp-client", "--dstport", "9000"]).unwrap_err();
        assert_eq!(err.to_string(), "invalid parameter msg ''");

        let err = resolve(&["tcp-client", "--msg", "hi"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(-1)));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(parse(&["tcp-server", "--bogus"]).is_err());
        assert!(parse(&["tcp-server", "--port", "abc"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_invalid_host() {
        let err = resolve(&["tcp-server", "--host", "example.com"]).unwrap_err();
        assert!(matches!(err, ConfigError::Address(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_client_remote_host_and_wildcard_bind() {
        let config = resolve(&[
            "tcp-client",
            "--host",
            "10.1.2.3",
            "--dstport",
            "9000",
            "--port",
            "9001",
            "--msg",
            "ping",
        ])
        .unwrap();
        match config.mode {
            Mode::TcpClient(run) => {
                assert_eq!(run.client.remote, Address::v4(9000, "10.1.2.3").unwrap());
                assert_eq!(run.client.local, Address::v4(9001, "0.0.0.0").ok());
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_cli_can_turn_off_file_reuse_flags() {
        let file = || -> TomlConfig {
            toml::from_str(
                r#"
                [server]
                port = 7000
                reuseaddr = true
                reuseport = true
            "#,
            )
            .unwrap()
        };

        let cli = parse(&["udp-server", "--reuseaddr=false"]).unwrap();
        let config = Config::merge(cli.command, cli.log_level, file()).unwrap();
        match config.mode {
            Mode::UdpServer { listen, .. } => {
                assert!(!listen.reuse_addr);
                assert!(listen.reuse_port);
            }
            other => panic!("unexpected mode {other:?}"),
        }

        let cli = parse(&["udp-server", "--reuseaddr"]).unwrap();
        let config = Config::merge(cli.command, cli.log_level, TomlConfig::default());
        assert!(matches!(config, Err(ConfigError::InvalidPort(-1))));

        let cli = parse(&["udp-server", "--port", "7100", "--reuseport"]).unwrap();
        match Config::merge(cli.command, cli.log_level, TomlConfig::default())
            .unwrap()
            .mode
        {
            Mode::UdpServer { listen, .. } => {
                assert!(listen.reuse_port);
                assert!(!listen.reuse_addr);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 7000
            reuseaddr = true
            threads = 2

            [client]
            dstport = 7000
            msg = "hello"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.server.port, Some(7000));
        assert_eq!(config.server.reuseaddr, Some(true));
        assert_eq!(config.server.threads, Some(2));
        assert_eq!(config.client.msg.as_deref(), Some("hello"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 7000
            backlog = 16

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let cli = parse(&["tcp-server", "--port", "7100"]).unwrap();
        let config = Config::merge(cli.command, cli.log_level, file).unwrap();
        assert_eq!(config.log_level, "warn");
        match config.mode {
            Mode::TcpServer(listen) => {
                assert_eq!(listen.addr.port(), 7100);
                assert_eq!(listen.backlog, 16);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }
}
