// Configuration management for nullrouted
// Supports CLI arguments, environment variables and a config file (TOML)

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use crate::reconcile::DEFAULT_ROUTE_TABLE;

/// Longest accepted route timeout: one year.
pub const MAX_TIMEOUT_SECONDS: u64 = 365 * 24 * 60 * 60;

/// nullrouted - blackhole IPv4 addresses in the kernel routing table for a limited time
#[derive(Parser, Debug, Clone)]
#[command(name = "nullrouted")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the control socket
    #[arg(short, long, env = "NULLROUTED_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Route expiration timeout in seconds
    #[arg(short, long, env = "NULLROUTED_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Kernel route table dump scanned during reconciliation
    #[arg(long, env = "NULLROUTED_ROUTE_TABLE")]
    pub route_table: Option<PathBuf>,

    /// Don't remove leftover blackhole routes at startup
    #[arg(long, env = "NULLROUTED_NO_STARTUP_CLEANUP")]
    pub no_startup_cleanup: bool,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "NULLROUTED_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "NULLROUTED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Blackhole ADDR once (or remove it if already blackholed) and exit
    #[arg(long, value_name = "ADDR")]
    pub toggle: Option<Ipv4Addr>,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Control socket settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Route lifecycle settings
    #[serde(default)]
    pub routes: RoutesConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Control socket path
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Permission bits applied to the socket file
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Seconds before a blackhole route is removed again
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Kernel route table dump
    #[serde(default = "default_route_table")]
    pub route_table: PathBuf,

    /// Remove leftover blackhole routes at startup
    #[serde(default = "default_true")]
    pub cleanup_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_socket() -> PathBuf {
    PathBuf::from("/var/run/nullrouted.sock")
}
fn default_socket_mode() -> u32 {
    0o666
}
fn default_timeout_seconds() -> u64 {
    600
}
fn default_route_table() -> PathBuf {
    PathBuf::from(DEFAULT_ROUTE_TABLE)
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            socket: default_socket(),
            socket_mode: default_socket_mode(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        RoutesConfig {
            timeout_seconds: default_timeout_seconds(),
            route_table: default_route_table(),
            cleanup_on_start: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub socket: PathBuf,
    pub socket_mode: u32,
    pub timeout: Duration,
    pub route_table: PathBuf,
    pub cleanup_on_start: bool,
    pub log_level: Level,
    /// One-shot toggle instead of running the daemon
    pub toggle: Option<Ipv4Addr>,
    /// Config file that was loaded, if any
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args / environment > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();

        let source = match &cli_args.config {
            Some(path) => Some(path.clone()),
            None => {
                let default_path = PathBuf::from("nullrouted.toml");
                default_path.exists().then_some(default_path)
            }
        };

        let config_file = match &source {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };

        let mut config = Config::merge(cli_args, config_file)?;
        config.source = source;
        Ok(config)
    }

    /// Merge CLI arguments over a parsed config file
    pub fn merge(cli_args: CliArgs, config_file: ConfigFile) -> anyhow::Result<Self> {
        let timeout_seconds = cli_args
            .timeout
            .unwrap_or(config_file.routes.timeout_seconds);
        if timeout_seconds == 0 {
            anyhow::bail!("Route timeout must be at least one second");
        }
        if timeout_seconds > MAX_TIMEOUT_SECONDS {
            anyhow::bail!(
                "Route timeout of {}s exceeds the maximum of {}s",
                timeout_seconds,
                MAX_TIMEOUT_SECONDS
            );
        }

        let log_level = parse_log_level(
            cli_args
                .log_level
                .as_deref()
                .unwrap_or(&config_file.logging.level),
        )?;

        Ok(Config {
            socket: cli_args.socket.unwrap_or(config_file.server.socket),
            socket_mode: config_file.server.socket_mode,
            timeout: Duration::from_secs(timeout_seconds),
            route_table: cli_args
                .route_table
                .unwrap_or(config_file.routes.route_table),
            cleanup_on_start: !cli_args.no_startup_cleanup && config_file.routes.cleanup_on_start,
            log_level,
            toggle: cli_args.toggle,
            source: None,
        })
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    let config_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str::<ConfigFile>(&config_content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}
