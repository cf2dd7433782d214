//! Server configuration loading from file and environment variables.

use doppel_identity::DEFAULT_KEY_ID;
use doppel_rooms::DEFAULT_ROOM_VERSION;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings and federation name.
    #[serde(default)]
    pub server: ServerConfig,

    /// Signing key settings.
    #[serde(default)]
    pub signing: SigningConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Join handshake behavior.
    #[serde(default)]
    pub federation: FederationConfig,

    /// Peer keys trusted at startup.
    #[serde(default)]
    pub key_ring: KeyRingConfig,

    /// Rooms created at startup.
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,

    /// Media served by ID.
    #[serde(default)]
    pub media: Vec<MediaConfig>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The name this responder signs as and expects as request destination.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    #[serde(default = "default_key_id")]
    pub key_id: String,

    /// Base64 Ed25519 seed. A fresh key is generated per process when unset.
    #[serde(default)]
    pub seed: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "doppel_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Join handshake configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FederationConfig {
    /// Expect partial-state joins (`omit_members=true`) and answer them with
    /// the minimal auth state.
    #[serde(default)]
    pub partial_state_joins: bool,

    /// Report only this server in `servers_in_room`.
    #[serde(default)]
    pub conceal_servers_in_room: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyRingConfig {
    #[serde(default)]
    pub keys: Vec<StaticKeyConfig>,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// A peer verify key given directly.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticKeyConfig {
    pub server_name: String,
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// Unpadded base64 public key.
    pub key: String,
    /// Trusted until this time (ms); forever when unset.
    #[serde(default)]
    pub valid_until_ts: Option<i64>,
}

/// A peer whose key document is fetched at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub server_name: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    #[serde(default = "default_room_version")]
    pub room_version: String,
    pub creator: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A media payload, given inline or read from a file.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub id: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8448
}

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_key_id() -> String {
    DEFAULT_KEY_ID.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_room_version() -> String {
    DEFAULT_ROOM_VERSION.to_string()
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_id: default_key_id(),
            seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid signing seed: {0}")]
    SigningSeed(#[source] doppel_identity::IdentityError),

    #[error("invalid key for {server_name}: {source}")]
    PeerKey {
        server_name: String,
        #[source]
        source: doppel_identity::IdentityError,
    },

    #[error("cannot create room for {creator}: {source}")]
    Room {
        creator: String,
        #[source]
        source: doppel_rooms::RoomError,
    },

    #[error("media {id} needs exactly one of `text` or `path`")]
    MediaSource { id: String },

    #[error("cannot read media {id}: {source}")]
    MediaRead {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `DOPPEL_HOST` overrides `server.host`
/// - `DOPPEL_PORT` overrides `server.port`
/// - `DOPPEL_SERVER_NAME` overrides `server.server_name`
/// - `DOPPEL_SIGNING_SEED` overrides `signing.seed`
/// - `DOPPEL_LOG_LEVEL` overrides `logging.level`
/// - `DOPPEL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("DOPPEL_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("DOPPEL_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(server_name) = std::env::var("DOPPEL_SERVER_NAME") {
        if !server_name.trim().is_empty() {
            config.server.server_name = server_name;
        }
    }
    if let Ok(seed) = std::env::var("DOPPEL_SIGNING_SEED") {
        config.signing.seed = Some(seed);
    }
    if let Ok(level) = std::env::var("DOPPEL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("DOPPEL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
