//! Configuration for the LRSC bridge.
//!
//! Layered TOML + environment settings, credential extraction from the
//! service-binding blob, and translation to `lrsc_core::BridgeConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use lrsc_api::ServerVerification;
use lrsc_core::{BackoffConfig, BridgeConfig, CloudConfig, CloudCredentials, DeviceConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod credentials;

pub use credentials::{SERVICES_ENV, extract_credentials, load_credentials};

/// Prefix of environment overrides, e.g. `LRSC_BRIDGE_DEVICE__HOST`.
pub const ENV_PREFIX: &str = "LRSC_BRIDGE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no service credentials: {var} is not set")]
    NoCredentials { var: String },

    #[error("Could not find any iotf-service instance bound")]
    NoBinding,

    #[error("Could not parse services JSON: {0}")]
    Services(#[source] serde_json::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub cloud: CloudSection,
    pub backoff: BackoffSection,
    pub bridge: BridgeSection,
    pub status: StatusSection,
}

/// The concentrator connection.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSection {
    pub host: String,
    pub port: u16,

    /// PEM client certificate. Also read from `CLIENT_CERT`.
    pub client_cert: Option<PathBuf>,

    /// PEM private key. Also read from `CLIENT_KEY`.
    pub client_key: Option<PathBuf>,

    /// Verify the concentrator against this CA instead of accepting any
    /// certificate.
    pub ca_cert: Option<PathBuf>,

    pub connect_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            host: "dev.lrsc.ch".into(),
            port: 55055,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            connect_timeout_secs: 10,
            handshake_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CloudSection {
    pub device_type: String,

    /// Connect to the broker's TLS port.
    pub tls: bool,

    pub keep_alive_secs: u64,
    pub ack_timeout_secs: u64,
    pub request_timeout_secs: u64,

    /// Additional CA trusted for the registration endpoint.
    pub ca_cert: Option<PathBuf>,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            device_type: "LRSC".into(),
            tls: true,
            keep_alive_secs: 30,
            ack_timeout_secs: 10,
            request_timeout_secs: 30,
            ca_cert: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffSection {
    pub initial_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_secs: 1,
            max_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Capacity of the event and command channels.
    pub channel_capacity: usize,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
        }
    }
}

/// The status HTTP endpoint.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusSection {
    pub bind: String,
    pub port: u16,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("ch", "lrsc", "lrsc-bridge").map_or_else(
        || PathBuf::from("lrsc-bridge.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file, then the environment.
///
/// A missing file is not an error. Nested keys in the environment are
/// separated by `__`: `LRSC_BRIDGE_CLOUD__DEVICE_TYPE=sensor`.
pub fn config_figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(
            Env::raw()
                .only(&["CLIENT_CERT", "CLIENT_KEY"])
                .map(|key| format!("device.{}", key.as_str().to_ascii_lowercase()).into()),
        )
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the configuration from `path`, or from [`config_path`].
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    tracing::debug!(path = %path.display(), "Loading configuration");

    let config: Config = config_figment(&path).extract()?;
    Ok(config)
}

impl Config {
    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the values and combine them with the platform credentials.
    pub fn to_bridge_config(
        &self,
        credentials: CloudCredentials,
    ) -> Result<BridgeConfig, ConfigError> {
        let device = &self.device;
        let cloud = &self.cloud;

        require(!device.host.is_empty(), "device.host", "empty")?;
        require(device.port != 0, "device.port", "must not be 0")?;
        let client_cert = device
            .client_cert
            .clone()
            .ok_or_else(|| invalid("device.client_cert", "not set (or set CLIENT_CERT)"))?;
        let client_key = device
            .client_key
            .clone()
            .ok_or_else(|| invalid("device.client_key", "not set (or set CLIENT_KEY)"))?;
        require(
            device.connect_timeout_secs > 0,
            "device.connect_timeout_secs",
            "must be positive",
        )?;
        require(
            device.handshake_timeout_secs > 0,
            "device.handshake_timeout_secs",
            "must be positive",
        )?;

        require(!cloud.device_type.is_empty(), "cloud.device_type", "empty")?;
        require(
            !cloud.device_type.contains(['/', '+', '#']),
            "cloud.device_type",
            "must not contain '/', '+' or '#'",
        )?;
        require(
            cloud.ack_timeout_secs > 0 && cloud.request_timeout_secs > 0,
            "cloud",
            "timeouts must be positive",
        )?;

        require(
            self.backoff.initial_secs > 0,
            "backoff.initial_secs",
            "must be positive",
        )?;
        require(
            self.backoff.max_secs >= self.backoff.initial_secs,
            "backoff.max_secs",
            "must not be below backoff.initial_secs",
        )?;
        require(
            self.bridge.channel_capacity > 0,
            "bridge.channel_capacity",
            "must be positive",
        )?;

        let verification = device
            .ca_cert
            .clone()
            .map_or(ServerVerification::AcceptAny, ServerVerification::CustomCa);

        Ok(BridgeConfig {
            device: DeviceConfig {
                host: device.host.clone(),
                port: device.port,
                client_cert,
                client_key,
                verification,
                connect_timeout: Duration::from_secs(device.connect_timeout_secs),
                handshake_timeout: Duration::from_secs(device.handshake_timeout_secs),
            },
            cloud: CloudConfig {
                device_type: cloud.device_type.clone(),
                use_tls: cloud.tls,
                keep_alive: Duration::from_secs(cloud.keep_alive_secs),
                ack_timeout: Duration::from_secs(cloud.ack_timeout_secs),
                request_timeout: Duration::from_secs(cloud.request_timeout_secs),
                ca_cert: cloud.ca_cert.clone(),
            },
            credentials,
            backoff: BackoffConfig {
                initial_delay: Duration::from_secs(self.backoff.initial_secs),
                max_delay: Duration::from_secs(self.backoff.max_secs),
            },
            channel_capacity: self.bridge.channel_capacity,
        })
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

fn require(ok: bool, field: &str, reason: &str) -> Result<(), ConfigError> {
    if ok { Ok(()) } else { Err(invalid(field, reason)) }
}
