//! Binary error type with miette diagnostics and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use lrsc_config::ConfigError;
use lrsc_core::CoreError;

pub mod exit_code {
    pub const RUNTIME: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const CREDENTIALS: i32 = 3;
    pub const TLS: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(lrsc::config),
        help(
            "Check the config file ({path}) and LRSC_BRIDGE_* variables.\n\
             Run: lrsc-bridge check-config --print"
        )
    )]
    Config { message: String, path: String },

    // ── Credentials ──────────────────────────────────────────────────
    #[error("Platform credentials unavailable: {message}")]
    #[diagnostic(
        code(lrsc::credentials),
        help(
            "Bind an iotf-service instance so that VCAP_SERVICES is set,\n\
             or pass --services-file with the same JSON."
        )
    )]
    Credentials { message: String },

    // ── TLS material ─────────────────────────────────────────────────
    #[error("Unusable TLS material: {message}")]
    #[diagnostic(
        code(lrsc::tls),
        help(
            "Point device.client_cert / device.client_key (or CLIENT_CERT / CLIENT_KEY)\n\
             at readable PEM files issued for the concentrator."
        )
    )]
    Tls { message: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Could not bind the status endpoint on {addr}")]
    #[diagnostic(
        code(lrsc::bind),
        help("Choose another port with --port or status.port.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Status endpoint failed")]
    #[diagnostic(code(lrsc::status_server))]
    StatusServer(#[source] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(lrsc::runtime))]
    Core(CoreError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::Credentials { .. } => exit_code::CREDENTIALS,
            Self::Tls { .. } => exit_code::TLS,
            Self::Bind { .. } | Self::StatusServer(_) | Self::Core(_) => exit_code::RUNTIME,
        }
    }

    /// Attach the config file path used for the failing load.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        match err {
            ConfigError::NoCredentials { .. }
            | ConfigError::NoBinding
            | ConfigError::Services(_)
            | ConfigError::Io { .. } => Self::Credentials {
                message: err.to_string(),
            },
            ConfigError::Validation { .. }
            | ConfigError::Serialization(_)
            | ConfigError::Figment(_) => Self::Config {
                message: err.to_string(),
                path: path.display().to_string(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Tls { message } => Self::Tls { message },
            CoreError::Config { message } => Self::Config {
                message,
                path: "(runtime)".into(),
            },
            other => Self::Core(other),
        }
    }
}

impl From<lrsc_api::Error> for CliError {
    fn from(err: lrsc_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
