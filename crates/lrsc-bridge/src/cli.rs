//! Clap derive structures for the `lrsc-bridge` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Bridge an LRSC concentrator to the IoT platform
#[derive(Debug, Parser)]
#[command(
    name = "lrsc-bridge",
    version,
    about = "Bridge an LRSC concentrator to the IoT platform",
    long_about = "Forwards device telemetry from an LRSC concentrator to the IoT platform\n\
        over MQTT, registering devices on first sight, and delivers platform\n\
        commands back to the concentrator.\n\n\
        Platform credentials come from VCAP_SERVICES or --services-file."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (TOML)
    #[arg(long, short = 'c', env = "LRSC_BRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Read the service bindings from a file instead of VCAP_SERVICES
    #[arg(long, global = true)]
    pub services_file: Option<PathBuf>,

    /// Port of the status HTTP endpoint (overrides status.port)
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run,

    /// Validate configuration, credentials and TLS material, then exit
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Args)]
pub struct CheckConfigArgs {
    /// Print the effective configuration as TOML
    #[arg(long)]
    pub print: bool,
}
