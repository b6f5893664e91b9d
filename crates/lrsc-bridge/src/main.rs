mod cli;
mod error;
mod status_server;

use std::path::Path;

use clap::Parser;
use lrsc_api::{Dialer, HttpRegistrar, TlsDialer};
use lrsc_config::{Config, ConfigError};
use lrsc_core::{BridgeConfig, BridgeService};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckConfigArgs, Cli, Command, GlobalOpts, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);
    init_diagnostics();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Diagnostics are printed without line wrapping.
fn init_diagnostics() {
    let installed = miette::set_hook(Box::new(|_| {
        Box::new(miette::MietteHandlerOpts::new().wrap_lines(false).build())
    }));
    if installed.is_err() {
        tracing::debug!("Diagnostic handler already installed");
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(lrsc_config::config_path);
    let (config, bridge_config) = load(&path, &cli.global)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => serve(&config, &bridge_config, cli.global.port).await,
        Command::CheckConfig(args) => check_config(&path, &config, &bridge_config, &args),
    }
}

/// Config file, then credentials, then validation into a `BridgeConfig`.
fn load(path: &Path, global: &GlobalOpts) -> Result<(Config, BridgeConfig), CliError> {
    let config_err = |e: ConfigError| CliError::from_config(e, path);

    tracing::debug!(path = %path.display(), "Using configuration file");
    let config = lrsc_config::load_config(Some(path)).map_err(config_err)?;
    let credentials =
        lrsc_config::load_credentials(global.services_file.as_deref()).map_err(config_err)?;
    let bridge_config = config.to_bridge_config(credentials).map_err(config_err)?;
    Ok((config, bridge_config))
}

// ── check-config ────────────────────────────────────────────────────

fn check_config(
    path: &Path,
    config: &Config,
    bridge_config: &BridgeConfig,
    args: &CheckConfigArgs,
) -> Result<(), CliError> {
    let dialer = TlsDialer::new(&bridge_config.device.dialer_config())?;
    let credentials = &bridge_config.credentials;
    let registrar = HttpRegistrar::new(
        &credentials.base_uri,
        &credentials.org,
        credentials.user.clone(),
        credentials.password.clone(),
        bridge_config.cloud.device_type.clone(),
        &bridge_config.transport_config(),
    )?;
    let mqtt = bridge_config.mqtt_config();

    if args.print {
        let rendered = config
            .to_toml()
            .map_err(|e| CliError::from_config(e, path))?;
        println!("{rendered}");
    }
    println!("concentrator  {}", dialer.endpoint());
    println!("broker        {}:{}", mqtt.host, mqtt.port);
    println!("registration  {}", registrar.devices_url());
    println!("Configuration OK");
    Ok(())
}

// ── run ─────────────────────────────────────────────────────────────

async fn serve(
    config: &Config,
    bridge_config: &BridgeConfig,
    port: Option<u16>,
) -> Result<(), CliError> {
    let addr = format!(
        "{}:{}",
        config.status.bind,
        port.unwrap_or(config.status.port)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| CliError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let cancel = CancellationToken::new();
    let service = BridgeService::start(bridge_config, cancel.clone())?;
    spawn_signal_handler(cancel.clone());

    let served = status_server::serve(
        listener,
        service.device_status(),
        service.cloud_status(),
        cancel.clone(),
    )
    .await;

    service.shutdown();
    service.join().await;
    served.map_err(CliError::StatusServer)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
