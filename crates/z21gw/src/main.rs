mod cli;
mod config;
mod error;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use z21gw_api::Z21Client;
use z21gw_core::{Gateway, NatsBus};

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    if matches!(cli.command, Some(Command::Version)) {
        println!("z21gw version: {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    init_tracing(cli.global.verbose, cli.global.log_format);

    // Run and handle errors with proper exit codes
    if let Err(err) = run(&cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let settings = config::load(&cli.global)?;
    let gateway_config = settings.gateway_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %settings.name,
        z21 = %settings.z21_addr,
        nats = %settings.nats_url,
        "starting z21gw"
    );

    let device = Z21Client::connect(&settings.z21_addr)
        .await
        .map_err(|source| CliError::DeviceConnect {
            addr: settings.z21_addr.clone(),
            source,
        })?;

    let bus = match NatsBus::connect(&settings.nats_url).await {
        Ok(bus) => bus,
        Err(e) => {
            device.close().await;
            return Err(z21gw_core::CoreError::from(e).into());
        }
    };

    let gateway = Gateway::new(gateway_config, Arc::new(device), Arc::new(bus))?;
    if let Err(e) = gateway.start().await {
        error!(error = %e, "gateway failed to start");
        gateway.stop().await;
        return Err(e.into());
    }
    info!(namespace = %gateway.identity(), "gateway running");

    shutdown_signal().await;
    info!("shutting down");

    gateway.stop().await;
    info!("gateway stopped cleanly");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
    }
}
