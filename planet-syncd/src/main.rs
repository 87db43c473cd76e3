mod bootstrap;
mod cli;
mod config;
mod error;
mod logfile;
mod orchestrator;
mod resolver;
mod service;
mod unit;

#[cfg(test)]
mod testutil;

use std::io::Write;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::resolver::{SystemResolver, Upstream};
use crate::service::{ControllerHandle, ServiceController, SystemdBackend};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let command = cli.command();
    if command == Commands::Run {
        return run(config).await;
    }

    logfile::init_console();
    match command {
        Commands::Install => unit::install(&config.service, &cli.config),
        Commands::Uninstall => unit::uninstall(&config.service),
        Commands::Status => {
            println!("{}", unit::status(&systemd_controller(&config.service.name)));
            println!("{}", unit::status(&systemd_controller(&config.overlay.service_name)));
            Ok(())
        }
        Commands::Start => report(unit::start(&systemd_controller(&config.service.name))),
        Commands::Stop => report(unit::stop(&systemd_controller(&config.service.name))),
        Commands::Restart => report(unit::restart(&systemd_controller(&config.service.name))),
        Commands::Run => Ok(()),
    }
}

fn systemd_controller(name: &str) -> ServiceController<SystemdBackend> {
    ServiceController::new(SystemdBackend::default(), name)
}

fn report(outcome: Result<String>) -> Result<()> {
    println!("{}", outcome?);
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let mut log = logfile::init(&config.log)?;

    tracing::info!("Starting planet-syncd {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Logging to {}", log.path().display());
    tracing::info!(
        "Watching {} every {:?}, overlay service {}",
        config.upstream.domain,
        config.check_interval(),
        config.overlay.service_name
    );

    let controller = ControllerHandle::spawn(ServiceController::new(
        SystemdBackend::default(),
        config.overlay.service_name.clone(),
    ));
    let upstream = Upstream::new(&config).context("Failed to build HTTP client")?;

    let orchestrator = Orchestrator::new(&config, controller.clone(), Arc::new(SystemResolver), upstream);
    let task = orchestrator.start();

    shutdown_signal().await?;
    tracing::info!("Shutdown signal received");

    task.stop().await;

    if let Err(e) = controller.shutdown().await {
        tracing::error!("Failed to shut down service controller: {}", e);
    }

    tracing::info!("Shutdown complete");
    log.flush().context("Failed to flush log file")?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
