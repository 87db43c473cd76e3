//! The daemon's own systemd unit: `install`, `uninstall`, `start`, `stop`,
//! `restart` and `status`.

use std::path::{Path, PathBuf};
use std::process::Command;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::config::ServiceConfig;
use crate::service::{ServiceBackend, ServiceController, ServiceError, ServiceState};

const UNIT_DIR: &str = "/etc/systemd/system";

fn unit_path(service: &ServiceConfig) -> PathBuf {
    Path::new(UNIT_DIR).join(format!("{}.service", service.name))
}

pub fn render_unit(service: &ServiceConfig, binary: &Path, config: &Path) -> String {
    format!(
        r#"[Unit]
Description={description}
After=network-online.target
Wants=network-online.target
StartLimitIntervalSec={start_limit}

[Service]
Type=simple
ExecStart={binary} -c {config} run
Restart={restart}
RestartSec={restart_sec}

[Install]
WantedBy=multi-user.target
"#,
        description = service.description,
        start_limit = service.start_limit_interval_sec,
        binary = binary.display(),
        config = config.display(),
        restart = service.restart,
        restart_sec = service.restart_sec,
    )
}

fn systemctl(args: &[&str]) -> Result<()> {
    let status = Command::new("systemctl")
        .args(args)
        .status()
        .context("Failed to run systemctl")?;
    anyhow::ensure!(status.success(), "systemctl {} failed with {}", args.join(" "), status);
    Ok(())
}

pub fn install(service: &ServiceConfig, config_path: &Path) -> Result<()> {
    let unit = unit_path(service);
    anyhow::ensure!(
        !unit.exists(),
        "{} already exists; run uninstall first",
        unit.display()
    );

    let binary = std::env::current_exe().context("Failed to locate own executable")?;
    let config = config_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve config path: {}", config_path.display()))?;

    std::fs::write(&unit, render_unit(service, &binary, &config))
        .with_context(|| format!("Failed to write {}", unit.display()))?;
    tracing::info!("Wrote {}", unit.display());

    systemctl(&["daemon-reload"])?;
    systemctl(&["enable", &service.name])?;
    systemctl(&["start", &service.name])?;

    println!("Service {} installed, enabled and started.", service.name);
    Ok(())
}

pub fn uninstall(service: &ServiceConfig) -> Result<()> {
    // Either may fail on a unit that is already stopped or disabled
    if let Err(e) = systemctl(&["stop", &service.name]) {
        tracing::warn!("{:#}", e);
    }
    if let Err(e) = systemctl(&["disable", &service.name]) {
        tracing::warn!("{:#}", e);
    }

    let unit = unit_path(service);
    std::fs::remove_file(&unit).with_context(|| format!("Failed to remove {}", unit.display()))?;
    systemctl(&["daemon-reload"])?;

    println!("Removed {}.", unit.display());
    Ok(())
}

// One-shot commands run to completion; nothing cancels them.

pub fn start<B: ServiceBackend>(controller: &ServiceController<B>) -> Result<String> {
    let name = controller.name();
    match controller.start(&CancellationToken::new()) {
        Ok(()) => Ok(format!("{name} started.")),
        Err(ServiceError::AlreadyRunning) => Ok(format!("{name} is already running.")),
        Err(e) => Err(e).with_context(|| format!("Failed to start {name}")),
    }
}

pub fn stop<B: ServiceBackend>(controller: &ServiceController<B>) -> Result<String> {
    let name = controller.name();
    match controller.stop(&CancellationToken::new()) {
        Ok(()) => Ok(format!("{name} stopped.")),
        Err(ServiceError::AlreadyStopped) => Ok(format!("{name} is already stopped.")),
        Err(e) => Err(e).with_context(|| format!("Failed to stop {name}")),
    }
}

/// Restart a running unit. A stopped one is left alone: `start` is the
/// command for that.
pub fn restart<B: ServiceBackend>(controller: &ServiceController<B>) -> Result<String> {
    let name = controller.name();
    let state = controller
        .status()
        .with_context(|| format!("Failed to query {name}"))?;
    if state == ServiceState::Stopped {
        return Ok(format!("{name} is stopped; use start instead."));
    }

    controller
        .restart(&CancellationToken::new())
        .with_context(|| format!("Failed to restart {name}"))?;
    Ok(format!("{name} restarted."))
}

pub fn status<B: ServiceBackend>(controller: &ServiceController<B>) -> String {
    let name = controller.name();
    match controller.status() {
        Ok(state) => format!("{name}: {state}"),
        Err(ServiceError::NotConnected) => format!("{name}: not installed"),
        Err(e) => format!("{name}: {e}"),
    }
}
