//! systemd backend: drives units through `systemctl`.

use std::io;
use std::path::PathBuf;
use std::process::Command;
use super::{ServiceBackend, ServiceControl, ServiceState};

pub struct SystemdBackend {
    systemctl: PathBuf,
}

/// Proof that `systemctl` answered; systemd has no session to hold open
pub struct SystemdManager;

pub struct SystemdUnit {
    name: String,
}

impl Default for SystemdBackend {
    fn default() -> Self {
        Self {
            systemctl: PathBuf::from("systemctl"),
        }
    }
}

impl SystemdBackend {
    fn run(&self, args: &[&str]) -> io::Result<String> {
        let output = Command::new(&self.systemctl).args(args).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "systemctl {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn property(&self, unit: &str, name: &str) -> io::Result<String> {
        self.run(&["show", &format!("--property={name}"), "--value", unit])
    }
}

/// Map systemd's `ActiveState` onto a [`ServiceState`]
pub fn parse_active_state(value: &str) -> ServiceState {
    match value.trim() {
        "active" | "reloading" => ServiceState::Running,
        "activating" => ServiceState::StartPending,
        "deactivating" => ServiceState::StopPending,
        "inactive" | "failed" => ServiceState::Stopped,
        _ => ServiceState::Unknown,
    }
}

impl ServiceBackend for SystemdBackend {
    type Manager = SystemdManager;
    type Service = SystemdUnit;

    fn connect(&self) -> io::Result<SystemdManager> {
        let version = self.run(&["--version"])?;
        tracing::debug!("Using {}", version.lines().next().unwrap_or("systemd"));
        Ok(SystemdManager)
    }

    fn open(&self, _manager: &SystemdManager, name: &str) -> io::Result<SystemdUnit> {
        let load_state = self.property(name, "LoadState")?;
        if load_state.is_empty() || load_state == "not-found" {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unit {name} is not installed"),
            ));
        }
        Ok(SystemdUnit {
            name: name.to_string(),
        })
    }

    fn query(&self, service: &SystemdUnit) -> io::Result<ServiceState> {
        // A unit removed since open reports LoadState=not-found; treat the
        // handle as stale so the caller reconnects.
        if self.property(&service.name, "LoadState")? == "not-found" {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unit {} disappeared", service.name),
            ));
        }
        Ok(parse_active_state(&self.property(&service.name, "ActiveState")?))
    }

    fn start(&self, service: &SystemdUnit) -> io::Result<()> {
        self.run(&["start", "--no-block", &service.name]).map(|_| ())
    }

    fn control(&self, service: &SystemdUnit, control: ServiceControl) -> io::Result<ServiceState> {
        match control {
            ServiceControl::Stop => {
                self.run(&["stop", "--no-block", &service.name])?;
            }
        }
        self.query(service)
    }

    fn close(&self, _service: SystemdUnit) {}

    fn disconnect(&self, _manager: SystemdManager) -> io::Result<()> {
        Ok(())
    }
}
