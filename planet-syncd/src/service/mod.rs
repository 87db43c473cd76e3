//! Control of the overlay service through the host service manager.
//!
//! [`ServiceController`] owns the manager and service handles and performs
//! blocking start/stop/query calls with bounded polling. It lives on its own
//! thread behind a [`ControllerHandle`] so the async side never blocks on it.

pub mod controller;
pub mod handle;
pub mod systemd;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub use controller::ServiceController;
pub use handle::ControllerHandle;
pub use systemd::SystemdBackend;

/// Service state as reported by the manager. Read live on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    Unknown,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::StartPending => "starting",
            ServiceState::StopPending => "stopping",
            ServiceState::Running => "running",
            ServiceState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Control signals that can be sent to a running service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceControl {
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Stop,
    Start,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Stop => f.write_str("stopping"),
            RestartPhase::Start => f.write_str("starting"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("not connected to the service manager")]
    NotConnected,

    #[error("failed to connect to the service manager: {0}")]
    Connect(#[source] io::Error),

    #[error("failed to open service {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to query service status: {0}")]
    QueryFailed(#[source] io::Error),

    #[error("failed to start service: {0}")]
    StartFailed(#[source] io::Error),

    #[error("failed to send stop control: {0}")]
    ControlFailed(#[source] io::Error),

    #[error("service is already running")]
    AlreadyRunning,

    #[error("service is already stopped")]
    AlreadyStopped,

    #[error("service did not reach running within {0:?}")]
    StartTimeout(Duration),

    #[error("service did not stop after {0} checks")]
    StopTimeout(u32),

    #[error("restart failed while {phase}: {source}")]
    RestartFailed {
        phase: RestartPhase,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("interrupted by shutdown")]
    Cancelled,

    #[error("service controller thread is gone")]
    ControllerGone,
}

impl ServiceError {
    /// Whether the handle itself looks unusable and a reconnect may help
    pub fn is_stale_handle(&self) -> bool {
        matches!(
            self,
            ServiceError::NotConnected
                | ServiceError::QueryFailed(_)
                | ServiceError::Connect(_)
                | ServiceError::Open { .. }
        )
    }

    /// Whether the operation gave up because shutdown was requested
    pub fn is_cancelled(&self) -> bool {
        match self {
            ServiceError::Cancelled => true,
            ServiceError::RestartFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Capability interface over a host service manager.
///
/// Two levels of handle, as service managers usually hand out: a manager
/// connection, and a service opened through it. All calls are synchronous.
pub trait ServiceBackend: Send + 'static {
    type Manager: Send;
    type Service: Send;

    fn connect(&self) -> io::Result<Self::Manager>;

    fn open(&self, manager: &Self::Manager, name: &str) -> io::Result<Self::Service>;

    fn query(&self, service: &Self::Service) -> io::Result<ServiceState>;

    fn start(&self, service: &Self::Service) -> io::Result<()>;

    /// Send a control signal and return the state reported right after it
    fn control(&self, service: &Self::Service, control: ServiceControl) -> io::Result<ServiceState>;

    fn close(&self, service: Self::Service);

    fn disconnect(&self, manager: Self::Manager) -> io::Result<()>;
}
