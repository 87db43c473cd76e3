use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use super::{RestartPhase, ServiceBackend, ServiceControl, ServiceError, ServiceState};

type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Longest stretch a polling wait sleeps without looking at its token
const CANCEL_CHECK: Duration = Duration::from_millis(50);

/// Polling cadence for state transitions
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub start_poll: Duration,
    pub start_timeout: Duration,
    pub stop_poll: Duration,
    pub stop_checks: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            start_poll: Duration::from_millis(500),
            start_timeout: Duration::from_secs(10),
            // Stopping is usually slower; poll coarser
            stop_poll: Duration::from_secs(1),
            stop_checks: 10,
        }
    }
}

/// Stateful handle to one named service.
///
/// Holds the manager and service handles between calls but never the
/// service state: every operation queries the manager first, because the
/// service can be started or stopped behind our back at any time.
pub struct ServiceController<B: ServiceBackend> {
    name: String,
    backend: B,
    manager: Option<B::Manager>,
    service: Option<B::Service>,
    timing: Timing,
}

impl<B: ServiceBackend> ServiceController<B> {
    /// Connect to `name`. A failed connect is logged and leaves the
    /// controller disconnected; [`Self::reconnect`] retries later.
    pub fn new(backend: B, name: impl Into<String>) -> Self {
        Self::with_timing(backend, name, Timing::default())
    }

    pub fn with_timing(backend: B, name: impl Into<String>, timing: Timing) -> Self {
        let mut controller = Self {
            name: name.into(),
            backend,
            manager: None,
            service: None,
            timing,
        };
        if let Err(e) = controller.connect() {
            tracing::warn!("Service {} not reachable yet: {}", controller.name, e);
        }
        controller
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_some() && self.service.is_some()
    }

    fn connect(&mut self) -> Result<()> {
        let manager = self.backend.connect().map_err(ServiceError::Connect)?;
        match self.backend.open(&manager, &self.name) {
            Ok(service) => {
                self.manager = Some(manager);
                self.service = Some(service);
                Ok(())
            }
            Err(source) => {
                let _ = self.backend.disconnect(manager);
                Err(ServiceError::Open {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn service(&self) -> Result<&B::Service> {
        match (&self.manager, &self.service) {
            (Some(_), Some(service)) => Ok(service),
            _ => Err(ServiceError::NotConnected),
        }
    }

    /// Drop both handles and open fresh ones. Needed after the service was
    /// uninstalled and reinstalled, which invalidates the old handles.
    pub fn reconnect(&mut self) -> Result<()> {
        self.close();
        self.connect()?;
        tracing::info!("Reconnected to service {}", self.name);
        Ok(())
    }

    /// Release both handles. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(service) = self.service.take() {
            self.backend.close(service);
        }
        if let Some(manager) = self.manager.take() {
            if let Err(e) = self.backend.disconnect(manager) {
                tracing::debug!("Disconnect from service manager failed: {}", e);
            }
        }
    }

    pub fn status(&self) -> Result<ServiceState> {
        let service = self.service()?;
        self.backend.query(service).map_err(ServiceError::QueryFailed)
    }

    /// Sleep for `duration`, or until `cancel` fires
    fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        let until = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep((until - now).min(CANCEL_CHECK));
        }
    }

    /// Start the service and wait until it reports running.
    ///
    /// Fails with [`ServiceError::AlreadyRunning`] without issuing a start
    /// when it already runs, and with [`ServiceError::Cancelled`] when
    /// `cancel` fires during the wait.
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let service = self.service()?;
        if self.status()? == ServiceState::Running {
            return Err(ServiceError::AlreadyRunning);
        }

        self.backend.start(service).map_err(ServiceError::StartFailed)?;
        self.wait_for_running(cancel)
    }

    fn wait_for_running(&self, cancel: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + self.timing.start_timeout;
        loop {
            self.pause(self.timing.start_poll, cancel)?;
            if self.status()? == ServiceState::Running {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::StartTimeout(self.timing.start_timeout));
            }
        }
    }

    /// Stop the service and wait until it reports stopped.
    ///
    /// Fails with [`ServiceError::AlreadyStopped`] without sending the
    /// control signal when it is already stopped.
    pub fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let service = self.service()?;
        if self.status()? == ServiceState::Stopped {
            return Err(ServiceError::AlreadyStopped);
        }

        let mut state = self
            .backend
            .control(service, ServiceControl::Stop)
            .map_err(ServiceError::ControlFailed)?;

        for _ in 0..self.timing.stop_checks {
            if state == ServiceState::Stopped {
                return Ok(());
            }
            self.pause(self.timing.stop_poll, cancel)?;
            state = self.status()?;
        }

        if state == ServiceState::Stopped {
            return Ok(());
        }
        Err(ServiceError::StopTimeout(self.timing.stop_checks))
    }

    /// Stop if running, then start. A stopped service is simply started.
    ///
    /// The service may change state between our checks; finding it already
    /// stopped or already running on the way is not a failure.
    ///
    /// If `cancel` fires while waiting for the stop, a start is still issued
    /// (without waiting for it) so the service is not left down.
    pub fn restart(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        if self.status()? == ServiceState::Running {
            match self.stop(cancel) {
                Ok(()) | Err(ServiceError::AlreadyStopped) => {}
                Err(ServiceError::Cancelled) => {
                    self.start_detached();
                    return Err(ServiceError::RestartFailed {
                        phase: RestartPhase::Stop,
                        source: Box::new(ServiceError::Cancelled),
                    });
                }
                Err(e) => {
                    return Err(ServiceError::RestartFailed {
                        phase: RestartPhase::Stop,
                        source: Box::new(e),
                    })
                }
            }
        }

        match self.start(cancel) {
            Ok(()) | Err(ServiceError::AlreadyRunning) => Ok(()),
            Err(e) => Err(ServiceError::RestartFailed {
                phase: RestartPhase::Start,
                source: Box::new(e),
            }),
        }
    }

    fn start_detached(&self) {
        let started = self
            .service()
            .and_then(|service| self.backend.start(service).map_err(ServiceError::StartFailed));
        match started {
            Ok(()) => tracing::info!("Start issued for {} after interrupted restart", self.name),
            Err(e) => tracing::error!("Service {} may be left stopped: {}", self.name, e),
        }
    }
}

impl<B: ServiceBackend> Drop for ServiceController<B> {
    fn drop(&mut self) {
        self.close();
    }
}
