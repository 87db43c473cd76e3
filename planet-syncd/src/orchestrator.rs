//! The sync loop: on every tick check the overlay service, compare the
//! domain's addresses against the last completed update, and when they moved
//! wait for upstream, fetch the new planet file, swap it in and restart.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::types::BootstrapPaths;
use crate::bootstrap;
use crate::config::Config;
use crate::error::SyncError;
use crate::resolver::{self, Resolve, Upstream};
use crate::service::{ControllerHandle, ServiceState};

/// Step at which a cycle gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReadRecord,
    WaitUpstream,
    Download,
    Swap,
    Restart,
    Persist,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::ReadRecord => "reading the address record",
            Step::WaitUpstream => "waiting for upstream",
            Step::Download => "downloading the planet file",
            Step::Swap => "swapping the planet file",
            Step::Restart => "restarting the overlay service",
            Step::Persist => "persisting address records",
        };
        f.write_str(s)
    }
}

/// How a single cycle ended. Every outcome other than `Updated` leaves the
/// address records as they were, so the next tick starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    ServiceDown(ServiceState),
    ServiceUnavailable,
    ResolveFailed,
    Unchanged,
    Cancelled,
    Aborted(Step),
    Updated,
}

pub struct Orchestrator {
    controller: ControllerHandle,
    resolver: Arc<dyn Resolve>,
    upstream: Upstream,
    domain: String,
    paths: BootstrapPaths,
    ip_record: PathBuf,
    server_ip_record: PathBuf,
    check_interval: Duration,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        controller: ControllerHandle,
        resolver: Arc<dyn Resolve>,
        upstream: Upstream,
    ) -> Self {
        Self {
            controller,
            resolver,
            upstream,
            domain: config.upstream.domain.clone(),
            paths: BootstrapPaths::new(config.overlay.planet_path.clone()),
            ip_record: config.state.ip_record_path.clone(),
            server_ip_record: config.state.server_ip_record_path.clone(),
            check_interval: config.check_interval(),
            poll_interval: config.poll_interval(),
        }
    }

    fn abort(&self, step: Step, err: impl fmt::Display) -> CycleOutcome {
        tracing::error!("Sync aborted while {}: {}", step, err);
        CycleOutcome::Aborted(step)
    }

    /// Run one check, and the update it triggers if any.
    ///
    /// Never fails: each problem is logged and ends the cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        match self.controller.status().await {
            Ok(ServiceState::Running) => {}
            Ok(state) => {
                tracing::warn!("Overlay service is {}, skipping this check", state);
                return CycleOutcome::ServiceDown(state);
            }
            Err(e) if e.is_stale_handle() => {
                tracing::warn!("Overlay service status unavailable ({}), reconnecting", e);
                if let Err(e) = self.controller.reconnect().await {
                    tracing::warn!("Reconnect failed: {}", e);
                }
                return CycleOutcome::ServiceUnavailable;
            }
            Err(e) => {
                tracing::error!("Failed to query overlay service: {}", e);
                return CycleOutcome::ServiceUnavailable;
            }
        }

        let current = match resolver::current_ips(self.resolver.as_ref(), &self.domain).await {
            Ok(pair) => pair.to_string(),
            Err(e) => {
                tracing::error!("{}", e);
                return CycleOutcome::ResolveFailed;
            }
        };

        let recorded = match resolver::local_ips(&self.ip_record).await {
            Ok(recorded) => recorded,
            Err(e) => return self.abort(Step::ReadRecord, e),
        };

        if current.as_bytes() == recorded.as_slice() {
            tracing::info!("Addresses of {} unchanged ({})", self.domain, current);
            return CycleOutcome::Unchanged;
        }

        tracing::info!(
            "Addresses of {} changed from {:?} to {:?}, waiting for upstream to republish",
            self.domain,
            String::from_utf8_lossy(&recorded),
            current
        );

        let server = match self
            .upstream
            .wait_for_server_update(&self.server_ip_record, self.poll_interval, cancel)
            .await
        {
            Ok(server) => server,
            Err(SyncError::Cancelled) => {
                tracing::info!("Stopped waiting for upstream");
                return CycleOutcome::Cancelled;
            }
            Err(e) => return self.abort(Step::WaitUpstream, e),
        };
        tracing::info!("Upstream now publishes {:?}", String::from_utf8_lossy(&server));

        match bootstrap::download(self.upstream.client(), self.upstream.planet_url(), &self.paths.staging).await {
            Ok(staged) => tracing::info!(
                "Staged planet file at {} ({} bytes, sha256 {})",
                self.paths.staging.display(),
                staged.bytes,
                staged.sha256
            ),
            Err(e) => return self.abort(Step::Download, e),
        }

        if let Err(e) = bootstrap::replace(&self.paths).await {
            return self.abort(Step::Swap, e);
        }
        tracing::info!("Replaced {}", self.paths.live.display());

        // Records stay untouched on failure, so the next tick repeats the update
        if let Err(e) = self.controller.restart(cancel).await {
            if e.is_cancelled() {
                tracing::warn!("Restart of the overlay service interrupted by shutdown");
                return CycleOutcome::Cancelled;
            }
            return self.abort(Step::Restart, e);
        }

        if let Err(e) =
            bootstrap::persist_records(&self.ip_record, current.as_bytes(), &self.server_ip_record, &server).await
        {
            return self.abort(Step::Persist, e);
        }

        tracing::info!("Planet file updated for {} ({})", self.domain, current);
        CycleOutcome::Updated
    }

    /// Tick until `cancel` fires. The first check runs immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Sync loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.run_cycle(&cancel).await;
                    tracing::debug!("Check finished: {:?}", outcome);
                }
            }
        }
    }

    /// Run the loop as a background task
    pub fn start(self) -> OrchestratorTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { self.run(token).await });
        OrchestratorTask { cancel, handle }
    }
}

/// A running sync loop
pub struct OrchestratorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl OrchestratorTask {
    /// Signal shutdown and wait for the loop to exit. An upstream wait in
    /// progress is abandoned.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("Sync loop task failed: {}", e);
        }
    }
}
