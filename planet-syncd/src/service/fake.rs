//! In-memory service manager for tests.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use super::controller::Timing;
use super::{ServiceBackend, ServiceControl, ServiceState};

/// How a requested transition plays out
#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Immediate,
    /// Target state is reported after this many further status queries
    AfterPolls(u32),
    Never,
}

struct State {
    state: ServiceState,
    pending: Option<(ServiceState, u32)>,
    start: Transition,
    stop: Transition,
    installed: bool,
    generation: u32,
    start_calls: u32,
    control_calls: u32,
    connects: u32,
    disconnects: u32,
}

#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<Mutex<State>>,
}

pub struct FakeManager;

pub struct FakeService {
    generation: u32,
}

impl FakeBackend {
    pub fn new(state: ServiceState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                state,
                pending: None,
                start: Transition::Immediate,
                stop: Transition::Immediate,
                installed: true,
                generation: 0,
                start_calls: 0,
                control_calls: 0,
                connects: 0,
                disconnects: 0,
            })),
        }
    }

    pub fn fast_timing() -> Timing {
        Timing {
            start_poll: Duration::from_millis(1),
            start_timeout: Duration::from_millis(50),
            stop_poll: Duration::from_millis(1),
            stop_checks: 5,
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.inner.lock().unwrap())
    }

    pub fn set_state(&self, state: ServiceState) {
        self.with(|s| {
            s.state = state;
            s.pending = None;
        })
    }

    pub fn set_start(&self, transition: Transition) {
        self.with(|s| s.start = transition)
    }

    pub fn set_stop(&self, transition: Transition) {
        self.with(|s| s.stop = transition)
    }

    pub fn set_installed(&self, installed: bool) {
        self.with(|s| s.installed = installed)
    }

    /// Uninstall and reinstall: handles opened before are now stale
    pub fn reinstall(&self) {
        self.with(|s| s.generation += 1)
    }

    pub fn start_calls(&self) -> u32 {
        self.with(|s| s.start_calls)
    }

    pub fn control_calls(&self) -> u32 {
        self.with(|s| s.control_calls)
    }

    pub fn connects(&self) -> u32 {
        self.with(|s| s.connects)
    }

    pub fn disconnects(&self) -> u32 {
        self.with(|s| s.disconnects)
    }
}

fn begin(s: &mut State, transition: Transition, pending: ServiceState, target: ServiceState) {
    match transition {
        Transition::Immediate => {
            s.state = target;
            s.pending = None;
        }
        Transition::AfterPolls(n) => {
            s.state = pending;
            s.pending = Some((target, n));
        }
        Transition::Never => {
            s.state = pending;
            s.pending = None;
        }
    }
}

impl ServiceBackend for FakeBackend {
    type Manager = FakeManager;
    type Service = FakeService;

    fn connect(&self) -> io::Result<FakeManager> {
        self.with(|s| s.connects += 1);
        Ok(FakeManager)
    }

    fn open(&self, _manager: &FakeManager, name: &str) -> io::Result<FakeService> {
        self.with(|s| {
            if s.installed {
                Ok(FakeService {
                    generation: s.generation,
                })
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, format!("{name} not installed")))
            }
        })
    }

    fn query(&self, service: &FakeService) -> io::Result<ServiceState> {
        self.with(|s| {
            if service.generation != s.generation {
                return Err(io::Error::other("stale service handle"));
            }
            if let Some((target, n)) = s.pending {
                if n == 0 {
                    s.state = target;
                    s.pending = None;
                } else {
                    s.pending = Some((target, n - 1));
                }
            }
            Ok(s.state)
        })
    }

    fn start(&self, _service: &FakeService) -> io::Result<()> {
        self.with(|s| {
            s.start_calls += 1;
            let transition = s.start;
            begin(s, transition, ServiceState::StartPending, ServiceState::Running);
        });
        Ok(())
    }

    fn control(&self, _service: &FakeService, control: ServiceControl) -> io::Result<ServiceState> {
        self.with(|s| {
            s.control_calls += 1;
            match control {
                ServiceControl::Stop => {
                    let transition = s.stop;
                    begin(s, transition, ServiceState::StopPending, ServiceState::Stopped);
                }
            }
            Ok(s.state)
        })
    }

    fn close(&self, _service: FakeService) {}

    fn disconnect(&self, _manager: FakeManager) -> io::Result<()> {
        self.with(|s| s.disconnects += 1);
        Ok(())
    }
}
