use std::thread;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use super::{ServiceBackend, ServiceController, ServiceError, ServiceState};

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Commands sent to the controller thread
pub enum ControlCommand {
    Status(Reply<ServiceState>),
    Restart(CancellationToken, Reply<()>),
    Reconnect(Reply<()>),
    Shutdown,
}

/// Async handle to a [`ServiceController`] running on its own thread.
///
/// Manager calls block and restarts poll for up to tens of seconds, so they
/// stay off the runtime. Commands are handled one at a time, in order.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControllerHandle {
    /// Spawn the controller thread
    pub fn spawn<B: ServiceBackend>(mut controller: ServiceController<B>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ControlCommand>(16);

        if !controller.is_connected() {
            tracing::warn!("Service {} starts disconnected; the sync loop will retry", controller.name());
        }

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    ControlCommand::Status(reply) => {
                        let _ = reply.send(controller.status());
                    }
                    ControlCommand::Restart(cancel, reply) => {
                        tracing::info!("Restarting service {}", controller.name());
                        let _ = reply.send(controller.restart(&cancel));
                    }
                    ControlCommand::Reconnect(reply) => {
                        let _ = reply.send(controller.reconnect());
                    }
                    ControlCommand::Shutdown => {
                        tracing::info!("Service controller shutting down");
                        break;
                    }
                }
            }
            controller.close();
        });

        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> ControlCommand) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ServiceError::ControllerGone)?;
        rx.await.map_err(|_| ServiceError::ControllerGone)?
    }

    pub async fn status(&self) -> Result<ServiceState, ServiceError> {
        self.request(ControlCommand::Status).await
    }

    /// Restart the service. Polling waits give up once `cancel` fires.
    pub async fn restart(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        self.request(|reply| ControlCommand::Restart(cancel.clone(), reply))
            .await
    }

    pub async fn reconnect(&self) -> Result<(), ServiceError> {
        self.request(ControlCommand::Reconnect).await
    }

    /// Stop the controller thread; it releases its handles on the way out
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.tx
            .send(ControlCommand::Shutdown)
            .await
            .map_err(|_| ServiceError::ControllerGone)
    }
}
