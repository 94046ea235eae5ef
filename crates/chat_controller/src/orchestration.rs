//! Queueing helpers from front-end actions to the worker command channel.

use crossbeam_channel::{Sender, TrySendError};
use thiserror::Error;

use shared::protocol::WorkerCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("worker command queue is full; please retry")]
    QueueFull,
    #[error("worker command processor disconnected")]
    Disconnected,
}

pub fn dispatch_worker_command(
    cmd_tx: &Sender<WorkerCommand>,
    cmd: WorkerCommand,
) -> Result<(), DispatchError> {
    let cmd_name = cmd.name();
    match cmd_tx.try_send(cmd) {
        Ok(()) => {
            tracing::debug!(command = cmd_name, "queued controller->worker command");
            Ok(())
        }
        Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull),
        Err(TrySendError::Disconnected(_)) => Err(DispatchError::Disconnected),
    }
}
