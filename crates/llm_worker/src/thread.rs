//! Runs a [`WorkerProxy`] on a dedicated OS thread with its own runtime,
//! bridged to the front end through bounded crossbeam queues.

use std::{sync::Arc, thread};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use llm_engine::EngineFactory;
use shared::{
    error::WorkerErrorKind,
    protocol::{StatusUpdate, WorkerCommand, WorkerEvent},
};
use tokio::{sync::mpsc, task::JoinError};
use tracing::{debug, error, warn};

use crate::{WorkerConfig, WorkerProxy, COMMAND_QUEUE_CAPACITY};

pub fn spawn_worker_thread(
    config: WorkerConfig,
    factory: Arc<dyn EngineFactory>,
    cmd_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("llm-worker".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("failed to build worker runtime: {err}");
                    let failure = WorkerEvent::status(StatusUpdate::failed(
                        WorkerErrorKind::InitializationFailure.user_notice(),
                        format!("failed to build worker runtime: {err}"),
                    ));
                    if event_tx.send(failure).is_err() {
                        debug!("runtime failure not delivered; event receiver is gone");
                    }
                    return;
                }
            };

            runtime.block_on(async move {
                let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
                let intake = tokio::task::spawn_blocking(move || {
                    while let Ok(command) = cmd_rx.recv() {
                        if tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    debug!("front end closed the command queue");
                });

                let mut worker = WorkerProxy::new(config, factory, event_tx);
                worker.run(rx).await;
                finish_intake(intake.await);
            });
        })
        .context("failed to spawn llm worker thread")
}

fn finish_intake(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(%err, "command intake ended abnormally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use crossbeam_channel::bounded;
    use llm_engine::{ChatCompletion, ChatEngine, InitProgress, ProgressSink};
    use shared::{domain::ChatTurn, protocol::READY_STATUS_TEXT};
    use std::time::Duration;

    struct EchoEngine;

    #[async_trait]
    impl ChatEngine for EchoEngine {
        async fn chat_completion(&self, messages: &[ChatTurn]) -> Result<ChatCompletion> {
            let last = messages
                .last()
                .ok_or_else(|| anyhow!("empty history"))?;
            Ok(ChatCompletion::from_text(format!("you said: {}", last.content)))
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl EngineFactory for EchoFactory {
        async fn create(
            &self,
            _model_id: &str,
            progress: Arc<dyn ProgressSink>,
        ) -> Result<Arc<dyn ChatEngine>> {
            progress.report(InitProgress::new("Loading", 1.0));
            Ok(Arc::new(EchoEngine))
        }
    }

    fn next_event(events: &Receiver<WorkerEvent>) -> WorkerEvent {
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("worker event")
    }

    #[test]
    fn worker_thread_serves_commands_and_exits_when_queue_closes() {
        let (cmd_tx, cmd_rx) = bounded(16);
        let (event_tx, event_rx) = bounded(64);
        let handle = spawn_worker_thread(
            WorkerConfig::default(),
            Arc::new(EchoFactory),
            cmd_rx,
            event_tx,
        )
        .expect("spawn worker");

        cmd_tx.send(WorkerCommand::Init).expect("send init");
        assert_eq!(
            next_event(&event_rx),
            WorkerEvent::status(StatusUpdate::with_progress("Loading", 1.0))
        );
        assert_eq!(
            next_event(&event_rx),
            WorkerEvent::status(StatusUpdate::new(READY_STATUS_TEXT))
        );

        cmd_tx
            .send(WorkerCommand::generate("ping"))
            .expect("send generate");
        assert_eq!(
            next_event(&event_rx),
            WorkerEvent::status(StatusUpdate::new("generating"))
        );
        assert_eq!(
            next_event(&event_rx),
            WorkerEvent::response("you said: ping")
        );
        assert_eq!(
            next_event(&event_rx),
            WorkerEvent::status(StatusUpdate::cleared())
        );

        drop(cmd_tx);
        handle.join().expect("worker thread");
        assert!(event_rx.recv().is_err(), "event queue closes with the worker");
    }

    #[test]
    fn panicking_intake_is_logged_not_propagated() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let joined: Result<(), JoinError> = runtime.block_on(async {
            tokio::task::spawn_blocking(|| panic!("intake failed")).await
        });
        assert!(joined.as_ref().is_err_and(JoinError::is_panic));

        finish_intake(joined);
        finish_intake(Ok(()));
    }
}
