use crossbeam_channel::{Receiver, Sender, TryRecvError};
use shared::{
    error::WorkerErrorKind,
    protocol::{StatusUpdate, WorkerCommand, WorkerEvent},
};
use tracing::{error, warn};

use crate::{
    orchestration::{dispatch_worker_command, DispatchError},
    transcript::{Author, Transcript},
};

/// Owns what the user sees: the transcript and a single status line.
///
/// The controller never reads the worker's conversation history. User
/// entries are appended once the prompt is handed to the worker and
/// assistant entries come only from worker events.
pub struct ChatController {
    cmd_tx: Sender<WorkerCommand>,
    event_rx: Receiver<WorkerEvent>,
    transcript: Transcript,
    status: String,
    pending_responses: usize,
    transport_failed: bool,
}

impl ChatController {
    /// Wraps an already running worker and asks it to load the model.
    pub fn start(cmd_tx: Sender<WorkerCommand>, event_rx: Receiver<WorkerEvent>) -> Self {
        let mut controller = Self {
            cmd_tx,
            event_rx,
            transcript: Transcript::default(),
            status: String::new(),
            pending_responses: 0,
            transport_failed: false,
        };
        controller.dispatch(WorkerCommand::Init);
        controller
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn status_line(&self) -> &str {
        &self.status
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.event_rx
    }

    pub fn is_disconnected(&self) -> bool {
        self.transport_failed
    }

    /// Prompts sent to the worker that have not been answered yet.
    pub fn pending_responses(&self) -> usize {
        self.pending_responses
    }

    /// Sends the input as a prompt unless it is blank. The untrimmed text
    /// goes to the worker; only then is it shown and the input cleared. A
    /// prompt that could not be queued stays in `input` and `false` is
    /// returned.
    pub fn submit(&mut self, input: &mut String) -> bool {
        if input.trim().is_empty() {
            return false;
        }
        if !self.dispatch(WorkerCommand::generate(input.clone())) {
            return false;
        }
        let message = std::mem::take(input);
        self.transcript.push(Author::User, message);
        self.pending_responses += 1;
        true
    }

    pub fn apply_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Status { data } => {
                self.status = render_status(&data);
                if let Some(error) = data.error {
                    error!(%error, "llm error");
                    self.transcript
                        .push(Author::Assistant, format!("Error: {error}"));
                }
            }
            WorkerEvent::Response { data, error } => {
                if let Some(error) = error {
                    warn!(%error, "llm response carried an error");
                }
                self.pending_responses = self.pending_responses.saturating_sub(1);
                self.transcript.push(Author::Assistant, data);
            }
        }
    }

    /// Applies every event the worker has already queued and returns how
    /// many were applied.
    pub fn process_worker_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.apply_event(event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.report_transport_fault("worker event channel disconnected");
                    break;
                }
            }
        }
        applied
    }

    /// Surfaces a broken worker channel once; later faults are only logged.
    pub fn report_transport_fault(&mut self, detail: &str) {
        if self.transport_failed {
            tracing::debug!(detail, "repeated worker transport fault");
            return;
        }
        self.transport_failed = true;
        error!(detail, "worker transport fault");
        self.transcript.push(
            Author::Assistant,
            WorkerErrorKind::TransportFault.user_notice(),
        );
    }

    fn dispatch(&mut self, cmd: WorkerCommand) -> bool {
        match dispatch_worker_command(&self.cmd_tx, cmd) {
            Ok(()) => true,
            Err(DispatchError::QueueFull) => {
                warn!("worker command queue is full");
                self.status = DispatchError::QueueFull.to_string();
                false
            }
            Err(DispatchError::Disconnected) => {
                self.report_transport_fault("worker command processor disconnected");
                false
            }
        }
    }
}

/// Status line text: the phase label, followed by a rounded percentage when
/// the update carries progress.
pub fn render_status(update: &StatusUpdate) -> String {
    match update.progress {
        Some(progress) => {
            let percent = (progress.clamp(0.0, 1.0) * 100.0).round() as u32;
            if update.text.is_empty() {
                format!("{percent}%")
            } else {
                format!("{} {percent}%", update.text)
            }
        }
        None => update.text.clone(),
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
