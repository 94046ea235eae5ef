use std::{collections::VecDeque, sync::Arc};

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use llm_engine::{ChatEngine, EngineFactory, InitProgress, ProgressSink};
use shared::{
    domain::{ChatTurn, DEFAULT_MODEL_ID, DEFAULT_SYSTEM_PROMPT},
    error::{WorkerError, WorkerErrorKind},
    protocol::{StatusUpdate, WorkerCommand, WorkerEvent, GENERATING_STATUS_TEXT, READY_STATUS_TEXT},
};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub model_id: String,
    pub system_prompt: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Uninitialized,
    Initializing,
    Ready,
    InitFailed,
}

/// Owns the engine handle and the conversation history for one worker.
///
/// Initialization and generation run as spawned tasks so commands keep
/// flowing while the engine works: `generate` during initialization is
/// rejected immediately, while `generate` during another generation waits
/// its turn in a FIFO queue. At most one completion call is in flight, so
/// history mutations never interleave.
pub struct WorkerProxy {
    config: WorkerConfig,
    factory: Arc<dyn EngineFactory>,
    engine: Option<Arc<dyn ChatEngine>>,
    phase: WorkerPhase,
    history: Vec<ChatTurn>,
    events: Sender<WorkerEvent>,
    init_task: Option<JoinHandle<Result<Arc<dyn ChatEngine>>>>,
    generation: Option<JoinHandle<Result<String>>>,
    queued_prompts: VecDeque<String>,
}

enum Step {
    InitFinished(Result<Arc<dyn ChatEngine>>),
    GenerationFinished(Result<String>),
    Command(Option<WorkerCommand>),
}

/// Re-emits engine loading ticks as status events.
struct StatusProgressSink {
    events: Sender<WorkerEvent>,
}

impl ProgressSink for StatusProgressSink {
    fn report(&self, progress: InitProgress) {
        let update = StatusUpdate::with_progress(progress.text, progress.progress);
        if self.events.send(WorkerEvent::status(update)).is_err() {
            debug!("progress tick dropped; event receiver is gone");
        }
    }
}

impl WorkerProxy {
    pub fn new(
        config: WorkerConfig,
        factory: Arc<dyn EngineFactory>,
        events: Sender<WorkerEvent>,
    ) -> Self {
        let history = vec![ChatTurn::system(config.system_prompt.clone())];
        Self {
            config,
            factory,
            engine: None,
            phase: WorkerPhase::Uninitialized,
            history,
            events,
            init_task: None,
            generation: None,
            queued_prompts: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    fn is_idle(&self) -> bool {
        self.init_task.is_none() && self.generation.is_none() && self.queued_prompts.is_empty()
    }

    /// Processes commands until the sender side closes, then finishes any
    /// initialization or generation already accepted before returning.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<WorkerCommand>) {
        let mut commands_open = true;
        loop {
            if !commands_open && self.is_idle() {
                break;
            }

            let step = tokio::select! {
                biased;
                joined = join_active(&mut self.init_task) => Step::InitFinished(flatten_join(joined)),
                joined = join_active(&mut self.generation) => {
                    Step::GenerationFinished(flatten_join(joined))
                }
                command = commands.recv(), if commands_open => Step::Command(command),
            };

            match step {
                Step::InitFinished(result) => {
                    self.init_task = None;
                    self.finish_init(result);
                }
                Step::GenerationFinished(result) => {
                    self.generation = None;
                    self.finish_generation(result);
                    if let Some(prompt) = self.queued_prompts.pop_front() {
                        self.start_generation(prompt);
                    }
                }
                Step::Command(Some(command)) => self.handle(command),
                Step::Command(None) => {
                    debug!("command channel closed; draining in-flight work");
                    commands_open = false;
                }
            }
        }
        info!(history_len = self.history.len(), "worker stopped");
    }

    pub fn handle(&mut self, command: WorkerCommand) {
        debug!(command = command.name(), phase = ?self.phase, "worker received command");
        match command {
            WorkerCommand::Init => self.begin_init(),
            WorkerCommand::Generate { data } => self.accept_prompt(data),
        }
    }

    fn begin_init(&mut self) {
        match self.phase {
            WorkerPhase::Ready => {
                info!("init ignored; engine already ready");
                self.emit(WorkerEvent::status(StatusUpdate::new(READY_STATUS_TEXT)));
            }
            WorkerPhase::Initializing => {
                warn!("init ignored; initialization already in flight");
            }
            WorkerPhase::Uninitialized | WorkerPhase::InitFailed => {
                info!(model = %self.config.model_id, "initializing inference engine");
                self.phase = WorkerPhase::Initializing;
                let factory = self.factory.clone();
                let model_id = self.config.model_id.clone();
                let sink: Arc<dyn ProgressSink> = Arc::new(StatusProgressSink {
                    events: self.events.clone(),
                });
                self.init_task =
                    Some(tokio::spawn(async move { factory.create(&model_id, sink).await }));
            }
        }
    }

    fn finish_init(&mut self, result: Result<Arc<dyn ChatEngine>>) {
        match result {
            Ok(engine) => {
                self.engine = Some(engine);
                self.phase = WorkerPhase::Ready;
                info!(model = %self.config.model_id, "inference engine ready");
                self.emit(WorkerEvent::status(StatusUpdate::new(READY_STATUS_TEXT)));
            }
            Err(err) => {
                self.phase = WorkerPhase::InitFailed;
                let failure =
                    WorkerError::new(WorkerErrorKind::InitializationFailure, format!("{err:#}"));
                error!(%failure, "failed to initialize inference engine");
                self.emit(WorkerEvent::status(StatusUpdate::failed(
                    failure.kind.user_notice(),
                    failure.message,
                )));
            }
        }
    }

    fn accept_prompt(&mut self, prompt: String) {
        if self.phase != WorkerPhase::Ready {
            warn!(phase = ?self.phase, "generate rejected; engine not ready");
            self.emit(WorkerEvent::not_ready());
            return;
        }
        if self.generation.is_some() {
            self.queued_prompts.push_back(prompt);
            debug!(
                queued = self.queued_prompts.len(),
                "generation in flight; prompt queued"
            );
            return;
        }
        self.start_generation(prompt);
    }

    fn start_generation(&mut self, prompt: String) {
        let Some(engine) = self.engine.clone() else {
            self.emit(WorkerEvent::not_ready());
            return;
        };

        self.emit(WorkerEvent::status(StatusUpdate::new(GENERATING_STATUS_TEXT)));
        self.history.push(ChatTurn::user(prompt));
        let messages = self.history.clone();
        self.generation = Some(tokio::spawn(async move {
            let completion = engine.chat_completion(&messages).await?;
            Ok::<_, anyhow::Error>(completion.into_text()?)
        }));
    }

    fn finish_generation(&mut self, result: Result<String>) {
        match result {
            Ok(text) => {
                self.history.push(ChatTurn::assistant(text.clone()));
                debug!(history_len = self.history.len(), "conversation history updated");
                self.emit(WorkerEvent::response(text));
                self.emit(WorkerEvent::status(StatusUpdate::cleared()));
            }
            Err(err) => {
                let failure =
                    WorkerError::new(WorkerErrorKind::GenerationFailure, format!("{err:#}"));
                error!(%failure, "generation failed");
                self.emit(WorkerEvent::failed_response(failure.kind, failure.message));
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("worker event dropped; event receiver is gone");
        }
    }
}

async fn join_active<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn flatten_join<T>(joined: Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(anyhow!("engine task failed: {err}")),
    }
}

#[cfg(test)]
#[path = "tests/proxy_tests.rs"]
mod tests;
