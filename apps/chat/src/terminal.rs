//! Line-oriented front end: each stdin line is a submission, transcript
//! entries go to stdout as they appear, status changes follow them.

use std::{
    io::{self, BufRead, Write},
    process::Command,
    thread,
};

use anyhow::{anyhow, Context, Result};
use chat_controller::{ChatController, IsolatedWorker, CHANNEL_CAPACITY};
use crossbeam_channel::{bounded, never, select, Receiver};
use llm_worker::spawn_worker_thread;
use tracing::{info, warn};

use crate::config::Settings;

enum WorkerHandle {
    Thread(thread::JoinHandle<()>),
    Process(IsolatedWorker),
}

impl WorkerHandle {
    fn shutdown(self) -> Result<()> {
        match self {
            Self::Thread(handle) => handle
                .join()
                .map_err(|_| anyhow!("worker thread panicked")),
            Self::Process(worker) => {
                let status = worker.wait()?;
                if !status.success() {
                    warn!(%status, "worker process exited with failure");
                }
                Ok(())
            }
        }
    }
}

pub fn run_chat(settings: &Settings, isolated: bool) -> Result<()> {
    let (worker, mut controller) = if isolated {
        let mut command = Command::new(
            std::env::current_exe().context("failed to locate llm-chat executable")?,
        );
        command.arg("worker").envs(settings.child_env());
        let (worker, cmd_tx, event_rx) = IsolatedWorker::spawn(command)?;
        info!("chat started with worker process");
        (
            WorkerHandle::Process(worker),
            ChatController::start(cmd_tx, event_rx),
        )
    } else {
        let (cmd_tx, cmd_rx) = bounded(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);
        let handle = spawn_worker_thread(
            settings.worker_config(),
            settings.engine_factory()?,
            cmd_rx,
            event_tx,
        )?;
        info!("chat started with worker thread");
        (
            WorkerHandle::Thread(handle),
            ChatController::start(cmd_tx, event_rx),
        )
    };

    let input = spawn_stdin_reader()?;
    let mut view = TerminalView::new(io::stdout());
    drive(&mut controller, input, &mut view)?;

    drop(controller);
    worker.shutdown()
}

/// Pumps input lines and worker events into the controller until stdin is
/// closed and every sent prompt has been answered, or the worker is gone.
fn drive<W: Write>(
    controller: &mut ChatController,
    input: Receiver<String>,
    view: &mut TerminalView<W>,
) -> Result<()> {
    let events = controller.events().clone();
    let closed_input = never();
    let mut input_open = true;

    view.render(controller)?;
    loop {
        if controller.is_disconnected() {
            break;
        }
        if !input_open && controller.pending_responses() == 0 {
            break;
        }

        let lines = if input_open { &input } else { &closed_input };
        select! {
            recv(lines) -> line => match line {
                Ok(mut line) => {
                    if !controller.submit(&mut line) && !line.trim().is_empty() {
                        warn!("prompt was not sent to the worker");
                    }
                }
                Err(_) => input_open = false,
            },
            recv(events) -> event => match event {
                Ok(event) => {
                    controller.apply_event(event);
                    controller.process_worker_events();
                }
                Err(_) => controller.report_transport_fault("worker event channel closed"),
            },
        }
        view.render(controller)?;
    }
    Ok(())
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

struct TerminalView<W> {
    out: W,
    rendered: usize,
    last_status: String,
}

impl<W: Write> TerminalView<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            rendered: 0,
            last_status: String::new(),
        }
    }

    fn render(&mut self, controller: &ChatController) -> io::Result<()> {
        let entries = controller.transcript().entries();
        for entry in entries.iter().skip(self.rendered) {
            writeln!(self.out, "{}", entry.render())?;
        }
        self.rendered = entries.len();

        if controller.status_line() != self.last_status {
            self.last_status = controller.status_line().to_string();
            if !self.last_status.is_empty() {
                writeln!(self.out, "  ({})", self.last_status)?;
            }
        }
        self.out.flush()
    }
}
