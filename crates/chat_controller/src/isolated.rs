//! Runs the worker in a child process and bridges the controller's
//! channels over its stdin/stdout as JSON lines.

use std::{
    io::{BufRead, BufReader, Read, Write},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use shared::protocol::{decode_event, encode_line, WorkerCommand, WorkerEvent};
use tracing::{debug, warn};

use crate::CHANNEL_CAPACITY;

pub struct IsolatedWorker {
    child: Child,
}

impl IsolatedWorker {
    /// Spawns `command` (expected to speak the JSON-lines worker protocol)
    /// and returns the channel ends a [`ChatController`] needs. When the
    /// child exits, the event receiver disconnects.
    ///
    /// [`ChatController`]: crate::ChatController
    pub fn spawn(
        mut command: Command,
    ) -> Result<(Self, Sender<WorkerCommand>, Receiver<WorkerEvent>)> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = command.spawn().context("failed to spawn worker process")?;
        let stdin = child.stdin.take().context("worker process has no stdin")?;
        let stdout = child
            .stdout
            .take()
            .context("worker process has no stdout")?;

        let (cmd_tx, cmd_rx) = bounded(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);
        thread::Builder::new()
            .name("worker-stdin".into())
            .spawn(move || pump_commands(cmd_rx, stdin))
            .context("failed to spawn worker stdin pump")?;
        thread::Builder::new()
            .name("worker-stdout".into())
            .spawn(move || pump_events(stdout, event_tx))
            .context("failed to spawn worker stdout pump")?;

        Ok((Self { child }, cmd_tx, event_rx))
    }

    /// Waits for the child to exit; it does so once every command sender
    /// has been dropped and its in-flight work is done.
    pub fn wait(mut self) -> Result<ExitStatus> {
        self.child.wait().context("failed to wait for worker process")
    }
}

fn pump_commands<W: Write>(cmd_rx: Receiver<WorkerCommand>, mut writer: W) {
    for command in cmd_rx.iter() {
        let line = match encode_line(&command) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "dropping unencodable worker command");
                continue;
            }
        };
        if writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .is_err()
        {
            warn!("worker process stopped accepting commands");
            break;
        }
    }
    debug!("worker command pump finished");
}

fn pump_events<R: Read>(reader: R, event_tx: Sender<WorkerEvent>) {
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "failed to read worker output");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode_event(&line) {
            Ok(event) => {
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            Err(err) if err.is_unknown_tag() => warn!(%err, "ignoring unknown worker event"),
            Err(err) => warn!(%err, "ignoring malformed worker output line"),
        }
    }
    debug!("worker event pump finished");
}
