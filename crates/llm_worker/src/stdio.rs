//! JSON-lines transport for running the worker as a separate process:
//! one command per input line, one event per output line.

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use llm_engine::EngineFactory;
use shared::protocol::{decode_command, encode_line};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{WorkerConfig, WorkerProxy, COMMAND_QUEUE_CAPACITY};

/// Serves commands read from `input` until it reaches end of file, writing
/// every event to `output`. Unknown or malformed lines are logged and skipped.
pub async fn serve_json_lines<R, W>(
    input: R,
    mut output: W,
    config: WorkerConfig,
    factory: Arc<dyn EngineFactory>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: Write + Send + 'static,
{
    let (event_tx, event_rx) = unbounded();
    let writer = tokio::task::spawn_blocking(move || -> Result<()> {
        for event in event_rx.iter() {
            let line = encode_line(&event)?;
            writeln!(output, "{line}").context("failed to write worker event")?;
            output.flush().context("failed to flush worker output")?;
        }
        Ok(())
    });

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let worker = async move {
        let mut worker = WorkerProxy::new(config, factory, event_tx);
        worker.run(rx).await;
    };
    let intake = async move {
        let mut lines = BufReader::new(input).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("failed to read worker input")?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match decode_command(line) {
                Ok(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(err) if err.is_unknown_tag() => warn!(%err, "ignoring unknown command"),
                Err(err) => warn!(%err, "ignoring malformed command line"),
            }
        }
        debug!("worker input reached end of file");
        Ok::<_, anyhow::Error>(())
    };

    let (intake_result, ()) = tokio::join!(intake, worker);
    let write_result = writer.await.context("worker output task failed")?;
    intake_result?;
    write_result
}
