use crate::collector::{
    Collected, DEFAULT_STDERR_GRACE, StderrCapture, collect_responses, read_first_line,
};
use crate::error::McpShotError;
use crate::framer::{FrameError, write_batch, write_lines};
use crate::launcher::ProcessLauncher;
use crate::process::ProcessHandle;
use crate::protocol::Batch;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

/// Message transport seen by the session layer.
///
/// `send` hands one batch to the remote side and `receive` returns everything
/// it answered. Exactly one batch may be in flight at a time.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, batch: &Batch) -> Result<(), McpShotError>;

    async fn receive(&mut self) -> Result<Collected, McpShotError>;

    async fn exchange(&mut self, batch: &Batch) -> Result<Collected, McpShotError> {
        self.send(batch).await?;
        self.receive().await
    }
}

struct InFlight<L: ProcessLauncher> {
    process: Spawned<L>,
    expected: usize,
}

/// Runs every batch in a freshly spawned process.
///
/// The process is released on every exit path, successful or not, before the
/// result is returned. A call future dropped midway kills the process group.
pub struct OneShotTransport<L: ProcessLauncher> {
    launcher: Arc<L>,
    in_flight: Option<InFlight<L>>,
}

impl<L: ProcessLauncher> OneShotTransport<L> {
    pub fn new(launcher: Arc<L>) -> Self {
        Self {
            launcher,
            in_flight: None,
        }
    }

    pub fn launcher(&self) -> &Arc<L> {
        &self.launcher
    }
}

#[async_trait]
impl<L: ProcessLauncher + 'static> Transport for OneShotTransport<L> {
    async fn send(&mut self, batch: &Batch) -> Result<(), McpShotError> {
        if self.in_flight.is_some() {
            return Err(McpShotError::InvalidState(
                "a batch is already in flight".to_string(),
            ));
        }

        let mut process = Spawned::launch(&self.launcher).await?;
        let stdin = process.stdin.take();

        let written = match stdin {
            Some(stdin) => write_batch(stdin, batch).await,
            None => Err(missing_stdin()),
        };
        if let Err(FrameError { index, source }) = written {
            warn!(index, error = %source, "Batch write failed, tearing down process");
            let (stderr, _cleanup) = process.finish().await;
            return Err(McpShotError::Write {
                index,
                source,
                stderr,
            });
        }

        debug!(requests = batch.len(), "Batch sent");
        self.in_flight = Some(InFlight {
            process,
            expected: batch.len(),
        });
        Ok(())
    }

    async fn receive(&mut self) -> Result<Collected, McpShotError> {
        let in_flight = self.in_flight.take().ok_or_else(|| {
            McpShotError::InvalidState("receive called without a batch in flight".to_string())
        })?;
        let read_timeout = self.launcher.config().read_timeout;

        let InFlight {
            mut process,
            expected,
        } = in_flight;
        let collected = match process.stdout.take() {
            Some(stdout) => collect_responses(stdout, read_timeout).await,
            None => Ok(Vec::new()),
        };

        let (stderr, cleanup) = process.finish().await;
        let lines = collected?;

        if lines.is_empty() {
            return Err(empty_output(stderr, cleanup));
        }
        if lines.len() > expected {
            warn!(
                lines = lines.len(),
                requests = expected,
                "Server produced more response lines than requests"
            );
        }

        Ok(Collected {
            lines,
            stderr,
            cleanup_error: cleanup.map(|e| e.to_string()),
        })
    }
}

/// Forward one payload to a fresh process and return its first output line
pub async fn relay_first_line<L: ProcessLauncher>(
    launcher: &Arc<L>,
    payload: &Value,
) -> Result<String, McpShotError> {
    let mut process = Spawned::launch(launcher).await?;

    let written = match process.stdin.take() {
        Some(stdin) => write_lines(stdin, [payload]).await,
        None => Err(missing_stdin()),
    };
    if let Err(FrameError { index, source }) = written {
        let (stderr, _cleanup) = process.finish().await;
        return Err(McpShotError::Write {
            index,
            source,
            stderr,
        });
    }

    let first = match process.stdout.take() {
        Some(stdout) => read_first_line(stdout, launcher.config().read_timeout).await,
        None => Ok(None),
    };
    let (stderr, cleanup) = process.finish().await;

    first?.ok_or_else(|| empty_output(stderr, cleanup))
}

/// With nothing collected, a failed teardown outranks the empty output
fn empty_output(stderr: String, cleanup: Option<McpShotError>) -> McpShotError {
    match cleanup {
        Some(cleanup) => {
            warn!(stderr = %stderr.trim(), "No output and the process outlived teardown");
            cleanup
        }
        None => McpShotError::EmptyOutput { stderr },
    }
}

/// A launched process with its pipes split out.
///
/// `finish` is the graceful path. Dropping a `Spawned` that was never
/// finished, as happens when the call future is cancelled, kills the process
/// at once through `ProcessLauncher::abandon`.
struct Spawned<L: ProcessLauncher> {
    launcher: Arc<L>,
    handle: Option<L::Handle>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<StderrCapture>,
}

impl<L: ProcessLauncher> Spawned<L> {
    async fn launch(launcher: &Arc<L>) -> Result<Self, McpShotError> {
        let mut handle = launcher.launch().await?;
        let pipes = handle.take_pipes();
        info!(
            pid = ?handle.get_pid(),
            command = %handle.get_command(),
            "Spawned tool server"
        );
        Ok(Self {
            launcher: Arc::clone(launcher),
            handle: Some(handle),
            stdin: pipes.stdin,
            stdout: pipes.stdout,
            stderr: Some(StderrCapture::spawn(pipes.stderr)),
        })
    }

    /// Release the process and collect its stderr.
    ///
    /// A cleanup failure is logged and handed back rather than raised, so the
    /// caller decides whether it outranks the primary outcome.
    async fn finish(mut self) -> (String, Option<McpShotError>) {
        drop(self.stdin.take());
        drop(self.stdout.take());

        let cleanup = match self.handle.as_mut() {
            Some(handle) => {
                let pid = handle.get_pid();
                match self.launcher.release(handle).await {
                    Ok(status) => {
                        debug!(?pid, ?status, "Process released");
                        None
                    }
                    Err(e) => {
                        warn!(?pid, error = %e, "Process cleanup failed");
                        Some(e)
                    }
                }
            }
            None => None,
        };
        // Released: nothing left for Drop to do
        self.handle = None;

        let stderr = match self.stderr.take() {
            Some(capture) => capture.finish(DEFAULT_STDERR_GRACE).await,
            None => String::new(),
        };
        (stderr, cleanup)
    }
}

impl<L: ProcessLauncher> Drop for Spawned<L> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(pid = ?handle.get_pid(), "Call dropped before release, killing process");
            self.launcher.abandon(handle);
        }
    }
}

fn missing_stdin() -> FrameError {
    FrameError {
        index: 0,
        source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is not piped"),
    }
}
