//! Incremental progress reporting for video analysis.
//!
//! [`stream`] runs the analysis on a blocking worker and relays its
//! notifications over an unbounded FIFO channel. The consumer side is a
//! [`Stream`] of [`ProgressEvent`]s that always ends with exactly one
//! terminal event (`done` or `error`). Once that event has been handed out,
//! the worker is joined and the uploaded file is deleted.
//!
//! Runs cannot be cancelled: dropping the stream early still lets the worker
//! finish in the background; the input file is removed on drop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::analysis::{AnalysisOptions, AnalysisResult, FrameRecord, ProgressSink};
use crate::backend::AnalysisBackend;
use crate::error::CoreError;

/// One line of the NDJSON progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProgressEvent {
    Start {
        total_frames: u64,
    },
    Progress {
        frame_index: u64,
        total_frames: u64,
    },
    Done {
        frames: Vec<FrameRecord>,
        /// Number of records in `frames`.
        total_frames: usize,
        truncated: bool,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn done(result: AnalysisResult) -> Self {
        ProgressEvent::Done {
            total_frames: result.frames.len(),
            frames: result.frames,
            truncated: result.truncated,
        }
    }

    pub fn error(err: &CoreError) -> Self {
        ProgressEvent::Error {
            message: err.message().to_string(),
        }
    }

    /// `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }

    /// Serialize as one NDJSON line, including the trailing newline.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

// ---------------------------------------------------------------------------
// Transient input
// ---------------------------------------------------------------------------

/// An uploaded file that must not outlive its analysis.
///
/// Removed by [`TransientFile::remove`] or, failing that, on drop. A file
/// that is already gone is not an error.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
    removed: bool,
}

impl TransientFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(mut self) {
        self.remove_now();
    }

    fn remove_now(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed uploaded file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove uploaded file")
            }
        }
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        self.remove_now();
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// Forwards runner notifications into the worker channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
    fn started(&mut self, total_frames: u64) {
        let _ = self.tx.send(ProgressEvent::Start { total_frames });
    }

    fn progress(&mut self, frames_done: u64, total_frames: u64) {
        let _ = self.tx.send(ProgressEvent::Progress {
            frame_index: frames_done,
            total_frames,
        });
    }
}

fn spawn_worker(
    backend: Arc<dyn AnalysisBackend>,
    path: PathBuf,
    options: AnalysisOptions,
    tx: mpsc::UnboundedSender<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink { tx: tx.clone() };
        let terminal = match backend.analyze(&path, &options, &mut sink) {
            Ok(result) => ProgressEvent::done(result),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "Video analysis failed");
                ProgressEvent::error(&err)
            }
        };
        // The consumer may already be gone; nothing left to report to.
        let _ = tx.send(terminal);
    })
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

enum StreamState {
    Relaying {
        rx: mpsc::UnboundedReceiver<ProgressEvent>,
        worker: JoinHandle<()>,
        input: TransientFile,
    },
    Finishing {
        worker: JoinHandle<()>,
        input: TransientFile,
    },
}

/// Analyze `input` on a background worker, yielding progress as it happens.
///
/// The sequence is: at most one `start`, any number of `progress`, then
/// exactly one `done` or `error`. After the terminal event the worker is
/// awaited and `input` is deleted before the stream ends.
pub fn stream(
    backend: Arc<dyn AnalysisBackend>,
    input: TransientFile,
    options: AnalysisOptions,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = spawn_worker(backend, input.path().to_path_buf(), options, tx);

    futures::stream::unfold(
        StreamState::Relaying { rx, worker, input },
        |state| async move {
            match state {
                StreamState::Relaying {
                    mut rx,
                    worker,
                    input,
                } => {
                    let event = match rx.recv().await {
                        Some(event) => event,
                        // Sender dropped without a terminal event: the worker panicked.
                        None => ProgressEvent::Error {
                            message: "Analysis worker exited unexpectedly".to_string(),
                        },
                    };
                    let next = if event.is_terminal() {
                        StreamState::Finishing { worker, input }
                    } else {
                        StreamState::Relaying { rx, worker, input }
                    };
                    Some((event, next))
                }
                StreamState::Finishing { worker, input } => {
                    if let Err(e) = worker.await {
                        tracing::error!(error = %e, "Analysis worker did not finish cleanly");
                    }
                    input.remove();
                    None
                }
            }
        },
    )
}

/// Analyze `input` to completion without intermediate events.
///
/// `input` is deleted once the worker has finished, whatever the outcome.
pub async fn analyze_file(
    backend: Arc<dyn AnalysisBackend>,
    input: TransientFile,
    options: AnalysisOptions,
) -> Result<AnalysisResult, CoreError> {
    let path = input.path().to_path_buf();
    let joined =
        tokio::task::spawn_blocking(move || backend.analyze(&path, &options, &mut ())).await;
    input.remove();

    joined.map_err(|e| CoreError::Internal(format!("Analysis worker failed: {e}")))?
}
