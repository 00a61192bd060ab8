//! Durable CSV log of published samples.
//!
//! While recording, the acquisition loop offers every fresh sample to the
//! recorder, which hands it to a blocking writer thread through a bounded
//! channel. Rows are never dropped silently: a full queue or a failed write
//! ends the recording and is published on the status channel.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use hatdash_core::{Error, Result, Sample, SampleRecord};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Recording state as shown to viewers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingStatus {
    pub is_recording: bool,
    pub file: Option<PathBuf>,
    /// Rows in `file`, set once its writer has closed it.
    pub rows: Option<u64>,
    pub error: Option<String>,
}

struct Session {
    tx: mpsc::Sender<SampleRecord>,
    path: PathBuf,
    writer: JoinHandle<Result<u64>>,
    offered: u64,
}

pub struct Recorder {
    log_dir: PathBuf,
    capacity: usize,
    session: Option<Session>,
    /// Sessions opened so far; part of every file name.
    sessions: u64,
    status: Arc<watch::Sender<RecordingStatus>>,
}

/// A stopped session whose writer may still be flushing.
pub struct PendingFlush {
    path: PathBuf,
    writer: JoinHandle<Result<u64>>,
}

impl PendingFlush {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the writer to drain its queue; returns the rows written.
    pub async fn wait(self) -> Result<u64> {
        let rows = self
            .writer
            .await
            .map_err(|e| Error::LogWriteFault(format!("writer task failed: {e}")))??;
        info!(path = %self.path.display(), rows, "recording closed");
        Ok(rows)
    }
}

impl Recorder {
    pub fn new(log_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let (status, _) = watch::channel(RecordingStatus::default());
        Self {
            log_dir: log_dir.into(),
            capacity: capacity.max(1),
            session: None,
            sessions: 0,
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> watch::Receiver<RecordingStatus> {
        self.status.subscribe()
    }

    /// True while a session is open and its writer is still accepting rows.
    pub fn is_recording(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.tx.is_closed())
    }

    /// Opens a new log file. Starting while already recording keeps the current file.
    pub fn start(&mut self) -> Result<PathBuf> {
        if let Some(session) = &self.session {
            if !session.tx.is_closed() {
                return Ok(session.path.clone());
            }
        }
        // A writer that already failed has reported its error; drop it.
        self.session = None;

        self.sessions += 1;
        let name = format!(
            "sensor_log_{}_{:03}.csv",
            Utc::now().format("%Y%m%d_%H%M%S_%3f"),
            self.sessions
        );
        let path = self.log_dir.join(name);
        let (tx, rx) = mpsc::channel(self.capacity);

        let writer = {
            let path = path.clone();
            let status = self.status.clone();
            tokio::task::spawn_blocking(move || {
                let result = write_rows(&path, rx);
                status.send_modify(|s| {
                    if s.file.as_deref() != Some(path.as_path()) {
                        return;
                    }
                    match &result {
                        Ok(rows) => s.rows = Some(*rows),
                        Err(e) => {
                            s.is_recording = false;
                            s.error = Some(e.to_string());
                        }
                    }
                });
                if let Err(e) = &result {
                    error!(path = %path.display(), "{e}");
                }
                result
            })
        };

        info!(path = %path.display(), "recording started");
        self.status.send_replace(RecordingStatus {
            is_recording: true,
            file: Some(path.clone()),
            rows: None,
            error: None,
        });
        self.session = Some(Session {
            tx,
            path: path.clone(),
            writer,
            offered: 0,
        });
        Ok(path)
    }

    /// Ends the recording. Rows already offered are still written; await the
    /// returned flush to know when the file is complete.
    pub fn stop(&mut self) -> Option<PendingFlush> {
        let session = self.session.take()?;
        debug!(offered = session.offered, "stopping recording");
        self.status.send_modify(|s| s.is_recording = false);
        Some(PendingFlush {
            path: session.path,
            writer: session.writer,
        })
    }

    /// Queues one sample for the log. Stale samples are not logged.
    ///
    /// Returns a [`Error::LogWriteFault`] when the writer is gone or cannot keep
    /// up; the recording is stopped in that case.
    pub fn offer(&mut self, sample: &Sample) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if sample.stale {
            return Ok(());
        }

        match session.tx.try_send(sample.record()) {
            Ok(()) => {
                session.offered += 1;
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "log writer fell behind".to_string(),
                    mpsc::error::TrySendError::Closed(_) => "log writer stopped".to_string(),
                };
                let fault = Error::LogWriteFault(format!(
                    "{reason} at sequence {}; recording stopped",
                    sample.sequence
                ));
                warn!("{fault}");
                if let Some(flush) = self.stop() {
                    // Whatever made it into the queue still gets written.
                    tokio::spawn(async move {
                        if let Err(e) = flush.wait().await {
                            warn!("{e}");
                        }
                    });
                }
                self.status.send_modify(|s| {
                    s.is_recording = false;
                    if s.error.is_none() {
                        s.error = Some(fault.to_string());
                    }
                });
                Err(fault)
            }
        }
    }
}

fn write_rows(path: &Path, mut rx: mpsc::Receiver<SampleRecord>) -> Result<u64> {
    let fault = |e: &dyn std::fmt::Display| Error::LogWriteFault(format!("{}: {e}", path.display()));

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| fault(&e))?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| fault(&e))?;
    let mut wtr = csv::Writer::from_writer(file);

    let mut rows = 0;
    while let Some(record) = rx.blocking_recv() {
        wtr.serialize(&record).map_err(|e| fault(&e))?;
        wtr.flush().map_err(|e| fault(&e))?;
        rows += 1;
    }
    wtr.flush().map_err(|e| fault(&e))?;
    Ok(rows)
}
