//! Append-only CSV timing logs, one row per task on each side of the pipeline.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing::error;

use crate::error::RunError;
use crate::types::{TaskId, TaskTimings, WorkerId};

pub const DISPATCH_LOG: &str = "dispatch_log.csv";
pub const WORKER_LOG: &str = "worker_log.csv";

const DISPATCH_HEADER: &str = "task_id,request_time_ms,compute_start_time_ms,compute_end_time_ms";
const WORKER_HEADER: &str = "worker_id,task_id,worker_start_time_ms,worker_request_time_ms,worker_receive_time_ms,worker_end_time_ms";

struct Stream {
    name: &'static str,
    writer: Box<dyn Write + Send>,
    rows: u64,
    dropped: u64,
    failed: bool,
}

impl Stream {
    fn open(name: &'static str, mut writer: Box<dyn Write + Send>, header: &str) -> io::Result<Self> {
        writer.write_all(format!("{header}\n").as_bytes())?;
        Ok(Self {
            name,
            writer,
            rows: 0,
            dropped: 0,
            failed: false,
        })
    }

    /// Write one complete row; after the first failure rows are only counted.
    fn append(&mut self, row: &str) {
        if self.failed {
            self.dropped += 1;
            return;
        }
        match self.writer.write_all(row.as_bytes()) {
            Ok(()) => self.rows += 1,
            Err(err) => self.fail(err),
        }
    }

    fn flush(&mut self) {
        if self.failed {
            return;
        }
        if let Err(err) = self.writer.flush() {
            self.fail(err);
        }
    }

    fn fail(&mut self, err: io::Error) {
        self.failed = true;
        self.dropped += 1;
        error!(stream = self.name, error = %err, "timing log write failed; dropping further rows");
    }
}

/// Row counts reported when the recorder is flushed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub dispatch_rows: u64,
    pub worker_rows: u64,
    pub dropped_rows: u64,
}

/// Two independent timing streams, each serialized by its own lock.
pub struct TimingRecorder {
    dispatch: Mutex<Stream>,
    worker: Mutex<Stream>,
}

impl TimingRecorder {
    /// Create both log files in `dir`, truncating old runs, and write headers.
    pub fn create(dir: &Path) -> Result<Self, RunError> {
        let open = |file: &str| -> Result<Box<dyn Write + Send>, RunError> {
            let path = dir.join(file);
            File::create(&path)
                .map(|f| Box::new(BufWriter::new(f)) as Box<dyn Write + Send>)
                .map_err(|source| RunError::LogOpen {
                    path: path.display().to_string(),
                    source,
                })
        };
        let dispatch = open(DISPATCH_LOG)?;
        let worker = open(WORKER_LOG)?;
        Self::from_writers(dispatch, worker).map_err(|source| RunError::LogOpen {
            path: dir.display().to_string(),
            source,
        })
    }

    /// Build a recorder over arbitrary sinks; headers are written immediately.
    pub fn from_writers(
        dispatch: Box<dyn Write + Send>,
        worker: Box<dyn Write + Send>,
    ) -> io::Result<Self> {
        Ok(Self {
            dispatch: Mutex::new(Stream::open("dispatch", dispatch, DISPATCH_HEADER)?),
            worker: Mutex::new(Stream::open("worker", worker, WORKER_HEADER)?),
        })
    }

    /// Append the dispatcher-side row for a completed task.
    pub fn record_dispatch(&self, task_id: TaskId, t: &TaskTimings) {
        let row = format!(
            "{task_id},{:.2},{:.2},{:.2}\n",
            t.request_ms, t.compute_start_ms, t.compute_end_ms
        );
        self.dispatch
            .lock()
            .expect("dispatch log mutex poisoned")
            .append(&row);
    }

    /// Append the worker-side row for a task its owner has finished.
    pub fn record_worker(&self, worker: WorkerId, task_id: TaskId, t: &TaskTimings) {
        let row = format!(
            "{worker},{task_id},{:.2},{:.2},{:.2},{:.2}\n",
            t.worker_start_ms,
            t.worker_request_ms,
            t.worker_receive_ms,
            t.worker_end_ms
        );
        self.worker
            .lock()
            .expect("worker log mutex poisoned")
            .append(&row);
    }

    /// Flush both streams and report how many rows made it out.
    pub fn finish(&self) -> RecorderStats {
        let mut dispatch = self.dispatch.lock().expect("dispatch log mutex poisoned");
        let mut worker = self.worker.lock().expect("worker log mutex poisoned");
        dispatch.flush();
        worker.flush();
        RecorderStats {
            dispatch_rows: dispatch.rows,
            worker_rows: worker.rows,
            dropped_rows: dispatch.dropped + worker.dropped,
        }
    }
}
