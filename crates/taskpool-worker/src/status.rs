//! Status line output.
//!
//! Each event is written as one JSON line and flushed immediately, so the
//! coordinator sees it as soon as it happens. Logs never go here.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use taskpool_core::{StatusLine, TaskKey, WorkerId};

use crate::error::WorkerError;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes a worker's status stream.
#[derive(Clone)]
pub struct StatusEmitter {
    worker_id: WorkerId,
    out: Sink,
}

impl StatusEmitter {
    /// Emitter writing to this process's stdout.
    pub fn stdout(worker_id: WorkerId) -> Self {
        Self::to_writer(worker_id, io::stdout())
    }

    /// Emitter writing to an arbitrary sink.
    pub fn to_writer(worker_id: WorkerId, writer: impl Write + Send + 'static) -> Self {
        Self {
            worker_id,
            out: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Write one line. Fails if the stream is closed.
    pub fn emit(&self, line: &StatusLine) -> Result<(), WorkerError> {
        let encoded = line.to_line()?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| WorkerError::Status(io::Error::other("status sink poisoned")))?;
        writeln!(out, "{encoded}").map_err(WorkerError::Status)?;
        out.flush().map_err(WorkerError::Status)
    }

    pub fn started(&self) -> Result<(), WorkerError> {
        self.emit(&StatusLine::started(self.worker_id.clone()))
    }

    pub fn claimed(&self, task: &TaskKey) -> Result<(), WorkerError> {
        self.emit(&StatusLine::claimed(self.worker_id.clone(), task.clone()))
    }

    pub fn heartbeat(&self, task: Option<&TaskKey>) -> Result<(), WorkerError> {
        self.emit(&StatusLine::heartbeat(self.worker_id.clone(), task.cloned()))
    }

    pub fn completed(&self, task: &TaskKey, detail: &str) -> Result<(), WorkerError> {
        let mut line = StatusLine::completed(self.worker_id.clone(), task.clone());
        if !detail.is_empty() {
            line = line.with_detail(detail);
        }
        self.emit(&line)
    }

    pub fn failed(&self, task: &TaskKey, reason: &str) -> Result<(), WorkerError> {
        self.emit(&StatusLine::failed(self.worker_id.clone(), task.clone(), reason))
    }

    pub fn abandoned(&self, task: &TaskKey, reason: &str) -> Result<(), WorkerError> {
        self.emit(&StatusLine::abandoned(self.worker_id.clone(), task.clone(), reason))
    }

    pub fn store_unavailable(&self, detail: &str) -> Result<(), WorkerError> {
        self.emit(&StatusLine::store_unavailable(self.worker_id.clone(), detail))
    }

    pub fn drained(&self) -> Result<(), WorkerError> {
        self.emit(&StatusLine::drained(self.worker_id.clone()))
    }

    pub fn stopped(&self) -> Result<(), WorkerError> {
        self.emit(&StatusLine::stopped(self.worker_id.clone()))
    }
}

/// In-memory sink shared between an emitter and a test.
#[derive(Clone, Default)]
pub struct CapturedLines(Arc<Mutex<Vec<u8>>>);

impl CapturedLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line written so far, parsed.
    pub fn lines(&self) -> Vec<StatusLine> {
        let bytes = match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|l| StatusLine::parse(l).ok())
            .collect()
    }
}

impl Write for CapturedLines {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("capture poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use taskpool_core::StatusEvent;

    use super::*;

    #[test]
    fn test_each_event_is_one_line() {
        let capture = CapturedLines::new();
        let emitter = StatusEmitter::to_writer(WorkerId::new("w0"), capture.clone());
        let key = TaskKey::new("ENG", 1);

        emitter.started().unwrap();
        emitter.claimed(&key).unwrap();
        emitter.completed(&key, "").unwrap();

        let events: Vec<StatusEvent> = capture.lines().into_iter().map(|l| l.event).collect();
        assert_eq!(
            events,
            vec![StatusEvent::Started, StatusEvent::Claimed, StatusEvent::Completed]
        );
        assert!(capture.lines()[2].detail.is_none());
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_closed_stream_is_an_error() {
        let emitter = StatusEmitter::to_writer(WorkerId::new("w0"), Closed);
        assert!(matches!(emitter.drained(), Err(WorkerError::Status(_))));
    }
}
