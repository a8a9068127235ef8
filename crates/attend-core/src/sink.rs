//! Attendance sink seam: append-only storage for [`AttendanceEvent`]s.

use crate::types::AttendanceEvent;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("attendance log unavailable: {0}")]
    Unavailable(String),
    #[error("attendance write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance store error: {0}")]
    Store(String),
}

/// Durable, append-only attendance log.
///
/// Each call appends exactly one row. Implementations never update or delete.
pub trait AttendanceSink {
    fn append(&mut self, event: &AttendanceEvent) -> Result<(), SinkError>;
}

impl<S: AttendanceSink + ?Sized> AttendanceSink for Box<S> {
    fn append(&mut self, event: &AttendanceEvent) -> Result<(), SinkError> {
        (**self).append(event)
    }
}

/// Vector-backed sink, used for dry runs and tests.
///
/// Can be armed to reject writes to exercise the failure path.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<AttendanceEvent>,
    failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every append fails and nothing is stored.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn events(&self) -> &[AttendanceEvent] {
        &self.events
    }

    pub fn names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name.as_str()).collect()
    }
}

impl AttendanceSink for MemorySink {
    fn append(&mut self, event: &AttendanceEvent) -> Result<(), SinkError> {
        if self.failing {
            return Err(SinkError::Unavailable("memory sink armed to fail".into()));
        }
        self.events.push(event.clone());
        Ok(())
    }
}
