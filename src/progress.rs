use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::domain::{QueryKey, Stage};

/// Snapshot returned by [`ProgressTracker::increment`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Progress: {}/{} ({:.1}%)",
            self.completed,
            self.total,
            self.percent()
        )
    }
}

/// Per-stage completion counter. `completed` only grows and never passes
/// `total`.
#[derive(Debug)]
pub struct ProgressTracker {
    completed: AtomicUsize,
    total: usize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    pub fn increment(&self) -> Progress {
        let total = self.total;
        let previous = self
            .completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |done| {
                (done < total).then_some(done + 1)
            })
            .unwrap_or(total);
        Progress {
            completed: (previous + 1).min(total),
            total,
        }
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            completed: self.completed.load(Ordering::Acquire),
            total: self.total,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
        total: usize,
    },
    KeyFinished {
        stage: Stage,
        key: QueryKey,
        progress: Progress,
        rows: usize,
        error: Option<String>,
    },
    Warning {
        stage: Stage,
        key: QueryKey,
        message: String,
    },
    StageFinished {
        stage: Stage,
        outputs: Vec<String>,
        elapsed: Duration,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}
