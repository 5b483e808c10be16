use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier: the creation instant in epoch milliseconds.
///
/// Monotonically increasing in practice; uniqueness is assumed, not
/// cryptographically enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn generate_at(now: DateTime<Utc>) -> Self {
        Self(now.timestamp_millis())
    }

    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The container a task currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSlot {
    Current,
    Paused,
    Completed,
}

impl TaskSlot {
    /// Parse a slot from its wire name ("current", "paused", "completed").
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "current" => Some(Self::Current),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// Fields supplied when starting a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSpec {
    pub title: String,
    pub customer: String,
    pub project: String,
    pub billable: bool,
}

/// A tracked unit of work.
///
/// `duration_ms` holds *accumulated* elapsed time from prior sessions only;
/// while the task is running, the live total is
/// `duration_ms + (now - start_time)`, computed on demand so periodic ticks
/// never drift the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub customer: String,
    pub project: String,
    pub billable: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: i64,
}

impl Task {
    /// Create a fresh task starting now.
    pub fn new_at(spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate_at(now),
            title: spec.title,
            customer: spec.customer,
            project: spec.project,
            billable: spec.billable,
            start_time: now,
            end_time: None,
            duration_ms: 0,
        }
    }

    /// Elapsed time of the current session, never negative.
    pub fn session_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_milliseconds().max(0)
    }

    /// Live total for a running task: stored duration plus the open session.
    pub fn live_duration_ms(&self, now: DateTime<Utc>) -> i64 {
        self.duration_ms + self.session_ms(now)
    }

    /// Stored duration in whole seconds (CSV export unit).
    pub fn duration_secs(&self) -> i64 {
        self.duration_ms / 1000
    }

    /// Stored duration in fractional hours (billing unit).
    pub fn duration_hours(&self) -> f64 {
        self.duration_ms as f64 / 3_600_000.0
    }
}
