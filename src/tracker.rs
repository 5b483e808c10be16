//! Task lifecycle state machine.
//!
//! Owns the single source of truth for the running task, the paused task,
//! and the completed history. At most one of running/paused is occupied at
//! any time; start and restart archive whatever is active before creating
//! the new task.

use crate::domain::{dedup_entries, Settings, Task, TaskId, TaskSlot, TaskSpec};
use crate::persistence::Snapshot;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// An operation's precondition was unmet; nothing was changed.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The addressed task does not exist in the addressed slot.
    #[error("task not found")]
    NotFound,
}

/// Tasks archived as a side effect of start/restart.
///
/// Only the previously *running* task is a webhook candidate; a paused task
/// archived on restart completes quietly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchivedOnRestart {
    pub from_running: Option<Task>,
    pub from_paused: Option<Task>,
}

/// The lifecycle state machine plus the catalogs and settings it carries.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    pub current: Option<Task>,
    pub paused: Option<Task>,
    pub tasks: Vec<Task>,
    pub customers: Vec<String>,
    pub projects: Vec<String>,
    pub settings: Settings,
}

impl Tracker {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: snapshot.current_task,
            paused: snapshot.paused_task,
            tasks: snapshot.tasks,
            customers: snapshot.customers,
            projects: snapshot.projects,
            settings: snapshot.settings,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            current_task: self.current.clone(),
            paused_task: self.paused.clone(),
            tasks: self.tasks.clone(),
            customers: self.customers.clone(),
            projects: self.projects.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.current.is_some() {
            TrackerState::Running
        } else if self.paused.is_some() {
            TrackerState::Paused
        } else {
            TrackerState::Idle
        }
    }

    /// Start a new task, archiving any active one first.
    ///
    /// Identical to [`Tracker::restart_at`]; the two exist as separate wire
    /// actions but share one implementation so the exclusivity invariant
    /// cannot be violated.
    pub fn start_at(&mut self, spec: TaskSpec, now: DateTime<Utc>) -> (Task, ArchivedOnRestart) {
        self.restart_at(spec, now)
    }

    pub fn start(&mut self, spec: TaskSpec) -> (Task, ArchivedOnRestart) {
        self.start_at(spec, Utc::now())
    }

    /// Archive whatever is active, then start fresh.
    pub fn restart_at(&mut self, spec: TaskSpec, now: DateTime<Utc>) -> (Task, ArchivedOnRestart) {
        let mut archived = ArchivedOnRestart::default();

        if let Some(mut running) = self.current.take() {
            running.duration_ms += running.session_ms(now);
            running.end_time = Some(now);
            self.tasks.insert(0, running.clone());
            archived.from_running = Some(running);
        }

        if let Some(mut paused) = self.paused.take() {
            paused.end_time = Some(now);
            self.tasks.insert(0, paused.clone());
            archived.from_paused = Some(paused);
        }

        let task = Task::new_at(spec, now);
        self.current = Some(task.clone());
        (task, archived)
    }

    pub fn restart(&mut self, spec: TaskSpec) -> (Task, ArchivedOnRestart) {
        self.restart_at(spec, Utc::now())
    }

    /// Freeze the running task's accrued time and suspend it.
    pub fn pause_at(&mut self, now: DateTime<Utc>) -> Result<Task, TrackerError> {
        let mut task = self
            .current
            .take()
            .ok_or(TrackerError::InvalidState("no running task to pause"))?;
        task.duration_ms += task.session_ms(now);
        self.paused = Some(task.clone());
        Ok(task)
    }

    pub fn pause(&mut self) -> Result<Task, TrackerError> {
        self.pause_at(Utc::now())
    }

    /// Complete the running task and prepend it to the history.
    pub fn stop_at(&mut self, now: DateTime<Utc>) -> Result<Task, TrackerError> {
        let mut task = self
            .current
            .take()
            .ok_or(TrackerError::InvalidState("no running task to stop"))?;
        task.duration_ms += task.session_ms(now);
        task.end_time = Some(now);
        self.tasks.insert(0, task.clone());
        Ok(task)
    }

    pub fn stop(&mut self) -> Result<Task, TrackerError> {
        self.stop_at(Utc::now())
    }

    /// Resume the paused task as a fresh running session.
    ///
    /// The id is regenerated and the start time re-anchored to now; the
    /// accrued duration carries over unchanged.
    pub fn resume_at(&mut self, now: DateTime<Utc>) -> Result<Task, TrackerError> {
        let paused = self
            .paused
            .take()
            .ok_or(TrackerError::InvalidState("no paused task to resume"))?;
        let task = Task {
            id: TaskId::generate_at(now),
            start_time: now,
            end_time: None,
            ..paused
        };
        self.current = Some(task.clone());
        Ok(task)
    }

    pub fn resume(&mut self) -> Result<Task, TrackerError> {
        self.resume_at(Utc::now())
    }

    /// Complete the paused task without resuming it.
    pub fn stop_paused_at(&mut self, now: DateTime<Utc>) -> Result<Task, TrackerError> {
        let mut task = self
            .paused
            .take()
            .ok_or(TrackerError::InvalidState("no paused task to stop"))?;
        task.end_time = Some(now);
        self.tasks.insert(0, task.clone());
        Ok(task)
    }

    pub fn stop_paused(&mut self) -> Result<Task, TrackerError> {
        self.stop_paused_at(Utc::now())
    }

    /// Replace the addressed task's fields with edited values.
    ///
    /// A *running* task never trusts the form's duration: accrual restarts
    /// from zero at the edited start time, so the live-duration formula
    /// takes over cleanly.
    pub fn update(&mut self, edited: Task, slot: TaskSlot) -> Result<(), TrackerError> {
        match slot {
            TaskSlot::Current => {
                let current = self
                    .current
                    .as_mut()
                    .filter(|t| t.id == edited.id)
                    .ok_or(TrackerError::NotFound)?;
                current.title = edited.title;
                current.customer = edited.customer;
                current.project = edited.project;
                current.billable = edited.billable;
                current.start_time = edited.start_time;
                current.duration_ms = 0;
                current.end_time = None;
            }
            TaskSlot::Paused => {
                let paused = self
                    .paused
                    .as_mut()
                    .filter(|t| t.id == edited.id)
                    .ok_or(TrackerError::NotFound)?;
                let id = paused.id;
                *paused = Task {
                    id,
                    duration_ms: edited.duration_ms.max(0),
                    end_time: None,
                    ..edited
                };
            }
            TaskSlot::Completed => {
                let task = self
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == edited.id)
                    .ok_or(TrackerError::NotFound)?;
                *task = Task {
                    duration_ms: edited.duration_ms.max(0),
                    ..edited
                };
            }
        }
        Ok(())
    }

    /// Remove the addressed task.
    pub fn delete(&mut self, id: TaskId, slot: TaskSlot) -> Result<(), TrackerError> {
        match slot {
            TaskSlot::Current => {
                if self.current.as_ref().is_some_and(|t| t.id == id) {
                    self.current = None;
                    Ok(())
                } else {
                    Err(TrackerError::NotFound)
                }
            }
            TaskSlot::Paused => {
                if self.paused.as_ref().is_some_and(|t| t.id == id) {
                    self.paused = None;
                    Ok(())
                } else {
                    Err(TrackerError::NotFound)
                }
            }
            TaskSlot::Completed => {
                let before = self.tasks.len();
                self.tasks.retain(|t| t.id != id);
                if self.tasks.len() == before {
                    Err(TrackerError::NotFound)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Replace settings and catalogs, de-duplicating catalog entries by
    /// parsed name (last entry wins, so rate suffixes can be updated).
    pub fn update_settings(
        &mut self,
        settings: Settings,
        customers: Vec<String>,
        projects: Vec<String>,
    ) {
        self.customers = dedup_entries(&customers);
        self.projects = dedup_entries(&projects);
        self.settings = settings;
    }
}
