//! Typed snapshot and its stored (JSON, ISO-8601 string) form.
//!
//! Load is a data-quality gate: a history task whose timestamps fail to
//! parse is dropped with a warning, and a corrupt current/paused task is
//! nulled out. Nothing is ever silently defaulted to a fabricated time.

use crate::domain::{Settings, Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The full in-memory state exchanged wholesale with the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub current_task: Option<Task>,
    pub paused_task: Option<Task>,
    pub tasks: Vec<Task>,
    pub customers: Vec<String>,
    pub projects: Vec<String>,
    pub settings: Settings,
}

impl Snapshot {
    /// The state of a never-initialized store.
    pub fn initial() -> Self {
        Self {
            customers: vec!["Default Client".to_string()],
            projects: vec!["General".to_string()],
            ..Self::default()
        }
    }
}

/// Wire form of the snapshot, with camelCase keys and string timestamps.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSnapshot {
    pub current_task: Option<StoredTask>,
    pub paused_task: Option<StoredTask>,
    pub tasks: Vec<StoredTask>,
    pub customers: Vec<String>,
    pub projects: Vec<String>,
    pub settings: Settings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTask {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub customer: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub billable: bool,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration: i64,
}

impl StoredTask {
    fn encode(task: &Task) -> Self {
        Self {
            id: task.id.0,
            title: task.title.clone(),
            customer: task.customer.clone(),
            project: task.project.clone(),
            billable: task.billable,
            start_time: task.start_time.to_rfc3339(),
            end_time: task.end_time.map(|t| t.to_rfc3339()),
            duration: task.duration_ms,
        }
    }

    /// Decode, returning `None` when any timestamp is unusable.
    fn decode(self) -> Option<Task> {
        let start_time = parse_timestamp(&self.start_time)?;
        let end_time = match self.end_time {
            Some(raw) => Some(parse_timestamp(&raw)?),
            None => None,
        };
        Some(Task {
            id: TaskId(self.id),
            title: self.title,
            customer: self.customer,
            project: self.project,
            billable: self.billable,
            start_time,
            end_time,
            duration_ms: self.duration.max(0),
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

pub fn encode(snapshot: &Snapshot) -> StoredSnapshot {
    StoredSnapshot {
        current_task: snapshot.current_task.as_ref().map(StoredTask::encode),
        paused_task: snapshot.paused_task.as_ref().map(StoredTask::encode),
        tasks: snapshot.tasks.iter().map(StoredTask::encode).collect(),
        customers: snapshot.customers.clone(),
        projects: snapshot.projects.clone(),
        settings: snapshot.settings.clone(),
    }
}

pub fn decode(stored: StoredSnapshot) -> Snapshot {
    let decode_slot = |slot: Option<StoredTask>, name: &str| {
        slot.and_then(|t| {
            let title = t.title.clone();
            let task = t.decode();
            if task.is_none() {
                warn!(slot = name, title = %title, "dropping task with invalid timestamps");
            }
            task
        })
    };

    let current_task = decode_slot(stored.current_task, "current");
    let paused_task = decode_slot(stored.paused_task, "paused");

    let total = stored.tasks.len();
    let tasks: Vec<Task> = stored.tasks.into_iter().filter_map(|t| t.decode()).collect();
    if tasks.len() != total {
        warn!(dropped = total - tasks.len(), "dropped history tasks with invalid timestamps");
    }

    Snapshot {
        current_task,
        paused_task,
        tasks,
        customers: if stored.customers.is_empty() {
            vec!["Default Client".to_string()]
        } else {
            stored.customers
        },
        projects: if stored.projects.is_empty() {
            vec!["General".to_string()]
        } else {
            stored.projects
        },
        settings: stored.settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn task(title: &str, start_secs: i64) -> Task {
        let now = Utc.timestamp_opt(1_700_000_000 + start_secs, 0).unwrap();
        Task::new_at(
            TaskSpec {
                title: title.to_string(),
                customer: "Acme".to_string(),
                project: "Website".to_string(),
                billable: true,
            },
            now,
        )
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut done = task("Done", 0);
        done.end_time = Some(done.start_time + chrono::Duration::seconds(90));
        done.duration_ms = 90_000;

        let snapshot = Snapshot {
            current_task: Some(task("Running", 100)),
            paused_task: None,
            tasks: vec![done],
            customers: vec!["Acme,50".to_string()],
            projects: vec!["Website".to_string()],
            settings: Settings::default(),
        };

        let restored = decode(encode(&snapshot));
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_decode_drops_history_task_with_bad_start() {
        let stored = StoredSnapshot {
            tasks: vec![
                StoredTask {
                    id: 1,
                    title: "good".to_string(),
                    customer: String::new(),
                    project: String::new(),
                    billable: false,
                    start_time: "2024-03-10T09:00:00Z".to_string(),
                    end_time: Some("2024-03-10T10:00:00Z".to_string()),
                    duration: 3_600_000,
                },
                StoredTask {
                    id: 2,
                    title: "bad".to_string(),
                    customer: String::new(),
                    project: String::new(),
                    billable: false,
                    start_time: "not a date".to_string(),
                    end_time: None,
                    duration: 0,
                },
            ],
            ..StoredSnapshot::default()
        };

        let snapshot = decode(stored);
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].title, "good");
    }

    #[test]
    fn test_decode_nulls_corrupt_current_task() {
        let stored = StoredSnapshot {
            current_task: Some(StoredTask {
                id: 1,
                title: "corrupt".to_string(),
                customer: String::new(),
                project: String::new(),
                billable: false,
                start_time: "garbage".to_string(),
                end_time: None,
                duration: 0,
            }),
            ..StoredSnapshot::default()
        };

        let snapshot = decode(stored);
        assert_eq!(snapshot.current_task, None);
    }

    #[test]
    fn test_decode_clamps_negative_duration() {
        let stored = StoredSnapshot {
            tasks: vec![StoredTask {
                id: 1,
                title: "t".to_string(),
                customer: String::new(),
                project: String::new(),
                billable: false,
                start_time: "2024-03-10T09:00:00Z".to_string(),
                end_time: None,
                duration: -500,
            }],
            ..StoredSnapshot::default()
        };
        assert_eq!(decode(stored).tasks[0].duration_ms, 0);
    }

    #[test]
    fn test_empty_catalogs_fall_back_to_defaults() {
        let snapshot = decode(StoredSnapshot::default());
        assert_eq!(snapshot.customers, vec!["Default Client".to_string()]);
        assert_eq!(snapshot.projects, vec!["General".to_string()]);
    }

    #[test]
    fn test_stored_json_uses_camel_case_timestamp_keys() {
        let snapshot = Snapshot {
            current_task: Some(task("Running", 0)),
            ..Snapshot::initial()
        };
        let json = serde_json::to_string(&encode(&snapshot)).unwrap();
        assert!(json.contains("\"currentTask\""));
        assert!(json.contains("\"startTime\""));
        assert!(json.contains("\"pausedTask\":null"));
    }
}
