//! Request router and side-effect orchestration.
//!
//! Every externally reachable operation is a [`Request`] variant handled by
//! one exhaustive match, so adding an operation is a compile-enforced,
//! single-point change. The service owns the tracker, persists after each
//! mutation, and fans out notifications to subscribers over plain channels.

use crate::csv::export_csv;
use crate::domain::{RateTable, Settings, Task, TaskId, TaskSlot, TaskSpec};
use crate::format::format_hms;
use crate::persistence::{Snapshot, Store};
use crate::tracker::{Tracker, TrackerError};
use crate::webhook::{WebhookPayload, WebhookSink};
use chrono::{DateTime, Utc};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Every operation a client can ask for.
#[derive(Debug, Clone)]
pub enum Request {
    StartTask(TaskSpec),
    RestartTask(TaskSpec),
    PauseTask,
    StopTask,
    ResumeTask,
    StopPausedTask,
    UpdateTask {
        task: Task,
        slot: TaskSlot,
    },
    DeleteTask {
        id: TaskId,
        slot: TaskSlot,
    },
    ExportTasks,
    UpdateSettings {
        settings: Settings,
        customers: Vec<String>,
        projects: Vec<String>,
    },
    /// Re-read durable state, discarding the in-memory tracker.
    ReloadData,
    GetInitialState,
    Ping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Task(Task),
    Csv(String),
    State(Snapshot),
    Ack,
    Pong,
}

#[derive(Debug, Error, PartialEq)]
pub enum ServiceError {
    /// The service has not loaded its state yet; safe to retry.
    #[error("service is not ready")]
    NotReady,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("task not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Whether a client should retry the same request after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotReady)
    }
}

impl From<TrackerError> for ServiceError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::InvalidState(msg) => Self::InvalidState(msg.to_string()),
            TrackerError::NotFound => Self::NotFound,
        }
    }
}

/// Pushed to subscribers; delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The tracked state changed shape (start, stop, edit, settings, ...).
    StateChanged(Snapshot),
    /// Periodic progress of the running task; carries everything a display
    /// needs so subscribers never compute durations themselves.
    TimerUpdate {
        total_duration_ms: i64,
        formatted_time: String,
        session_duration_ms: i64,
        start_time: DateTime<Utc>,
    },
}

pub struct Service {
    tracker: Option<Tracker>,
    store: Store,
    webhook: Box<dyn WebhookSink>,
    subscribers: Vec<mpsc::Sender<Notification>>,
}

impl Service {
    /// Create an uninitialized service; requests other than ping fail with
    /// [`ServiceError::NotReady`] until [`Service::init`] or a
    /// `GetInitialState` request loads the state.
    pub fn new(store: Store, webhook: Box<dyn WebhookSink>) -> Self {
        Self {
            tracker: None,
            store,
            webhook,
            subscribers: Vec::new(),
        }
    }

    /// Load durable state into the tracker.
    pub fn init(&mut self) -> Result<(), ServiceError> {
        let snapshot = self
            .store
            .load()
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        self.tracker = Some(Tracker::from_snapshot(snapshot));
        Ok(())
    }

    /// Register a notification receiver. Closed receivers are pruned on the
    /// next publish.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn handle(&mut self, request: Request) -> Result<Response, ServiceError> {
        self.handle_at(request, Utc::now())
    }

    pub fn handle_at(
        &mut self,
        request: Request,
        now: DateTime<Utc>,
    ) -> Result<Response, ServiceError> {
        // These three never require (or establish) a loaded tracker first.
        match request {
            Request::Ping => return Ok(Response::Pong),
            Request::GetInitialState => {
                if self.tracker.is_none() {
                    self.init()?;
                }
                let snapshot = self
                    .tracker
                    .as_ref()
                    .map(Tracker::snapshot)
                    .unwrap_or_default();
                return Ok(Response::State(snapshot));
            }
            Request::ReloadData => {
                self.init()?;
                let snapshot = self
                    .tracker
                    .as_ref()
                    .map(Tracker::snapshot)
                    .unwrap_or_default();
                self.publish(Notification::StateChanged(snapshot.clone()));
                return Ok(Response::State(snapshot));
            }
            _ => {}
        }

        let tracker = self.tracker.as_mut().ok_or(ServiceError::NotReady)?;

        match request {
            Request::StartTask(spec) | Request::RestartTask(spec) => {
                let (task, archived) = tracker.restart_at(spec, now);
                self.commit();
                if let Some(done) = archived.from_running {
                    self.deliver_completed(&done);
                }
                Ok(Response::Task(task))
            }
            Request::PauseTask => {
                let task = tracker.pause_at(now)?;
                self.commit();
                Ok(Response::Task(task))
            }
            Request::StopTask => {
                let task = tracker.stop_at(now)?;
                self.commit();
                self.deliver_completed(&task);
                Ok(Response::Task(task))
            }
            Request::ResumeTask => {
                let task = tracker.resume_at(now)?;
                self.commit();
                Ok(Response::Task(task))
            }
            Request::StopPausedTask => {
                let task = tracker.stop_paused_at(now)?;
                self.commit();
                Ok(Response::Task(task))
            }
            Request::UpdateTask { task, slot } => {
                tracker.update(task, slot)?;
                self.commit();
                Ok(Response::Ack)
            }
            Request::DeleteTask { id, slot } => {
                tracker.delete(id, slot)?;
                self.commit();
                Ok(Response::Ack)
            }
            Request::ExportTasks => {
                if tracker.tasks.is_empty() {
                    return Err(ServiceError::Validation("no tasks to export".to_string()));
                }
                let rates = RateTable::new(&tracker.customers, &tracker.projects);
                Ok(Response::Csv(export_csv(&tracker.tasks, &rates)))
            }
            Request::UpdateSettings {
                settings,
                customers,
                projects,
            } => {
                settings
                    .validate()
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;
                tracker.update_settings(settings, customers, projects);
                self.commit();
                Ok(Response::Ack)
            }
            // Handled before the gate above
            Request::Ping | Request::GetInitialState | Request::ReloadData => unreachable!(),
        }
    }

    /// Persist progress and publish a timer update. Never mutates the
    /// lifecycle; the stored duration stays untouched while running.
    pub fn tick_at(&mut self, now: DateTime<Utc>) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let Some(current) = &tracker.current else {
            return;
        };

        let total = current.live_duration_ms(now);
        let update = Notification::TimerUpdate {
            total_duration_ms: total,
            formatted_time: format_hms(total),
            session_duration_ms: current.session_ms(now),
            start_time: current.start_time,
        };
        let snapshot = tracker.snapshot();

        if let Err(err) = self.store.save(&snapshot) {
            warn!(error = %err, "failed to persist state on tick");
        }
        self.publish(update);
    }

    pub fn tick(&mut self) {
        self.tick_at(Utc::now());
    }

    /// Persist the tracker and tell subscribers the state changed.
    ///
    /// A save failure is logged, not surfaced; the in-memory state is
    /// already mutated and the next mutation or tick will retry the write.
    fn commit(&mut self) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let snapshot = tracker.snapshot();
        if let Err(err) = self.store.save(&snapshot) {
            warn!(error = %err, "failed to persist state");
        }
        self.publish(Notification::StateChanged(snapshot));
    }

    /// One delivery attempt per completed task, no retry, failure logged.
    fn deliver_completed(&self, task: &Task) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        if !tracker.settings.webhook_active() {
            return;
        }
        let payload = WebhookPayload::from_task(task);
        if let Err(err) = self.webhook.deliver(&tracker.settings.webhook_url, &payload) {
            warn!(error = %err, task = %task.id, "webhook delivery failed");
        }
    }

    fn publish(&mut self, notification: Notification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

/// Exponential backoff for transient service errors, applied by callers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt))
            .min(self.cap)
    }

    /// Run `op`, retrying transient failures with backoff.
    ///
    /// The operation always executes at least once; `max_attempts` below 1
    /// is treated as 1.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    std::thread::sleep(self.delay(attempt));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn spec(title: &str) -> TaskSpec {
        TaskSpec {
            title: title.to_string(),
            customer: "Acme".to_string(),
            project: "Website".to_string(),
            billable: true,
        }
    }

    /// Records deliveries instead of making network calls.
    #[derive(Default, Clone)]
    struct RecordingSink {
        deliveries: Rc<RefCell<Vec<(String, WebhookPayload)>>>,
    }

    impl WebhookSink for RecordingSink {
        fn deliver(&self, url: &str, payload: &WebhookPayload) -> anyhow::Result<()> {
            self.deliveries
                .borrow_mut()
                .push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct Fixture {
        service: Service,
        sink: RecordingSink,
        _dir: tempfile::TempDir,
        store: Store,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at_path(dir.path().join("state.json"));
        let sink = RecordingSink::default();
        let mut service = Service::new(store.clone(), Box::new(sink.clone()));
        service.init().unwrap();
        Fixture {
            service,
            sink,
            _dir: dir,
            store,
        }
    }

    #[test]
    fn test_requests_fail_until_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at_path(dir.path().join("state.json"));
        let mut service = Service::new(store, Box::new(RecordingSink::default()));

        assert_eq!(
            service.handle_at(Request::StopTask, at(0)),
            Err(ServiceError::NotReady)
        );
        // Ping answers regardless
        assert_eq!(service.handle_at(Request::Ping, at(0)), Ok(Response::Pong));
    }

    #[test]
    fn test_get_initial_state_performs_init() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at_path(dir.path().join("state.json"));
        let mut service = Service::new(store, Box::new(RecordingSink::default()));

        match service.handle_at(Request::GetInitialState, at(0)).unwrap() {
            Response::State(snapshot) => assert_eq!(snapshot, Snapshot::initial()),
            other => panic!("unexpected response: {other:?}"),
        }
        // Initialized as a side effect
        assert!(service
            .handle_at(Request::StartTask(spec("Design")), at(1))
            .is_ok());
    }

    #[test]
    fn test_start_stop_persists_history() {
        let mut fx = fixture();
        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .unwrap();
        fx.service.handle_at(Request::StopTask, at(30)).unwrap();

        let stored = fx.store.load().unwrap();
        assert_eq!(stored.current_task, None);
        assert_eq!(stored.tasks.len(), 1);
        assert_eq!(stored.tasks[0].duration_ms, 30_000);
    }

    #[test]
    fn test_state_changed_published_per_mutation() {
        let mut fx = fixture();
        let rx = fx.service.subscribe();

        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .unwrap();
        fx.service.handle_at(Request::PauseTask, at(5)).unwrap();

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(notes.len(), 2);
        match &notes[1] {
            Notification::StateChanged(snapshot) => {
                assert!(snapshot.paused_task.is_some());
                assert!(snapshot.current_task.is_none());
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_stop_delivers_webhook_when_enabled() {
        let mut fx = fixture();
        fx.service
            .handle_at(
                Request::UpdateSettings {
                    settings: Settings {
                        webhook_enabled: true,
                        webhook_url: "https://example.com/hook".to_string(),
                        ..Settings::default()
                    },
                    customers: vec!["Acme".to_string()],
                    projects: vec!["Website".to_string()],
                },
                at(0),
            )
            .unwrap();

        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(1))
            .unwrap();
        fx.service.handle_at(Request::StopTask, at(61)).unwrap();

        let deliveries = fx.sink.deliveries.borrow();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "https://example.com/hook");
        assert_eq!(deliveries[0].1.title, "Design");
        assert_eq!(deliveries[0].1.duration, 60_000);
    }

    #[test]
    fn test_webhook_silent_when_disabled() {
        let mut fx = fixture();
        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .unwrap();
        fx.service.handle_at(Request::StopTask, at(10)).unwrap();
        assert!(fx.sink.deliveries.borrow().is_empty());
    }

    #[test]
    fn test_restart_delivers_only_archived_running_task() {
        let mut fx = fixture();
        fx.service
            .handle_at(
                Request::UpdateSettings {
                    settings: Settings {
                        webhook_enabled: true,
                        webhook_url: "https://example.com/hook".to_string(),
                        ..Settings::default()
                    },
                    customers: vec![],
                    projects: vec![],
                },
                at(0),
            )
            .unwrap();

        // A paused task archived by restart completes quietly
        fx.service
            .handle_at(Request::StartTask(spec("First")), at(1))
            .unwrap();
        fx.service.handle_at(Request::PauseTask, at(11)).unwrap();
        fx.service
            .handle_at(Request::RestartTask(spec("Second")), at(20))
            .unwrap();
        assert!(fx.sink.deliveries.borrow().is_empty());

        // A running task archived by restart is delivered
        fx.service
            .handle_at(Request::RestartTask(spec("Third")), at(35))
            .unwrap();
        let deliveries = fx.sink.deliveries.borrow();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1.title, "Second");
    }

    #[test]
    fn test_export_requires_history() {
        let mut fx = fixture();
        assert_eq!(
            fx.service.handle_at(Request::ExportTasks, at(0)),
            Err(ServiceError::Validation("no tasks to export".to_string()))
        );

        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .unwrap();
        fx.service.handle_at(Request::StopTask, at(30)).unwrap();
        match fx.service.handle_at(Request::ExportTasks, at(31)).unwrap() {
            Response::Csv(csv) => assert!(csv.contains("\"Design\"")),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_update_settings_rejects_invalid() {
        let mut fx = fixture();
        let err = fx
            .service
            .handle_at(
                Request::UpdateSettings {
                    settings: Settings {
                        webhook_enabled: true,
                        webhook_url: "   ".to_string(),
                        ..Settings::default()
                    },
                    customers: vec![],
                    projects: vec![],
                },
                at(0),
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn test_reload_discards_memory_state() {
        let mut fx = fixture();
        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .unwrap();

        // Overwrite durable state behind the service's back
        fx.store.save(&Snapshot::initial()).unwrap();

        match fx.service.handle_at(Request::ReloadData, at(5)).unwrap() {
            Response::State(snapshot) => assert_eq!(snapshot, Snapshot::initial()),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_tick_publishes_without_mutating_duration() {
        let mut fx = fixture();
        fx.service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .unwrap();
        let rx = fx.service.subscribe();

        fx.service.tick_at(at(5));
        fx.service.tick_at(at(65));

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(notes.len(), 2);
        match &notes[1] {
            Notification::TimerUpdate {
                total_duration_ms,
                formatted_time,
                session_duration_ms,
                start_time,
            } => {
                assert_eq!(*total_duration_ms, 65_000);
                assert_eq!(formatted_time, "00:01:05");
                assert_eq!(*session_duration_ms, 65_000);
                assert_eq!(*start_time, at(0));
            }
            other => panic!("unexpected notification: {other:?}"),
        }

        // Stored duration stays zero while running
        assert_eq!(fx.store.load().unwrap().current_task.unwrap().duration_ms, 0);
    }

    #[test]
    fn test_tick_is_a_no_op_when_idle() {
        let mut fx = fixture();
        let rx = fx.service.subscribe();
        fx.service.tick_at(at(5));
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut fx = fixture();
        let rx = fx.service.subscribe();
        drop(rx);

        // Publishing to a closed channel must not fail the request
        assert!(fx
            .service
            .handle_at(Request::StartTask(spec("Design")), at(0))
            .is_ok());
        assert!(fx.service.subscribers.is_empty());
    }

    #[test]
    fn test_error_mapping_from_tracker() {
        let mut fx = fixture();
        assert_eq!(
            fx.service.handle_at(Request::PauseTask, at(0)),
            Err(ServiceError::InvalidState(
                "no running task to pause".to_string()
            ))
        );
        assert_eq!(
            fx.service.handle_at(
                Request::DeleteTask {
                    id: TaskId(42),
                    slot: TaskSlot::Completed
                },
                at(0)
            ),
            Err(ServiceError::NotFound)
        );
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
        // Capped
        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_policy_retries_transient_only() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };

        let mut calls = 0;
        let result = policy.run(|| {
            calls += 1;
            if calls < 3 {
                Err(ServiceError::NotReady)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));

        let mut calls = 0;
        let result: Result<(), _> = policy.run(|| {
            calls += 1;
            Err(ServiceError::NotFound)
        });
        assert_eq!(result, Err(ServiceError::NotFound));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_policy_zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result = policy.run(|| {
            calls += 1;
            Ok::<_, ServiceError>(calls)
        });
        assert_eq!(result, Ok(1));

        let mut calls = 0;
        let result: Result<(), _> = policy.run(|| {
            calls += 1;
            Err(ServiceError::NotReady)
        });
        assert_eq!(result, Err(ServiceError::NotReady));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_policy_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result: Result<(), _> = policy.run(|| {
            calls += 1;
            Err(ServiceError::NotReady)
        });
        assert_eq!(result, Err(ServiceError::NotReady));
        assert_eq!(calls, 3);
    }
}
