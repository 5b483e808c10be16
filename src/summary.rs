//! Period totals over the task history.
//!
//! A task belongs to a period by its start time: `today` means the same
//! calendar date, `week` the Sunday-started week containing the reference
//! instant, `month` the same month and year. A running task whose start
//! falls in the period contributes its live total.

use crate::domain::{RateTable, Task};
use chrono::{DateTime, Datelike, Days, Utc};

/// Reporting window, anchored on a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    Month,
}

impl Period {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Whether `start` falls inside this period around `now`.
    pub fn contains(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let date = start.date_naive();
        let today = now.date_naive();
        match self {
            Self::Today => date == today,
            Self::Week => {
                let week_start =
                    today - Days::new(u64::from(today.weekday().num_days_from_sunday()));
                date >= week_start && date <= week_start + Days::new(6)
            }
            Self::Month => date.month() == today.month() && date.year() == today.year(),
        }
    }
}

/// Aggregate totals for one period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Completed tasks whose start time falls in the period.
    pub task_count: usize,
    pub total_ms: i64,
    pub billable_ms: i64,
    pub revenue: f64,
}

/// Total the history (and the running task, live) for a period.
pub fn summarize(
    tasks: &[Task],
    current: Option<&Task>,
    rates: &RateTable,
    period: Period,
    now: DateTime<Utc>,
) -> Summary {
    let mut summary = Summary::default();

    for task in tasks {
        if !period.contains(task.start_time, now) {
            continue;
        }
        summary.task_count += 1;
        add_task(&mut summary, task, task.duration_ms, rates);
    }

    if let Some(task) = current {
        if period.contains(task.start_time, now) {
            add_task(&mut summary, task, task.live_duration_ms(now), rates);
        }
    }

    summary
}

fn add_task(summary: &mut Summary, task: &Task, duration_ms: i64, rates: &RateTable) {
    summary.total_ms += duration_ms;
    if task.billable {
        summary.billable_ms += duration_ms;
    }
    summary.revenue +=
        rates.projected_revenue(&task.customer, &task.project, task.billable, duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn on(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn done(start: DateTime<Utc>, duration_secs: i64, billable: bool) -> Task {
        let mut task = Task::new_at(
            TaskSpec {
                title: "work".to_string(),
                customer: "Acme".to_string(),
                project: "Website".to_string(),
                billable,
            },
            start,
        );
        task.end_time = Some(start + chrono::Duration::seconds(duration_secs));
        task.duration_ms = duration_secs * 1000;
        task
    }

    #[test]
    fn test_today_matches_calendar_date_only() {
        let now = on(2024, 3, 13, 18);
        assert!(Period::Today.contains(on(2024, 3, 13, 0), now));
        assert!(Period::Today.contains(on(2024, 3, 13, 23), now));
        assert!(!Period::Today.contains(on(2024, 3, 12, 23), now));
        assert!(!Period::Today.contains(on(2024, 3, 14, 0), now));
    }

    #[test]
    fn test_week_starts_on_sunday() {
        // 2024-03-13 is a Wednesday; its week runs Sun 03-10 through Sat 03-16
        let now = on(2024, 3, 13, 12);
        assert!(Period::Week.contains(on(2024, 3, 10, 0), now));
        assert!(Period::Week.contains(on(2024, 3, 16, 23), now));
        assert!(!Period::Week.contains(on(2024, 3, 9, 23), now));
        assert!(!Period::Week.contains(on(2024, 3, 17, 0), now));
    }

    #[test]
    fn test_week_spans_month_boundary() {
        // 2024-04-02 is a Tuesday; its week starts Sun 03-31
        let now = on(2024, 4, 2, 12);
        assert!(Period::Week.contains(on(2024, 3, 31, 8), now));
        assert!(!Period::Week.contains(on(2024, 3, 30, 8), now));
    }

    #[test]
    fn test_month_matches_month_and_year() {
        let now = on(2024, 3, 13, 12);
        assert!(Period::Month.contains(on(2024, 3, 1, 0), now));
        assert!(Period::Month.contains(on(2024, 3, 31, 23), now));
        assert!(!Period::Month.contains(on(2024, 2, 29, 12), now));
        assert!(!Period::Month.contains(on(2023, 3, 13, 12), now));
    }

    #[test]
    fn test_summarize_totals_and_revenue() {
        let now = on(2024, 3, 13, 18);
        let tasks = vec![
            done(on(2024, 3, 13, 9), 3600, true),
            done(on(2024, 3, 13, 11), 1800, false),
            // Last month, excluded
            done(on(2024, 2, 13, 9), 7200, true),
        ];
        let rates = RateTable::new(&["Acme,50".to_string()], &[]);

        let summary = summarize(&tasks, None, &rates, Period::Today, now);
        assert_eq!(summary.task_count, 2);
        assert_eq!(summary.total_ms, 5_400_000);
        assert_eq!(summary.billable_ms, 3_600_000);
        // One billable hour at 50/h
        assert_eq!(summary.revenue, 50.0);
    }

    #[test]
    fn test_summarize_includes_live_running_task() {
        let now = on(2024, 3, 13, 10);
        let mut running = done(on(2024, 3, 13, 9), 0, true);
        running.end_time = None;
        running.duration_ms = 600_000;

        let summary = summarize(&[], Some(&running), &RateTable::default(), Period::Today, now);
        // The running task is not a completed task
        assert_eq!(summary.task_count, 0);
        // 10 min accrued plus the 1 h open session
        assert_eq!(summary.total_ms, 4_200_000);
        assert_eq!(summary.billable_ms, 4_200_000);
    }

    #[test]
    fn test_summarize_skips_running_task_outside_period() {
        let now = on(2024, 3, 13, 10);
        let mut running = done(on(2024, 3, 12, 23), 0, true);
        running.end_time = None;

        let summary = summarize(&[], Some(&running), &RateTable::default(), Period::Today, now);
        assert_eq!(summary, Summary::default());
    }

    #[test]
    fn test_period_names() {
        assert_eq!(Period::from_name("week"), Some(Period::Week));
        assert_eq!(Period::from_name("quarter"), None);
        assert_eq!(Period::Month.name(), "month");
    }
}
