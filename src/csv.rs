//! CSV export/import for the completed-task history.
//!
//! Export uses a fixed column order with RFC 4180 quoting; import is
//! header-tolerant and best-effort: each data row parses independently and
//! bad rows are collected as per-row errors instead of aborting the batch.

use crate::domain::{RateTable, Task, TaskId};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

pub const EXPECTED_HEADERS: [&str; 7] = [
    "Task Title",
    "Customer",
    "Project",
    "Billable",
    "Start Time",
    "End Time",
    "Duration (seconds)",
];

/// Alternate accepted name for the billable column.
const BILLABLE_ALT: &str = "Billable (Y/N)";

const REVENUE_HEADER: &str = "Projected Revenue";

/// Serialize completed tasks, one row per task.
///
/// A trailing `Projected Revenue` column is appended when any catalog entry
/// carries an hourly rate.
pub fn export_csv(tasks: &[Task], rates: &RateTable) -> String {
    let with_revenue = rates.has_rates();

    let mut headers: Vec<String> = EXPECTED_HEADERS.iter().map(|h| h.to_string()).collect();
    if with_revenue {
        headers.push(REVENUE_HEADER.to_string());
    }

    let mut lines = vec![headers.join(",")];
    for task in tasks {
        let mut fields = vec![
            quote(&task.title),
            quote(&task.customer),
            quote(&task.project),
            if task.billable { "Y" } else { "N" }.to_string(),
            task.start_time.to_rfc3339(),
            task.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            task.duration_secs().to_string(),
        ];
        if with_revenue {
            let revenue = rates.projected_revenue(
                &task.customer,
                &task.project,
                task.billable,
                task.duration_ms,
            );
            fields.push(format!("{:.2}", revenue));
        }
        lines.push(fields.join(","));
    }
    lines.join("\n")
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// A single rejected data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based line number in the source file.
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV file is empty")]
    Empty,
    #[error(
        "invalid CSV format; missing headers: {}; found headers: {}; expected headers: {} (\"Billable\" may also be named \"Billable (Y/N)\")",
        missing.join(", "),
        found.join(", "),
        EXPECTED_HEADERS.join(", ")
    )]
    MissingHeaders {
        missing: Vec<String>,
        found: Vec<String>,
    },
    #[error("no valid tasks found; {}", summarize_errors(errors))]
    NoValidRows { errors: Vec<RowError> },
}

fn summarize_errors(errors: &[RowError]) -> String {
    let shown: Vec<String> = errors.iter().take(10).map(|e| e.to_string()).collect();
    let mut out = shown.join("; ");
    if errors.len() > 10 {
        out.push_str(&format!(" ... and {} more errors", errors.len() - 10));
    }
    out
}

/// Outcome of a best-effort import: the good rows plus every rejection.
#[derive(Debug)]
pub struct ImportReport {
    pub tasks: Vec<Task>,
    pub errors: Vec<RowError>,
}

/// Parse an exported CSV back into task records.
///
/// `now` anchors the date sanity window and the generated task ids.
pub fn import_csv(text: &str, now: DateTime<Utc>) -> Result<ImportReport, ImportError> {
    // Keep original line numbers for error reporting while skipping blanks
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    let (_, header_line) = *lines.first().ok_or(ImportError::Empty)?;
    let headers = parse_csv_line(header_line);
    let columns = resolve_columns(&headers)?;

    let id_base = now.timestamp_millis();
    let mut tasks = Vec::new();
    let mut errors = Vec::new();

    for (line_no, raw) in lines.iter().skip(1) {
        match parse_row(raw, &headers, &columns, now) {
            Ok(mut task) => {
                // Imported ids must not collide with each other
                task.id = TaskId(id_base + tasks.len() as i64);
                tasks.push(task);
            }
            Err(message) => errors.push(RowError {
                line: *line_no,
                message,
            }),
        }
    }

    if tasks.is_empty() {
        return Err(ImportError::NoValidRows { errors });
    }
    Ok(ImportReport { tasks, errors })
}

struct Columns {
    title: usize,
    customer: usize,
    project: usize,
    billable: usize,
    start: usize,
    end: usize,
    duration: usize,
}

fn resolve_columns(headers: &[String]) -> Result<Columns, ImportError> {
    let find = |name: &str| headers.iter().position(|h| h == name);

    let mut missing = Vec::new();
    for expected in EXPECTED_HEADERS {
        let present = match expected {
            "Billable" => find("Billable").or_else(|| find(BILLABLE_ALT)).is_some(),
            other => find(other).is_some(),
        };
        if !present {
            missing.push(expected.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(ImportError::MissingHeaders {
            missing,
            found: headers.to_vec(),
        });
    }

    // Indices are known present after the check above
    let position = |name: &str| find(name).unwrap_or_default();
    Ok(Columns {
        title: position("Task Title"),
        customer: position("Customer"),
        project: position("Project"),
        billable: find("Billable")
            .or_else(|| find(BILLABLE_ALT))
            .unwrap_or_default(),
        start: position("Start Time"),
        end: position("End Time"),
        duration: position("Duration (seconds)"),
    })
}

fn parse_row(
    raw: &str,
    headers: &[String],
    columns: &Columns,
    now: DateTime<Utc>,
) -> Result<Task, String> {
    let values = parse_csv_line(raw);
    if values.len() != headers.len() {
        return Err(format!(
            "Expected {} columns, found {}",
            headers.len(),
            values.len()
        ));
    }

    let title = values[columns.title].trim().to_string();
    if title.is_empty() {
        return Err("Task title is required".to_string());
    }

    let start_raw = values[columns.start].trim();
    if start_raw.is_empty() {
        return Err("Start time is required".to_string());
    }
    let start_time = parse_datetime(start_raw, now)
        .ok_or_else(|| format!("Invalid start time \"{}\"", start_raw))?;

    let end_raw = values[columns.end].trim();
    let end_time = if end_raw.is_empty() {
        None
    } else {
        Some(parse_datetime(end_raw, now).ok_or_else(|| format!("Invalid end time \"{}\"", end_raw))?)
    };

    let duration_raw = values[columns.duration].trim();
    let duration_secs: i64 = duration_raw
        .parse()
        .map_err(|_| format!("Invalid duration \"{}\"", duration_raw))?;
    if duration_secs < 0 {
        return Err(format!("Invalid duration \"{}\"", duration_raw));
    }

    if let Some(end) = end_time {
        if end <= start_time {
            return Err("End time must be after start time".to_string());
        }
    }

    let billable = matches!(
        values[columns.billable].trim().to_uppercase().as_str(),
        "Y" | "YES" | "TRUE"
    );

    Ok(Task {
        id: TaskId(0), // reassigned by the caller
        title,
        customer: values[columns.customer].trim().to_string(),
        project: values[columns.project].trim().to_string(),
        billable,
        start_time,
        end_time,
        duration_ms: duration_secs * 1000,
    })
}

/// Parse a timestamp, rejecting dates outside `[2000-01-01, now + 10y]`.
fn parse_datetime(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })?;

    let min = NaiveDate::from_ymd_opt(2000, 1, 1)?
        .and_hms_opt(0, 0, 0)?
        .and_utc();
    let max = now + Duration::days(365 * 10);
    if parsed < min || parsed > max {
        return None;
    }
    Some(parsed)
}

/// Split one CSV line into unquoted fields (RFC 4180 quoting rules).
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                values.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    values.push(current);
    values
}

/// How imported tasks combine with the existing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Discard the old history, keep only the imported tasks.
    Replace,
    /// Prepend imported tasks to the old history, no deduplication.
    Append,
    /// Overwrite matching tasks in place, append the rest.
    Update,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub tasks: Vec<Task>,
    pub added: usize,
    pub updated: usize,
}

/// Start times within this many seconds count as the same task for update mode.
const MATCH_TOLERANCE_SECS: i64 = 60;

pub fn merge_tasks(existing: Vec<Task>, imported: Vec<Task>, mode: MergeMode) -> MergeOutcome {
    match mode {
        MergeMode::Replace => MergeOutcome {
            added: imported.len(),
            updated: 0,
            tasks: imported,
        },
        MergeMode::Append => {
            let added = imported.len();
            let mut tasks = imported;
            tasks.extend(existing);
            MergeOutcome {
                tasks,
                added,
                updated: 0,
            }
        }
        MergeMode::Update => {
            let mut tasks = existing;
            let mut added = 0;
            let mut updated = 0;
            for incoming in imported {
                match tasks.iter_mut().find(|t| matches_task(t, &incoming)) {
                    Some(slot) => {
                        // Keep the existing id so references stay stable
                        let id = slot.id;
                        *slot = Task { id, ..incoming };
                        updated += 1;
                    }
                    None => {
                        tasks.push(incoming);
                        added += 1;
                    }
                }
            }
            MergeOutcome {
                tasks,
                added,
                updated,
            }
        }
    }
}

fn matches_task(existing: &Task, incoming: &Task) -> bool {
    existing.title == incoming.title
        && existing.customer == incoming.customer
        && existing.project == incoming.project
        && (existing.start_time - incoming.start_time)
            .num_seconds()
            .abs()
            <= MATCH_TOLERANCE_SECS
}
