//! Edit-form time reconciliation.
//!
//! The edit form exposes three mutually-derived fields: start time, end
//! time, and duration. Whichever field the user touched last stays as
//! entered and the dependent field is recomputed:
//!
//! - editing `duration` re-anchors `start = end - duration` (end wins);
//! - editing `start` or `end` recomputes `duration = end - start`.
//!
//! A negative computed duration is treated as a pair spanning midnight:
//! the end gains 24 hours instead of the edit being rejected.

use chrono::{DateTime, Duration, Utc};

/// Which of the three fields the user last touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditedField {
    Start,
    End,
    Duration,
}

/// The reconciled triple; always satisfies `end == start + duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFields {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Derive the field not last touched from the other two.
pub fn reconcile(fields: TimeFields, edited: EditedField) -> TimeFields {
    match edited {
        EditedField::Duration => {
            let duration_ms = fields.duration_ms.max(0);
            TimeFields {
                start: fields.end - Duration::milliseconds(duration_ms),
                end: fields.end,
                duration_ms,
            }
        }
        EditedField::Start | EditedField::End => {
            let mut end = fields.end;
            if end < fields.start {
                // Cross-midnight pair: the end time belongs to the next day
                end += Duration::hours(24);
            }
            TimeFields {
                start: fields.start,
                end,
                duration_ms: (end - fields.start).num_milliseconds(),
            }
        }
    }
}
