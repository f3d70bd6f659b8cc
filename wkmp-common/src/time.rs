//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole seconds elapsed between `since` and `until`, clamped at zero
pub fn elapsed_seconds(since: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    (until - since).num_seconds().max(0) as u64
}
