use chrono::{DateTime, Utc};

use crate::collector_core::TagSet;

pub fn chunked<T: Clone>(v: &[T], size: usize) -> Vec<Vec<T>> {
    v.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Text of an SDK string member whether the model marks it required (`&str`) or not.
pub fn opt_text<'a>(v: impl Into<Option<&'a str>>) -> String {
    v.into().unwrap_or_default().to_string()
}

/// `k=v, k=v` in key order, `None` for an untagged resource.
pub fn tag_string(tags: &TagSet) -> String {
    if tags.is_empty() {
        return "None".to_string();
    }
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Largest whole unit only: 345600 -> `4 days`, 90 -> `1 minutes`.
pub fn seconds_to_readable(seconds: i64) -> String {
    const UNITS: [(i64, &str); 3] = [(86_400, "days"), (3_600, "hours"), (60, "minutes")];
    for (size, unit) in UNITS {
        if seconds >= size {
            return format!("{} {}", seconds / size, unit);
        }
    }
    format!("{seconds} seconds")
}
