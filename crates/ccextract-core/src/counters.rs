//! Run-wide counters and the limits checked against them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::progress::fmt_num;

/// Counters shared by every worker through an `Arc`.
///
/// The `inc_*` methods return the post-increment value so a caller can
/// compare it against a [`Limit`] without a second, racy load.
#[derive(Debug, Default)]
pub struct SharedCounters {
    records_read: AtomicU64,
    files_extracted: AtomicU64,
    truncated_seen: AtomicU64,
    empty_payload: AtomicU64,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_records_read(&self) -> u64 {
        self.records_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_files_extracted(&self) -> u64 {
        self.files_extracted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_truncated_seen(&self) -> u64 {
        self.truncated_seen.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_empty_payload(&self) -> u64 {
        self.empty_payload.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn files_extracted(&self) -> u64 {
        self.files_extracted.load(Ordering::Relaxed)
    }

    pub fn truncated_seen(&self) -> u64 {
        self.truncated_seen.load(Ordering::Relaxed)
    }

    pub fn empty_payload(&self) -> u64 {
        self.empty_payload.load(Ordering::Relaxed)
    }
}

impl std::fmt::Display for SharedCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read {} records, extracted {} files, {} truncated, {} empty payloads",
            fmt_num(self.records_read()),
            fmt_num(self.files_extracted()),
            fmt_num(self.truncated_seen()),
            fmt_num(self.empty_payload()),
        )
    }
}

/// Upper bound on a counter. Configured as an integer where any negative
/// value means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limit(Option<u64>);

impl Limit {
    pub const UNBOUNDED: Limit = Limit(None);

    pub fn at(max: u64) -> Self {
        Self(Some(max))
    }

    pub fn from_config(value: i64) -> Self {
        u64::try_from(value).map_or(Self::UNBOUNDED, Self::at)
    }

    pub fn max(&self) -> Option<u64> {
        self.0
    }

    /// True once `count` (a post-increment value) has reached the bound.
    pub fn is_reached(&self, count: u64) -> bool {
        self.0.is_some_and(|max| count >= max)
    }

    pub fn as_config(&self) -> i64 {
        self.0
            .map_or(-1, |max| i64::try_from(max).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(max) => f.write_str(&fmt_num(max)),
            None => f.write_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::from_config)
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn increments_return_new_value() {
        let counters = SharedCounters::new();
        assert_eq!(counters.inc_records_read(), 1);
        assert_eq!(counters.inc_records_read(), 2);
        assert_eq!(counters.records_read(), 2);
        assert_eq!(counters.files_extracted(), 0);
    }

    #[test]
    fn increments_from_many_threads() {
        let counters = Arc::new(SharedCounters::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                let counters = Arc::clone(&counters);
                s.spawn(move || {
                    for _ in 0..1000 {
                        counters.inc_files_extracted();
                    }
                });
            }
        });
        assert_eq!(counters.files_extracted(), 4000);
    }

    #[test]
    fn negative_limit_is_unbounded() {
        let limit = Limit::from_config(-1);
        assert_eq!(limit, Limit::UNBOUNDED);
        assert!(!limit.is_reached(u64::MAX));
    }

    #[test]
    fn limit_reached_at_max() {
        let limit = Limit::from_config(3);
        assert!(!limit.is_reached(2));
        assert!(limit.is_reached(3));
        assert!(limit.is_reached(4));
    }

    #[test]
    fn zero_limit_reached_on_first() {
        assert!(Limit::from_config(0).is_reached(1));
    }

    #[test]
    fn limit_deserializes_from_integer() {
        let limit: Limit = serde_json::from_str("10").unwrap();
        assert_eq!(limit.max(), Some(10));
        let limit: Limit = serde_json::from_str("-1").unwrap();
        assert_eq!(limit.max(), None);
        assert_eq!(serde_json::to_string(&limit).unwrap(), "-1");
    }
}
