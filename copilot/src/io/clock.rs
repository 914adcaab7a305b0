//! Wall-clock timestamps for persisted records.

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
