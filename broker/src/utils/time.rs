//! Time utility functions
//!
//! Wire timestamps are UNIX seconds carried as `f64`, matching the record
//! format of the stream entries.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Current time as UNIX seconds
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current time as milliseconds since the UNIX epoch
pub fn unix_now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_recent() {
        let now = unix_now();
        // 2020-01-01 as a sanity lower bound
        assert!(now > 1_577_836_800.0);
    }

    #[test]
    fn test_unix_now_ms_scale() {
        let secs = unix_now();
        let ms = unix_now_ms() as f64 / 1000.0;
        assert!((ms - secs).abs() < 5.0);
    }
}
