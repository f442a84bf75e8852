use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. Saturates at zero if the clock is set
/// before the epoch rather than panicking.
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
