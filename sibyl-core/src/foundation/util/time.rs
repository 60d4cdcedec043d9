use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch, the timestamp granularity of the hash
/// contract.
pub fn unix_now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
