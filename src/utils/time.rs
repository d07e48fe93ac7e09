use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// return millisecond since epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// return millisecond since epoch as i64, the representation stored in records
pub(crate) fn now_ms_i64() -> i64 {
    now_ms() as i64
}
