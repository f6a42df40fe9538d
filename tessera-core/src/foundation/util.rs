use std::time::{SystemTime, UNIX_EPOCH};

pub fn current_timestamp_nanos() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs().saturating_mul(1_000_000_000).saturating_add(u64::from(now.subsec_nanos()))
}

/// Split a unix-nanos timestamp into the (seconds, nanos) pair used by the
/// protobuf `Timestamp` encoding.
pub fn split_timestamp_nanos(timestamp_nanos: u64) -> (i64, i32) {
    ((timestamp_nanos / 1_000_000_000) as i64, (timestamp_nanos % 1_000_000_000) as i32)
}

pub fn join_timestamp_nanos(seconds: i64, nanos: i32) -> u64 {
    let seconds = seconds.max(0) as u64;
    let nanos = nanos.max(0) as u64;
    seconds.saturating_mul(1_000_000_000).saturating_add(nanos)
}
