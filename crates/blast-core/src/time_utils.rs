/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns true when a value captured at `captured_unix_ms` is still inside
/// its `ttl_ms` validity window at `now_unix_ms`.
pub fn is_within_window_ms(captured_unix_ms: u64, ttl_ms: u64, now_unix_ms: u64) -> bool {
    now_unix_ms.saturating_sub(captured_unix_ms) <= ttl_ms
}
