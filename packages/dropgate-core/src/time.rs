/// Wall-clock time utilities.
///
/// Heartbeat `ping` frames and archive timestamps carry wall-clock
/// milliseconds; protocol deadlines use `tokio::time` and never consult
/// the wall clock.

/// Returns the current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_reasonable() {
        let ts = now_millis();
        // Should be after 2024-01-01 in millis
        assert!(ts > 1704067200_000, "Timestamp {} is too old", ts);
        // Should be before 2100-01-01 in millis
        assert!(ts < 4102444800_000, "Timestamp {} is too far in future", ts);
    }
}
