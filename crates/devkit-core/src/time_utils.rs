/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Credential expiry check. A missing expiry never expires; an expiry equal to
/// `now_unix` already has.
pub fn is_expired_unix(expires_unix: Option<u64>, now_unix: u64) -> bool {
    matches!(expires_unix, Some(value) if value <= now_unix)
}

/// Seconds a credential remains usable, `None` when it carries no expiry.
pub fn remaining_lifetime_secs(expires_unix: Option<u64>, now_unix: u64) -> Option<u64> {
    expires_unix.map(|value| value.saturating_sub(now_unix))
}
