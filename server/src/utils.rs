use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall clock in milliseconds, truncated to the 32-bit wire width.
pub fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u32
}

/// Elapsed milliseconds between two wrapping 32-bit timestamps.
pub fn elapsed_millis(since: u32, now: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Keeps the first `visible` characters of a secret for logging.
pub fn redact(secret: &str, visible: usize) -> String {
    let shown: String = secret.chars().take(visible).collect();
    format!("{}...", shown)
}
