//! Shared CLI argument parsers.

use std::time::Duration;

/// Parse a duration string (e.g., "30s", "5m", "1h").
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Parse a process ID, rejecting values that would signal a process group.
pub fn parse_pid(s: &str) -> Result<libc::pid_t, String> {
    let pid: libc::pid_t = s.parse().map_err(|_| format!("invalid pid: {}", s))?;
    if pid <= 0 {
        return Err(format!("pid must be positive: {}", s));
    }
    Ok(pid)
}
