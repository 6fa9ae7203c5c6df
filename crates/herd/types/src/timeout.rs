//! Parsing of human-written timeout strings (`30s`, `10m`, `1h`, `45`)

use std::time::Duration;
use tracing::warn;

/// Timeout used when a spec omits one or gives an unparseable value
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Parse a timeout string into a duration.
///
/// Accepts a whole number followed by `s`, `m` or `h`, or a bare number of
/// seconds. Anything else falls back to [`DEFAULT_TIMEOUT`] with a warning.
pub fn parse_timeout(raw: &str) -> Duration {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return DEFAULT_TIMEOUT;
    }

    let (digits, multiplier) = if let Some(d) = normalized.strip_suffix('s') {
        (d, 1)
    } else if let Some(d) = normalized.strip_suffix('m') {
        (d, 60)
    } else if let Some(d) = normalized.strip_suffix('h') {
        (d, 3600)
    } else {
        (normalized.as_str(), 1)
    };

    match digits.trim().parse::<u64>() {
        Ok(n) => Duration::from_secs(n.saturating_mul(multiplier)),
        Err(_) => {
            warn!(timeout = raw, "Invalid timeout format, using default 600s");
            DEFAULT_TIMEOUT
        }
    }
}

/// Render a duration the way backends expect it (`"600s"`)
pub fn format_timeout(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs())
}
