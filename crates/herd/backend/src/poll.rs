//! Bounded readiness polling

use crate::error::ApiError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest sleep between probes
pub(crate) const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one readiness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Probe {
    Ready,
    Pending,
    Failed(String),
}

/// Probe every `interval` until ready, failed, timed out or cancelled.
///
/// Intervals below [`MIN_POLL_INTERVAL`] are raised to it. Recoverable API errors are logged and polling continues; any other error
/// ends the wait with `false`. Nothing is held across the sleep.
pub(crate) async fn poll_until<F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe, ApiError>>,
{
    let deadline = Instant::now() + timeout;
    let interval = interval.max(MIN_POLL_INTERVAL);

    loop {
        if cancel.is_cancelled() {
            info!(resource = %what, "Readiness wait cancelled");
            return false;
        }

        match probe().await {
            Ok(Probe::Ready) => {
                info!(resource = %what, "Resource is ready");
                return true;
            }
            Ok(Probe::Failed(reason)) => {
                warn!(resource = %what, reason = %reason, "Resource reported failure");
                return false;
            }
            Ok(Probe::Pending) => debug!(resource = %what, "Resource not ready yet"),
            Err(e) if e.is_recoverable() => {
                warn!(resource = %what, error = %e, "Error checking readiness, will retry");
            }
            Err(e) => {
                error!(resource = %what, error = %e, "Failed to check readiness");
                return false;
            }
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(resource = %what, timeout_secs = timeout.as_secs(), "Resource did not become ready within timeout");
            return false;
        }

        let nap = interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(resource = %what, "Readiness wait cancelled");
                return false;
            }
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
