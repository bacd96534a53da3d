//! Deadline-aware polling.
//!
//! All bounded waits in the engine (image readiness, container state
//! settling) go through `poll_until`, which owns the deadline instead of
//! each call site counting iterations by hand.

use std::future::Future;
use std::time::Duration;

use crate::errors::{OrchestratorError, OrchestratorResult};

/// Default interval between condition checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `check` every `interval` until it reports completion or `deadline`
/// elapses.
///
/// The condition returns `Ok(true)` when satisfied, `Ok(false)` to keep
/// waiting, or an error to abort immediately. The first check runs before
/// any sleep, so an already-satisfied condition returns without delay.
pub async fn poll_until<F, Fut>(
    what: &str,
    deadline: Duration,
    interval: Duration,
    mut check: F,
) -> OrchestratorResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OrchestratorResult<bool>>,
{
    let waited = tokio::time::timeout(deadline, async {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if check().await? {
                return Ok(());
            }
        }
    })
    .await;

    match waited {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Timeout(format!(
            "{} not reached within {:?}",
            what, deadline
        ))),
    }
}
