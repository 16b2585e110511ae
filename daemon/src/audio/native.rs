//! Bounded native calls
//!
//! Native audio calls can block or hang inside the driver. Each one runs on
//! the blocking pool under a hard timeout; a timed-out call counts as a
//! failure and its thread is abandoned.

use std::time::Duration;

use tracing::{debug, warn};

use super::backend::{BackendError, BackendErrorKind};
use crate::config::AudioTiming;

/// Run a blocking native call with a hard timeout
pub(crate) async fn run_native<T, F>(
    op: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(BackendError::other(format!(
            "{op} aborted: {join_err}"
        ))),
        Err(_) => {
            warn!(op, timeout_ms = timeout.as_millis() as u64, "native call timed out");
            Err(BackendError::new(
                BackendErrorKind::Timeout,
                format!("{op} did not return within {}ms", timeout.as_millis()),
            ))
        }
    }
}

/// Teardown with one retry: attempt, back off, attempt again.
///
/// Returns the second error if both attempts fail; the caller decides how
/// to force the resource into a released state.
pub(crate) async fn teardown_with_retry<F>(
    op: &'static str,
    timing: &AudioTiming,
    call: F,
) -> Result<(), BackendError>
where
    F: Fn() -> Result<(), BackendError> + Clone + Send + 'static,
{
    match run_native(op, timing.native_timeout(), call.clone()).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            warn!(op, error = %e, "native teardown failed, retrying after backoff");
        }
    }

    tokio::time::sleep(timing.teardown_backoff()).await;

    let result = run_native(op, timing.native_timeout(), call).await;
    if result.is_ok() {
        debug!(op, "native teardown succeeded on retry");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_timing() -> AudioTiming {
        AudioTiming {
            native_timeout_ms: 100,
            teardown_backoff_ms: 10,
            restart_backoff_ms: 10,
            restart_retry_backoff_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_run_native_times_out() {
        let result = run_native("hang", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_teardown_retries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = teardown_with_retry("stop", &fast_timing(), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BackendError::other("first attempt fails"))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_teardown_gives_up_after_two_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = teardown_with_retry("stop", &fast_timing(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::other("always fails"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
