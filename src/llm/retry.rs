//! Retry-with-backoff helper for transient Language-Model Adapter failures
//! (§4.3). Not baked into the `LanguageModelAdapter` trait itself — a
//! concrete adapter's `generate_text`/`complete_chat` calls this around its
//! own transport call, so an adapter backed by an SDK with native retry can
//! opt out.

use crate::error::LlmError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retries `operation` up to `max_attempts` times with exponential backoff
/// starting at `initial_delay`, doubling each attempt. Only errors for which
/// [`LlmError::is_transient`] returns true are retried; any other error (or
/// the final attempt's transient error) is returned immediately.
pub async fn with_backoff<F, Fut, T>(
    max_attempts: u32,
    initial_delay: Duration,
    mut operation: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %err, "retrying transient LLM error");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) if err.is_transient() => {
                return Err(LlmError::ModelUnavailable(format!(
                    "exhausted {max_attempts} attempts: {err}"
                )));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_backoff(3, Duration::from_millis(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::ServiceUnavailable("down".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<&str, LlmError> = with_backoff(3, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(LlmError::AuthFailed("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::AuthFailed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_model_unavailable() {
        let result: Result<&str, LlmError> = with_backoff(2, Duration::from_millis(1), || async {
            Err(LlmError::RateLimited("again".into()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::ModelUnavailable(_))));
    }
}
