//! Retry with exponential backoff for durable writes

use core::future::Future;
use ridedispatch_core::{PersistenceError, PersistenceResult, RetryConfig};
use tracing::warn;

/// Run `operation` until it succeeds or `config.max_retries` retries are spent.
///
/// The final error is wrapped in `PersistenceError::RetriesExhausted` when at
/// least one retry happened; with retries disabled the original error is
/// returned untouched.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut attempt_fn: F,
) -> PersistenceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PersistenceResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Storage operation failed, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if attempt == 0 => return Err(err),
            Err(err) => {
                return Err(PersistenceError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                })
            }
        }
    }
}
