use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Errors that can tell the retry loop whether another attempt is worth it
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for crate::amm::AmmError {
    fn is_transient(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for crate::EngineError {
    fn is_transient(&self) -> bool {
        self.is_transient()
    }
}

/// Retry `op` with exponential backoff, up to a fixed attempt ceiling.
///
/// Terminal errors (validation, rejections) abort immediately without
/// backoff; only transient remote failures are retried.
pub async fn with_backoff<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded after {} attempts", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_transient() || attempt >= MAX_ATTEMPTS {
                    return Err(e);
                }

                let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                tracing::warn!(
                    "Attempt {}/{} failed for {}: {}. Retrying in {}ms...",
                    attempt,
                    MAX_ATTEMPTS,
                    label,
                    e,
                    backoff_ms
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}
