//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Run `operation` up to `max_attempts` times, sleeping `base_backoff * 2^n` between attempts.
///
/// Returns the last error once the budget is spent. A budget of zero is treated as one attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    label: &str,
    max_attempts: u32,
    base_backoff: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts => {
                let delay = base_backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed; retrying"
                );
                sleep(delay).await;
            }
            Err(error) => {
                tracing::error!(
                    operation = label,
                    attempts = attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff("flaky", 3, Duration::from_millis(100), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("fail {n}")) } else { Ok(n) }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_budget() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), String> =
            retry_with_backoff("down", 3, Duration::from_millis(100), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff between the three attempts.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn zero_budget_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), &str> = retry_with_backoff("once", 0, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
