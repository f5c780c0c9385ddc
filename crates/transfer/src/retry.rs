//! Exponential backoff for transfers that must eventually happen

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::TransferError;

/// Delays between attempts. The first attempt is immediate; each failure
/// waits for the next delay before trying again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub delays_secs: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays_secs: vec![1, 2, 4, 8, 16],
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            delays_secs: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays_secs.len() + 1
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error,
    /// or the delays run out. Returns the last error.
    pub async fn run<F, Fut>(&self, label: &str, mut attempt: F) -> Result<(), TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransferError>>,
    {
        let mut delays = self.delays_secs.iter();
        let mut tries = 1;
        loop {
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(label, attempt = tries, delay_secs = delay, error = %e, "transfer failed, retrying");
                        tokio::time::sleep(Duration::from_secs(*delay)).await;
                        tries += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(TransferError::Unavailable("down".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1 + 2 + 4 seconds of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_schedule() {
        let calls = AtomicUsize::new(0);
        let result = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransferError::Unavailable("down".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let calls = AtomicUsize::new(0);
        let result = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransferError::Rejected("no".into())) }
            })
            .await;

        assert!(matches!(result, Err(TransferError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
