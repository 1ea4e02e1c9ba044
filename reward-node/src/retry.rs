//! Bounded exponential backoff for transient I/O failures.
//!
//! Applied at the engine's call sites for balance reads, wallet lookups,
//! store writes, candidate selection and notifications. Ledger transfers are
//! never wrapped: a transfer is attempted at most once per pass.

use reward_core::engagement::EngagementError;
use reward_core::ledger::LedgerError;
use reward_core::notify::NotifyError;
use reward_core::DirectoryError;
use reward_storage::StoreError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that can tell whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }
}

impl Transient for DirectoryError {
    fn is_transient(&self) -> bool {
        DirectoryError::is_transient(self)
    }
}

impl Transient for NotifyError {
    fn is_transient(&self) -> bool {
        NotifyError::is_transient(self)
    }
}

impl Transient for EngagementError {
    fn is_transient(&self) -> bool {
        EngagementError::is_transient(self)
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(2_000),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after failed `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let mult = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(mult).min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
/// The last error is returned unchanged.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && e.is_transient() => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op,
                    attempt,
                    attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(500));
        assert_eq!(p.delay_for(64), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r: Result<u32, LedgerError> = with_backoff(&fast(3), "test", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(LedgerError::Timeout)
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(r.expect("succeeds"), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r: Result<(), LedgerError> = with_backoff(&fast(5), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Chain("rejected".into()))
        })
        .await;
        assert!(r.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r: Result<(), LedgerError> = with_backoff(&fast(2), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Network("down".into()))
        })
        .await;
        assert!(matches!(r, Err(LedgerError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn store_io_errors_are_retried_but_missing_rounds_are_not() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let r: Result<u32, StoreError> = with_backoff(&fast(3), "test", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                Err(StoreError::Sled(sled::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk busy",
                ))))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(r.expect("succeeds"), 2);

        counter.store(0, Ordering::SeqCst);
        let r: Result<(), StoreError> = with_backoff(&fast(3), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound(reward_core::RoundId(7)))
        })
        .await;
        assert!(matches!(r, Err(StoreError::NotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
