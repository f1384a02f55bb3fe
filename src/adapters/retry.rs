//! Bounded retry with exponential backoff around any [`LiveMatchProvider`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::adapters::provider::{GoalEvent, LiveMatchProvider, RawMatchRecord};
use crate::config::ProviderConfig;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on each attempt, so a hung request leaves time to retry
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base * 2^retry, capped.
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let delay = base.saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(delay).min(self.max_delay)
    }
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(cfg: &ProviderConfig) -> Self {
        Self {
            max_attempts: cfg.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.retry.base_delay_ms),
            max_delay: Duration::from_millis(cfg.retry.max_delay_ms),
            attempt_timeout: Duration::from_secs(cfg.attempt_timeout_secs),
        }
    }
}

/// Provider wrapper that retries retryable failures of the live fetch.
///
/// Each attempt gets `attempt_timeout`; an attempt that runs out is a
/// retryable [`FetchError::Timeout`]. The caller's timeout still bounds the
/// whole sequence, and dropping the future cancels any pending backoff.
/// Event lookups are passed through once, unretried.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: LiveMatchProvider> LiveMatchProvider for RetryingProvider<P> {
    async fn fetch_live_matches(&self) -> Result<Vec<RawMatchRecord>, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result =
                match tokio::time::timeout(self.policy.attempt_timeout, self.inner.fetch_live_matches())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }),
                };
            match result {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_duration(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Live feed fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fixture_events(&self, fixture_id: &str) -> Result<Vec<GoalEvent>, FetchError> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.inner.fixture_events(fixture_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                elapsed_ms: self.policy.attempt_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::provider::MockLiveMatchProvider;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
            attempt_timeout: Duration::from_secs(6),
        };
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff_duration(40), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mut mock = MockLiveMatchProvider::new();
        let mut seq = Sequence::new();
        mock.expect_fetch_live_matches()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(FetchError::Status { status: 503, body: String::new() }));
        mock.expect_fetch_live_matches()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![RawMatchRecord::default()]));

        let provider = RetryingProvider::new(mock, fast_policy(3));
        assert_eq!(provider.fetch_live_matches().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut mock = MockLiveMatchProvider::new();
        mock.expect_fetch_live_matches()
            .times(2)
            .returning(|| Err(FetchError::Transport("reset".into())));

        let provider = RetryingProvider::new(mock, fast_policy(2));
        assert!(matches!(
            provider.fetch_live_matches().await,
            Err(FetchError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mut mock = MockLiveMatchProvider::new();
        mock.expect_fetch_live_matches()
            .times(1)
            .returning(|| Err(FetchError::Status { status: 401, body: "bad key".into() }));

        let provider = RetryingProvider::new(mock, fast_policy(5));
        assert!(provider.fetch_live_matches().await.is_err());
    }

    /// First request hangs, second answers at once.
    struct HangsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LiveMatchProvider for HangsOnce {
        async fn fetch_live_matches(&self) -> Result<Vec<RawMatchRecord>, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(vec![RawMatchRecord::default()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_is_retried_within_fetch_budget() {
        let config = crate::config::AppConfig::default_config("/tmp/unused");
        let policy = RetryPolicy::from(&config.provider);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(6));

        let provider = RetryingProvider::new(
            HangsOnce {
                calls: AtomicU32::new(0),
            },
            policy,
        );
        let started = tokio::time::Instant::now();
        let records = tokio::time::timeout(config.fetch_timeout(), provider.fetch_live_matches())
            .await
            .expect("retry finished inside the fetch timeout")
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 2);
        // One attempt timeout plus the first backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(6500), "{:?}", elapsed);
        assert!(elapsed < config.fetch_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_hanging_ends_in_timeout() {
        let mut mock = MockLiveMatchProvider::new();
        mock.expect_fetch_live_matches().times(3).returning(|| Ok(Vec::new()));
        let provider = RetryingProvider::new(
            Stalls(mock),
            RetryPolicy {
                attempt_timeout: Duration::from_secs(2),
                ..fast_policy(3)
            },
        );

        assert!(matches!(
            provider.fetch_live_matches().await,
            Err(FetchError::Timeout { .. })
        ));
    }

    /// Counts calls through the mock, then never answers.
    struct Stalls(MockLiveMatchProvider);

    #[async_trait]
    impl LiveMatchProvider for Stalls {
        async fn fetch_live_matches(&self) -> Result<Vec<RawMatchRecord>, FetchError> {
            let _ = self.0.fetch_live_matches().await;
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_event_lookup_is_not_retried() {
        let mut mock = MockLiveMatchProvider::new();
        mock.expect_fixture_events()
            .withf(|id| id.to_string() == "42")
            .times(1)
            .returning(|_| Err(FetchError::Transport("reset".into())));

        let provider = RetryingProvider::new(mock, fast_policy(3));
        assert!(provider.fixture_events("42").await.is_err());
    }
}
