//! Error classification, exponential backoff and request spacing.

use relabel_config::RetryConfig;
use relabel_platform::error::{ErrorKind as PlatformErrorKind, Result as PlatformResult};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Decides which adapter errors are worth retrying and how long to wait
/// between attempts.
///
/// Attempts are numbered from 1. The delay before attempt `n + 1` is
/// `min(base_delay * 2^(n - 1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    transient_codes: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` attempts in total (never fewer than
    /// one) with the default 1s base and 10s cap.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            transient_codes: Vec::new(),
        }
    }

    pub fn from_config(max_attempts: u32, config: &RetryConfig) -> Self {
        Self::new(max_attempts)
            .with_delays(config.base_delay(), config.max_delay())
            .with_transient_codes(config.transient_codes.iter().cloned())
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    /// Provider API codes that mean "try again later" even though they
    /// arrive inside a successful response envelope.
    pub fn with_transient_codes(mut self, codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.transient_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns `true` if the error is transient.
    pub fn classify(&self, kind: &PlatformErrorKind) -> bool {
        match kind {
            PlatformErrorKind::Api { code, .. } => self.transient_codes.iter().any(|c| c == code),
            kind => kind.is_retryable(),
        }
    }

    /// Delay to wait after the given (failed) attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1 << exponent).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts. The limiter is acquired before every attempt, retries
    /// included. The attempt number (from 1) is passed to `op`.
    pub async fn run<T, F, Fut>(&self, limiter: &RateLimiter, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PlatformResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            limiter.acquire().await;
            let err = match op(attempt).await {
                Ok(value) => return Attempted { result: Ok(value), attempts: attempt },
                Err(err) => err,
            };
            let kind: &PlatformErrorKind = &err;
            if !self.classify(kind) || attempt >= self.max_attempts {
                tracing::debug!(attempt, retryable = self.classify(kind), error = %kind, "giving up");
                return Attempted { result: Err(err), attempts: attempt };
            }
            let delay = self.backoff_delay(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis(), error = %kind, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Outcome of [`RetryPolicy::run`]: the final result plus how many attempts
/// it took to get there.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: PlatformResult<T>,
    pub attempts: u32,
}

/// Enforces a minimum spacing between consecutive requests.
///
/// Uses [`tokio::time::Instant`] so paused-clock tests observe the exact
/// waits.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: Mutex::new(None) }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until at least `interval` has passed since the previous
    /// acquisition. The first acquisition never waits.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                tracing::trace!(wait_ms = wait.as_millis(), "rate limiting request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[rstest]
    #[case(PlatformErrorKind::Network("reset".to_string()), true)]
    #[case(PlatformErrorKind::Timeout, true)]
    #[case(PlatformErrorKind::Aborted, true)]
    #[case(PlatformErrorKind::RateLimited, true)]
    #[case(PlatformErrorKind::Server(500), true)]
    #[case(PlatformErrorKind::PermissionDenied("1".to_string()), false)]
    #[case(PlatformErrorKind::NotFound("1".to_string()), false)]
    #[case(PlatformErrorKind::InvalidName("a/b".to_string()), false)]
    #[case(PlatformErrorKind::AlreadyExists("a".to_string()), false)]
    #[case(PlatformErrorKind::Api { code: "token_expired".to_string(), message: String::new() }, true)]
    #[case(PlatformErrorKind::Api { code: "quota".to_string(), message: String::new() }, false)]
    fn test_classify(#[case] kind: PlatformErrorKind, #[case] expected: bool) {
        let policy = RetryPolicy::default().with_transient_codes(["token_expired"]);
        assert_eq!(policy.classify(&kind), expected);
    }

    #[rstest]
    #[case(1, 1000)]
    #[case(2, 2000)]
    #[case(3, 4000)]
    #[case(4, 8000)]
    #[case(5, 10_000)]
    #[case(40, 10_000)]
    fn test_backoff_delay(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(RetryPolicy::default().backoff_delay(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_errors_with_backoff() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let attempted: Attempted<()> = policy
            .run(&RateLimiter::unlimited(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(exn::Exn::from(PlatformErrorKind::Server(503))) }
            })
            .await;
        assert_eq!(attempted.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*attempted.result.unwrap_err(), PlatformErrorKind::Server(503));
        // 1000ms after the first attempt, 2000ms after the second.
        assert_eq!(started.elapsed().as_millis(), 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_permanent_error() {
        let policy = RetryPolicy::new(3);
        let started = Instant::now();
        let attempted: Attempted<()> = policy
            .run(&RateLimiter::unlimited(), |_| async {
                Err(exn::Exn::from(PlatformErrorKind::PermissionDenied("1".to_string())))
            })
            .await;
        assert_eq!(attempted.attempts, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_after_transient_error() {
        let policy = RetryPolicy::new(3);
        let attempted = policy
            .run(&RateLimiter::unlimited(), |attempt| async move {
                if attempt == 1 { Err(exn::Exn::from(PlatformErrorKind::Timeout)) } else { Ok(attempt) }
            })
            .await;
        assert_eq!(attempted.attempts, 2);
        assert_eq!(attempted.result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(800));
        let started = Instant::now();
        limiter.acquire().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        limiter.acquire().await;
        assert_eq!(started.elapsed().as_millis(), 800);
        tokio::time::sleep(Duration::from_millis(300)).await;
        limiter.acquire().await;
        assert_eq!(started.elapsed().as_millis(), 1600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_applies_to_retries() {
        let policy = RetryPolicy::new(2).with_delays(Duration::from_millis(100), Duration::from_millis(100));
        let started = Instant::now();
        let _: Attempted<()> = policy
            .run(&RateLimiter::new(Duration::from_millis(800)), |_| async {
                Err(exn::Exn::from(PlatformErrorKind::RateLimited))
            })
            .await;
        // Backoff (100ms) is shorter than the spacing, so the limiter decides.
        assert_eq!(started.elapsed().as_millis(), 800);
    }
}
