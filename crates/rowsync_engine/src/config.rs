//! Configuration for the synchronization agent.

use rand::Rng;
use rowsync_protocol::SessionToken;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for one synchronization agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Correlation token sent with every request.
    pub session: SessionToken,
    /// Retry behavior.
    pub retry: RetryConfig,
    /// Re-offer every local row and fetch everything on the next run.
    pub force_full_resync: bool,
}

impl AgentConfig {
    /// Creates a configuration with a fresh random session token.
    pub fn new() -> Self {
        Self {
            session: SessionToken::new(Uuid::new_v4().to_string()),
            retry: RetryConfig::default(),
            force_full_resync: false,
        }
    }

    /// Sets the session token.
    #[must_use]
    pub fn with_session(mut self, session: SessionToken) -> Self {
        self.session = session;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Requests a full resynchronization on the next run.
    #[must_use]
    pub fn with_force_full_resync(mut self, force: bool) -> Self {
        self.force_full_resync = force;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// Staleness rejections restart the run from a fresh fetch. They are
/// retried without limit unless `max_attempts` is set. Other retryable
/// failures, such as a dropped connection, are retried at most
/// `max_transient_failures` times.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per run. `None` means unbounded.
    pub max_attempts: Option<u32>,
    /// Maximum number of retries after transient failures.
    pub max_transient_failures: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration capped at `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            max_transient_failures: 0,
            ..Self::default()
        }
    }

    /// Sets the attempt cap.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the number of tolerated transient failures.
    #[must_use]
    pub fn with_max_transient_failures(mut self, failures: u32) -> Self {
        self.max_transient_failures = failures;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Returns true if another attempt may follow attempt number `attempt`
    /// (1-based).
    pub fn allows_another(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Calculates the delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top.
            let jitter = delay * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay + jitter)
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            max_transient_failures: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }
}
