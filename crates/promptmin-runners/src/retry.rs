use promptmin_core::OracleError;
use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for transport-level retries of a single oracle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_after_cap: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            retry_after_cap: Duration::from_secs(30),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Exponential part of the delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// A server-provided `Retry-After` wins (capped); otherwise exponential
    /// backoff plus random jitter.
    pub fn delay_for<R: Rng>(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if let Some(hint) = retry_after.filter(|hint| !hint.is_zero()) {
            return hint.min(self.retry_after_cap);
        }
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        self.backoff(attempt) + jitter
    }
}

/// Outcome of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

/// Calls `attempt` until it succeeds, fails fatally, or the policy runs out
/// of retries. The closure receives the zero-based attempt number.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut attempt: F) -> Result<T, OracleError>
where
    F: FnMut(u32) -> Result<T, AttemptError>,
{
    let mut rng = rand::thread_rng();
    let mut current = 0u32;
    loop {
        match attempt(current) {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(message)) => return Err(OracleError::new(message)),
            Err(AttemptError::Retryable {
                message,
                retry_after,
            }) => {
                if current >= policy.max_retries {
                    return Err(OracleError::new(message));
                }
                let delay = policy.delay_for(current, retry_after, &mut rng);
                warn!(
                    event = "oracle_retry",
                    attempt = current + 1,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %promptmin_core::redact_secrets(&message),
                );
                thread::sleep(delay);
                current += 1;
            }
        }
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let seconds = value?.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds.min(86_400.0)))
}
