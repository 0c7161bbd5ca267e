use std::thread;
use std::time::Duration;

use crate::error::EnrichError;

/// Bounded retries with linear backoff: after failed attempt `i` (from 0) the
/// policy sleeps `i * base_delay`, and never after the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.base_delay
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }

    /// Runs `call` until it succeeds or the attempts are exhausted. The
    /// closure receives the 0-based attempt index. Errors that are not
    /// transient are returned without another attempt.
    pub fn run<T, F>(&self, label: &str, mut call: F) -> Result<T, EnrichError>
    where
        F: FnMut(usize) -> Result<T, EnrichError>,
    {
        let mut attempt = 0usize;
        loop {
            tracing::debug!(%label, attempt = attempt + 1, max = self.max_attempts, "external call");
            match call(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let last = attempt + 1 >= self.max_attempts;
                    if last || !err.is_transient() {
                        return Err(err);
                    }
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        %label,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::Stage;

    fn failure(n: usize) -> EnrichError {
        EnrichError::CommandFailed {
            program: "esearch".to_string(),
            status: "exit status: 1".to_string(),
            stderr: format!("failure {n}"),
        }
    }

    #[test]
    fn succeeds_after_k_failures() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let value = policy
            .run("IL6", |attempt| {
                calls += 1;
                if attempt < 2 { Err(failure(attempt)) } else { Ok(attempt) }
            })
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls, 3);
    }

    #[test]
    fn returns_last_error_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let err = policy
            .run::<(), _>("IL6", |attempt| {
                calls += 1;
                Err(failure(attempt))
            })
            .unwrap_err();
        assert_eq!(calls, 3);
        assert_matches!(err, EnrichError::CommandFailed { ref stderr, .. } if stderr == "failure 2");
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let err = policy
            .run::<(), _>("IL6", |_| {
                calls += 1;
                Err(EnrichError::Cancelled(Stage::Genes))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_matches!(err, EnrichError::Cancelled(Stage::Genes));
    }

    #[test]
    fn linear_backoff_starts_at_zero() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
    }

    #[test]
    fn zero_attempts_still_calls_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }
}
