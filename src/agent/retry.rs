//! Declared retry policy shared by every outbound call.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Growth shape of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Up to this fraction of the delay is added at random
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::Exponential,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: Backoff::Constant,
            jitter: 0.0,
        }
    }

    /// Delay before the attempt following `attempt` (1-based), before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra_ms = delay.as_millis() as f64 * self.jitter;
        let jitter = rand::thread_rng().gen_range(0.0..=extra_ms);
        delay + Duration::from_millis(jitter as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the final result and the number of attempts made.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> (Result<T, E>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    let delay = self.jittered(self.delay_for(attempt));
                    warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(backoff: Backoff) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff,
            jitter: 0.0,
        }
    }

    #[test]
    fn delay_shapes() {
        let c = policy(Backoff::Constant);
        assert_eq!(c.delay_for(3), Duration::from_millis(100));

        let l = policy(Backoff::Linear);
        assert_eq!(l.delay_for(2), Duration::from_millis(200));
        assert_eq!(l.delay_for(5), Duration::from_millis(350));

        let e = policy(Backoff::Exponential);
        assert_eq!(e.delay_for(1), Duration::from_millis(100));
        assert_eq!(e.delay_for(2), Duration::from_millis(200));
        assert_eq!(e.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let mut p = policy(Backoff::Constant);
        p.jitter = 0.5;
        for _ in 0..50 {
            let d = p.jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn run_retries_transient_errors() {
        let mut p = policy(Backoff::Constant);
        p.base_delay = Duration::ZERO;
        let calls = AtomicU32::new(0);

        let (result, attempts) = p
            .run("test", |_: &String| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("boom".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_stops_on_permanent_error() {
        let p = policy(Backoff::Constant);
        let (result, attempts) = p
            .run("test", |_: &String| false, |_| async { Err::<(), _>("fatal".to_string()) })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
