use std::time::Duration;

use rand::Rng;

/// A backoff policy. Immutable, shared between workers as a template for executions.
pub trait BackOff: Send + Sync {
    /// Begin a fresh sequence of waits for a new retry subject.
    fn start(&self) -> Box<dyn BackOffExecution>;
}

/// Progress through one sequence of waits.
pub trait BackOffExecution: Send + Sync {
    /// The wait before the next attempt, or None once attempts are exhausted.
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// Waits the same interval between attempts, up to `max_attempts` times.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FixedBackOff {
    interval: Duration,
    max_attempts: u32,
}

impl FixedBackOff {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for FixedBackOff {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 9,
        }
    }
}

impl BackOff for FixedBackOff {
    fn start(&self) -> Box<dyn BackOffExecution> {
        Box::new(FixedExecution {
            policy: *self,
            attempts: 0,
        })
    }
}

struct FixedExecution {
    policy: FixedBackOff,
    attempts: u32,
}

impl BackOffExecution for FixedExecution {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.interval)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackOff {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<Duration>,
    max_attempts: u32,
}

impl ExponentialBackOff {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: Duration,
        maximum_interval: Option<Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts,
        }
    }

    /// The wait before retry number `attempt` (0-based).
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let candidate_interval = self
            .backoff_coefficient
            .checked_pow(attempt)
            .and_then(|factor| self.initial_interval.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for ExponentialBackOff {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(1),
            maximum_interval: Some(Duration::from_secs(30)),
            max_attempts: 5,
        }
    }
}

impl BackOff for ExponentialBackOff {
    fn start(&self) -> Box<dyn BackOffExecution> {
        Box::new(ExponentialExecution {
            policy: *self,
            attempts: 0,
        })
    }
}

struct ExponentialExecution {
    policy: ExponentialBackOff,
    attempts: u32,
}

impl BackOffExecution for ExponentialExecution {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let interval = self.policy.interval_for(self.attempts);
        self.attempts += 1;
        Some(interval)
    }
}

/// Spreads the waits of another policy by a random factor in `[1 - jitter, 1 + jitter]`,
/// so workers failing on the same dependency do not retry in lockstep.
pub struct JitteredBackOff<B> {
    inner: B,
    jitter: f64,
}

impl<B: BackOff> JitteredBackOff<B> {
    pub fn new(inner: B, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { inner, jitter }
    }
}

impl<B: BackOff> BackOff for JitteredBackOff<B> {
    fn start(&self) -> Box<dyn BackOffExecution> {
        Box::new(JitteredExecution {
            inner: self.inner.start(),
            jitter: self.jitter,
        })
    }
}

struct JitteredExecution {
    inner: Box<dyn BackOffExecution>,
    jitter: f64,
}

impl BackOffExecution for JitteredExecution {
    fn next_backoff(&mut self) -> Option<Duration> {
        let interval = self.inner.next_backoff()?;
        if self.jitter == 0.0 {
            return Some(interval);
        }

        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Some(Duration::try_from_secs_f64(interval.as_secs_f64() * factor).unwrap_or(interval))
    }
}
