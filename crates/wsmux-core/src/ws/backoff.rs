//! Reconnect policy and capped exponential backoff.
//!
//! Delays start at [`ReconnectPolicy::initial_delay`], grow by
//! [`ReconnectPolicy::factor`] after every failed attempt and are capped at
//! [`ReconnectPolicy::max_delay`]. A successful connection resets the delay.

use std::time::Duration;

/// How the connection manager retries after a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// First backoff delay.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub factor: f64,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Whether `attempts` consecutive failures exhaust the retry budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries.is_some_and(|max| attempts >= max)
    }
}

/// Stateful delay generator driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        let initial = policy.initial_delay.min(policy.max_delay);
        Self { initial, max: policy.max_delay, factor: policy.factor.max(1.0), current: initial }
    }

    /// Return the delay to wait now and advance to the next one.
    pub fn next_duration(&mut self) -> Duration {
        let delay = self.current;
        let next_nanos = (self.current.as_nanos() as f64 * self.factor) as u64;
        let max_nanos = u64::try_from(self.max.as_nanos()).unwrap_or(u64::MAX);
        self.current = Duration::from_nanos(next_nanos.min(max_nanos));
        delay
    }

    /// Back to the initial delay (after a successful connection).
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The delay the next call to [`next_duration`](Self::next_duration) returns.
    pub fn current_delay(&self) -> Duration {
        self.current
    }
}
