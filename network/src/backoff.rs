//! Exponential reconnection backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Tunable backoff parameters shared by every link.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay floor; also the value backoff resets to after a fully
    /// acknowledged handshake.
    pub floor: Duration,
    /// Hard ceiling on the computed delay.
    pub ceiling: Duration,
    /// Multiplier applied per failed attempt.
    pub factor: f64,
    /// Fractional jitter applied to every computed delay, e.g. 0.1 = ±10%.
    /// Avoids synchronized reconnection storms when many links fail at once.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(500),
            ceiling: Duration::from_secs(30),
            factor: 1.5,
            jitter: 0.1,
        }
    }
}

/// Per-link backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current_ms: f64,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current_ms: policy.floor.as_millis() as f64,
            attempts: 0,
        }
    }

    /// Record one failed attempt, multiplying the delay up to the ceiling.
    pub fn record_failure(&mut self) {
        self.attempts += 1;
        let ceiling = self.policy.ceiling.as_millis() as f64;
        self.current_ms = (self.current_ms * self.policy.factor).min(ceiling);
    }

    /// Reset to the floor. Called only after a fully acknowledged
    /// handshake, never on a mere socket open.
    pub fn reset(&mut self) {
        self.current_ms = self.policy.floor.as_millis() as f64;
        self.attempts = 0;
    }

    /// The jittered delay to wait before the next attempt.
    pub fn delay(&self) -> Duration {
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.policy.jitter..=self.policy.jitter);
        Duration::from_millis((self.current_ms * jitter).max(0.0) as u64)
    }

    /// The unjittered current delay in milliseconds.
    pub fn current_ms(&self) -> u64 {
        self.current_ms as u64
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            floor: Duration::from_millis(500),
            ceiling: Duration::from_secs(30),
            factor: 1.5,
            jitter: 0.1,
        }
    }

    #[test]
    fn first_failure_multiplies_once() {
        let mut backoff = Backoff::new(policy());
        backoff.record_failure();
        assert_eq!(backoff.current_ms(), 750); // 500 * 1.5
        assert_eq!(backoff.attempts(), 1);

        // Jittered delay stays within ±10% of the computed value.
        for _ in 0..50 {
            let ms = backoff.delay().as_millis() as f64;
            assert!((675.0..=825.0).contains(&ms), "delay {} out of range", ms);
        }
    }

    #[test]
    fn delay_is_capped_at_ceiling() {
        let mut backoff = Backoff::new(policy());
        for _ in 0..50 {
            backoff.record_failure();
        }
        assert_eq!(backoff.current_ms(), 30_000);
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut backoff = Backoff::new(policy());
        backoff.record_failure();
        backoff.record_failure();
        assert!(backoff.current_ms() > 500);

        backoff.reset();
        assert_eq!(backoff.current_ms(), 500);
        assert_eq!(backoff.attempts(), 0);
    }
}
