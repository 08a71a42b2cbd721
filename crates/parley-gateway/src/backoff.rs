use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Fraction of the delay applied as +/- random spread. 0 disables jitter.
    pub jitter: f64,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// How long to wait for `ready` after sending `identify`.
    pub handshake_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1));
        let raw = self.base.saturating_mul(exp).min(self.max_delay);
        if self.jitter <= 0.0 {
            return raw;
        }

        let secs = raw.as_secs_f64();
        let spread = secs * self.jitter;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((secs + offset).max(0.0)).min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(7), Duration::from_secs(30));
        assert_eq!(policy.delay_for(500), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = ReconnectPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay_for(3);
            assert!(delay >= Duration::from_millis(1590));
            assert!(delay <= Duration::from_millis(2410));
        }
    }

    #[test]
    fn attempt_limit() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));
        assert!(!ReconnectPolicy::default().exhausted(u32::MAX));
    }
}
