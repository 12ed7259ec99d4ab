//! Recognition auto-restart pacing.

use crate::defaults;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff with a floor set by the cooldown since the last restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub cooldown: Duration,
    /// Consecutive failed starts before one forced start.
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(defaults::INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(defaults::MAX_BACKOFF_MS),
            cooldown: Duration::from_millis(defaults::RESTART_COOLDOWN_MS),
            max_attempts: defaults::MAX_RESTART_ATTEMPTS,
        }
    }
}

impl RestartPolicy {
    /// `initial_backoff * 2^attempts`, capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay before the next restart: the backoff, but never inside the
    /// cooldown window after `last_restart`.
    pub fn delay(&self, attempts: u32, last_restart: Option<Instant>, now: Instant) -> Duration {
        let backoff = self.backoff(attempts);
        let cooldown_left = last_restart
            .map(|last| self.cooldown.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or(Duration::ZERO);
        backoff.max(cooldown_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
        assert_eq!(policy.backoff(4), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_delay_respects_cooldown() {
        let policy = RestartPolicy::default();
        let now = Instant::now();
        let last = now.checked_sub(Duration::from_millis(300)).unwrap_or(now);

        let delay = policy.delay(0, Some(last), now);

        assert!(delay >= Duration::from_millis(200));
        assert!(delay <= Duration::from_millis(1000));
        if last < now {
            assert_eq!(delay, Duration::from_millis(700));
        }
    }

    #[test]
    fn test_delay_without_previous_restart_is_backoff() {
        let policy = RestartPolicy::default();
        let now = Instant::now();
        assert_eq!(policy.delay(2, None, now), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_never_exceeds_max_of_backoff_and_cooldown() {
        let policy = RestartPolicy::default();
        let now = Instant::now();
        for attempts in 0..10 {
            let delay = policy.delay(attempts, Some(now), now);
            assert!(delay <= policy.max_backoff.max(policy.cooldown));
            assert!(delay >= policy.cooldown);
        }
    }
}
