use std::time::Duration;

/// Spec §4.4.2: `min(10, max(min_retries, ceil(update_poll / retry_poll) * 3))`.
/// Bounds how many times `UpdateStatusReportRetry` / `UpdatePreCommitStatusReportRetry`
/// re-attempt a status report before the engine gives up.
pub fn max_sending_attempts(
    update_poll: Duration,
    retry_poll: Duration,
    min_retries: u32,
) -> u32 {
    let update_poll_secs = update_poll.as_secs_f64().max(1.0);
    let retry_poll_secs = retry_poll.as_secs_f64().max(1.0);
    let ceil_ratio = (update_poll_secs / retry_poll_secs).ceil() as u32;
    min_retries.max(ceil_ratio.saturating_mul(3)).min(10)
}

/// Exponential backoff schedule for `FetchStoreRetry`'s 12 attempts (spec
/// §4.4.2). Doubles from `base` each attempt, capped at `max`.
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        self.attempt += 1;
        self.base
            .checked_mul(factor as u32)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_sending_attempts_caps_at_ten() {
        let n = max_sending_attempts(Duration::from_secs(1800), Duration::from_secs(300), 3);
        assert_eq!(n, 10);
    }

    #[test]
    fn max_sending_attempts_honors_min_retries() {
        let n = max_sending_attempts(Duration::from_secs(60), Duration::from_secs(600), 4);
        assert_eq!(n, 4);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(8));
        assert_eq!(b.next_delay(), Duration::from_secs(10));
        assert_eq!(b.attempt(), 5);
    }
}
