use rand::Rng;
use std::time::Duration;

use crate::options::CallConfig;

/// Delays slept between the attempts of a retrying call.
///
/// # Algorithm
///
/// ```ignore
/// // retry_delay = 10ms, backoff_factor = 2.0
/// let delays = [10ms, 20ms, 40ms, 80ms, ...];
///
/// // with jitter, each delay grows by a random 0% ~ 30%
/// ```
///
/// The sequence never ends, the retry loop decides how many delays it takes.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    factor: f64,
    jitter: bool,
}

impl Backoff {
    pub(crate) fn new(base: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            next: base,
            factor,
            jitter,
        }
    }

    pub(crate) fn from_config(config: &CallConfig) -> Self {
        Self::new(config.retry_delay, config.backoff_factor, config.jitter)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next;

        // past ~584 years the duration would overflow, keep the last one
        self.next = Duration::try_from_secs_f64(self.next.as_secs_f64() * self.factor)
            .unwrap_or(self.next);

        if self.jitter && !delay.is_zero() {
            let ratio: f64 = rand::thread_rng().gen_range(0.0..0.3);
            Some(delay + delay.mul_f64(ratio))
        } else {
            Some(delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_when_factor_is_one() {
        let delays: Vec<_> = Backoff::new(Duration::from_millis(10), 1.0, false)
            .take(3)
            .collect();

        assert_eq!(delays, vec![Duration::from_millis(10); 3]);
    }

    #[test]
    fn exponential_growth() {
        let delays: Vec<_> = Backoff::new(Duration::from_millis(10), 2.0, false)
            .take(4)
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
            ]
        );
    }

    #[test]
    fn zero_factor_stops_waiting() {
        let delays: Vec<_> = Backoff::new(Duration::from_millis(10), 0.0, false)
            .take(3)
            .collect();

        assert_eq!(
            delays,
            vec![Duration::from_millis(10), Duration::ZERO, Duration::ZERO]
        );
    }

    #[test]
    fn jitter_stays_in_range() {
        let base = Duration::from_millis(100);

        for delay in Backoff::new(base, 1.0, true).take(50) {
            assert!(delay >= base);
            assert!(delay < base.mul_f64(1.3));
        }
    }

    #[test]
    fn huge_factor_does_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 1e300, false);

        backoff.next();
        backoff.next();
        assert!(backoff.next().is_some());
    }
}
