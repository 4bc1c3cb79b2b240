use std::{
    collections::VecDeque,
    fmt::{self, Debug},
    future::Future,
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};
use tokio::time::Instant;

use crate::error::CallError;

/// Spacing calls through one instance at least `period` apart.
///
/// Every call reserves its start time under an internal lock, so callers
/// racing on the same throttle from many tasks or threads are serialised:
/// the `n`-th admitted call never starts earlier than `(n - 1) * period`
/// after the first.
///
/// ```text
/// period: |-------|
///
/// call 1: |f()--|
/// call 2:         |f()------|
/// call 3:                 |f()--|          call 3 waits for its slot,
/// call 4:                         ...|f()  not for call 2 to finish
///
/// time pass ----->
/// ```
///
/// A call arriving after its slot has already passed runs immediately. A call
/// woken later than its slot moves its start time up to the real one, so
/// back-to-back callers stay at least `period` apart.
///
/// With [`max_burst`](ThrottleBuilder::max_burst) above one, up to that many
/// calls start together and any window of `period` holds at most `max_burst`
/// starts:
///
/// ```text
/// period:       |-------|
/// max_burst: 3
///
/// calls 1-3:    |f()|
/// calls 4-6:            |f()|
/// call 7:                       |f()|
///
/// time pass ----->
/// ```
pub struct Throttle {
    /// Start times of the most recently admitted calls, oldest first.
    admitted: Mutex<VecDeque<Instant>>,
    period: Duration,
    max_burst: usize,
}

impl Throttle {
    /// Initialize a builder to create throttle.
    pub fn builder() -> ThrottleBuilder {
        ThrottleBuilder::new()
    }

    /// Create a throttle admitting one call per `period`.
    pub fn new(period: Duration) -> Self {
        Self::with_burst(period, 1)
    }

    fn with_burst(period: Duration, max_burst: usize) -> Self {
        Self {
            admitted: Mutex::new(VecDeque::with_capacity(max_burst + 1)),
            period,
            max_burst,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn max_burst(&self) -> usize {
        self.max_burst
    }

    /// Start time of the most recently admitted call, if any.
    pub fn last_called(&self) -> Option<Instant> {
        self.admitted().back().copied()
    }

    /// Run a function.
    ///
    /// Call `run(...)` may block current thread until the throttle admits it.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    /// use lioncall::Throttle;
    ///
    /// let throttle = Throttle::new(Duration::from_millis(5));
    /// let started = Instant::now();
    ///
    /// let ans: Vec<u32> = (1..=3).map(|x| throttle.run(|| x + 1)).collect();
    ///
    /// assert_eq!(ans, vec![2, 3, 4]);
    /// assert!(started.elapsed() >= Duration::from_millis(10));
    /// ```
    pub fn run<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some((slot, still_should_wait)) = self.reserve() {
            thread::sleep(still_should_wait);
            self.mark_started(slot);
        }

        f()
    }

    /// Run an async function once the throttle admits it.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use lioncall::Throttle;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let throttle = Throttle::new(Duration::from_millis(5));
    ///
    /// let doubled = throttle.run_async(|| async { 21 * 2 }).await;
    ///
    /// assert_eq!(doubled, 42);
    /// # }
    /// ```
    pub async fn run_async<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.tick().await;
        f().await
    }

    /// Wait until the throttle admits one more call.
    pub async fn tick(&self) {
        if let Some((slot, still_should_wait)) = self.reserve() {
            tokio::time::sleep(still_should_wait).await;
            self.mark_started(slot);
        }
    }

    fn admitted(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.admitted.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Claim the next start slot, returning it with how long the caller has
    /// to wait for it.
    fn reserve(&self) -> Option<(Instant, Duration)> {
        let mut admitted_guard = self.admitted();

        // Instant::now() should be called after the lock acquired or else may inaccurate.
        let now = Instant::now();

        let slot = match admitted_guard.front() {
            Some(&oldest) if admitted_guard.len() >= self.max_burst => (oldest + self.period).max(now),
            _ => now,
        };
        admitted_guard.push_back(slot);
        while admitted_guard.len() > self.max_burst {
            admitted_guard.pop_front();
        }

        drop(admitted_guard);

        slot.checked_duration_since(now)
            .filter(|wait| !wait.is_zero())
            .map(|wait| (slot, wait))
    }

    /// Move `slot` up to the real start time of a caller that overslept it.
    fn mark_started(&self, slot: Instant) {
        let mut admitted_guard = self.admitted();

        let now = Instant::now();
        if let Some(start) = admitted_guard.iter_mut().rev().find(|start| **start == slot) {
            if *start < now {
                *start = now;
            }
        }
        admitted_guard.make_contiguous().sort();
    }
}

impl Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("last_called", &self.last_called())
            .field("period", &self.period)
            .field("max_burst", &self.max_burst)
            .finish()
    }
}

/// Use to build a [`Throttle`].
///
/// Created by [`Throttle::builder()`] API.
#[derive(Debug, Clone)]
pub struct ThrottleBuilder {
    period: Duration,
    period_secs: Option<f64>,
    max_burst: usize,
}

impl Default for ThrottleBuilder {
    fn default() -> Self {
        Self {
            period: Duration::default(),
            period_secs: None,
            max_burst: 1,
        }
    }
}

impl ThrottleBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Set period, default value is `Duration::default()` (no throttling).
    pub fn period(&mut self, period: Duration) -> &mut Self {
        self.period = period;
        self.period_secs = None;
        self
    }

    /// Set period in seconds. Checked by [`build()`](Self::build).
    pub fn period_secs(&mut self, secs: f64) -> &mut Self {
        self.period_secs = Some(secs);
        self
    }

    /// Set how many calls may start within one period, default value is `1`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use lioncall::Throttle;
    ///
    /// let throttle = Throttle::builder()
    ///     .period(Duration::from_secs(1))
    ///     .max_burst(3)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(throttle.max_burst(), 3);
    /// assert!(Throttle::builder().max_burst(0).build().is_err());
    /// ```
    pub fn max_burst(&mut self, max_burst: usize) -> &mut Self {
        self.max_burst = max_burst;
        self
    }

    /// Create a new throttle with current configuration.
    ///
    /// Return `Err` if the period was given in seconds and is negative or not
    /// finite, or if `max_burst` is zero.
    pub fn build(&self) -> Result<Throttle, CallError> {
        if self.max_burst == 0 {
            return Err(CallError::Validation(
                "max_burst must be at least 1".to_owned(),
            ));
        }

        let period = match self.period_secs {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                CallError::Validation(format!(
                    "throttle period must be a finite, non-negative number of seconds, got {}",
                    secs
                ))
            })?,
            None => self.period,
        };

        Ok(Throttle::with_burst(period, self.max_burst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TOLERANCE: Duration = Duration::from_millis(1);

    #[test]
    fn with_negative_period() {
        assert!(Throttle::builder().period_secs(-0.5).build().is_err());
        assert!(Throttle::builder().period_secs(f64::NAN).build().is_err());
    }

    #[test]
    fn with_period_secs() {
        let throttle = Throttle::builder().period_secs(0.25).build().unwrap();

        assert_eq!(throttle.period(), Duration::from_millis(250));
    }

    #[test]
    fn first_call_does_not_wait() {
        let throttle = Throttle::new(Duration::from_secs(60));

        assert!(throttle.last_called().is_none());
        assert_eq!(throttle.reserve(), None);
        assert!(throttle.last_called().is_some());
    }

    #[test]
    fn second_call_waits_remaining_period() {
        let throttle = Throttle::new(Duration::from_secs(60));

        throttle.reserve();
        let (_, wait) = throttle.reserve().unwrap();

        assert!(wait > Duration::from_secs(59));
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn blocking_calls_are_spaced() {
        let period = Duration::from_millis(15);
        let throttle = Throttle::new(period);

        let stamps: Vec<std::time::Instant> = (0..4)
            .map(|_| throttle.run(std::time::Instant::now))
            .collect();

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] + TOLERANCE >= period);
        }
    }

    #[tokio::test]
    async fn concurrent_tasks_are_serialised() {
        let period = Duration::from_millis(10);
        let throttle = Arc::new(Throttle::new(period));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move {
                    throttle.tick().await;
                    Instant::now()
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for (i, stamp) in stamps.iter().enumerate() {
            assert!(*stamp - stamps[0] + TOLERANCE >= period * i as u32);
        }
    }

    #[test]
    fn zero_period_never_waits() {
        let throttle = Throttle::new(Duration::ZERO);

        assert_eq!(throttle.reserve(), None);
        assert_eq!(throttle.reserve(), None);
    }

    #[test]
    fn zero_burst_is_refused() {
        assert!(matches!(
            Throttle::builder().max_burst(0).build(),
            Err(CallError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_spaced() {
        let throttle = Throttle::builder()
            .period(Duration::from_millis(100))
            .max_burst(3)
            .build()
            .unwrap();

        let start = Instant::now();
        let mut offsets = Vec::new();
        for _ in 0..7 {
            throttle.tick().await;
            offsets.push((Instant::now() - start).as_millis());
        }

        assert_eq!(offsets, vec![0, 0, 0, 100, 100, 100, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_window_slides() {
        let throttle = Throttle::builder()
            .period(Duration::from_millis(100))
            .max_burst(2)
            .build()
            .unwrap();

        let start = Instant::now();
        throttle.tick().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        throttle.tick().await;

        // the first start leaves the window at 100ms, the second at 160ms
        throttle.tick().await;
        assert_eq!((Instant::now() - start).as_millis(), 100);
        throttle.tick().await;
        assert_eq!((Instant::now() - start).as_millis(), 160);
    }
}
