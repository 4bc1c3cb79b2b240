//! Concurrent calls over many functions or many inputs.
//!
//! Every fan-out call runs its items inside the calling task and shares one
//! execution core:
//!
//! ```text
//! initial_delay
//!  |
//!  +-- item 0: [permit] [throttle] retry loop ... (0, result)
//!  +-- item 1: [permit] [throttle] retry loop ... (1, result)
//!  ...
//!  +-- item N: [permit] [throttle] retry loop ... (N, result)
//!                                                   |
//!                      results sorted by index <----+
//! ```
//!
//! - `max_concurrent` bounds how many items hold a permit at once.
//! - `throttle_period` spaces item launches through one shared [`Throttle`].
//! - A failing item never cancels its siblings. Once every item settled, the
//!   failure of the lowest index is returned.

use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tokio::{sync::Semaphore, time};

use crate::{
    call::attempt_with_retries,
    error::CallError,
    invocable::Invocable,
    options::CallOptions,
    throttle::Throttle,
    to_list::{shape, Listable},
};

mod batch;
mod multi;

pub use batch::{bcall, bcall_timed};
pub use multi::{mcall, mcall_explode, mcall_explode_timed};

async fn fan_out<I, T, J>(jobs: J, options: &CallOptions<T>) -> Result<Vec<(T, Duration)>, CallError>
where
    J: IntoIterator<Item = (Invocable<I, T>, I)>,
    I: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    let config = &options.config;

    if !config.initial_delay.is_zero() {
        time::sleep(config.initial_delay).await;
    }

    let semaphore = config.max_concurrent.map(Semaphore::new);
    let throttle = config.throttle_period.map(Throttle::new);

    let mut pending: FuturesUnordered<_> = jobs
        .into_iter()
        .enumerate()
        .map(|(index, (func, input))| {
            let semaphore = semaphore.as_ref();
            let throttle = throttle.as_ref();

            async move {
                // the semaphore lives as long as this call and is never closed
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };

                if let Some(throttle) = throttle {
                    throttle.tick().await;
                }

                (index, attempt_with_retries(&func, input, options).await)
            }
        })
        .collect();

    let mut settled = Vec::with_capacity(pending.len());
    while let Some(outcome) = pending.next().await {
        settled.push(outcome);
    }

    settled.sort_by_key(|(index, _)| *index);
    settled.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Run independent calls concurrently, returning their results in list order.
///
/// Each function gets the per-item retry policy of [`rcall()`](crate::rcall).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use lioncall::{pcall, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let slow = Invocable::future(|()| async {
///     tokio::time::sleep(Duration::from_millis(20)).await;
///     Ok::<_, std::io::Error>("slow")
/// });
/// let fast = Invocable::infallible(|()| "fast");
///
/// let results = pcall(vec![slow, fast], &CallOptions::new()).await.unwrap();
///
/// assert_eq!(results, vec!["slow", "fast"]);
/// # }
/// ```
pub async fn pcall<T, F>(funcs: F, options: &CallOptions<T>) -> Result<Vec<T>, CallError>
where
    F: IntoIterator<Item = Invocable<(), T>>,
    T: Clone + Send + 'static,
{
    let results = pcall_timed(funcs, options).await?;
    Ok(results.into_iter().map(|(value, _)| value).collect())
}

/// [`pcall()`] that pairs every result with the duration of its successful attempt.
pub async fn pcall_timed<T, F>(funcs: F, options: &CallOptions<T>) -> Result<Vec<(T, Duration)>, CallError>
where
    F: IntoIterator<Item = Invocable<(), T>>,
    T: Clone + Send + 'static,
{
    fan_out(funcs.into_iter().map(|func| (func, ())), options).await
}

/// Apply one function to every input concurrently, keeping input order.
///
/// A single value can be passed as `Some(value)`, and `None` means no input.
/// The `flatten`, `dropna` and `unique` options shape the ordered results,
/// see [`Listable`].
///
/// Also exported as [`alcall()`](crate::alcall).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use lioncall::{lcall, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// // later inputs finish first
/// let inverse_sleep = Invocable::future(|x: u64| async move {
///     tokio::time::sleep(Duration::from_millis(30 - x * 10)).await;
///     Ok::<_, std::io::Error>(x * 2)
/// });
///
/// let options = CallOptions::builder().max_concurrent(2).build().unwrap();
///
/// assert_eq!(lcall(vec![0, 1, 2], &inverse_sleep, &options).await.unwrap(), vec![0, 2, 4]);
/// assert!(lcall(None, &inverse_sleep, &options).await.unwrap().is_empty());
/// # }
/// ```
pub async fn lcall<I, T, C>(input: C, func: &Invocable<I, T>, options: &CallOptions<T>) -> Result<Vec<T>, CallError>
where
    C: IntoIterator<Item = I>,
    I: Clone + Send + 'static,
    T: Listable + Clone + Send + 'static,
{
    let results = fan_out(input.into_iter().map(|item| (func.clone(), item)), options).await?;
    let values = results.into_iter().map(|(value, _)| value).collect();

    let config = &options.config;
    Ok(shape(values, config.flatten, config.dropna, config.unique))
}

/// [`lcall()`] that pairs every result with the duration of its successful attempt.
///
/// The results are not flattened or deduplicated; `dropna` removes the
/// pairs whose value is null.
pub async fn lcall_timed<I, T, C>(
    input: C,
    func: &Invocable<I, T>,
    options: &CallOptions<T>,
) -> Result<Vec<(T, Duration)>, CallError>
where
    C: IntoIterator<Item = I>,
    I: Clone + Send + 'static,
    T: Listable + Clone + Send + 'static,
{
    let mut results = fan_out(input.into_iter().map(|item| (func.clone(), item)), options).await?;

    if options.config.dropna {
        results.retain(|(value, _)| !value.is_null());
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error_map::ErrorMap, error::TimeoutError};
    use rand::Rng;
    use serde_json::{json, Value};
    use std::{
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };
    use tokio::time::Instant;

    #[derive(Debug)]
    struct Odd(u64);

    impl fmt::Display for Odd {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} is odd", self.0)
        }
    }

    impl std::error::Error for Odd {}

    fn random_sleeper() -> Invocable<u64, u64> {
        Invocable::future(|x: u64| async move {
            let delay = rand::thread_rng().gen_range(0..20);
            time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, Odd>(x * x)
        })
    }

    /// Sleeps, tracking how many calls are in flight at once.
    fn peak_tracker(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Invocable<u64, u64> {
        Invocable::future(move |x: u64| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Odd>(x)
            }
        })
    }

    #[tokio::test]
    async fn order_matches_input_under_random_delays() {
        let input: Vec<u64> = (0..40).collect();
        let expected: Vec<u64> = input.iter().map(|x| x * x).collect();

        for _ in 0..3 {
            let results = lcall(input.clone(), &random_sleeper(), &CallOptions::new())
                .await
                .unwrap();
            assert_eq!(results, expected);
        }
    }

    #[tokio::test]
    async fn pcall_order_under_random_delays() {
        let funcs: Vec<Invocable<(), u64>> = (0..20)
            .map(|i| {
                Invocable::future(move |()| async move {
                    let delay = rand::thread_rng().gen_range(0..20);
                    time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, Odd>(i)
                })
            })
            .collect();

        let results = pcall(funcs, &CallOptions::new()).await.unwrap();

        assert_eq!(results, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn max_concurrent_bounds_in_flight_items() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let options = CallOptions::builder().max_concurrent(3).build().unwrap();

        let results = lcall(0..12, &peak_tracker(active, peak.clone()), &options)
            .await
            .unwrap();

        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unbounded_without_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        lcall(0..8, &peak_tracker(active, peak.clone()), &CallOptions::new())
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn throttle_period_spaces_launches() {
        let period = Duration::from_millis(10);
        let starts = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&starts);
        let func = Invocable::future(move |x: u64| {
            record.lock().unwrap().push(Instant::now());
            async move { Ok::<_, Odd>(x) }
        });
        let options = CallOptions::builder().throttle_period(period).build().unwrap();

        lcall(0..5, &func, &options).await.unwrap();

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        for (i, start) in starts.iter().enumerate() {
            assert!(*start - starts[0] + Duration::from_millis(1) >= period * i as u32);
        }
    }

    #[tokio::test]
    async fn failing_item_does_not_cancel_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let func = Invocable::future(move |x: u64| {
            let counter = Arc::clone(&counter);
            async move {
                time::sleep(Duration::from_millis(x)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                if x % 2 == 1 {
                    Err(Odd(x))
                } else {
                    Ok(x)
                }
            }
        });

        let err = lcall(vec![6, 3, 8, 1], &func, &CallOptions::new())
            .await
            .unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 4);
        // lowest index failure, not the first to finish
        assert_eq!(err.downcast_ref::<Odd>().map(|odd| odd.0), Some(3));
    }

    #[tokio::test]
    async fn per_item_retry_and_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let func = Invocable::sync(move |x: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            if x == 2 {
                Err(Odd(x))
            } else {
                Ok(x)
            }
        });
        let options = CallOptions::builder()
            .num_retries(2)
            .retry_default(0)
            .verbose_retry(false)
            .build()
            .unwrap();

        assert_eq!(lcall(vec![1, 2, 3], &func, &options).await.unwrap(), vec![1, 0, 3]);
        // one attempt each for 1 and 3, three for 2
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn per_item_timeout_and_error_map() {
        let func = Invocable::future(|x: u64| async move {
            time::sleep(Duration::from_millis(x)).await;
            Ok::<_, Odd>(x)
        });
        let options = CallOptions::builder()
            .timeout(Duration::from_millis(50))
            .error_map(ErrorMap::new().on::<TimeoutError, _>(|_| u64::MAX))
            .build()
            .unwrap();

        let results = lcall(vec![1, 5_000, 2], &func, &options).await.unwrap();

        assert_eq!(results, vec![1, u64::MAX, 2]);
    }

    #[tokio::test]
    async fn shaping_json_results() {
        let func = Invocable::infallible(|x: i64| match x {
            0 => Value::Null,
            1 => json!([1, [2]]),
            _ => json!(x),
        });
        let options = CallOptions::builder()
            .flatten(true)
            .dropna(true)
            .unique(true)
            .build()
            .unwrap();

        let results = lcall(vec![1, 0, 2, 3], &func, &options).await.unwrap();

        assert_eq!(results, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn single_and_missing_input() {
        let func = Invocable::infallible(|x: u32| x + 1);
        let options = CallOptions::new();

        assert_eq!(lcall(Some(1), &func, &options).await.unwrap(), vec![2]);
        assert_eq!(lcall(None, &func, &options).await.unwrap(), Vec::<u32>::new());
    }

    #[tokio::test]
    async fn timed_results_keep_durations() {
        let func = Invocable::future(|x: u64| async move {
            time::sleep(Duration::from_millis(x)).await;
            Ok::<_, Odd>(if x == 0 { None } else { Some(x) })
        });
        let options = CallOptions::builder().dropna(true).build().unwrap();

        let results = lcall_timed(vec![20, 0, 5], &func, &options).await.unwrap();

        assert_eq!(
            results.iter().map(|(value, _)| *value).collect::<Vec<_>>(),
            vec![Some(20), Some(5)]
        );
        assert!(results[0].1 >= Duration::from_millis(20));
        assert!(results[1].1 >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn pcall_timed_pairs() {
        let funcs = vec![
            Invocable::infallible(|()| 1_u8),
            Invocable::future(|()| async {
                time::sleep(Duration::from_millis(10)).await;
                Ok::<_, Odd>(2_u8)
            }),
        ];

        let results = pcall_timed(funcs, &CallOptions::new()).await.unwrap();

        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 2);
        assert!(results[1].1 >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn initial_delay_applies_once() {
        let options = CallOptions::builder()
            .initial_delay(Duration::from_millis(30))
            .build()
            .unwrap();
        let func = Invocable::infallible(|x: u8| x);

        let started = std::time::Instant::now();
        lcall(0..10, &func, &options).await.unwrap();
        let took = started.elapsed();

        assert!(took >= Duration::from_millis(30));
        assert!(took < Duration::from_millis(300));
    }
}
