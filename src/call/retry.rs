use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use super::invoke_with_timeout;
use crate::{
    backoff::Backoff,
    error::{BoxError, CallError},
    invocable::Invocable,
    options::CallOptions,
};

/// Invoke `func` with retries.
///
/// Sleeps `initial_delay` once, then makes up to `num_retries + 1` attempts,
/// each one bounded by `timeout`. Between attempts it sleeps `retry_delay`,
/// multiplied by `backoff_factor` after every failure.
///
/// ```text
/// initial_delay  attempt 1      delay     attempt 2        delay * factor   attempt 3
/// |-----------|  |f() fails|  |------|  |f() fails|  |------------|  |f() ok|
///
/// time pass ----->
/// ```
///
/// A failure whose type is registered in the error map ends the call right
/// away with the handler's value. Once every attempt has failed the call
/// returns `retry_default` if set, else [`CallError::Exhausted`] wrapping the
/// last failure.
///
/// Every retried failure emits a `WARN` event when `verbose_retry` is set.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use lioncall::{rcall, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
///
/// // fails twice, then succeeds
/// let flaky = Invocable::future(move |x: u32| {
///     let n = counter.fetch_add(1, Ordering::SeqCst);
///     async move {
///         if n < 2 {
///             Err(std::io::Error::new(std::io::ErrorKind::Other, "not yet"))
///         } else {
///             Ok(x * 10)
///         }
///     }
/// });
///
/// let options = CallOptions::builder().num_retries(3).build().unwrap();
///
/// assert_eq!(rcall(&flaky, 4, &options).await.unwrap(), 40);
/// assert_eq!(calls.load(Ordering::SeqCst), 3);
/// # }
/// ```
pub async fn rcall<I, T>(func: &Invocable<I, T>, input: I, options: &CallOptions<T>) -> Result<T, CallError>
where
    I: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    rcall_timed(func, input, options).await.map(|(value, _)| value)
}

/// [`rcall()`] that also reports how long the successful attempt took.
///
/// When the value comes from `retry_default` or an error map handler, the
/// duration covers the whole call after the initial delay.
pub async fn rcall_timed<I, T>(
    func: &Invocable<I, T>,
    input: I,
    options: &CallOptions<T>,
) -> Result<(T, Duration), CallError>
where
    I: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    let initial_delay = options.config.initial_delay;
    if !initial_delay.is_zero() {
        time::sleep(initial_delay).await;
    }

    attempt_with_retries(func, input, options).await
}

/// The retry loop shared by [`rcall()`] and every fan-out call.
///
/// Does not sleep `initial_delay`; callers decide where that happens.
pub(crate) async fn attempt_with_retries<I, T>(
    func: &Invocable<I, T>,
    input: I,
    options: &CallOptions<T>,
) -> Result<(T, Duration), CallError>
where
    I: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    let config = &options.config;
    let call_start = Instant::now();

    if config.num_retries == 0 {
        let started = Instant::now();
        let failure = match invoke_with_timeout(func, input, config.timeout).await {
            Ok(value) => return Ok((value, started.elapsed())),
            Err(failure) => failure,
        };

        return match options.error_map.dispatch(failure).await {
            Ok(value) => Ok((value, call_start.elapsed())),
            Err(failure) => give_up(func, failure, 1, options, call_start),
        };
    }

    let max_attempts = config.num_retries.saturating_add(1);
    let mut delays = Backoff::from_config(config);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let attempt_input = input.clone();
        let started = Instant::now();
        let failure = match invoke_with_timeout(func, attempt_input, config.timeout).await {
            Ok(value) => return Ok((value, started.elapsed())),
            Err(failure) => failure,
        };

        let failure = match options.error_map.dispatch(failure).await {
            Ok(value) => return Ok((value, call_start.elapsed())),
            Err(failure) => failure,
        };

        if attempt >= max_attempts {
            return give_up(func, failure, attempt, options, call_start);
        }

        let delay = delays.next().unwrap_or_default();

        if config.verbose_retry {
            warn!(
                function = func.name(),
                attempt,
                max_attempts,
                ?delay,
                error = %failure,
                "{}attempt failed, retrying",
                config.error_msg.as_deref().map(|msg| format!("{}: ", msg)).unwrap_or_default(),
            );
        }

        if !delay.is_zero() {
            time::sleep(delay).await;
        }
    }
}

fn give_up<I, T>(
    func: &Invocable<I, T>,
    failure: BoxError,
    attempts: usize,
    options: &CallOptions<T>,
    call_start: Instant,
) -> Result<(T, Duration), CallError>
where
    I: Send + 'static,
    T: Clone + Send + 'static,
{
    debug!(function = func.name(), attempts, error = %failure, "giving up");

    match &options.retry_default {
        Some(value) => Ok((value.clone(), call_start.elapsed())),
        None => Err(CallError::Exhausted {
            attempts,
            last: Box::new(CallError::from_failure(failure, None)),
            context: options.context(),
        }),
    }
}
