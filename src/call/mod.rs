//! Single-call primitives: [`ucall()`], [`tcall()`] and [`rcall()`].

use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::{
    error::{BoxError, CallError, TimeoutError},
    error_map::ErrorMap,
    invocable::Invocable,
    options::CallOptions,
};

mod retry;

pub use retry::{rcall, rcall_timed};
pub(crate) use retry::attempt_with_retries;

/// Invoke `func` once, recovering through `error_map`.
///
/// No timeout, no retry: this is the innermost primitive everything else is
/// built on. A failure that no entry of `error_map` handles is returned as
/// [`CallError::Invocation`] carrying the original error.
///
/// # Example
///
/// ```
/// use lioncall::{ucall, CallError, ErrorMap, Invocable};
///
/// #[derive(Debug)]
/// struct Overflow;
///
/// impl std::fmt::Display for Overflow {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("overflow")
///     }
/// }
///
/// impl std::error::Error for Overflow {}
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let double = Invocable::sync(|x: u8| x.checked_mul(2).ok_or(Overflow));
///
/// assert_eq!(ucall(&double, 21, &ErrorMap::new()).await.unwrap(), 42);
///
/// let err = ucall(&double, 200, &ErrorMap::new()).await.unwrap_err();
/// assert!(err.downcast_ref::<Overflow>().is_some());
///
/// let saturate = ErrorMap::new().on::<Overflow, _>(|_| u8::MAX);
/// assert_eq!(ucall(&double, 200, &saturate).await.unwrap(), 255);
/// # }
/// ```
pub async fn ucall<I, T>(func: &Invocable<I, T>, input: I, error_map: &ErrorMap<T>) -> Result<T, CallError>
where
    I: Send + 'static,
    T: Send + 'static,
{
    match func.call(input).await {
        Ok(value) => Ok(value),
        Err(failure) => error_map
            .dispatch(failure)
            .await
            .map_err(|failure| CallError::from_failure(failure, None)),
    }
}

/// [`ucall()`] for callers outside of any async runtime.
///
/// Starts a single-threaded runtime for the duration of the call. Calling it
/// from inside a runtime would block that runtime's thread, so it is refused
/// with [`CallError::Validation`]; `.await` [`ucall()`] there instead.
///
/// ```
/// use lioncall::{ucall_blocking, ErrorMap, Invocable};
///
/// let shout = Invocable::infallible(|s: String| s.to_uppercase());
///
/// assert_eq!(ucall_blocking(&shout, "hey".to_owned(), &ErrorMap::new()).unwrap(), "HEY");
/// ```
pub fn ucall_blocking<I, T>(func: &Invocable<I, T>, input: I, error_map: &ErrorMap<T>) -> Result<T, CallError>
where
    I: Send + 'static,
    T: Send + 'static,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(CallError::Validation(
            "ucall_blocking was called from inside an async runtime, await ucall instead".to_owned(),
        ));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CallError::Invocation {
            source: Box::new(err),
            context: Some("failed to start a runtime".to_owned()),
        })?;

    runtime.block_on(ucall(func, input, error_map))
}

/// Invoke `func` once under a timeout.
///
/// Reads `initial_delay`, `timeout`, `timeout_default`, `error_default`,
/// `error_msg` and the error map of `options`.
///
/// - On timeout: `timeout_default` if set, else the error map entry for
///   [`TimeoutError`], else [`CallError::Timeout`].
/// - On any other failure: `error_default` if set, else the error map, else
///   [`CallError::Invocation`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use lioncall::{tcall, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let slow = Invocable::future(|x: u64| async move {
///     tokio::time::sleep(Duration::from_millis(200)).await;
///     Ok::<_, std::io::Error>(x)
/// });
///
/// let options = CallOptions::builder()
///     .timeout(Duration::from_millis(10))
///     .timeout_default(0)
///     .build()
///     .unwrap();
///
/// assert_eq!(tcall(&slow, 7, &options).await.unwrap(), 0);
/// # }
/// ```
pub async fn tcall<I, T>(func: &Invocable<I, T>, input: I, options: &CallOptions<T>) -> Result<T, CallError>
where
    I: Send + 'static,
    T: Clone + Send + 'static,
{
    tcall_timed(func, input, options).await.map(|(value, _)| value)
}

/// [`tcall()`] that also reports how long the call took, initial delay included.
pub async fn tcall_timed<I, T>(
    func: &Invocable<I, T>,
    input: I,
    options: &CallOptions<T>,
) -> Result<(T, Duration), CallError>
where
    I: Send + 'static,
    T: Clone + Send + 'static,
{
    let config = &options.config;
    let start = Instant::now();

    if !config.initial_delay.is_zero() {
        time::sleep(config.initial_delay).await;
    }

    let failure = match invoke_with_timeout(func, input, config.timeout).await {
        Ok(value) => return Ok((value, start.elapsed())),
        Err(failure) => failure,
    };

    let fallback = if failure.is::<TimeoutError>() {
        debug!(function = func.name(), timeout = ?config.timeout, "call timed out");
        options.timeout_default.as_ref()
    } else {
        options.error_default.as_ref()
    };

    if let Some(value) = fallback {
        return Ok((value.clone(), start.elapsed()));
    }

    match options.error_map.dispatch(failure).await {
        Ok(value) => Ok((value, start.elapsed())),
        Err(failure) => Err(CallError::from_failure(failure, options.context())),
    }
}

/// One invocation, bounded by `timeout` when given.
///
/// A timeout comes back as a boxed [`TimeoutError`] so error maps can match it.
pub(crate) async fn invoke_with_timeout<I, T>(
    func: &Invocable<I, T>,
    input: I,
    timeout: Option<Duration>,
) -> Result<T, BoxError>
where
    I: Send + 'static,
    T: Send + 'static,
{
    match timeout {
        None => func.call(input).await,
        Some(after) => match time::timeout(after, func.call(input)).await {
            Ok(result) => result,
            Err(_) => Err(Box::new(TimeoutError { after })),
        },
    }
}
