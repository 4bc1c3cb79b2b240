use std::{
    error::Error as StdError,
    fmt::{self, Display},
    time::Duration,
};
use thiserror::Error;

/// Type-erased error produced by a user callable.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T, E = CallError> = std::result::Result<T, E>;

/// Failure of an orchestrated call.
///
/// The error a user function raised is never rewritten: it stays reachable
/// through [`CallError::downcast_ref()`], while a caller supplied `error_msg`
/// travels along as [`context`](CallError::context).
#[derive(Debug, Error)]
pub enum CallError {
    /// The per-call timeout elapsed before the callable finished.
    #[error("{}timeout of {:?} exceeded", prefix(.context), .after)]
    Timeout {
        after: Duration,
        context: Option<String>,
    },

    /// The callable itself failed.
    #[error("{}{}", prefix(.context), .source)]
    Invocation {
        source: BoxError,
        context: Option<String>,
    },

    /// Every attempt of a retrying call failed.
    #[error("{}operation failed after {} attempts: {}", prefix(.context), .attempts, .last)]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<CallError>,
        context: Option<String>,
    },

    /// Malformed call configuration, reported before any work is scheduled.
    #[error("invalid call configuration: {0}")]
    Validation(String),

    /// Configuration text could not be parsed.
    #[error("failed to parse call configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A [`WorkerPool`](crate::WorkerPool) could not be started.
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

fn prefix(context: &Option<String>) -> String {
    match context {
        Some(msg) if !msg.is_empty() => format!("{}: ", msg),
        _ => String::new(),
    }
}

impl CallError {
    /// Build the error for a failed invocation, keeping timeouts distinguishable.
    pub(crate) fn from_failure(failure: BoxError, context: Option<String>) -> Self {
        match failure.downcast::<TimeoutError>() {
            Ok(timeout) => CallError::Timeout {
                after: timeout.after,
                context,
            },
            Err(source) => CallError::Invocation { source, context },
        }
    }

    /// Look up the original error raised by the user callable.
    ///
    /// Walks through [`Exhausted`](CallError::Exhausted) wrappers, so callers can
    /// always match on the concrete error type their function produced.
    ///
    /// ```
    /// use lioncall::{CallError, BoxError};
    ///
    /// let source: BoxError = Box::new(std::fmt::Error);
    /// let err = CallError::Exhausted {
    ///     attempts: 3,
    ///     last: Box::new(CallError::Invocation { source, context: None }),
    ///     context: None,
    /// };
    ///
    /// assert!(err.downcast_ref::<std::fmt::Error>().is_some());
    /// assert_eq!(err.attempts(), Some(3));
    /// ```
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            CallError::Invocation { source, .. } => {
                let mut current: &(dyn StdError + 'static) = source.as_ref();
                loop {
                    if let Some(found) = current.downcast_ref::<E>() {
                        return Some(found);
                    }
                    // composed calls nest one CallError inside another
                    if let Some(inner) = current.downcast_ref::<CallError>() {
                        return inner.downcast_ref::<E>();
                    }
                    current = current.source()?;
                }
            }
            CallError::Exhausted { last, .. } => last.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Whether the (last) failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            CallError::Timeout { .. } => true,
            CallError::Exhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// How many attempts were made, for errors produced by a retrying call.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            CallError::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The caller supplied message attached to this error, if any.
    pub fn context(&self) -> Option<&str> {
        match self {
            CallError::Timeout { context, .. }
            | CallError::Invocation { context, .. }
            | CallError::Exhausted { context, .. } => context.as_deref(),
            _ => None,
        }
    }
}

/// Raised when a timed call runs past its timeout.
///
/// Register it in an [`ErrorMap`](crate::ErrorMap) to recover from timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError {
    pub after: Duration,
}

impl Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timeout of {:?} exceeded", self.after)
    }
}

impl StdError for TimeoutError {}

/// A synchronous callable panicked on its worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPanic {
    pub message: String,
}

impl WorkerPanic {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked".to_owned()
        };

        Self { message }
    }
}

impl Display for WorkerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker panicked: {}", self.message)
    }
}

impl StdError for WorkerPanic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    impl StdError for Boom {}

    #[test]
    fn timeout_failure_maps_to_timeout_variant() {
        let failure: BoxError = Box::new(TimeoutError {
            after: Duration::from_millis(5),
        });
        let err = CallError::from_failure(failure, Some("fetch".into()));

        assert!(err.is_timeout());
        assert_eq!(err.context(), Some("fetch"));
        assert_eq!(err.to_string(), "fetch: timeout of 5ms exceeded");
    }

    #[test]
    fn invocation_keeps_original_type() {
        let err = CallError::from_failure(Box::new(Boom), Some("load".into()));

        assert!(!err.is_timeout());
        assert_eq!(err.downcast_ref::<Boom>(), Some(&Boom));
        assert_eq!(err.to_string(), "load: boom");
    }

    #[test]
    fn exhausted_reaches_through_to_source() {
        let err = CallError::Exhausted {
            attempts: 4,
            last: Box::new(CallError::from_failure(Box::new(Boom), None)),
            context: None,
        };

        assert_eq!(err.attempts(), Some(4));
        assert_eq!(err.downcast_ref::<Boom>(), Some(&Boom));
        assert_eq!(err.to_string(), "operation failed after 4 attempts: boom");
        assert!(err.source().is_some());
    }

    #[test]
    fn nested_call_error_is_searched() {
        let inner: BoxError = Box::new(CallError::from_failure(Box::new(Boom), None));
        let outer = CallError::from_failure(inner, Some("compose".into()));

        assert_eq!(outer.downcast_ref::<Boom>(), Some(&Boom));
    }

    #[test]
    fn panic_payload_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("bad input");
        assert_eq!(WorkerPanic::from_payload(payload).message, "bad input");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(WorkerPanic::from_payload(payload).message, "worker panicked");
    }
}
