use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::time::Duration;

use crate::{error::CallError, error_map::ErrorMap};

/// Upper bound accepted for `max_concurrent`.
const MAX_CONCURRENT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Plain-data call policy.
///
/// This is the part of [`CallOptions`] that can live in a configuration file.
/// Durations are written as (fractional) seconds:
///
/// ```
/// use std::time::Duration;
/// use lioncall::CallConfig;
///
/// let config = CallConfig::from_toml_str(r#"
///     num_retries = 3
///     retry_delay = 0.25
///     backoff_factor = 2.0
///     timeout = 5
///     max_concurrent = 8
/// "#).unwrap();
///
/// assert_eq!(config.num_retries, 3);
/// assert_eq!(config.retry_delay, Duration::from_millis(250));
/// assert_eq!(config.timeout, Some(Duration::from_secs(5)));
/// assert!(config.verbose_retry);
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallConfig {
    /// Extra attempts after the first one.
    pub num_retries: usize,
    /// Sleep once before the first attempt.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub initial_delay: Duration,
    /// Sleep between attempts, before any backoff.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub retry_delay: Duration,
    /// Multiplier applied to the retry delay after each failed attempt.
    pub backoff_factor: f64,
    /// Add up to 30% random jitter to each retry delay.
    pub jitter: bool,
    /// Per-attempt timeout.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub timeout: Option<Duration>,
    /// Emit a warning event for every retried failure.
    pub verbose_retry: bool,
    /// Attached as context to errors leaving the call.
    pub error_msg: Option<String>,
    /// Bound on in-flight items of a fan-out call.
    pub max_concurrent: Option<usize>,
    /// Minimum spacing between item launches of a fan-out call.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub throttle_period: Option<Duration>,
    /// Recursively flatten nested list results.
    pub flatten: bool,
    /// Drop null results.
    pub dropna: bool,
    /// Drop repeated results, keeping first occurrences.
    pub unique: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            num_retries: 0,
            initial_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: false,
            timeout: None,
            verbose_retry: true,
            error_msg: None,
            max_concurrent: None,
            throttle_period: None,
            flatten: false,
            dropna: false,
            unique: false,
        }
    }
}

impl CallConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, CallError> {
        let config: CallConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the type system cannot rule out.
    pub fn validate(&self) -> Result<(), CallError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(CallError::Validation(format!(
                "backoff_factor must be a finite, non-negative number, got {}",
                self.backoff_factor
            )));
        }

        match self.max_concurrent {
            Some(0) => Err(CallError::Validation(
                "max_concurrent must be at least 1".to_owned(),
            )),
            Some(limit) if limit > MAX_CONCURRENT => Err(CallError::Validation(format!(
                "max_concurrent must not exceed {}, got {}",
                MAX_CONCURRENT, limit
            ))),
            _ => Ok(()),
        }
    }
}

/// Everything an orchestrated call needs to know besides the function and its input.
///
/// Wraps a [`CallConfig`] together with the typed parts: fallback values and
/// the [`ErrorMap`]. Which fields a call reads depends on the call:
///
/// - [`tcall()`](crate::tcall) uses `initial_delay`, `timeout`, `timeout_default`,
///   `error_default`, `error_msg` and the error map.
/// - [`rcall()`](crate::rcall) and the fan-out calls use the retry fields,
///   `timeout`, `retry_default`, `error_msg` and the error map; fan-out calls
///   also use `max_concurrent`, `throttle_period` and the list shaping flags.
#[derive(Debug)]
pub struct CallOptions<T> {
    pub(crate) config: CallConfig,
    pub(crate) retry_default: Option<T>,
    pub(crate) timeout_default: Option<T>,
    pub(crate) error_default: Option<T>,
    pub(crate) error_map: ErrorMap<T>,
}

impl<T> CallOptions<T>
where
    T: Send + 'static,
{
    /// Initialize a builder to create call options.
    pub fn builder() -> CallOptionsBuilder<T> {
        CallOptionsBuilder::new()
    }

    /// Options with every default: one attempt, no timeout, nothing handled.
    pub fn new() -> Self {
        Self {
            config: CallConfig::default(),
            retry_default: None,
            timeout_default: None,
            error_default: None,
            error_map: ErrorMap::new(),
        }
    }

    /// Options carrying `config` and nothing else.
    pub fn from_config(config: CallConfig) -> Result<Self, CallError> {
        config.validate()?;

        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn error_map(&self) -> &ErrorMap<T> {
        &self.error_map
    }

    pub(crate) fn context(&self) -> Option<String> {
        self.config.error_msg.clone()
    }
}

impl<T> Default for CallOptions<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for CallOptions<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retry_default: self.retry_default.clone(),
            timeout_default: self.timeout_default.clone(),
            error_default: self.error_default.clone(),
            error_map: self.error_map.clone(),
        }
    }
}

/// Use to build [`CallOptions`].
///
/// Created by [`CallOptions::builder()`] API.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use lioncall::CallOptions;
///
/// let options: CallOptions<u32> = CallOptions::builder()
///     .num_retries(2)
///     .retry_delay(Duration::from_millis(10))
///     .backoff_factor(2.0)
///     .retry_default(0)
///     .build()
///     .unwrap();
///
/// assert_eq!(options.config().num_retries, 2);
///
/// // invalid values are refused before any call is made
/// assert!(CallOptions::<u32>::builder().max_concurrent(0).build().is_err());
/// ```
#[derive(Debug)]
pub struct CallOptionsBuilder<T> {
    config: CallConfig,
    retry_default: Option<T>,
    timeout_default: Option<T>,
    error_default: Option<T>,
    error_map: Option<ErrorMap<T>>,
}

impl<T> CallOptionsBuilder<T>
where
    T: Send + 'static,
{
    fn new() -> Self {
        Self {
            config: CallConfig::default(),
            retry_default: None,
            timeout_default: None,
            error_default: None,
            error_map: None,
        }
    }

    /// Replace every plain-data setting at once.
    pub fn config(&mut self, config: CallConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn num_retries(&mut self, num_retries: usize) -> &mut Self {
        self.config.num_retries = num_retries;
        self
    }

    pub fn initial_delay(&mut self, delay: Duration) -> &mut Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn retry_delay(&mut self, delay: Duration) -> &mut Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn backoff_factor(&mut self, factor: f64) -> &mut Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn jitter(&mut self, jitter: bool) -> &mut Self {
        self.config.jitter = jitter;
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn verbose_retry(&mut self, verbose: bool) -> &mut Self {
        self.config.verbose_retry = verbose;
        self
    }

    pub fn error_msg(&mut self, msg: impl Into<String>) -> &mut Self {
        self.config.error_msg = Some(msg.into());
        self
    }

    pub fn max_concurrent(&mut self, limit: usize) -> &mut Self {
        self.config.max_concurrent = Some(limit);
        self
    }

    pub fn throttle_period(&mut self, period: Duration) -> &mut Self {
        self.config.throttle_period = Some(period);
        self
    }

    pub fn flatten(&mut self, flatten: bool) -> &mut Self {
        self.config.flatten = flatten;
        self
    }

    pub fn dropna(&mut self, dropna: bool) -> &mut Self {
        self.config.dropna = dropna;
        self
    }

    pub fn unique(&mut self, unique: bool) -> &mut Self {
        self.config.unique = unique;
        self
    }

    /// Value returned once a retrying call has used up its attempts.
    pub fn retry_default(&mut self, value: T) -> &mut Self {
        self.retry_default = Some(value);
        self
    }

    /// Value [`tcall()`](crate::tcall) returns when the timeout elapses.
    ///
    /// [`rcall()`](crate::rcall) and the fan-out calls ignore it; a timed out
    /// attempt there is retried like any other failure.
    pub fn timeout_default(&mut self, value: T) -> &mut Self {
        self.timeout_default = Some(value);
        self
    }

    /// Value [`tcall()`](crate::tcall) returns when the callable fails.
    ///
    /// [`rcall()`](crate::rcall) and the fan-out calls ignore it, use
    /// [`retry_default()`](Self::retry_default) there.
    pub fn error_default(&mut self, value: T) -> &mut Self {
        self.error_default = Some(value);
        self
    }

    pub fn error_map(&mut self, error_map: ErrorMap<T>) -> &mut Self {
        self.error_map = Some(error_map);
        self
    }

    /// Create [`CallOptions`] with current configuration.
    ///
    /// Typed settings move into the result, so the builder is left holding
    /// only its plain-data configuration.
    pub fn build(&mut self) -> Result<CallOptions<T>, CallError> {
        self.config.validate()?;

        Ok(CallOptions {
            config: self.config.clone(),
            retry_default: self.retry_default.take(),
            timeout_default: self.timeout_default.take(),
            error_default: self.error_default.take(),
            error_map: self.error_map.take().unwrap_or_default(),
        })
    }
}
