//! Call orchestration for async code: timeouts, retries, throttling and
//! bounded fan-out over plain or async functions.
//!
//! # Concepts
//!
//! Any function taking one input becomes an [`Invocable`], either a blocking
//! one (moved off the runtime onto an [`Executor`]) or an async one. The call
//! functions then layer policy on top of it, each built from the one below:
//!
//! ```text
//! mcall / bcall
//!  |
//!  +-- lcall (alcall), pcall     fan-out: concurrency bound, launch throttle, ordering
//!       |
//!       +-- rcall                retries with backoff, retry default
//!            |
//!            +-- tcall           timeout, timeout / error defaults
//!                 |
//!                 +-- ucall      one invocation, error map
//! ```
//!
//! The policy itself is a [`CallOptions`]: a plain-data [`CallConfig`] (which
//! can be loaded from TOML) plus typed fallback values and an [`ErrorMap`].
//!
//! Failures keep their original type: a [`CallError`] carries the error the
//! function produced, reachable through [`CallError::downcast_ref()`], with
//! the caller's `error_msg` attached as context.
//!
//! Nothing here spawns tasks of its own. Fan-out calls poll their items
//! concurrently inside the calling task; only blocking functions go to a
//! thread pool.
//!
//! Retries are reported through [`tracing`] as `WARN` events. The crate never
//! installs a subscriber.
//!
//!
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use lioncall::{lcall, CallOptions, Invocable};
//!
//! #[derive(Debug)]
//! struct Unavailable;
//!
//! impl std::fmt::Display for Unavailable {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("service unavailable")
//!     }
//! }
//!
//! impl std::error::Error for Unavailable {}
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // pretend 13 is a page that keeps failing
//! let fetch = Invocable::future(|page: u32| async move {
//!     tokio::time::sleep(Duration::from_millis(u64::from(page % 3))).await;
//!     if page == 13 {
//!         Err(Unavailable)
//!     } else {
//!         Ok(format!("page {}", page))
//!     }
//! })
//! .named("fetch");
//!
//! let options = CallOptions::builder()
//!     .num_retries(2)
//!     .retry_delay(Duration::from_millis(1))
//!     .backoff_factor(2.0)
//!     .timeout(Duration::from_secs(1))
//!     .max_concurrent(4)
//!     .throttle_period(Duration::from_millis(2))
//!     .verbose_retry(false)
//!     .retry_default("missing".to_owned())
//!     .build()
//!     .unwrap();
//!
//! let pages = lcall(vec![11, 12, 13, 14], &fetch, &options).await.unwrap();
//!
//! assert_eq!(pages, vec!["page 11", "page 12", "missing", "page 14"]);
//! # }
//! ```

mod backoff;
mod call;
mod decorator;
mod error;
mod error_map;
mod fanout;
mod invocable;
mod options;
mod throttle;
mod to_list;
mod worker_pool;

#[doc(inline)]
pub use call::{rcall, rcall_timed, tcall, tcall_timed, ucall, ucall_blocking};

#[doc(inline)]
pub use decorator::CallDecorator;

#[doc(inline)]
pub use error::{BoxError, CallError, Result, TimeoutError, WorkerPanic};

#[doc(inline)]
pub use error_map::ErrorMap;

#[doc(inline)]
pub use fanout::{
    bcall, bcall_timed, lcall, lcall as alcall, lcall_timed, mcall, mcall_explode, mcall_explode_timed, pcall,
    pcall_timed,
};

#[doc(inline)]
pub use invocable::{Executor, Invocable};

#[doc(inline)]
pub use options::{CallConfig, CallOptions, CallOptionsBuilder};

#[doc(inline)]
pub use throttle::{Throttle, ThrottleBuilder};

#[doc(inline)]
pub use to_list::{to_list, Listable, ToList};

#[doc(inline)]
pub use worker_pool::{WorkerPool, WorkerPoolBuilder};
