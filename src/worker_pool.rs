use std::{
    fmt::{self, Debug},
    panic::{self, AssertUnwindSafe},
};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{BoxError, CallError, WorkerPanic};

/// An explicitly owned thread pool for running blocking callables.
///
/// Share it with `Arc` and hand it to [`Invocable::on_pool()`](crate::Invocable::on_pool).
/// Threads are released when the last handle drops; jobs already submitted
/// still run to completion.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lioncall::{ucall, ErrorMap, Invocable, WorkerPool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), lioncall::CallError> {
/// let pool = Arc::new(WorkerPool::builder().num_threads(2).build()?);
///
/// let square = Invocable::infallible(|x: u64| x * x).on_pool(pool);
///
/// assert_eq!(ucall(&square, 12, &ErrorMap::new()).await?, 144);
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool {
    inner: rayon::ThreadPool,
}

impl WorkerPool {
    /// Initialize a builder to create a worker pool.
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::new()
    }

    /// Number of threads in this pool.
    pub fn num_threads(&self) -> usize {
        self.inner.current_num_threads()
    }

    /// Run `f` on a pool thread and wait for its result without blocking the
    /// async runtime.
    ///
    /// A panic inside `f` is caught and reported as [`WorkerPanic`].
    pub async fn execute<F, R>(&self, f: F) -> Result<R, BoxError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.inner.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            // receiver gone means the caller stopped waiting
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(Box::new(WorkerPanic::from_payload(payload))),
            Err(_) => Err(Box::new(WorkerPanic {
                message: "worker pool dropped the job".to_owned(),
            })),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        debug!(threads = self.num_threads(), "worker pool shutting down");
    }
}

impl Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

/// Use to build a [`WorkerPool`].
///
/// Created by [`WorkerPool::builder()`] API.
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolBuilder {
    num_threads: usize,
    thread_name: Option<String>,
}

impl WorkerPoolBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Set thread count, default value `0` lets the pool pick one per CPU.
    pub fn num_threads(&mut self, num_threads: usize) -> &mut Self {
        self.num_threads = num_threads;
        self
    }

    /// Set a name prefix for pool threads.
    pub fn thread_name(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.thread_name = Some(prefix.into());
        self
    }

    /// Start the pool with current configuration.
    pub fn build(&self) -> Result<WorkerPool, CallError> {
        let mut builder = rayon::ThreadPoolBuilder::new().num_threads(self.num_threads);

        if let Some(prefix) = self.thread_name.clone() {
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        let inner = builder.build()?;
        debug!(threads = inner.current_num_threads(), "worker pool started");

        Ok(WorkerPool { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_requested_thread_count() {
        let pool = WorkerPool::builder().num_threads(3).build().unwrap();

        assert_eq!(pool.num_threads(), 3);
    }

    #[tokio::test]
    async fn executes_on_named_thread() {
        let pool = WorkerPool::builder()
            .num_threads(1)
            .thread_name("lioncall-test")
            .build()
            .unwrap();

        let name = pool
            .execute(|| std::thread::current().name().map(str::to_owned))
            .await
            .unwrap();

        assert_eq!(name.as_deref(), Some("lioncall-test-0"));
    }

    #[tokio::test]
    async fn panic_becomes_worker_panic() {
        let pool = WorkerPool::builder().num_threads(1).build().unwrap();

        let err = pool
            .execute(|| -> u32 { panic!("exploded") })
            .await
            .unwrap_err();

        let panic = err.downcast_ref::<WorkerPanic>().unwrap();
        assert_eq!(panic.message, "exploded");
    }
}
