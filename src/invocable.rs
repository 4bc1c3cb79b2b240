use futures::future::{BoxFuture, FutureExt};
use std::{
    borrow::Cow,
    convert::Infallible,
    fmt::{self, Debug},
    future::Future,
    sync::Arc,
};

use crate::{
    error::{BoxError, WorkerPanic},
    worker_pool::WorkerPool,
};

type SyncFn<I, T> = dyn Fn(I) -> Result<T, BoxError> + Send + Sync + 'static;
type AsyncFn<I, T> = dyn Fn(I) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync + 'static;

/// Where a blocking callable runs.
#[derive(Debug, Clone, Default)]
pub enum Executor {
    /// The blocking thread pool owned by the surrounding tokio runtime.
    #[default]
    Blocking,
    /// A caller owned [`WorkerPool`].
    Pool(Arc<WorkerPool>),
}

enum Kind<I, T> {
    Sync {
        func: Arc<SyncFn<I, T>>,
        executor: Executor,
    },
    Async(Arc<AsyncFn<I, T>>),
}

/// A callable with one input, either blocking or async.
///
/// Which variant a callable is gets decided once when it is wrapped; every
/// invocation then goes through [`call()`](Self::call), which always returns
/// a future. Blocking functions are moved off the async runtime onto their
/// [`Executor`].
///
/// Functions needing several arguments take a tuple (or a `Vec` for a list of
/// positional arguments, see [`CallDecorator::pre_post_process()`](crate::CallDecorator::pre_post_process)).
///
/// Cloning is cheap: clones share the wrapped function.
pub struct Invocable<I, T> {
    name: Cow<'static, str>,
    kind: Kind<I, T>,
}

impl<I, T> Invocable<I, T>
where
    I: Send + 'static,
    T: Send + 'static,
{
    /// Wrap a blocking, fallible function.
    pub fn sync<F, E>(f: F) -> Self
    where
        F: Fn(I) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            name: Cow::Borrowed(std::any::type_name::<F>()),
            kind: Kind::Sync {
                func: Arc::new(move |input: I| -> Result<T, BoxError> {
                    f(input).map_err(Into::into)
                }),
                executor: Executor::default(),
            },
        }
    }

    /// Wrap a blocking function that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(I) -> T + Send + Sync + 'static,
    {
        let mut invocable = Self::sync(move |input| Ok::<_, Infallible>(f(input)));
        invocable.name = Cow::Borrowed(std::any::type_name::<F>());
        invocable
    }

    /// Wrap an async, fallible function.
    pub fn future<F, Fut, E>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            name: Cow::Borrowed(std::any::type_name::<F>()),
            kind: Kind::Async(Arc::new(
                move |input: I| -> BoxFuture<'static, Result<T, BoxError>> {
                    f(input)
                        .map(|result| -> Result<T, BoxError> { result.map_err(Into::into) })
                        .boxed()
                },
            )),
        }
    }

    /// Set the name used in logs and error context.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Run this callable on `pool` if it is a blocking one.
    ///
    /// Async callables are left untouched.
    pub fn on_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        if let Kind::Sync { executor, .. } = &mut self.kind {
            *executor = Executor::Pool(pool);
        }
        self
    }

    /// Name of the wrapped function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this callable is async (no executor involved).
    pub fn is_async(&self) -> bool {
        matches!(self.kind, Kind::Async(_))
    }

    /// Invoke with `input`.
    ///
    /// For a blocking callable this must be polled inside a tokio runtime when
    /// using the default [`Executor::Blocking`].
    pub fn call(&self, input: I) -> BoxFuture<'static, Result<T, BoxError>> {
        match &self.kind {
            Kind::Async(func) => func(input),
            Kind::Sync { func, executor } => {
                let func = Arc::clone(func);

                match executor {
                    Executor::Blocking => async move {
                        match tokio::task::spawn_blocking(move || func(input)).await {
                            Ok(result) => result,
                            Err(join_err) => Err(join_error(join_err)),
                        }
                    }
                    .boxed(),
                    Executor::Pool(pool) => {
                        let pool = Arc::clone(pool);
                        async move { pool.execute(move || func(input)).await.and_then(|result| result) }
                            .boxed()
                    }
                }
            }
        }
    }
}

fn join_error(err: tokio::task::JoinError) -> BoxError {
    if err.is_panic() {
        Box::new(WorkerPanic::from_payload(err.into_panic()))
    } else {
        Box::new(WorkerPanic {
            message: "blocking task was cancelled".to_owned(),
        })
    }
}

impl<I, T> Clone for Invocable<I, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: match &self.kind {
                Kind::Sync { func, executor } => Kind::Sync {
                    func: Arc::clone(func),
                    executor: executor.clone(),
                },
                Kind::Async(func) => Kind::Async(Arc::clone(func)),
            },
        }
    }
}

impl<I, T> Debug for Invocable<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Invocable");
        debug.field("name", &self.name);

        match &self.kind {
            Kind::Sync { executor, .. } => debug.field("kind", &"sync").field("executor", executor),
            Kind::Async(_) => debug.field("kind", &"async"),
        };

        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_runs_off_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let f = Invocable::infallible(move |_: ()| std::thread::current().id() != runtime_thread);

        assert!(!f.is_async());
        assert!(f.call(()).await.unwrap());
    }

    #[tokio::test]
    async fn future_variant_converts_error() {
        let f = Invocable::future(|x: i32| async move {
            if x < 0 {
                Err("negative")
            } else {
                Ok(x * 2)
            }
        });

        assert!(f.is_async());
        assert_eq!(f.call(4).await.unwrap(), 8);
        assert_eq!(f.call(-1).await.unwrap_err().to_string(), "negative");
    }

    #[tokio::test]
    async fn sync_panic_is_reported() {
        let f = Invocable::infallible(|_: ()| -> u8 { panic!("nope") });

        let err = f.call(()).await.unwrap_err();

        assert_eq!(err.downcast_ref::<WorkerPanic>().unwrap().message, "nope");
    }

    #[tokio::test]
    async fn pool_executor_is_used() {
        let pool = Arc::new(
            WorkerPool::builder()
                .num_threads(1)
                .thread_name("inv")
                .build()
                .unwrap(),
        );
        let f = Invocable::infallible(|_: ()| std::thread::current().name().map(str::to_owned))
            .on_pool(pool)
            .named("thread-name");

        assert_eq!(f.name(), "thread-name");
        assert_eq!(f.call(()).await.unwrap().as_deref(), Some("inv-0"));
    }

    #[test]
    fn debug_shows_kind() {
        let f = Invocable::infallible(|x: u8| x).named("id");

        assert_eq!(
            format!("{:?}", f),
            "Invocable { name: \"id\", kind: \"sync\", executor: Blocking }"
        );
    }
}
