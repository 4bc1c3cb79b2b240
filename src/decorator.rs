use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;

use crate::{
    call::rcall,
    error::{BoxError, CallError},
    invocable::Invocable,
    options::CallOptions,
    throttle::Throttle,
};

/// Wrappers adding call policy to an [`Invocable`].
///
/// Every wrapper returns a new async [`Invocable`] with the same name as the
/// one it wraps, so wrappers stack:
///
/// ```
/// use std::time::Duration;
/// use lioncall::{ucall, CallDecorator, CallOptions, ErrorMap, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let fetch = Invocable::infallible(|id: u32| format!("item {}", id)).named("fetch");
///
/// let fetch = CallDecorator::throttle(fetch, Duration::from_millis(5));
/// let fetch = CallDecorator::max_concurrent(fetch, 4).unwrap();
/// let fetch = CallDecorator::retry(fetch, CallOptions::builder().num_retries(2).build().unwrap());
///
/// assert_eq!(fetch.name(), "fetch");
/// assert_eq!(ucall(&fetch, 1, &ErrorMap::new()).await.unwrap(), "item 1");
/// # }
/// ```
#[derive(Debug)]
pub struct CallDecorator;

impl CallDecorator {
    /// Every call goes through [`rcall()`](crate::rcall) with `options`.
    pub fn retry<I, T>(func: Invocable<I, T>, options: CallOptions<T>) -> Invocable<I, T>
    where
        I: Clone + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let name = func.name().to_owned();
        let options = Arc::new(options);

        Invocable::future(move |input: I| {
            let func = func.clone();
            let options = Arc::clone(&options);
            async move { rcall(&func, input, &options).await }
        })
        .named(name)
    }

    /// Calls through the result start at least `period` apart.
    ///
    /// The wrapped function runs exactly once per call, after the throttle
    /// admitted it.
    pub fn throttle<I, T>(func: Invocable<I, T>, period: Duration) -> Invocable<I, T>
    where
        I: Send + 'static,
        T: Send + 'static,
    {
        let name = func.name().to_owned();
        let throttle = Arc::new(Throttle::new(period));

        Invocable::future(move |input: I| {
            let func = func.clone();
            let throttle = Arc::clone(&throttle);
            async move {
                throttle.tick().await;
                func.call(input).await
            }
        })
        .named(name)
    }

    /// At most `limit` calls through the result run at the same time.
    ///
    /// Return `Err` if `limit` is zero or too large for a semaphore.
    pub fn max_concurrent<I, T>(func: Invocable<I, T>, limit: usize) -> Result<Invocable<I, T>, CallError>
    where
        I: Send + 'static,
        T: Send + 'static,
    {
        if limit == 0 || limit > Semaphore::MAX_PERMITS {
            return Err(CallError::Validation(format!(
                "concurrency limit must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                limit
            )));
        }

        let name = func.name().to_owned();
        let semaphore = Arc::new(Semaphore::new(limit));

        Ok(Invocable::future(move |input: I| {
            let func = func.clone();
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(err) => return Err(Box::new(err) as BoxError),
                };
                func.call(input).await
            }
        })
        .named(name))
    }

    /// Feed the result of `func` through every function of `then`, in order.
    ///
    /// A failure in one of the chained functions is reported as
    /// [`CallError::Invocation`] naming that function.
    ///
    /// ```
    /// use lioncall::{ucall, CallDecorator, ErrorMap, Invocable};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let base = Invocable::infallible(|x: i32| x);
    /// let double = Invocable::infallible(|x: i32| x * 2);
    /// let add_one = Invocable::infallible(|x: i32| x + 1);
    ///
    /// let composed = CallDecorator::compose(base, vec![double, add_one]);
    ///
    /// assert_eq!(ucall(&composed, 5, &ErrorMap::new()).await.unwrap(), 11);
    /// # }
    /// ```
    pub fn compose<I, T>(func: Invocable<I, T>, then: Vec<Invocable<T, T>>) -> Invocable<I, T>
    where
        I: Send + 'static,
        T: Send + 'static,
    {
        let name = func.name().to_owned();
        let then = Arc::new(then);

        Invocable::future(move |input: I| {
            let func = func.clone();
            let then = Arc::clone(&then);
            async move {
                let mut value = func.call(input).await?;

                for step in then.iter() {
                    value = match step.call(value).await {
                        Ok(value) => value,
                        Err(source) => {
                            return Err(Box::new(CallError::Invocation {
                                source,
                                context: Some(format!("error in function {}", step.name())),
                            }) as BoxError)
                        }
                    };
                }

                Ok::<T, BoxError>(value)
            }
        })
        .named(name)
    }

    /// Run `pre` over every argument before calling `func`, and `post` over
    /// its result.
    ///
    /// The arguments are processed one after another, in order.
    ///
    /// ```
    /// use lioncall::{ucall, CallDecorator, ErrorMap, Invocable};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let sum = Invocable::infallible(|args: Vec<i64>| args.iter().sum::<i64>());
    /// let validate = Invocable::sync(|x: i64| if x < 0 { Err("negative") } else { Ok(x) });
    /// let format = Invocable::infallible(|x: i64| x * 100);
    ///
    /// let wrapped = CallDecorator::pre_post_process(sum, Some(validate), Some(format));
    ///
    /// assert_eq!(ucall(&wrapped, vec![1, 2], &ErrorMap::new()).await.unwrap(), 300);
    /// assert!(ucall(&wrapped, vec![1, -2], &ErrorMap::new()).await.is_err());
    /// # }
    /// ```
    pub fn pre_post_process<A, T>(
        func: Invocable<Vec<A>, T>,
        pre: Option<Invocable<A, A>>,
        post: Option<Invocable<T, T>>,
    ) -> Invocable<Vec<A>, T>
    where
        A: Send + 'static,
        T: Send + 'static,
    {
        let name = func.name().to_owned();

        Invocable::future(move |args: Vec<A>| {
            let func = func.clone();
            let pre = pre.clone();
            let post = post.clone();
            async move {
                let args = match pre {
                    Some(pre) => {
                        let mut processed = Vec::with_capacity(args.len());
                        for arg in args {
                            processed.push(pre.call(arg).await?);
                        }
                        processed
                    }
                    None => args,
                };

                let result = func.call(args).await?;

                match post {
                    Some(post) => post.call(result).await,
                    None => Ok(result),
                }
            }
        })
        .named(name)
    }

    /// Apply `f` to every element of the list `func` returns.
    ///
    /// ```
    /// use lioncall::{ucall, CallDecorator, ErrorMap, Invocable};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let names = Invocable::infallible(|()| vec!["alice", "bob"]);
    ///
    /// let upper = CallDecorator::map(names, str::to_uppercase);
    ///
    /// assert_eq!(ucall(&upper, (), &ErrorMap::new()).await.unwrap(), vec!["ALICE", "BOB"]);
    /// # }
    /// ```
    pub fn map<I, U, V, F>(func: Invocable<I, Vec<U>>, f: F) -> Invocable<I, Vec<V>>
    where
        I: Send + 'static,
        U: Send + 'static,
        V: Send + 'static,
        F: Fn(U) -> V + Send + Sync + 'static,
    {
        let name = func.name().to_owned();
        let f = Arc::new(f);

        Invocable::future(move |input: I| {
            let func = func.clone();
            let f = Arc::clone(&f);
            async move {
                let values = func.call(input).await?;
                Ok::<_, BoxError>(values.into_iter().map(|value| f(value)).collect())
            }
        })
        .named(name)
    }
}
