use futures::future::{BoxFuture, FutureExt};
use std::{
    any::type_name,
    error::Error as StdError,
    fmt::{self, Debug},
    future::Future,
    sync::Arc,
};

use crate::error::BoxError;

type Matcher = fn(&(dyn StdError + Send + Sync + 'static)) -> bool;
/// Gives the error back when it is not of the handled type.
type HandlerFn<T> = dyn Fn(BoxError) -> Result<BoxFuture<'static, T>, BoxError> + Send + Sync + 'static;

struct Entry<T> {
    type_name: &'static str,
    matches: Matcher,
    handler: Arc<HandlerFn<T>>,
}

/// Recovery handlers keyed by error type.
///
/// When a call fails, the entries are checked in registration order and the
/// first one whose type equals the concrete error type handles it. The value
/// the handler returns becomes the result of the call.
///
/// # Example
///
/// ```
/// use lioncall::{ucall, ErrorMap, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let parse = Invocable::sync(|s: &'static str| s.parse::<i64>());
///
/// let error_map = ErrorMap::new().on::<std::num::ParseIntError, _>(|_| -1);
///
/// assert_eq!(ucall(&parse, "42", &error_map).await.unwrap(), 42);
/// assert_eq!(ucall(&parse, "forty-two", &error_map).await.unwrap(), -1);
/// # }
/// ```
pub struct ErrorMap<T> {
    entries: Vec<Entry<T>>,
}

impl<T> ErrorMap<T>
where
    T: Send + 'static,
{
    /// An empty map: every failure propagates.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a blocking handler for errors of type `E`.
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(E) -> T + Send + Sync + 'static,
    {
        self.on_async::<E, _, _>(move |err| futures::future::ready(handler(err)))
    }

    /// Register an async handler for errors of type `E`.
    pub fn on_async<E, F, Fut>(mut self, handler: F) -> Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handler = move |err: BoxError| -> Result<BoxFuture<'static, T>, BoxError> {
            err.downcast::<E>().map(|err| handler(*err).boxed())
        };

        self.entries.push(Entry {
            type_name: type_name::<E>(),
            matches: |err| err.is::<E>(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Whether any entry would handle `err`.
    pub fn handles(&self, err: &(dyn StdError + Send + Sync + 'static)) -> bool {
        self.entries.iter().any(|entry| (entry.matches)(err))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run the first matching handler, or give the error back untouched.
    pub(crate) async fn dispatch(&self, err: BoxError) -> Result<T, BoxError> {
        let entry = self
            .entries
            .iter()
            .find(|entry| (entry.matches)(err.as_ref()));

        match entry {
            Some(entry) => Ok((entry.handler)(err)?.await),
            None => Err(err),
        }
    }
}

impl<T> Default for ErrorMap<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ErrorMap<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|entry| Entry {
                    type_name: entry.type_name,
                    matches: entry.matches,
                    handler: Arc::clone(&entry.handler),
                })
                .collect(),
        }
    }
}

impl<T> Debug for ErrorMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.type_name))
            .finish()
    }
}
