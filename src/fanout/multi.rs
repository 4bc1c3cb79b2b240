use futures::future::join_all;
use std::{future::Future, time::Duration};

use super::{fan_out, lcall, lcall_timed};
use crate::{error::CallError, invocable::Invocable, options::CallOptions, to_list::Listable};

/// Pair functions with inputs and run every pair concurrently.
///
/// - One function: it is applied to every input.
/// - As many functions as inputs: the `n`-th function gets the `n`-th input.
/// - Anything else is refused with [`CallError::Validation`] before any call
///   is made.
///
/// Every pair gets the per-item policy of [`lcall()`](crate::lcall), results
/// come back in input order.
///
/// # Example
///
/// ```
/// use lioncall::{mcall, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let double = Invocable::infallible(|x: i32| x * 2);
/// let triple = Invocable::infallible(|x: i32| x * 3);
/// let options = CallOptions::new();
///
/// assert_eq!(mcall(vec![1, 2], vec![double.clone(), triple], &options).await.unwrap(), vec![2, 6]);
/// assert_eq!(mcall(vec![1, 2, 3], vec![double], &options).await.unwrap(), vec![2, 4, 6]);
/// # }
/// ```
pub async fn mcall<I, T, C, F>(input: C, funcs: F, options: &CallOptions<T>) -> Result<Vec<T>, CallError>
where
    C: IntoIterator<Item = I>,
    F: IntoIterator<Item = Invocable<I, T>>,
    I: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    let inputs: Vec<I> = input.into_iter().collect();
    let mut funcs: Vec<Invocable<I, T>> = funcs.into_iter().collect();

    let jobs: Vec<(Invocable<I, T>, I)> = if funcs.len() == 1 {
        let func = funcs.remove(0);
        inputs.into_iter().map(|item| (func.clone(), item)).collect()
    } else if funcs.len() == inputs.len() {
        funcs.into_iter().zip(inputs).collect()
    } else {
        return Err(CallError::Validation(format!(
            "expected one function or one function per input, got {} functions for {} inputs",
            funcs.len(),
            inputs.len()
        )));
    };

    let results = fan_out(jobs, options).await?;
    Ok(results.into_iter().map(|(value, _)| value).collect())
}

/// Run every function over all inputs, one [`lcall()`](crate::lcall) per function.
///
/// The per-function calls run concurrently; the result holds one list per
/// function, in function order. A failing function does not stop the others:
/// every call runs to the end, then the failure of the lowest function index
/// is returned.
///
/// ```
/// use lioncall::{mcall_explode, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let funcs = vec![
///     Invocable::infallible(|x: i32| x * 2),
///     Invocable::infallible(|x: i32| x + 2),
/// ];
///
/// let results = mcall_explode(Some(1), funcs, &CallOptions::new()).await.unwrap();
///
/// assert_eq!(results, vec![vec![2], vec![3]]);
/// # }
/// ```
pub async fn mcall_explode<I, T, C, F>(
    input: C,
    funcs: F,
    options: &CallOptions<T>,
) -> Result<Vec<Vec<T>>, CallError>
where
    C: IntoIterator<Item = I>,
    F: IntoIterator<Item = Invocable<I, T>>,
    I: Clone + Send + 'static,
    T: Listable + Clone + Send + 'static,
{
    let inputs: Vec<I> = input.into_iter().collect();
    let funcs: Vec<Invocable<I, T>> = funcs.into_iter().collect();

    settle_all(funcs.iter().map(|func| lcall(inputs.clone(), func, options))).await
}

/// [`mcall_explode()`] that pairs every result with the duration of its
/// successful attempt, see [`lcall_timed()`](crate::lcall_timed).
pub async fn mcall_explode_timed<I, T, C, F>(
    input: C,
    funcs: F,
    options: &CallOptions<T>,
) -> Result<Vec<Vec<(T, Duration)>>, CallError>
where
    C: IntoIterator<Item = I>,
    F: IntoIterator<Item = Invocable<I, T>>,
    I: Clone + Send + 'static,
    T: Listable + Clone + Send + 'static,
{
    let inputs: Vec<I> = input.into_iter().collect();
    let funcs: Vec<Invocable<I, T>> = funcs.into_iter().collect();

    settle_all(funcs.iter().map(|func| lcall_timed(inputs.clone(), func, options))).await
}

/// Drive every call to completion, then keep the first failure in call order.
async fn settle_all<R, Fut>(calls: impl IntoIterator<Item = Fut>) -> Result<Vec<R>, CallError>
where
    Fut: Future<Output = Result<R, CallError>>,
{
    join_all(calls).await.into_iter().collect()
}
