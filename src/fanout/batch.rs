use futures::stream::{self, Stream};
use std::{future::Future, time::Duration};
use tracing::trace;

use super::{lcall, lcall_timed};
use crate::{
    error::CallError,
    invocable::Invocable,
    options::CallOptions,
    to_list::{shape, Listable},
};

/// Process the input in batches, one [`lcall()`](crate::lcall) per batch.
///
/// The input is flattened and stripped of nulls first, then cut into
/// contiguous batches of `batch_size` (the last one may be shorter). The
/// returned stream is lazy: a batch only starts when the consumer asks for
/// it, and never before the previous batch has finished.
///
/// ```text
/// batch 1: |lcall------|
/// batch 2:              |lcall---|
/// batch 3:                        |lcall--|
///
/// time pass ----->
/// ```
///
/// A failed batch is yielded as `Err` and ends the stream. A zero
/// `batch_size` is refused before anything runs.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use lioncall::{bcall, CallOptions, Invocable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let double = Invocable::infallible(|x: u32| x * 2);
/// let options = CallOptions::new();
///
/// let batches: Vec<_> = bcall(vec![1, 2, 3, 4, 5], &double, 2, &options)
///     .unwrap()
///     .map(Result::unwrap)
///     .collect()
///     .await;
///
/// assert_eq!(batches, vec![vec![2, 4], vec![6, 8], vec![10]]);
/// # }
/// ```
pub fn bcall<'a, I, T, C>(
    input: C,
    func: &'a Invocable<I, T>,
    batch_size: usize,
    options: &'a CallOptions<T>,
) -> Result<impl Stream<Item = Result<Vec<T>, CallError>> + 'a, CallError>
where
    C: IntoIterator<Item = I>,
    I: Listable + Clone + Send + 'static,
    T: Listable + Clone + Send + 'static,
{
    let items = batch_input(input, batch_size)?;

    Ok(batched(items, batch_size, move |batch| lcall(batch, func, options)))
}

/// [`bcall()`] whose batches pair every result with the duration of its
/// successful attempt, see [`lcall_timed()`](crate::lcall_timed).
pub fn bcall_timed<'a, I, T, C>(
    input: C,
    func: &'a Invocable<I, T>,
    batch_size: usize,
    options: &'a CallOptions<T>,
) -> Result<impl Stream<Item = Result<Vec<(T, Duration)>, CallError>> + 'a, CallError>
where
    C: IntoIterator<Item = I>,
    I: Listable + Clone + Send + 'static,
    T: Listable + Clone + Send + 'static,
{
    let items = batch_input(input, batch_size)?;

    Ok(batched(items, batch_size, move |batch| lcall_timed(batch, func, options)))
}

fn batch_input<I, C>(input: C, batch_size: usize) -> Result<Vec<I>, CallError>
where
    C: IntoIterator<Item = I>,
    I: Listable,
{
    if batch_size == 0 {
        return Err(CallError::Validation(
            "batch_size must be at least 1".to_owned(),
        ));
    }

    Ok(shape(input.into_iter().collect(), true, true, false))
}

/// Lazily run `run` over contiguous batches, one after another, stopping
/// after the first failed batch.
fn batched<'a, I, R, F, Fut>(
    items: Vec<I>,
    batch_size: usize,
    mut run: F,
) -> impl Stream<Item = Result<R, CallError>> + 'a
where
    I: 'a,
    R: 'a,
    F: FnMut(Vec<I>) -> Fut + 'a,
    Fut: Future<Output = Result<R, CallError>> + 'a,
{
    let total = items.len();
    let state = Some((items.into_iter(), 0_usize));

    stream::unfold(state, move |state| {
        let next = state.and_then(|(mut remaining, index)| {
            let batch: Vec<I> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                return None;
            }

            trace!(batch = index, size = batch.len(), total, "running batch");
            Some((run(batch), remaining, index))
        });

        async move {
            let (call, remaining, index) = next?;

            match call.await {
                Ok(results) => Some((Ok(results), Some((remaining, index + 1)))),
                Err(err) => Some((Err(err), None)),
            }
        }
    })
}
