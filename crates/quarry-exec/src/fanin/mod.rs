//! Fan-in of N asynchronous partial results.
//!
//! Every combinator here waits for exactly N responses, successes and
//! failures alike, before it reports downstream. A failure does not cut the
//! other branches short; the last failure seen is reported once all of them
//! settled. Responses beyond N are ignored with a warning.

use std::fmt;
use std::future::Future;

use futures::future::join_all;
use parking_lot::Mutex;

use quarry_common::{QuarryError, QuarryResult};

use crate::completion::Completion;

type FinalConsumer<T> = Box<dyn FnOnce(Vec<T>, Option<QuarryError>) + Send>;

struct BiState<T> {
    remaining: usize,
    results: Vec<T>,
    failure: Option<QuarryError>,
    consumer: Option<FinalConsumer<T>>,
}

/// Collects N results and then calls a final consumer with the successful
/// results and the last failure, if any.
pub struct MultiBiConsumer<T> {
    state: Mutex<BiState<T>>,
}

impl<T: Send + 'static> MultiBiConsumer<T> {
    /// Expects `num_calls` results. With zero calls the consumer runs
    /// right away.
    pub fn new<F>(num_calls: usize, consumer: F) -> Self
    where
        F: FnOnce(Vec<T>, Option<QuarryError>) + Send + 'static,
    {
        let this = Self {
            state: Mutex::new(BiState {
                remaining: num_calls,
                results: Vec::with_capacity(num_calls),
                failure: None,
                consumer: Some(Box::new(consumer)),
            }),
        };
        if num_calls == 0 {
            this.finish();
        }
        this
    }

    /// Records one result.
    pub fn accept(&self, result: QuarryResult<T>) {
        let done = {
            let mut state = self.state.lock();
            if state.remaining == 0 {
                tracing::warn!("MultiBiConsumer called more often than expected");
                return;
            }
            match result {
                Ok(value) => state.results.push(value),
                Err(cause) => state.failure = Some(cause),
            }
            state.remaining -= 1;
            state.remaining == 0
        };
        if done {
            self.finish();
        }
    }

    /// Results still expected.
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    fn finish(&self) {
        let (consumer, results, failure) = {
            let mut state = self.state.lock();
            (
                state.consumer.take(),
                std::mem::take(&mut state.results),
                state.failure.take(),
            )
        };
        if let Some(consumer) = consumer {
            consumer(results, failure);
        }
    }
}

impl<T> fmt::Debug for MultiBiConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MultiBiConsumer")
            .field("remaining", &state.remaining)
            .field("failed", &state.failure.is_some())
            .finish()
    }
}

/// One-shot receiver of an asynchronous result.
pub struct ActionListener<R> {
    callback: Box<dyn FnOnce(QuarryResult<R>) + Send>,
}

impl<R: Send + 'static> ActionListener<R> {
    /// Listener calling `callback` with the result.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(QuarryResult<R>) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Listener completing `completion`.
    pub fn from_completion(completion: Completion<R>) -> Self
    where
        R: Clone,
    {
        Self::new(move |result| {
            completion.complete(result);
        })
    }

    /// Delivers a response.
    pub fn on_response(self, response: R) {
        (self.callback)(Ok(response))
    }

    /// Delivers a failure.
    pub fn on_failure(self, cause: QuarryError) {
        (self.callback)(Err(cause))
    }
}

impl<R> fmt::Debug for ActionListener<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionListener")
    }
}

type Accumulator<I, S> = Box<dyn Fn(&mut S, I) + Send + Sync>;
type Finisher<S, R> = Box<dyn FnOnce(S) -> R + Send>;

struct MultiState<S, R> {
    remaining: usize,
    state: Option<S>,
    failure: Option<QuarryError>,
    finisher: Option<Finisher<S, R>>,
    listener: Option<ActionListener<R>>,
}

/// Folds N responses into one state and hands the finished result, or the
/// last failure, to an [`ActionListener`].
pub struct MultiActionListener<I, S, R> {
    accumulator: Accumulator<I, S>,
    inner: Mutex<MultiState<S, R>>,
}

impl<I, S, R> MultiActionListener<I, S, R>
where
    I: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    /// Expects `num_responses` responses, folded into `initial` by
    /// `accumulator` and turned into the result by `finisher`.
    pub fn new<A, F>(
        num_responses: usize,
        initial: S,
        accumulator: A,
        finisher: F,
        listener: ActionListener<R>,
    ) -> Self
    where
        A: Fn(&mut S, I) + Send + Sync + 'static,
        F: FnOnce(S) -> R + Send + 'static,
    {
        let this = Self {
            accumulator: Box::new(accumulator),
            inner: Mutex::new(MultiState {
                remaining: num_responses,
                state: Some(initial),
                failure: None,
                finisher: Some(Box::new(finisher)),
                listener: Some(listener),
            }),
        };
        if num_responses == 0 {
            this.finish();
        }
        this
    }

    /// Records a response.
    pub fn on_response(&self, response: I) {
        self.record(Ok(response));
    }

    /// Records a failure.
    pub fn on_failure(&self, cause: QuarryError) {
        self.record(Err(cause));
    }

    fn record(&self, result: QuarryResult<I>) {
        let done = {
            let mut inner = self.inner.lock();
            if inner.remaining == 0 {
                tracing::warn!("MultiActionListener called more often than expected");
                return;
            }
            match result {
                Ok(response) => {
                    if let Some(state) = inner.state.as_mut() {
                        (self.accumulator)(state, response);
                    }
                }
                Err(cause) => inner.failure = Some(cause),
            }
            inner.remaining -= 1;
            inner.remaining == 0
        };
        if done {
            self.finish();
        }
    }

    fn finish(&self) {
        let (listener, state, finisher, failure) = {
            let mut inner = self.inner.lock();
            (
                inner.listener.take(),
                inner.state.take(),
                inner.finisher.take(),
                inner.failure.take(),
            )
        };
        let Some(listener) = listener else {
            return;
        };
        match (failure, state, finisher) {
            (Some(cause), _, _) => listener.on_failure(cause),
            (None, Some(state), Some(finisher)) => listener.on_response(finisher(state)),
            (None, _, _) => {
                listener.on_failure(QuarryError::internal("fan-in state already consumed"))
            }
        }
    }
}

/// Waits for every future and returns their results in input order, or the
/// last failure in input order if any failed.
pub async fn all_as_list<T, F>(futures: Vec<F>) -> QuarryResult<Vec<T>>
where
    F: Future<Output = QuarryResult<T>>,
{
    let mut values = Vec::with_capacity(futures.len());
    let mut failure = None;
    for result in join_all(futures).await {
        match result {
            Ok(value) => values.push(value),
            Err(cause) => failure = Some(cause),
        }
    }
    match failure {
        Some(cause) => Err(cause),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bi_consumer_waits_for_all() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let consumer = MultiBiConsumer::new(3, move |results: Vec<u32>, failure| {
            *s.lock() = Some((results, failure));
        });

        consumer.accept(Ok(1));
        consumer.accept(Err(QuarryError::internal("first")));
        assert!(seen.lock().is_none(), "must not short-circuit on failure");
        consumer.accept(Ok(3));

        let (results, failure) = seen.lock().take().unwrap();
        assert_eq!(results, vec![1, 3]);
        assert_eq!(failure, Some(QuarryError::internal("first")));

        // extra call is ignored
        consumer.accept(Ok(4));
        assert!(seen.lock().is_none());
    }

    #[test]
    fn test_bi_consumer_reports_last_failure() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let consumer = MultiBiConsumer::<()>::new(2, move |_, failure| {
            *s.lock() = failure;
        });
        consumer.accept(Err(QuarryError::internal("a")));
        consumer.accept(Err(QuarryError::internal("b")));
        assert_eq!(*seen.lock(), Some(QuarryError::internal("b")));
    }

    #[test]
    fn test_bi_consumer_with_zero_calls() {
        let seen = Arc::new(Mutex::new(false));
        let s = Arc::clone(&seen);
        let _consumer = MultiBiConsumer::<u8>::new(0, move |results, failure| {
            assert!(results.is_empty() && failure.is_none());
            *s.lock() = true;
        });
        assert!(*seen.lock());
    }

    #[test]
    fn test_multi_action_listener_folds_responses() {
        let completion = Completion::new();
        let listener = MultiActionListener::new(
            3,
            0u64,
            |sum: &mut u64, rows: u64| *sum += rows,
            |sum| sum * 2,
            ActionListener::from_completion(completion.clone()),
        );
        listener.on_response(1);
        listener.on_response(2);
        assert!(!completion.is_done());
        listener.on_response(3);
        assert_eq!(completion.try_get(), Some(Ok(12)));
    }

    #[test]
    fn test_multi_action_listener_failure_after_all() {
        let completion = Completion::<u64>::new();
        let listener = MultiActionListener::new(
            2,
            0u64,
            |sum: &mut u64, rows: u64| *sum += rows,
            |sum| sum,
            ActionListener::from_completion(completion.clone()),
        );
        listener.on_failure(QuarryError::JobKilled);
        assert!(!completion.is_done());
        listener.on_response(5);
        assert_eq!(completion.try_get(), Some(Err(QuarryError::JobKilled)));
    }

    #[tokio::test]
    async fn test_all_as_list() {
        let ok: Vec<_> = (0..3u32).map(|i| async move { Ok(i) }).collect();
        assert_eq!(all_as_list(ok).await.unwrap(), vec![0, 1, 2]);

        let finished = Arc::new(Mutex::new(0));
        let mixed: Vec<_> = (0..4u32)
            .map(|i| {
                let finished = Arc::clone(&finished);
                async move {
                    *finished.lock() += 1;
                    if i % 2 == 1 {
                        Err(QuarryError::internal(format!("branch {}", i)))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();
        let err = all_as_list(mixed).await.unwrap_err();
        assert_eq!(err, QuarryError::internal("branch 3"));
        assert_eq!(*finished.lock(), 4);
    }
}
