//! Set-once completion cells.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use quarry_common::{QuarryError, QuarryResult};

type Callback<T> = Box<dyn FnOnce(&QuarryResult<T>) + Send>;

struct State<T> {
    result: Option<QuarryResult<T>>,
    callbacks: Vec<Callback<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    notify: Notify,
}

/// A result that is set exactly once and observed by any number of waiters.
///
/// Cloning shares the cell. The first [`complete`](Self::complete) wins;
/// later calls return `false` and leave the stored result untouched.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// Creates a pending completion.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    result: None,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Sets the result. Returns false if it was already set.
    pub fn complete(&self, result: QuarryResult<T>) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.callbacks)
        };
        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();
        for callback in callbacks {
            callback(&result);
        }
        true
    }

    /// Completes successfully with `value`.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Completes with `cause`.
    pub fn fail(&self, cause: QuarryError) -> bool {
        self.complete(Err(cause))
    }

    /// Returns true once the result is set.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// Returns the result if set.
    pub fn try_get(&self) -> Option<QuarryResult<T>> {
        self.inner.state.lock().result.clone()
    }

    /// Runs `callback` with the result, immediately if already set.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&QuarryResult<T>) + Send + 'static,
    {
        let result = {
            let mut state = self.inner.state.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&result);
    }

    /// Waits for the result.
    pub async fn wait(&self) -> QuarryResult<T> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.try_get() {
                return result;
            }
            notified.await;
        }
    }

    /// Blocks the calling thread until the result is set or `timeout`
    /// elapses.
    ///
    /// Fails with [`QuarryError::NotSupported`] when called on a
    /// current-thread tokio runtime while still pending, since the blocked
    /// thread is the one that would have to set the result.
    pub fn wait_blocking(&self, timeout: Duration) -> QuarryResult<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        if state.result.is_none() && on_current_thread_runtime() {
            return Err(QuarryError::not_supported(
                "blocking wait on a current-thread runtime",
            ));
        }
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                return match &state.result {
                    Some(result) => result.clone(),
                    None => Err(QuarryError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    }),
                };
            }
        }
    }
}

fn on_current_thread_runtime() -> bool {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread)
        .unwrap_or(false)
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("result", &self.inner.state.lock().result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_completion_wins() {
        let completion = Completion::new();
        assert!(!completion.is_done());
        assert!(completion.succeed(1));
        assert!(!completion.succeed(2));
        assert!(!completion.fail(QuarryError::JobKilled));
        assert_eq!(completion.try_get(), Some(Ok(1)));
    }

    #[test]
    fn test_callbacks_run_once() {
        let completion = Completion::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        completion.on_complete(move |r| {
            assert!(r.is_err());
            c.fetch_add(1, Ordering::SeqCst);
        });
        completion.fail(QuarryError::JobKilled);
        completion.fail(QuarryError::JobKilled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // registered after completion: runs immediately
        let c = Arc::clone(&calls);
        completion.on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_blocking_times_out() {
        let completion = Completion::<u32>::new();
        let err = completion
            .wait_blocking(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, QuarryError::Timeout { duration_ms: 10 }));
    }

    #[test]
    fn test_wait_blocking_across_threads() {
        let completion = Completion::<u32>::new();
        let setter = completion.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            setter.succeed(7);
        });
        assert_eq!(completion.wait_blocking(Duration::from_secs(5)), Ok(7));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_wait_blocking_refused_on_current_thread_runtime() {
        let completion = Completion::<u32>::new();
        let err = completion
            .wait_blocking(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, QuarryError::NotSupported { .. }));

        completion.succeed(4);
        assert_eq!(completion.wait_blocking(Duration::from_secs(5)), Ok(4));
    }

    #[tokio::test]
    async fn test_async_wait() {
        let completion = Completion::<u32>::new();
        let setter = completion.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            setter.succeed(3);
        });
        assert_eq!(completion.wait().await, Ok(3));
        assert_eq!(completion.wait().await, Ok(3));
    }
}
