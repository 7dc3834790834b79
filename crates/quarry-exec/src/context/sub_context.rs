//! Lifecycle of one execution fragment.
//!
//! # States
//!
//! ```text
//! ┌─────────┐ prepare() ┌──────────┐ start() ┌─────────┐ close() ┌────────┐
//! │ Created │──────────▶│ Prepared │────────▶│ Started │────────▶│ Closed │
//! └─────────┘           └──────────┘         └─────────┘         └────────┘
//!      │                     │                    │
//!      └─────────────────────┴────────────────────┴──kill(cause)──▶ Killed
//! ```
//!
//! `close` and `kill` share one first-wins guard: the terminal transition
//! and its cleanup run exactly once, and the completion resolves exactly
//! once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use quarry_common::{ContextId, QuarryError, QuarryResult};

use crate::completion::Completion;

/// State of an [`ExecutionSubContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubContextState {
    /// Created, resources not acquired.
    Created,
    /// Resources acquired.
    Prepared,
    /// Running.
    Started,
    /// Finished gracefully or after an internal failure.
    Closed,
    /// Killed.
    Killed,
}

impl SubContextState {
    /// Returns true for `Closed` and `Killed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubContextState::Closed | SubContextState::Killed)
    }
}

impl fmt::Display for SubContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubContextState::Created => write!(f, "Created"),
            SubContextState::Prepared => write!(f, "Prepared"),
            SubContextState::Started => write!(f, "Started"),
            SubContextState::Closed => write!(f, "Closed"),
            SubContextState::Killed => write!(f, "Killed"),
        }
    }
}

/// Value a sub-context completes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionState {
    /// Bytes the fragment still accounted for when it finished.
    pub bytes_used: u64,
}

/// Resource-specific behaviour of a sub-context.
///
/// Hooks are called without any lock held, so a hook may itself close or
/// kill its context.
pub trait SubContextHooks: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Acquires resources.
    fn on_prepare(&self) -> QuarryResult<()> {
        Ok(())
    }

    /// Starts the work. `context` is the owning sub-context, to be closed
    /// once the work is done.
    fn on_start(&self, context: &Arc<ExecutionSubContext>) -> QuarryResult<()>;

    /// Releases resources after a kill or an internal failure.
    fn on_kill(&self, cause: &QuarryError) -> QuarryResult<()>;

    /// Releases resources after the work finished.
    fn on_close(&self) -> QuarryResult<()> {
        Ok(())
    }

    /// Releases whatever a failed `on_prepare` left behind.
    fn cleanup(&self) {}

    /// Bytes currently held.
    fn bytes_used(&self) -> u64 {
        0
    }
}

/// One lifecycle-managed execution fragment.
pub struct ExecutionSubContext {
    id: ContextId,
    hooks: Box<dyn SubContextHooks>,
    state: Mutex<SubContextState>,
    terminated: AtomicBool,
    completion: Completion<CompletionState>,
}

impl ExecutionSubContext {
    /// Creates a sub-context in state `Created`.
    pub fn new(id: ContextId, hooks: Box<dyn SubContextHooks>) -> Arc<Self> {
        Arc::new(Self {
            id,
            hooks,
            state: Mutex::new(SubContextState::Created),
            terminated: AtomicBool::new(false),
            completion: Completion::new(),
        })
    }

    /// Returns the id within its job.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the hooks' name.
    pub fn name(&self) -> &str {
        self.hooks.name()
    }

    /// Returns the current state.
    pub fn state(&self) -> SubContextState {
        *self.state.lock()
    }

    /// Returns true once closed or killed.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Resolves once the sub-context is closed or killed.
    pub fn completion(&self) -> Completion<CompletionState> {
        self.completion.clone()
    }

    /// Acquires resources. On failure the context is cleaned up, its
    /// completion fails and the error is returned.
    pub fn prepare(&self) -> QuarryResult<()> {
        if self.is_terminated() {
            return Ok(());
        }
        {
            let state = self.state.lock();
            if *state != SubContextState::Created {
                return Err(QuarryError::illegal_state(format!(
                    "cannot prepare {} in state {}",
                    self, *state
                )));
            }
        }
        tracing::trace!("preparing {}", self);
        match self.hooks.on_prepare() {
            Ok(()) => {
                let mut state = self.state.lock();
                if *state == SubContextState::Created {
                    *state = SubContextState::Prepared;
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("prepare of {} failed: {}", self, e);
                if self.acquire_terminal() {
                    *self.state.lock() = SubContextState::Closed;
                    self.hooks.cleanup();
                    self.completion.fail(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Starts the work. Does nothing if the context is already closed or
    /// killed. A failing start closes the context with the failure.
    pub fn start(self: &Arc<Self>) -> QuarryResult<()> {
        {
            let mut state = self.state.lock();
            if self.is_terminated() {
                tracing::trace!("not starting {}, already {}", self, *state);
                return Ok(());
            }
            if *state != SubContextState::Prepared {
                return Err(QuarryError::illegal_state(format!(
                    "cannot start {} in state {}",
                    self, *state
                )));
            }
            *state = SubContextState::Started;
        }
        tracing::trace!("starting {}", self);
        if let Err(e) = self.hooks.on_start(self) {
            tracing::warn!("start of {} failed: {}", self, e);
            self.close(Some(e.clone()));
            return Err(e);
        }
        Ok(())
    }

    /// Kills the context; `None` kills with [`QuarryError::JobKilled`].
    /// Returns false if it was already closed or killed.
    pub fn kill(&self, cause: Option<QuarryError>) -> bool {
        if !self.acquire_terminal() {
            return false;
        }
        let cause = cause.unwrap_or(QuarryError::JobKilled);
        {
            let mut state = self.state.lock();
            tracing::debug!("killing {} in state {}: {}", self, *state, cause);
            *state = SubContextState::Killed;
        }
        if let Err(e) = self.hooks.on_kill(&cause) {
            tracing::warn!("cleanup of killed {} failed: {}", self, e);
        }
        self.completion.fail(cause);
        true
    }

    /// Closes the context. With a `failure` the resources are released the
    /// way a kill releases them and the completion fails with it. Returns
    /// false if it was already closed or killed.
    pub fn close(&self, failure: Option<QuarryError>) -> bool {
        if !self.acquire_terminal() {
            return false;
        }
        *self.state.lock() = SubContextState::Closed;
        let result = match failure {
            Some(cause) => {
                tracing::debug!("closing {} after failure: {}", self, cause);
                if let Err(e) = self.hooks.on_kill(&cause) {
                    tracing::warn!("cleanup of failed {} failed: {}", self, e);
                }
                Err(cause)
            }
            None => {
                tracing::trace!("closing {}", self);
                match self.hooks.on_close() {
                    Ok(()) => Ok(CompletionState {
                        bytes_used: self.hooks.bytes_used(),
                    }),
                    Err(e) => {
                        tracing::warn!("close of {} failed: {}", self, e);
                        if let Err(cleanup) = self.hooks.on_kill(&e) {
                            tracing::warn!("cleanup of {} failed: {}", self, cleanup);
                        }
                        Err(e)
                    }
                }
            }
        };
        self.completion.complete(result);
        true
    }

    fn acquire_terminal(&self) -> bool {
        self.terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Display for ExecutionSubContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.hooks.name(), self.id)
    }
}

impl fmt::Debug for ExecutionSubContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSubContext")
            .field("id", &self.id)
            .field("name", &self.hooks.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Hooks counting every call, optionally failing some of them.
    #[derive(Default)]
    pub(crate) struct RecordingHooks {
        pub prepares: AtomicUsize,
        pub starts: AtomicUsize,
        pub kills: AtomicUsize,
        pub closes: AtomicUsize,
        pub cleanups: AtomicUsize,
        pub fail_prepare: bool,
        pub fail_start: bool,
        pub fail_kill: bool,
        pub close_on_start: bool,
    }

    impl SubContextHooks for Arc<RecordingHooks> {
        fn name(&self) -> &str {
            "recording"
        }

        fn on_prepare(&self) -> QuarryResult<()> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            if self.fail_prepare {
                return Err(QuarryError::internal("prepare failed"));
            }
            Ok(())
        }

        fn on_start(&self, context: &Arc<ExecutionSubContext>) -> QuarryResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(QuarryError::internal("start failed"));
            }
            if self.close_on_start {
                context.close(None);
            }
            Ok(())
        }

        fn on_kill(&self, _cause: &QuarryError) -> QuarryResult<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if self.fail_kill {
                return Err(QuarryError::internal("cleanup failed"));
            }
            Ok(())
        }

        fn on_close(&self) -> QuarryResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn context(id: ContextId, hooks: RecordingHooks) -> (Arc<ExecutionSubContext>, Arc<RecordingHooks>) {
        let hooks = Arc::new(hooks);
        (ExecutionSubContext::new(id, Box::new(Arc::clone(&hooks))), hooks)
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[test]
    fn test_lifecycle() {
        let (ctx, hooks) = context(1, RecordingHooks::default());
        assert_eq!(ctx.state(), SubContextState::Created);
        ctx.prepare().unwrap();
        assert_eq!(ctx.state(), SubContextState::Prepared);
        ctx.start().unwrap();
        assert_eq!(ctx.state(), SubContextState::Started);
        assert!(ctx.close(None));
        assert_eq!(ctx.state(), SubContextState::Closed);

        assert_eq!(ctx.completion().try_get(), Some(Ok(CompletionState::default())));
        assert_eq!(count(&hooks.closes), 1);
        assert_eq!(count(&hooks.kills), 0);
    }

    #[test]
    fn test_kill_after_close_is_noop() {
        let (ctx, hooks) = context(1, RecordingHooks::default());
        ctx.prepare().unwrap();
        ctx.start().unwrap();
        assert!(ctx.close(None));
        assert!(!ctx.kill(None));
        assert!(!ctx.close(None));
        assert_eq!(count(&hooks.kills), 0);
        assert_eq!(count(&hooks.closes), 1);
        assert_eq!(ctx.state(), SubContextState::Closed);
    }

    #[test]
    fn test_start_after_kill_never_starts() {
        let (ctx, hooks) = context(1, RecordingHooks::default());
        ctx.prepare().unwrap();
        assert!(ctx.kill(None));
        ctx.start().unwrap();
        assert_eq!(count(&hooks.starts), 0);
        assert_eq!(ctx.state(), SubContextState::Killed);
        assert_eq!(ctx.completion().try_get(), Some(Err(QuarryError::JobKilled)));
    }

    #[test]
    fn test_kill_cleanup_failure_does_not_mask_cause() {
        let (ctx, hooks) = context(
            1,
            RecordingHooks {
                fail_kill: true,
                ..Default::default()
            },
        );
        assert!(ctx.kill(Some(QuarryError::internal("boom"))));
        assert_eq!(count(&hooks.kills), 1);
        assert_eq!(
            ctx.completion().try_get(),
            Some(Err(QuarryError::internal("boom")))
        );
    }

    #[test]
    fn test_prepare_failure_cleans_up() {
        let (ctx, hooks) = context(
            1,
            RecordingHooks {
                fail_prepare: true,
                ..Default::default()
            },
        );
        let err = ctx.prepare().unwrap_err();
        assert_eq!(err, QuarryError::internal("prepare failed"));
        assert_eq!(count(&hooks.cleanups), 1);
        assert!(ctx.is_terminated());
        assert_eq!(ctx.completion().try_get(), Some(Err(err)));

        ctx.start().unwrap();
        assert_eq!(count(&hooks.starts), 0);
    }

    #[test]
    fn test_start_failure_closes_with_kill_cleanup() {
        let (ctx, hooks) = context(
            1,
            RecordingHooks {
                fail_start: true,
                ..Default::default()
            },
        );
        ctx.prepare().unwrap();
        assert!(ctx.start().is_err());
        assert_eq!(ctx.state(), SubContextState::Closed);
        assert_eq!(count(&hooks.kills), 1);
        assert_eq!(count(&hooks.closes), 0);
        assert_eq!(
            ctx.completion().try_get(),
            Some(Err(QuarryError::internal("start failed")))
        );
    }

    #[test]
    fn test_start_requires_prepare() {
        let (ctx, _) = context(1, RecordingHooks::default());
        assert!(matches!(
            ctx.start(),
            Err(QuarryError::IllegalState { .. })
        ));
        ctx.prepare().unwrap();
        assert!(ctx.prepare().is_err());
    }

    #[test]
    fn test_close_from_start_hook() {
        let (ctx, hooks) = context(
            1,
            RecordingHooks {
                close_on_start: true,
                ..Default::default()
            },
        );
        ctx.prepare().unwrap();
        ctx.start().unwrap();
        assert_eq!(ctx.state(), SubContextState::Closed);
        assert_eq!(count(&hooks.closes), 1);
    }

    #[test]
    fn test_every_call_sequence_completes_once() {
        #[derive(Clone, Copy, Debug)]
        enum Call {
            Prepare,
            Start,
            Kill,
            Close,
        }
        let calls = [Call::Prepare, Call::Start, Call::Kill, Call::Close];
        for a in calls {
            for b in calls {
                for c in calls {
                    let (ctx, hooks) = context(1, RecordingHooks::default());
                    let resolved = Arc::new(AtomicUsize::new(0));
                    let r = Arc::clone(&resolved);
                    ctx.completion().on_complete(move |_| {
                        r.fetch_add(1, Ordering::SeqCst);
                    });
                    for call in [a, b, c, Call::Kill, Call::Close] {
                        match call {
                            Call::Prepare => {
                                let _ = ctx.prepare();
                            }
                            Call::Start => {
                                let _ = ctx.start();
                            }
                            Call::Kill => {
                                ctx.kill(None);
                            }
                            Call::Close => {
                                ctx.close(None);
                            }
                        }
                    }
                    let sequence = format!("{:?} {:?} {:?}", a, b, c);
                    assert_eq!(resolved.load(Ordering::SeqCst), 1, "{}", sequence);
                    assert_eq!(
                        count(&hooks.kills) + count(&hooks.closes),
                        1,
                        "{}",
                        sequence
                    );
                    assert!(count(&hooks.starts) <= 1, "{}", sequence);
                }
            }
        }
    }
}
