//! Sub-context hooks running one phase.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use quarry_common::{QuarryError, QuarryResult};
use quarry_data::breaker::CircuitBreaker;
use quarry_data::{BatchIterator, BoxedBatchIterator, KillSwitch};

use crate::context::{ExecutionSubContext, SubContextHooks};
use crate::receiver::{drive, RowReceiver};

type SourceFactory = Box<dyn FnOnce() -> QuarryResult<BoxedBatchIterator> + Send>;

/// Runs a phase: `prepare` builds the phase's iterator, `start` drives it
/// into the phase's receiver on the tokio runtime and closes the
/// sub-context when the drive ends.
///
/// Before the drive starts a kill goes straight to the iterator and the
/// receiver; afterwards it goes through the kill switch and the drive
/// delivers it.
pub struct PhaseHooks {
    name: String,
    source: Mutex<Option<SourceFactory>>,
    iterator: Mutex<Option<BoxedBatchIterator>>,
    receiver: Arc<dyn RowReceiver>,
    kill_switch: KillSwitch,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl PhaseHooks {
    /// Creates hooks building their iterator with `source` on prepare.
    pub fn new<F>(name: impl Into<String>, source: F, receiver: Arc<dyn RowReceiver>) -> Self
    where
        F: FnOnce() -> QuarryResult<BoxedBatchIterator> + Send + 'static,
    {
        Self {
            name: name.into(),
            source: Mutex::new(Some(Box::new(source))),
            iterator: Mutex::new(None),
            receiver,
            kill_switch: KillSwitch::new(),
            breaker: None,
        }
    }

    /// Reports the bytes held by `breaker` as this phase's usage.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// The switch killing a running drive.
    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }
}

impl SubContextHooks for PhaseHooks {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_prepare(&self) -> QuarryResult<()> {
        let source = self
            .source
            .lock()
            .take()
            .ok_or_else(|| QuarryError::illegal_state(format!("{} already prepared", self.name)))?;
        match source() {
            Ok(iterator) => {
                *self.iterator.lock() = Some(iterator);
                Ok(())
            }
            Err(e) => {
                self.receiver.fail(e.clone());
                Err(e)
            }
        }
    }

    fn on_start(&self, context: &Arc<ExecutionSubContext>) -> QuarryResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            QuarryError::illegal_state(format!("{} must be started on a tokio runtime", self.name))
        })?;
        let mut iterator = self
            .iterator
            .lock()
            .take()
            .ok_or_else(|| QuarryError::illegal_state(format!("{} has no iterator", self.name)))?;
        let receiver = Arc::clone(&self.receiver);
        let kill_switch = self.kill_switch.clone();
        let context = Arc::clone(context);
        runtime.spawn(async move {
            match drive(&mut iterator, receiver.as_ref(), &kill_switch).await {
                Ok(outcome) => {
                    tracing::trace!("{} finished: {:?}", context, outcome);
                    context.close(None);
                }
                Err(e) => {
                    context.close(Some(e));
                }
            }
        });
        Ok(())
    }

    fn on_kill(&self, cause: &QuarryError) -> QuarryResult<()> {
        self.kill_switch.kill(cause.clone());
        let pending = self.iterator.lock().take();
        if let Some(mut iterator) = pending {
            iterator.kill(cause.clone());
            self.receiver.kill(cause.clone());
        } else if self.source.lock().take().is_some() {
            // never prepared
            self.receiver.kill(cause.clone());
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.source.lock().take();
        if let Some(mut iterator) = self.iterator.lock().take() {
            iterator.close();
        }
    }

    fn bytes_used(&self) -> u64 {
        self.breaker.as_ref().map_or(0, |b| b.used())
    }
}

impl fmt::Debug for PhaseHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseHooks")
            .field("name", &self.name)
            .field("killed", &self.kill_switch.is_killed())
            .finish()
    }
}
