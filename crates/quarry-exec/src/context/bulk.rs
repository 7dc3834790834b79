//! Sub-context hooks for bulk shard processors.

use std::sync::Arc;

use quarry_common::{QuarryError, QuarryResult};

use super::sub_context::{ExecutionSubContext, SubContextHooks};

/// Batches write requests to shards. Requests are added while the job
/// runs; `close` sends what is pending and waits for it.
pub trait BulkShardProcessor: Send + Sync {
    /// Flushes pending requests and finishes the processor.
    fn close(&self) -> QuarryResult<()>;

    /// Drops pending requests and aborts in-flight ones.
    fn kill(&self, cause: &QuarryError);

    /// Bytes held by pending requests.
    fn bytes_used(&self) -> u64 {
        0
    }
}

/// Drives a [`BulkShardProcessor`] through a sub-context lifecycle: start
/// flushes the processor and closes the context; a kill or a failed flush
/// kills the processor.
pub struct BulkShardProcessorHooks<P> {
    name: String,
    processor: Arc<P>,
}

impl<P: BulkShardProcessor> BulkShardProcessorHooks<P> {
    /// Creates the hooks.
    pub fn new(name: impl Into<String>, processor: Arc<P>) -> Self {
        Self {
            name: name.into(),
            processor,
        }
    }
}

impl<P: BulkShardProcessor> SubContextHooks for BulkShardProcessorHooks<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&self, context: &Arc<ExecutionSubContext>) -> QuarryResult<()> {
        self.processor.close()?;
        context.close(None);
        Ok(())
    }

    fn on_kill(&self, cause: &QuarryError) -> QuarryResult<()> {
        self.processor.kill(cause);
        Ok(())
    }

    fn bytes_used(&self) -> u64 {
        self.processor.bytes_used()
    }
}
