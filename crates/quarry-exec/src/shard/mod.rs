//! Per-job shard reader contexts.
//!
//! Every collect phase of a job that touches a shard goes through the job's
//! [`SharedShardContexts`], so a shard's reader is created at most once per
//! job and then shared by all sub-contexts reading that shard.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use quarry_common::{QuarryError, QuarryResult, ShardId};
use quarry_data::BoxedBatchIterator;

/// Read access to one shard, supplied by the storage layer.
pub trait ShardReader: Send + Sync {
    /// The shard read.
    fn shard_id(&self) -> &ShardId;

    /// Returns a fresh iterator over the shard's rows.
    fn scan(&self) -> QuarryResult<BoxedBatchIterator>;
}

/// Opens shard readers.
pub trait ShardReaderProvider: Send + Sync {
    /// Opens a reader for `shard_id`.
    fn open_reader(&self, shard_id: &ShardId) -> QuarryResult<Arc<dyn ShardReader>>;
}

/// Shard reader context shared by the sub-contexts of one job.
///
/// The reader itself is opened on first use.
pub struct SharedShardContext {
    shard_id: ShardId,
    reader_id: u32,
    provider: Arc<dyn ShardReaderProvider>,
    reader: OnceCell<Arc<dyn ShardReader>>,
}

impl SharedShardContext {
    fn new(shard_id: ShardId, reader_id: u32, provider: Arc<dyn ShardReaderProvider>) -> Self {
        Self {
            shard_id,
            reader_id,
            provider,
            reader: OnceCell::new(),
        }
    }

    /// The shard.
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Job-unique id of this reader context.
    pub fn reader_id(&self) -> u32 {
        self.reader_id
    }

    /// Returns true once the reader was opened.
    pub fn is_open(&self) -> bool {
        self.reader.get().is_some()
    }

    /// Returns the reader, opening it on first use.
    pub fn reader(&self) -> QuarryResult<Arc<dyn ShardReader>> {
        self.reader
            .get_or_try_init(|| {
                tracing::trace!("opening reader {} for shard {}", self.reader_id, self.shard_id);
                self.provider.open_reader(&self.shard_id)
            })
            .cloned()
    }

    /// Returns a fresh iterator over the shard.
    pub fn scan(&self) -> QuarryResult<BoxedBatchIterator> {
        self.reader()?.scan()
    }
}

impl fmt::Debug for SharedShardContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedShardContext")
            .field("shard_id", &self.shard_id)
            .field("reader_id", &self.reader_id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Shard contexts of one job, created at most once per shard.
///
/// Lookups of existing contexts only take a shard read lock of the map;
/// creation happens inside the map's atomic get-or-insert, so concurrent
/// first accesses to one shard create exactly one context. A context is
/// never replaced for the lifetime of the job.
pub struct SharedShardContexts {
    provider: Arc<dyn ShardReaderProvider>,
    contexts: DashMap<ShardId, Arc<SharedShardContext>>,
    next_reader_id: AtomicU32,
    created: AtomicUsize,
}

impl SharedShardContexts {
    /// Creates an empty cache opening readers through `provider`.
    pub fn new(provider: Arc<dyn ShardReaderProvider>) -> Self {
        Self {
            provider,
            contexts: DashMap::new(),
            next_reader_id: AtomicU32::new(0),
            created: AtomicUsize::new(0),
        }
    }

    /// Returns the context for `shard_id`, creating it if missing.
    pub fn get_or_create_context(&self, shard_id: &ShardId) -> Arc<SharedShardContext> {
        if let Some(context) = self.contexts.get(shard_id) {
            return Arc::clone(context.value());
        }
        let context = self
            .contexts
            .entry(shard_id.clone())
            .or_insert_with(|| {
                let reader_id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
                self.new_context(shard_id.clone(), reader_id)
            });
        Arc::clone(context.value())
    }

    /// Creates the context for `shard_id` with a reader id reserved by the
    /// caller. Fails if the shard already has a context.
    pub fn create_context(
        &self,
        shard_id: ShardId,
        reader_id: u32,
    ) -> QuarryResult<Arc<SharedShardContext>> {
        match self.contexts.entry(shard_id) {
            Entry::Occupied(entry) => Err(QuarryError::illegal_state(format!(
                "shard context for {} already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                let context = self.new_context(entry.key().clone(), reader_id);
                entry.insert(Arc::clone(&context));
                Ok(context)
            }
        }
    }

    /// Returns the context for `shard_id` if one was created.
    pub fn get(&self, shard_id: &ShardId) -> Option<Arc<SharedShardContext>> {
        self.contexts.get(shard_id).map(|c| Arc::clone(c.value()))
    }

    /// Number of shard contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns true if no context was created yet.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Number of context objects ever constructed.
    pub fn num_created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    fn new_context(&self, shard_id: ShardId, reader_id: u32) -> Arc<SharedShardContext> {
        self.created.fetch_add(1, Ordering::AcqRel);
        tracing::trace!("created shard context {} for {}", reader_id, shard_id);
        Arc::new(SharedShardContext::new(
            shard_id,
            reader_id,
            Arc::clone(&self.provider),
        ))
    }
}

impl fmt::Debug for SharedShardContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedShardContexts")
            .field("contexts", &self.contexts.len())
            .field("created", &self.num_created())
            .finish()
    }
}
