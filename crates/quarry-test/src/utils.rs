//! Shared helpers for the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::Rng;

use quarry_common::{QuarryError, QuarryResult, ShardId};
use quarry_data::batch::InMemoryBatchIterator;
use quarry_data::testing::BatchSimulatingIterator;
use quarry_data::{BoxedBatchIterator, Value};
use quarry_exec::phase::ExecutionPhase;
use quarry_exec::shard::{ShardReader, ShardReaderProvider};

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct InMemoryShardReader {
    shard_id: ShardId,
    rows: Arc<Vec<Vec<Value>>>,
    batch_size: Option<usize>,
}

impl ShardReader for InMemoryShardReader {
    fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    fn scan(&self) -> QuarryResult<BoxedBatchIterator> {
        let source = InMemoryBatchIterator::from_values(self.rows.iter().cloned());
        Ok(match self.batch_size {
            Some(batch_size) => Box::new(BatchSimulatingIterator::new(source, batch_size)),
            None => Box::new(source),
        })
    }
}

/// Shard storage held in memory.
///
/// With a batch size set, scans hand out rows in batches so consumers go
/// through the load path.
#[derive(Default)]
pub struct InMemoryShardProvider {
    shards: RwLock<HashMap<ShardId, Arc<Vec<Vec<Value>>>>>,
    batch_size: Option<usize>,
    opened: AtomicUsize,
}

impl InMemoryShardProvider {
    /// Creates a provider without shards.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans expose `batch_size` rows per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Adds or replaces a shard.
    pub fn add_shard(&self, shard_id: ShardId, rows: Vec<Vec<Value>>) {
        self.shards.write().insert(shard_id, Arc::new(rows));
    }

    /// Number of readers opened.
    pub fn num_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ShardReaderProvider for InMemoryShardProvider {
    fn open_reader(&self, shard_id: &ShardId) -> QuarryResult<Arc<dyn ShardReader>> {
        let rows = self
            .shards
            .read()
            .get(shard_id)
            .cloned()
            .ok_or_else(|| QuarryError::execution_failed(format!("unknown shard {}", shard_id)))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryShardReader {
            shard_id: shard_id.clone(),
            rows,
            batch_size: self.batch_size,
        }))
    }
}

/// Collect phase over `ids` of `index` without filter, projection or limit.
pub fn collect_phase(index: &str, ids: &[u32]) -> ExecutionPhase {
    ExecutionPhase::Collect {
        shards: ids.iter().map(|id| ShardId::new(index, *id)).collect(),
        filter: None,
        projection: None,
        limit: None,
    }
}

/// Generates `count` rows `[key, position]` with keys drawn from
/// `0..num_keys`; about one row in `null_every` gets a NULL key.
pub fn random_rows(
    rng: &mut StdRng,
    count: usize,
    num_keys: i64,
    null_every: u32,
) -> Vec<Vec<Value>> {
    (0..count)
        .map(|i| {
            let key = if null_every > 0 && rng.gen_ratio(1, null_every) {
                Value::Null
            } else {
                Value::BigInt(rng.gen_range(0..num_keys))
            };
            vec![key, Value::BigInt(i as i64)]
        })
        .collect()
}
