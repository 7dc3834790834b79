//! Every join strategy produces the same rows on random inputs.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use quarry_common::{QuarryError, QuarryResult};
use quarry_data::batch::{collect_all, InMemoryBatchIterator};
use quarry_data::breaker::{BreakingRowAccounting, CircuitBreaker, NoopRowAccounting};
use quarry_data::join::{join, JoinPredicate, JoinStrategy};
use quarry_data::testing::{multiset, BatchSimulatingIterator};
use quarry_data::{BoxedBatchIterator, Row, Value};
use quarry_test::utils::{init_tracing, random_rows};

const STRATEGIES: [JoinStrategy; 5] = [
    JoinStrategy::NestedLoop,
    JoinStrategy::BlockNestedLoop { block_size: 1 },
    JoinStrategy::BlockNestedLoop { block_size: 7 },
    JoinStrategy::Hash { block_size: 5 },
    JoinStrategy::SortedMerge,
];

/// Inputs sorted on the key column, so the sorted-merge join applies.
fn inputs(seed: u64) -> (Vec<Vec<Value>>, Vec<Vec<Value>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut outer = random_rows(&mut rng, 40, 8, 7);
    let mut inner = random_rows(&mut rng, 30, 8, 7);
    outer.sort();
    inner.sort();
    (outer, inner)
}

fn source(rows: &[Vec<Value>], batch_size: Option<usize>) -> BoxedBatchIterator {
    let it = InMemoryBatchIterator::from_values(rows.to_vec());
    match batch_size {
        Some(size) => Box::new(BatchSimulatingIterator::new(it, size)),
        None => Box::new(it),
    }
}

fn expected_equi_join(
    outer: &[Vec<Value>],
    inner: &[Vec<Value>],
    residual: impl Fn(&[Value]) -> bool,
) -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    for o in outer {
        for i in inner {
            if o[0] != Value::Null && o[0] == i[0] {
                let combined: Vec<Value> = o.iter().chain(i.iter()).cloned().collect();
                if residual(&combined) {
                    rows.push(combined);
                }
            }
        }
    }
    rows
}

#[tokio::test]
async fn test_strategies_agree_on_equi_join() {
    init_tracing();
    for seed in 0..8 {
        let (outer, inner) = inputs(seed);
        let expected = multiset(&expected_equi_join(&outer, &inner, |_| true));
        for strategy in STRATEGIES {
            for batch_size in [None, Some(3)] {
                let mut it = join(
                    source(&outer, batch_size),
                    source(&inner, batch_size),
                    JoinPredicate::equals(0, 0),
                    strategy,
                    Box::new(NoopRowAccounting),
                );
                let rows = collect_all(&mut it).await.unwrap();
                assert_eq!(
                    multiset(&rows),
                    expected,
                    "seed {} strategy {:?} batch {:?}",
                    seed,
                    strategy,
                    batch_size
                );
            }
        }
    }
}

#[tokio::test]
async fn test_strategies_agree_with_residual() {
    for seed in 100..104 {
        let (outer, inner) = inputs(seed);
        // outer position below inner position
        let residual = |row: &[Value]| row[1] < row[3];
        let expected = multiset(&expected_equi_join(&outer, &inner, residual));
        let predicate = JoinPredicate::and(vec![
            JoinPredicate::equals(0, 0),
            JoinPredicate::custom(|row: &dyn Row| -> QuarryResult<bool> {
                Ok(row.get(1) < row.get(3))
            }),
        ]);
        for strategy in STRATEGIES {
            let mut it = join(
                source(&outer, Some(4)),
                source(&inner, None),
                predicate.clone(),
                strategy,
                Box::new(NoopRowAccounting),
            );
            let rows = collect_all(&mut it).await.unwrap();
            assert_eq!(multiset(&rows), expected, "seed {} {:?}", seed, strategy);
        }
    }
}

#[tokio::test]
async fn test_empty_sides() {
    let (outer, _) = inputs(7);
    for strategy in STRATEGIES {
        let mut it = join(
            source(&outer, Some(2)),
            source(&[], None),
            JoinPredicate::equals(0, 0),
            strategy,
            Box::new(NoopRowAccounting),
        );
        assert!(collect_all(&mut it).await.unwrap().is_empty());

        let mut it = join(
            source(&[], None),
            source(&outer, Some(2)),
            JoinPredicate::equals(0, 0),
            strategy,
            Box::new(NoopRowAccounting),
        );
        assert!(collect_all(&mut it).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_breaker_trips_buffering_joins() {
    let (outer, inner) = inputs(11);
    for strategy in [
        JoinStrategy::BlockNestedLoop { block_size: 100 },
        JoinStrategy::Hash { block_size: 100 },
    ] {
        let breaker = Arc::new(CircuitBreaker::new("query", 100));
        let mut it = join(
            source(&outer, None),
            source(&inner, None),
            JoinPredicate::equals(0, 0),
            strategy,
            Box::new(BreakingRowAccounting::new(Arc::clone(&breaker), "join")),
        );
        let err = collect_all(&mut it).await.unwrap_err();
        assert!(
            matches!(err, QuarryError::CircuitBreaking { limit: 100, .. }),
            "{:?}: {}",
            strategy,
            err
        );
        drop(it);
        assert_eq!(breaker.used(), 0);
    }
}
