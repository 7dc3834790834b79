//! Benchmark utilities and helpers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quarry_data::{OwnedRow, Value};

/// Generates `count` rows `[key, payload]` with keys drawn from
/// `0..num_keys`, sorted on the key so every join strategy applies.
pub fn generate_join_input(count: usize, num_keys: i64, seed: u64) -> Vec<OwnedRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows: Vec<OwnedRow> = (0..count)
        .map(|i| {
            OwnedRow::new(vec![
                Value::BigInt(rng.gen_range(0..num_keys)),
                Value::BigInt(i as i64),
            ])
        })
        .collect();
    rows.sort_by(|a, b| a.values().cmp(b.values()));
    rows
}
