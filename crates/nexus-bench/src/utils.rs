//! Benchmark utilities and helpers.

use nexus_test::{request_row, t1_values};
use nexus_vm::{Slice, Value, VmResult};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates a random partition key.
pub fn random_string(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates `partitions` distinct partition keys.
pub fn generate_partition_keys(partitions: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..partitions)
        .map(|i| format!("{}{:04}", random_string(&mut rng, 8), i))
        .collect()
}

/// Generates `rows_per_partition` `t1` rows for each key, with strictly
/// increasing order keys inside a partition.
pub fn generate_t1_rows(keys: &[String], rows_per_partition: usize) -> Vec<Vec<Value>> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut rows = Vec::with_capacity(keys.len() * rows_per_partition);
    for key in keys {
        let mut ts = 1_000_i64;
        for n in 0..rows_per_partition {
            ts += rng.gen_range(1..10);
            let col1 = i32::try_from(n).unwrap_or(i32::MAX);
            rows.push(t1_values(key, col1, rng.gen_range(0.0..100.0), ts));
        }
    }
    rows
}

/// Generates request rows spread over `keys`, each newer than any stored
/// row.
pub fn generate_requests(keys: &[String], count: usize) -> VmResult<Vec<Slice>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|_| {
            let key = &keys[rng.gen_range(0..keys.len())];
            request_row(key, rng.gen_range(0.0..100.0), i64::MAX / 2)
        })
        .collect()
}
