// src/seed.rs
//
// Per-repeat seed derivation.
//
// Seeds are a pure function of (base_seed, scenario_index, repeat_index), so
// the seed a repeat receives never depends on worker count, scheduling or
// retries. A retried repeat reuses its seed.

/// SplitMix64 finalizer.
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of repeat `repeat_index` of scenario `scenario_index`.
pub fn repeat_seed(base_seed: u64, scenario_index: usize, repeat_index: u32) -> u64 {
    let scenario = mix64(base_seed ^ mix64(scenario_index as u64));
    mix64(scenario ^ (repeat_index as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93))
}

/// Expand the seeds of one scenario into (repeat_index, seed) pairs.
pub fn expand_seeds(base_seed: u64, scenario_index: usize, repeats: u32) -> Vec<(u32, u64)> {
    (0..repeats)
        .map(|k| (k, repeat_seed(base_seed, scenario_index, k)))
        .collect()
}
