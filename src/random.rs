//! Random draws used by the sampler.

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;

/// Environment variable holding the run seed (decimal u64).
pub(crate) const SEED_ENV: &str = "TREECLUST_SEED";

/// RNG for a run: seeded from `TREECLUST_SEED` when set, from entropy
/// otherwise.
pub(crate) fn rng_from_env() -> ChaCha8Rng {
    match std::env::var(SEED_ENV).ok().and_then(|s| s.parse().ok()) {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Uniform draw from the open interval (0, 1).
pub(crate) fn frand1<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    loop {
        let u: f64 = rng.gen();
        if u > 0. {
            return u;
        }
    }
}

/// Draw from `weights.len()` outcomes with the given relative weights.
/// Falls back to a uniform draw when the weights do not form a distribution
/// (all zero).
pub(crate) fn sample_weighted<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> usize {
    match WeightedIndex::new(weights) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.gen_range(0..weights.len()),
    }
}

/// Draw from the normal distribution (`mean`, `sd`) truncated to the open
/// interval (`a`, `b`), by rejection: redraw until the sample lies inside.
///
/// Rejection can be slow when (`a`, `b`) sits far out in the tail; the
/// sampler only calls this with bounds spanning the mean.
pub(crate) fn rtnorm<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64, a: f64, b: f64) -> f64 {
    let normal = Normal::new(mean, sd).expect("standard deviation must be non-negative");
    loop {
        let x = normal.sample(rng);
        if x > a && x < b {
            return x;
        }
    }
}
