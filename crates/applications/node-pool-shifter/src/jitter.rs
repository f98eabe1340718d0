//! Jittered sleep durations
//!
//! Every shifter replica polls its cluster on the same configured interval.
//! Spreading the wake-ups by ±25% keeps replicas from hitting the GKE control
//! plane at the same instant.

use rand::Rng;
use std::time::Duration;

/// Fraction of the base value used as maximum deviation
pub const JITTER_FRACTION: f64 = 0.25;

/// Randomize `base` within `[base - 25%, base + 25%)`.
///
/// Values too small to deviate by at least one unit are returned unchanged.
pub fn apply_jitter(base: u64) -> u64 {
    apply_jitter_with(&mut rand::thread_rng(), base)
}

/// Same as [`apply_jitter`] with a caller-provided RNG
pub fn apply_jitter_with<R: Rng + ?Sized>(rng: &mut R, base: u64) -> u64 {
    let deviation = (JITTER_FRACTION * base as f64) as u64;
    if deviation == 0 {
        return base;
    }
    base - deviation + rng.gen_range(0..2 * deviation)
}

/// Jittered duration for a base value expressed in seconds
pub fn jittered_secs(base_secs: u64) -> Duration {
    Duration::from_secs(apply_jitter(base_secs))
}
