//! Weight initialization from the builder-owned seeded random stream.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Samples `n` values from a zero-mean normal with standard deviation
/// `sigma`.
pub fn normal_vec(rng: &mut StdRng, n: usize, sigma: f32) -> Vec<f32> {
    let dist = Normal::new(0.0f32, sigma).expect("sigma must be finite and non-negative");
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Standard deviation for a dense weight of the given fan-in/fan-out,
/// `sqrt(2 / (n_in + n_out))`.
pub fn weight_sigma(n_in: usize, n_out: usize) -> f32 {
    (2.0 / (n_in + n_out) as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_normal_vec_deterministic_per_seed() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(normal_vec(&mut a, 16, 0.5), normal_vec(&mut b, 16, 0.5));
    }

    #[test]
    fn test_weight_sigma() {
        let s = weight_sigma(4, 4);
        assert!((s - 0.5).abs() < 1e-6);
    }
}
