//! Immutable finite probability distributions.

use rand::Rng;
use smallvec::SmallVec;
use thiserror::Error;

/// Tolerance for the total-mass check on construction.
const MASS_EPS: f64 = 1e-9;

/// Error constructing a distribution.
#[derive(Debug, Error)]
pub enum DistError {
    #[error("negative probability {p}")]
    NegativeProbability { p: f64 },

    #[error("probabilities sum to {sum}, expected 1")]
    MassMismatch { sum: f64 },

    #[error("distribution has empty support")]
    EmptySupport,
}

/// An immutable finite probability mass function.
///
/// The support is kept in insertion order; `sample` draws by inverse CDF over
/// that order, so a seeded RNG yields reproducible outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution<T> {
    support: SmallVec<[(T, f64); 2]>,
}

impl<T> Distribution<T> {
    /// Point mass on `x`.
    pub fn dirac(x: T) -> Self {
        let mut support = SmallVec::new();
        support.push((x, 1.0));
        Distribution { support }
    }

    /// Build from (outcome, probability) pairs. Zero-probability entries are
    /// dropped; negative probabilities and total mass away from 1 are errors.
    pub fn new(pairs: impl IntoIterator<Item = (T, f64)>) -> Result<Self, DistError>
    where
        T: PartialEq,
    {
        let mut support: SmallVec<[(T, f64); 2]> = SmallVec::new();
        let mut sum = 0.0;
        for (x, p) in pairs {
            if p < 0.0 {
                return Err(DistError::NegativeProbability { p });
            }
            if p == 0.0 {
                continue;
            }
            sum += p;
            match support.iter_mut().find(|(y, _)| *y == x) {
                Some((_, q)) => *q += p,
                None => support.push((x, p)),
            }
        }
        if support.is_empty() {
            return Err(DistError::EmptySupport);
        }
        if (sum - 1.0).abs() > MASS_EPS {
            return Err(DistError::MassMismatch { sum });
        }
        Ok(Distribution { support })
    }

    /// Number of support elements.
    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    /// True iff the distribution is a point mass.
    pub fn is_dirac(&self) -> bool {
        self.support.len() == 1
    }

    /// Iterate over (outcome, probability) pairs in support order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.support.iter().map(|(x, p)| (x, *p))
    }

    /// The support, in insertion order.
    pub fn support(&self) -> impl Iterator<Item = &T> {
        self.support.iter().map(|(x, _)| x)
    }

    /// Pushforward under `f`, merging mass of colliding images. The first
    /// occurrence of an image keeps its position in the support order.
    pub fn transform<U: PartialEq>(&self, mut f: impl FnMut(&T) -> U) -> Distribution<U> {
        let mut support: SmallVec<[(U, f64); 2]> = SmallVec::new();
        for (x, p) in &self.support {
            let y = f(x);
            match support.iter_mut().find(|(z, _)| *z == y) {
                Some((_, q)) => *q += p,
                None => support.push((y, *p)),
            }
        }
        Distribution { support }
    }

    /// Expected value of `f` under the distribution.
    pub fn expected_value(&self, mut f: impl FnMut(&T) -> f64) -> f64 {
        self.support.iter().map(|(x, p)| p * f(x)).sum()
    }

    /// Sample an outcome by inverse CDF over the support order.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> &T {
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (x, p) in &self.support {
            acc += p;
            if u < acc {
                return x;
            }
        }
        // Rounding left u past the accumulated mass; the last entry is sound.
        &self.support[self.support.len() - 1].0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_dirac_expectation() {
        let d = Distribution::dirac(7);
        assert_eq!(d.expected_value(|&x| x as f64), 7.0);
        assert!(d.is_dirac());
    }

    #[test]
    fn test_mass_checked() {
        assert!(matches!(
            Distribution::new([(0, 0.5), (1, 0.4)]),
            Err(DistError::MassMismatch { .. })
        ));
        assert!(matches!(
            Distribution::new([(0, -0.5), (1, 1.5)]),
            Err(DistError::NegativeProbability { .. })
        ));
    }

    #[test]
    fn test_zero_entries_dropped() {
        let d = Distribution::new([(0, 0.0), (1, 1.0)]).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.support().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_duplicate_outcomes_merged() {
        let d = Distribution::new([(0, 0.25), (1, 0.5), (0, 0.25)]).unwrap();
        assert_eq!(d.len(), 2);
        assert_eq!(d.expected_value(|&x| x as f64), 0.5);
    }

    #[test]
    fn test_transform_merges_collisions() {
        let d = Distribution::new([(0, 0.2), (1, 0.3), (2, 0.5)]).unwrap();
        let e = d.transform(|&x| x % 2);
        assert_eq!(e.len(), 2);
        // 0 and 2 collide on image 0
        assert!((e.expected_value(|&x| x as f64) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_transform_expectation_composes() {
        let d = Distribution::new([(1, 0.4), (2, 0.6)]).unwrap();
        let f = |x: &i32| x * 10;
        let g = |x: &i32| *x as f64 + 1.0;
        let lhs = d.transform(f).expected_value(g);
        let rhs = d.expected_value(|x| g(&f(x)));
        assert!((lhs - rhs).abs() < 1e-12);
    }

    #[test]
    fn test_sample_reproducible() {
        let d = Distribution::new([("a", 0.5), ("b", 0.5)]).unwrap();
        let mut r1 = StdRng::seed_from_u64(42);
        let mut r2 = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(d.sample(&mut r1), d.sample(&mut r2));
        }
    }

    #[test]
    fn test_sample_frequencies() {
        let d = Distribution::new([(0, 0.8), (1, 0.2)]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 10_000;
        let zeros = (0..n).filter(|_| *d.sample(&mut rng) == 0).count();
        let freq = zeros as f64 / n as f64;
        assert!((freq - 0.8).abs() < 0.02, "freq = {freq}");
    }
}
