//! Random sampling of representative items for verification
//!
//! Verifying every restored namespace or every backup in a large batch is
//! slow; suites pick a random handful instead. Each call draws fresh
//! randomness unless the caller supplies a seeded RNG.

use keel_common::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// Pick `k` distinct elements of `items` without replacement.
///
/// Fails with [`Error::SampleTooLarge`] if `k` exceeds `items.len()`.
pub fn sample<T: Clone>(items: &[T], k: usize) -> Result<Vec<T>> {
    sample_with(&mut rand::thread_rng(), items, k)
}

/// Like [`sample`], drawing from `rng`
pub fn sample_with<T: Clone, R: Rng + ?Sized>(rng: &mut R, items: &[T], k: usize) -> Result<Vec<T>> {
    if k > items.len() {
        return Err(Error::SampleTooLarge {
            requested: k,
            available: items.len(),
        });
    }
    Ok(items.choose_multiple(rng, k).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_sample_returns_distinct_members() {
        let namespaces: Vec<String> = (0..20).map(|i| format!("ns-{i}")).collect();
        for k in [0, 1, 7, 20] {
            let picked = sample(&namespaces, k).unwrap();
            assert_eq!(picked.len(), k);
            let unique: HashSet<_> = picked.iter().collect();
            assert_eq!(unique.len(), k);
            assert!(picked.iter().all(|p| namespaces.contains(p)));
        }
    }

    #[test]
    fn test_sample_larger_than_input_fails() {
        let err = sample(&[1, 2, 3], 4).unwrap_err();
        assert!(matches!(
            err,
            Error::SampleTooLarge {
                requested: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn test_sample_of_empty_input() {
        assert!(sample::<u8>(&[], 0).unwrap().is_empty());
        assert!(sample::<u8>(&[], 1).is_err());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let items: Vec<u32> = (0..100).collect();
        let a = sample_with(&mut StdRng::seed_from_u64(7), &items, 10).unwrap();
        let b = sample_with(&mut StdRng::seed_from_u64(7), &items, 10).unwrap();
        assert_eq!(a, b);
    }
}
