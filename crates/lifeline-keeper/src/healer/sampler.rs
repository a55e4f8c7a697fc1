//! Availability sampling

use rand::Rng;

/// Number of blocks to sample: `min(configured, ceil(size / 2))`
pub fn sample_size(configured: usize, segment_size: usize) -> usize {
    configured.min(segment_size.div_ceil(2))
}

/// Pick exactly `count` distinct block indices out of `segment_size`,
/// sorted ascending. `count` is capped at `segment_size`.
pub fn select_sample<R: Rng + ?Sized>(rng: &mut R, segment_size: usize, count: usize) -> Vec<usize> {
    let count = count.min(segment_size);
    let mut picked = rand::seq::index::sample(rng, segment_size, count).into_vec();
    picked.sort_unstable();
    picked
}

/// `success / (success + failed)`, defined as 0 when nothing was attempted
pub fn persistence_rate(success: u32, failed: u32) -> f64 {
    let attempts = success + failed;
    if attempts == 0 {
        return 0.0;
    }
    f64::from(success) / f64::from(attempts)
}

/// Health decision for a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// At or above tolerance, nothing to do
    Healthy,
    /// Below tolerance
    Degraded,
}

/// Compare a persistence rate against the tolerance
pub fn verdict(rate: f64, tolerance: f64) -> Verdict {
    if rate >= tolerance {
        Verdict::Healthy
    } else {
        Verdict::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_sample_size_capped_by_half() {
        assert_eq!(sample_size(18, 10), 5);
        assert_eq!(sample_size(18, 11), 6);
        assert_eq!(sample_size(18, 200), 18);
        assert_eq!(sample_size(18, 2), 1);
    }

    #[test]
    fn test_select_exact_distinct() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let picked = select_sample(&mut rng, 10, sample_size(18, 10));
            assert_eq!(picked.len(), 5);
            let distinct: HashSet<_> = picked.iter().collect();
            assert_eq!(distinct.len(), 5);
            assert!(picked.iter().all(|i| *i < 10));
        }
    }

    #[test]
    fn test_select_whole_segment() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_sample(&mut rng, 4, 9), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_rate_without_attempts() {
        assert_eq!(persistence_rate(0, 0), 0.0);
        assert!((persistence_rate(3, 1) - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verdict_at_tolerance() {
        assert_eq!(verdict(0.66, 0.66), Verdict::Healthy);
        assert_eq!(verdict(0.6, 0.66), Verdict::Degraded);
        assert_eq!(verdict(0.0, 0.0), Verdict::Healthy);
    }
}
