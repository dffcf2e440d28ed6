use rand::Rng;
use rand_distr::uniform::SampleRange as _;

/// Outcome of drawing files at random.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    /// There was nothing to draw from. Not an error, the caller should stop.
    NoCandidates,
    /// Drawn elements, in draw order.
    Picked(Vec<T>),
}

/// Draws `min(n, candidates.len())` elements uniformly at random, without replacement.
///
/// Each step picks a uniform index into the remaining pool and takes that
/// element out, so nothing is drawn twice. This is a partial Fisher–Yates shuffle.
pub fn sample<T, R: Rng>(mut candidates: Vec<T>, n: usize, rng: &mut R) -> Selection<T> {
    if candidates.is_empty() {
        return Selection::NoCandidates;
    }

    let n = n.min(candidates.len());
    let mut picked = Vec::with_capacity(n);

    while picked.len() < n {
        let Ok(i) = (0..candidates.len()).sample_single(rng) else {
            break;
        };

        // Order of the pool doesn't matter, every index is equally likely.
        picked.push(candidates.swap_remove(i));
    }

    tracing::debug!(requested = n, picked = picked.len(), "sampled candidates");
    Selection::Picked(picked)
}
