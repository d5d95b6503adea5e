//! Unbiased k-of-n selection.

use rand::Rng;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Draw up to `k` members of `pool`.
///
/// If the pool has no more than `k` members it is returned unchanged.
/// Otherwise every k-subset is equally likely.
pub fn draw<T, R>(pool: &BTreeSet<T>, k: usize, rng: &mut R) -> BTreeSet<T>
where
    T: Ord + Clone,
    R: Rng + ?Sized,
{
    if pool.len() <= k {
        return pool.clone();
    }

    let picked: HashSet<usize> = choose_indices(pool.len(), k, rng).into_iter().collect();
    pool.iter()
        .enumerate()
        .filter(|(index, _)| picked.contains(index))
        .map(|(_, member)| member.clone())
        .collect()
}

/// Partial Fisher-Yates over the conceptual array `0..n`.
///
/// Only swapped slots are materialized in `taken`, so auxiliary space is O(k).
/// Requires `k <= n`.
fn choose_indices<R>(n: usize, k: usize, rng: &mut R) -> Vec<usize>
where
    R: Rng + ?Sized,
{
    debug_assert!(k <= n, "cannot choose {k} of {n}");

    let mut taken: HashMap<usize, usize> = HashMap::with_capacity(k);
    let mut chosen = Vec::with_capacity(k);
    let mut len = n;

    for _ in 0..k {
        let x = rng.random_range(0..len);
        chosen.push(taken.get(&x).copied().unwrap_or(x));
        len -= 1;
        // Slot x now holds whatever sat at the end of the shrinking range.
        let last = taken.get(&len).copied().unwrap_or(len);
        taken.insert(x, last);
    }

    chosen
}
