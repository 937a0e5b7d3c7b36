//! Bounded top-k selection with a deterministic total order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Upper bound on the heap allocation made up front; larger `k` grows on demand.
const MAX_PREALLOCATED: usize = 4096;

/// A scored candidate.
///
/// Ordering is by rank: a candidate is *greater* when it has the higher score,
/// or the same score and the smaller key.
#[derive(Debug, Clone)]
pub struct Scored<K> {
    pub key: K,
    pub score: f64,
}

impl<K> Scored<K> {
    pub fn new(key: K, score: f64) -> Self {
        Self { key, score }
    }
}

impl<K: Ord> PartialEq for Scored<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for Scored<K> {}

impl<K: Ord> PartialOrd for Scored<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for Scored<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.key.cmp(&self.key))
    }
}

/// Keeps the `k` best candidates seen so far.
///
/// Backed by a min-heap on rank, so the worst retained candidate sits on top
/// and each push costs `O(log k)`.
#[derive(Debug, Clone)]
pub struct TopK<K> {
    k: usize,
    heap: BinaryHeap<Reverse<Scored<K>>>,
}

impl<K: Ord> TopK<K> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(MAX_PREALLOCATED)),
        }
    }

    /// Offer a candidate; it is kept only if it outranks the current worst.
    pub fn push(&mut self, candidate: Scored<K>) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate > worst.0 {
                *worst = Reverse(candidate);
            }
        }
    }

    /// The lowest-ranked retained candidate, once `k` are held.
    pub fn threshold(&self) -> Option<&Scored<K>> {
        if self.heap.len() < self.k {
            None
        } else {
            self.heap.peek().map(|r| &r.0)
        }
    }

    /// Fold another selection into this one.
    pub fn merge(mut self, other: TopK<K>) -> TopK<K> {
        for Reverse(candidate) in other.heap {
            self.push(candidate);
        }
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a Vec, best first.
    pub fn into_sorted_vec(self) -> Vec<Scored<K>> {
        // Ascending `Reverse` order is descending rank.
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}
