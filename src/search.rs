//! Shared search machinery: the bounded result set, the branch queue entry
//! and the per-query visit budget.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use fixedbitset::FixedBitSet;

use crate::distance::DistanceMetric;

/// A single nearest-neighbor result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Zero-based point index in the dataset.
    pub index: usize,
    /// Distance from the query (lower is closer).
    pub distance: f32,
}

/// Candidate held in the result heap. Ordered by (distance, index) so that
/// equal distances resolve towards the lower point index.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    reduced: f32,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.reduced
            .total_cmp(&other.reduced)
            .then(self.index.cmp(&other.index))
    }
}

/// Fixed-capacity set of the best `k` candidates seen so far.
///
/// Backed by a max-heap so the current worst candidate is at the top.
#[derive(Debug)]
pub struct KnnResultSet {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl KnnResultSet {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Reduced distance a new candidate has to beat; infinite until full.
    #[inline]
    pub fn worst(&self) -> f32 {
        if self.is_full() {
            self.heap.peek().map_or(f32::INFINITY, |c| c.reduced)
        } else {
            f32::INFINITY
        }
    }

    /// Offer a candidate. Callers must not offer the same index twice.
    #[inline]
    pub fn add(&mut self, index: usize, reduced: f32) {
        if self.k == 0 {
            return;
        }
        let cand = Candidate { reduced, index };
        if !self.is_full() {
            self.heap.push(cand);
        } else if let Some(top) = self.heap.peek() {
            if cand < *top {
                self.heap.pop();
                self.heap.push(cand);
            }
        }
    }

    /// Drain into neighbors sorted by ascending distance, ties by index.
    pub fn into_sorted(self, metric: DistanceMetric) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                index: c.index,
                distance: metric.finish(c.reduced),
            })
            .collect()
    }
}

/// An unexplored subtree waiting in the branch queue.
///
/// `priority` orders exploration (smallest first). `bound` is a lower bound
/// on the reduced distance from the query to anything inside the subtree
/// and is what pruning tests against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Branch<N> {
    pub priority: f32,
    pub bound: f32,
    pub node: N,
}

impl<N> PartialEq for Branch<N> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<N> Eq for Branch<N> {}

impl<N> PartialOrd for Branch<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<N> Ord for Branch<N> {
    // Reversed: BinaryHeap is a max-heap and we pop the closest branch.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then(other.bound.total_cmp(&self.bound))
    }
}

/// Per-query traversal state: which points were already examined and how
/// much of the budget is spent.
#[derive(Debug)]
pub struct SearchContext {
    visited: FixedBitSet,
    checks: usize,
    max_checks: usize,
}

impl SearchContext {
    pub fn new(num_points: usize, max_checks: usize) -> Self {
        Self {
            visited: FixedBitSet::with_capacity(num_points),
            checks: 0,
            max_checks,
        }
    }

    /// Points examined so far.
    pub fn checks(&self) -> usize {
        self.checks
    }

    /// Start a fresh budget, keeping the visited set.
    pub fn reset_budget(&mut self) {
        self.checks = 0;
    }

    /// True once the budget is spent and `result` holds `k` candidates.
    #[inline]
    pub fn exhausted(&self, result: &KnnResultSet) -> bool {
        self.checks >= self.max_checks && result.is_full()
    }

    /// Mark `point` examined. Returns false if it already was.
    #[inline]
    pub fn visit(&mut self, point: usize) -> bool {
        if self.visited.put(point) {
            return false;
        }
        self.checks += 1;
        true
    }
}
