use std::collections::BinaryHeap;

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::index::NearestNeighborIndex;
use crate::params::{CentersInit, IndexParameters};
use crate::search::{Branch, KnnResultSet, SearchContext};

/// Relative slack on ball bounds so rounding never prunes a point lying
/// exactly on the boundary.
const RADIUS_SLACK: f32 = 1e-4;

/// Round limit when clustering runs "until convergence". Mean updates do
/// not minimize L1 cost, so Manhattan assignments can cycle forever.
const CONVERGENCE_ROUNDS: usize = 300;

#[derive(Debug, Clone)]
enum NodeKind {
    Internal { children: Vec<usize> },
    Leaf { points: Vec<usize> },
}

#[derive(Debug, Clone)]
struct KMeansNode {
    /// Mean of every point under this node.
    center: Array1<f32>,
    /// Largest metric-space distance from `center` to a point under this node.
    radius: f32,
    kind: NodeKind,
}

/// Hierarchical k-means tree.
///
/// Each internal node clusters its points into at most `branching` groups
/// and stores one child per non-empty group. Queries descend towards the
/// closest child center and queue the siblings, so later exploration
/// resumes at whichever unexplored cluster is nearest.
#[derive(Debug, Clone)]
pub struct KMeansTreeIndex {
    dataset: Dataset,
    metric: DistanceMetric,
    /// Index 0 is the root.
    nodes: Vec<KMeansNode>,
}

impl KMeansTreeIndex {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Leaf { .. }))
            .count()
    }

    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        mut node: usize,
        mut bound: f32,
        query: &ArrayView1<f32>,
        result: &mut KnnResultSet,
        ctx: &mut SearchContext,
        queue: &mut BinaryHeap<Branch<usize>>,
        scratch: &mut Vec<Branch<usize>>,
    ) {
        loop {
            if bound > result.worst() || ctx.exhausted(result) {
                return;
            }
            match &self.nodes[node].kind {
                NodeKind::Leaf { points } => {
                    for &p in points {
                        if ctx.exhausted(result) {
                            return;
                        }
                        if ctx.visit(p) {
                            result.add(p, self.metric.reduced(query, &self.dataset.point(p)));
                        }
                    }
                    return;
                }
                NodeKind::Internal { children } => {
                    scratch.clear();
                    for &child in children {
                        let c = &self.nodes[child];
                        let d = self.metric.reduced(query, &c.center.view());
                        scratch.push(Branch {
                            priority: d,
                            bound: bound.max(self.ball_bound(d, c.radius)),
                            node: child,
                        });
                    }
                    // BinaryHeap order is reversed: the max is the closest.
                    let Some(closest) = scratch.iter().copied().max() else {
                        return;
                    };
                    for b in scratch.drain(..) {
                        if b.node != closest.node {
                            queue.push(b);
                        }
                    }
                    node = closest.node;
                    bound = closest.bound;
                }
            }
        }
    }

    /// Lower bound on the reduced distance from the query to any point in a
    /// ball, given the reduced distance to its center.
    #[inline]
    fn ball_bound(&self, to_center: f32, radius: f32) -> f32 {
        let dq = self.metric.to_metric_space(to_center);
        let gap = dq - radius - (dq + radius) * RADIUS_SLACK;
        if gap > 0.0 {
            self.metric.from_metric_space(gap)
        } else {
            0.0
        }
    }

    fn make_node(dataset: &Dataset, metric: DistanceMetric, points: &[usize]) -> KMeansNode {
        let center = mean_of(dataset, points);
        let radius = points
            .iter()
            .map(|&p| metric.to_metric_space(metric.reduced(&center.view(), &dataset.point(p))))
            .fold(0.0f32, f32::max);
        KMeansNode {
            center,
            radius,
            kind: NodeKind::Leaf { points: Vec::new() },
        }
    }
}

impl NearestNeighborIndex for KMeansTreeIndex {
    fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self> {
        let metric = params.metric;
        let mut rng = StdRng::seed_from_u64(params.seed.unwrap_or_default());
        let max_rounds = usize::try_from(params.iterations).unwrap_or(CONVERGENCE_ROUNDS);

        let all: Vec<usize> = (0..dataset.len()).collect();
        let mut nodes = vec![Self::make_node(dataset, metric, &all)];
        let mut pending = vec![(0usize, all)];

        while let Some((slot, items)) = pending.pop() {
            let groups = cluster(
                dataset,
                &items,
                params.branching,
                max_rounds,
                params.centers_init,
                metric,
                &mut rng,
            );
            match groups {
                Some(groups) => {
                    let mut children = Vec::with_capacity(groups.len());
                    for group in groups {
                        children.push(nodes.len());
                        nodes.push(Self::make_node(dataset, metric, &group));
                        pending.push((nodes.len() - 1, group));
                    }
                    nodes[slot].kind = NodeKind::Internal { children };
                }
                None => nodes[slot].kind = NodeKind::Leaf { points: items },
            }
        }

        Ok(Self {
            dataset: dataset.clone(),
            metric,
            nodes,
        })
    }

    fn search(&self, query: &ArrayView1<f32>, result: &mut KnnResultSet, ctx: &mut SearchContext) {
        let mut queue = BinaryHeap::new();
        let mut scratch = Vec::new();
        self.descend(0, 0.0, query, result, ctx, &mut queue, &mut scratch);
        while let Some(branch) = queue.pop() {
            if ctx.exhausted(result) {
                break;
            }
            self.descend(
                branch.node,
                branch.bound,
                query,
                result,
                ctx,
                &mut queue,
                &mut scratch,
            );
        }
    }

    fn used_memory(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                let payload = match &n.kind {
                    NodeKind::Internal { children } => children.capacity(),
                    NodeKind::Leaf { points } => points.capacity(),
                };
                std::mem::size_of::<KMeansNode>()
                    + n.center.len() * std::mem::size_of::<f32>()
                    + payload * std::mem::size_of::<usize>()
            })
            .sum()
    }

    fn size(&self) -> usize {
        self.dataset.len()
    }
}

fn mean_of(dataset: &Dataset, points: &[usize]) -> Array1<f32> {
    let mut acc = vec![0.0f64; dataset.dim()];
    for &p in points {
        for (a, &x) in acc.iter_mut().zip(dataset.point(p).iter()) {
            *a += x as f64;
        }
    }
    let n = points.len().max(1) as f64;
    acc.into_iter().map(|a| (a / n) as f32).collect()
}

/// Split `items` into at most `branching` non-empty groups by Lloyd
/// refinement. Returns `None` when the items should stay a leaf: too few of
/// them, or fewer than two distinct points to seed clusters with.
fn cluster(
    dataset: &Dataset,
    items: &[usize],
    branching: usize,
    max_rounds: usize,
    init: CentersInit,
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Option<Vec<Vec<usize>>> {
    if items.len() < branching || items.len() < 2 {
        return None;
    }

    let seeds = choose_centers(dataset, items, branching, init, metric, rng);
    if seeds.len() < 2 {
        tracing::trace!(points = items.len(), "k-means: no two distinct points, forced leaf");
        return None;
    }
    if seeds.len() < branching {
        tracing::trace!(
            points = items.len(),
            requested = branching,
            found = seeds.len(),
            "k-means: reduced branching for degenerate node"
        );
    }

    let mut centers: Vec<Array1<f32>> = seeds
        .iter()
        .map(|&p| dataset.point(p).to_owned())
        .collect();
    let mut assignment = nearest_centers(dataset, items, &centers, metric);

    for _ in 0..max_rounds {
        let mut sums = vec![vec![0.0f64; dataset.dim()]; centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for (&p, &c) in items.iter().zip(&assignment) {
            counts[c] += 1;
            for (s, &x) in sums[c].iter_mut().zip(dataset.point(p).iter()) {
                *s += x as f64;
            }
        }
        let mut moved = false;
        for (c, center) in centers.iter_mut().enumerate() {
            // An emptied cluster keeps its old center.
            if counts[c] > 0 {
                let n = counts[c] as f64;
                for (x, s) in center.iter_mut().zip(&sums[c]) {
                    let updated = (s / n) as f32;
                    moved |= updated != *x;
                    *x = updated;
                }
            }
        }
        if !moved {
            break;
        }

        let next = nearest_centers(dataset, items, &centers, metric);
        let converged = next == assignment;
        assignment = next;
        if converged {
            break;
        }
    }

    let mut groups = vec![Vec::new(); centers.len()];
    for (&p, &c) in items.iter().zip(&assignment) {
        groups[c].push(p);
    }
    groups.retain(|g| !g.is_empty());
    if groups.len() < 2 {
        return None;
    }
    Some(groups)
}

fn nearest_center(
    point: &ArrayView1<f32>,
    centers: &[Array1<f32>],
    metric: DistanceMetric,
) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (c, center) in centers.iter().enumerate() {
        let d = metric.reduced(point, &center.view());
        if d < best_dist {
            best = c;
            best_dist = d;
        }
    }
    best
}

fn nearest_centers(
    dataset: &Dataset,
    items: &[usize],
    centers: &[Array1<f32>],
    metric: DistanceMetric,
) -> Vec<usize> {
    #[cfg(feature = "parallel")]
    {
        items
            .par_iter()
            .map(|&p| nearest_center(&dataset.point(p), centers, metric))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items
            .iter()
            .map(|&p| nearest_center(&dataset.point(p), centers, metric))
            .collect()
    }
}

/// Pick up to `k` seed points with pairwise distinct coordinates.
fn choose_centers(
    dataset: &Dataset,
    items: &[usize],
    k: usize,
    init: CentersInit,
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Vec<usize> {
    match init {
        CentersInit::Random => {
            let mut order = items.to_vec();
            order.shuffle(rng);
            let mut chosen: Vec<usize> = Vec::with_capacity(k);
            for p in order {
                if chosen.len() == k {
                    break;
                }
                let distinct = chosen
                    .iter()
                    .all(|&c| metric.reduced(&dataset.point(p), &dataset.point(c)) > 0.0);
                if distinct {
                    chosen.push(p);
                }
            }
            chosen
        }
        CentersInit::Gonzales => {
            let first = items[rng.gen_range(0..items.len())];
            let mut chosen = vec![first];
            let mut min_dist: Vec<f32> = items
                .iter()
                .map(|&p| metric.reduced(&dataset.point(p), &dataset.point(first)))
                .collect();
            while chosen.len() < k {
                let (far, far_dist) = min_dist
                    .iter()
                    .enumerate()
                    .fold((0, 0.0f32), |acc, (i, &d)| if d > acc.1 { (i, d) } else { acc });
                if far_dist <= 0.0 {
                    break;
                }
                let next = items[far];
                chosen.push(next);
                update_min_dist(dataset, items, next, metric, &mut min_dist);
            }
            chosen
        }
        CentersInit::KMeansPP => {
            let first = items[rng.gen_range(0..items.len())];
            let mut chosen = vec![first];
            let mut min_dist: Vec<f32> = items
                .iter()
                .map(|&p| metric.reduced(&dataset.point(p), &dataset.point(first)))
                .collect();
            while chosen.len() < k {
                // D² weighting in metric space.
                let weights: Vec<f64> = min_dist
                    .iter()
                    .map(|&r| {
                        let d = metric.to_metric_space(r) as f64;
                        d * d
                    })
                    .collect();
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    break;
                }
                let threshold = rng.gen::<f64>() * total;
                let mut cumsum = 0.0;
                let mut pick = None;
                for (i, &w) in weights.iter().enumerate() {
                    cumsum += w;
                    if w > 0.0 && cumsum >= threshold {
                        pick = Some(i);
                        break;
                    }
                }
                // Rounding can leave the threshold just past the sum.
                let pick = pick.or_else(|| weights.iter().rposition(|&w| w > 0.0));
                let Some(pick) = pick else { break };
                let next = items[pick];
                chosen.push(next);
                update_min_dist(dataset, items, next, metric, &mut min_dist);
            }
            chosen
        }
    }
}

fn update_min_dist(
    dataset: &Dataset,
    items: &[usize],
    center: usize,
    metric: DistanceMetric,
    min_dist: &mut [f32],
) {
    let c = dataset.point(center);
    for (d, &p) in min_dist.iter_mut().zip(items) {
        let nd = metric.reduced(&dataset.point(p), &c);
        if nd < *d {
            *d = nd;
        }
    }
}
