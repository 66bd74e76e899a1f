use std::collections::BinaryHeap;

use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::distance::DistanceMetric;
use crate::error::{check_buffer, reserve_buffer, Result};
use crate::index::NearestNeighborIndex;
use crate::params::IndexParameters;
use crate::search::{Branch, KnnResultSet, SearchContext};

/// Nodes holding this many points or fewer are not split further.
const MAX_LEAF_SIZE: usize = 4;
/// Points used to estimate per-dimension mean and variance at a node.
const SAMPLE_MEAN: usize = 100;
/// The split dimension is drawn from this many highest-variance dimensions.
const RAND_DIM: usize = 5;

/// Tree node. Children are indices into the owning tree's node vector.
#[derive(Debug, Clone)]
enum KdNode {
    /// Points with `coordinate[dim] < value` go left, the rest right.
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
    Leaf { points: Vec<usize> },
}

#[derive(Debug, Clone)]
struct KdTree {
    /// Index 0 is the root.
    nodes: Vec<KdNode>,
}

impl KdTree {
    fn build(dataset: &Dataset, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points: Vec<usize> = (0..dataset.len()).collect();
        points.shuffle(&mut rng);

        let mut nodes = Vec::with_capacity(2 * dataset.len() / MAX_LEAF_SIZE + 1);
        nodes.push(KdNode::Leaf { points: Vec::new() });

        // Explicit stack: mean splits on skewed data can get deep.
        let mut pending = vec![(0usize, points)];
        while let Some((slot, items)) = pending.pop() {
            match choose_split(dataset, &items, &mut rng) {
                Some((dim, value, left_items, right_items)) => {
                    let left = nodes.len();
                    let right = left + 1;
                    nodes.push(KdNode::Leaf { points: Vec::new() });
                    nodes.push(KdNode::Leaf { points: Vec::new() });
                    nodes[slot] = KdNode::Split {
                        dim,
                        value,
                        left,
                        right,
                    };
                    pending.push((right, right_items));
                    pending.push((left, left_items));
                }
                None => nodes[slot] = KdNode::Leaf { points: items },
            }
        }

        Self { nodes }
    }

    fn used_memory(&self) -> usize {
        let leaf_points: usize = self
            .nodes
            .iter()
            .map(|n| match n {
                KdNode::Leaf { points } => points.capacity(),
                KdNode::Split { .. } => 0,
            })
            .sum();
        self.nodes.capacity() * std::mem::size_of::<KdNode>()
            + leaf_points * std::mem::size_of::<usize>()
    }
}

/// Pick a split for `items`, or `None` if they should form a leaf.
///
/// The dimension is drawn at random among the top [`RAND_DIM`] by variance
/// and the cut is the mean along it. When a cut leaves one side empty the
/// mean is recomputed over every item, and failing that the next dimension
/// by variance is tried. Items identical in every coordinate become a leaf
/// whatever their count.
fn choose_split(
    dataset: &Dataset,
    items: &[usize],
    rng: &mut StdRng,
) -> Option<(usize, f32, Vec<usize>, Vec<usize>)> {
    if items.len() <= MAX_LEAF_SIZE {
        return None;
    }

    let sample = &items[..items.len().min(SAMPLE_MEAN)];
    let (mut mean, mut var) = mean_and_variance(dataset, sample);
    let mut dims = ranked_dims(&var);
    if dims.is_empty() && sample.len() < items.len() {
        (mean, var) = mean_and_variance(dataset, items);
        dims = ranked_dims(&var);
    }
    if dims.is_empty() {
        tracing::trace!(points = items.len(), "kd-tree: all points coincide, forced leaf");
        return None;
    }

    let pick = rng.gen_range(0..dims.len().min(RAND_DIM));
    dims.swap(0, pick);

    for &dim in &dims {
        let (left, right) = partition(dataset, items, dim, mean[dim] as f32);
        if !left.is_empty() && !right.is_empty() {
            return Some((dim, mean[dim] as f32, left, right));
        }
        let full_mean = items
            .iter()
            .map(|&i| dataset.point(i)[dim] as f64)
            .sum::<f64>()
            / items.len() as f64;
        let (left, right) = partition(dataset, items, dim, full_mean as f32);
        if !left.is_empty() && !right.is_empty() {
            return Some((dim, full_mean as f32, left, right));
        }
        tracing::trace!(dim, points = items.len(), "kd-tree: degenerate cut, skipping dimension");
    }
    None
}

fn mean_and_variance(dataset: &Dataset, items: &[usize]) -> (Vec<f64>, Vec<f64>) {
    let dim = dataset.dim();
    let n = items.len() as f64;
    let mut mean = vec![0.0f64; dim];
    for &i in items {
        for (m, &x) in mean.iter_mut().zip(dataset.point(i).iter()) {
            *m += x as f64;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);

    let mut var = vec![0.0f64; dim];
    for &i in items {
        for ((v, m), &x) in var.iter_mut().zip(&mean).zip(dataset.point(i).iter()) {
            let d = x as f64 - m;
            *v += d * d;
        }
    }
    (mean, var)
}

/// Dimensions with non-zero spread, highest variance first.
fn ranked_dims(var: &[f64]) -> Vec<usize> {
    let mut dims: Vec<usize> = (0..var.len()).filter(|&d| var[d] > 0.0).collect();
    dims.sort_by(|&a, &b| var[b].total_cmp(&var[a]).then(a.cmp(&b)));
    dims
}

fn partition(
    dataset: &Dataset,
    items: &[usize],
    dim: usize,
    value: f32,
) -> (Vec<usize>, Vec<usize>) {
    items
        .iter()
        .copied()
        .partition(|&i| dataset.point(i)[dim] < value)
}

/// Forest of randomized KD-trees searched together.
///
/// Each tree shuffles the points and draws its split dimensions at random,
/// so the trees partition space differently. A query descends every tree
/// once, then keeps expanding the closest unexplored branch across all
/// trees until the visit budget is spent.
#[derive(Debug, Clone)]
pub struct KdTreeIndex {
    dataset: Dataset,
    metric: DistanceMetric,
    trees: Vec<KdTree>,
}

impl KdTreeIndex {
    /// Number of trees in the forest.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Total nodes across all trees.
    pub fn num_nodes(&self) -> usize {
        self.trees.iter().map(|t| t.nodes.len()).sum()
    }

    /// Descend from `node` towards the query, queueing the far side of
    /// every split, and scan the leaf reached.
    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        tree: usize,
        mut node: usize,
        bound: f32,
        query: &ArrayView1<f32>,
        result: &mut KnnResultSet,
        ctx: &mut SearchContext,
        queue: &mut BinaryHeap<Branch<(usize, usize)>>,
    ) {
        let nodes = &self.trees[tree].nodes;
        loop {
            if bound > result.worst() || ctx.exhausted(result) {
                return;
            }
            match &nodes[node] {
                KdNode::Leaf { points } => {
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
                KdNode::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    let diff = query[*dim] - value;
                    let (near, far) = if diff < 0.0 { (*left, *right) } else { (*right, *left) };
                    // Distance to the cutting plane bounds everything beyond it.
                    let far_bound = bound.max(self.metric.coordinate_term(diff));
                    queue.push(Branch {
                        priority: far_bound,
                        bound: far_bound,
                        node: (tree, far),
                    });
                    node = near;
                }
            }
        }
    }
}

impl NearestNeighborIndex for KdTreeIndex {
    fn build(dataset: &Dataset, params: &IndexParameters) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(params.seed.unwrap_or_default());
        // Every tree owns a permutation of the whole dataset.
        check_buffer::<usize>(params.trees, dataset.len())?;
        let mut seeds = reserve_buffer::<u64>(params.trees, 1)?;
        seeds.extend((0..params.trees).map(|_| rng.gen::<u64>()));

        #[cfg(feature = "parallel")]
        let trees: Vec<KdTree> = seeds
            .into_par_iter()
            .map(|seed| KdTree::build(dataset, seed))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let trees: Vec<KdTree> = seeds
            .into_iter()
            .map(|seed| KdTree::build(dataset, seed))
            .collect();

        Ok(Self {
            dataset: dataset.clone(),
            metric: params.metric,
            trees,
        })
    }

    fn search(&self, query: &ArrayView1<f32>, result: &mut KnnResultSet, ctx: &mut SearchContext) {
        let mut queue = BinaryHeap::new();
        for tree in 0..self.trees.len() {
            self.descend(tree, 0, 0.0, query, result, ctx, &mut queue);
        }
        while let Some(branch) = queue.pop() {
            if ctx.exhausted(result) {
                break;
            }
            let (tree, node) = branch.node;
            self.descend(tree, node, branch.bound, query, result, ctx, &mut queue);
        }
    }

    fn used_memory(&self) -> usize {
        self.trees.iter().map(KdTree::used_memory).sum()
    }

    fn size(&self) -> usize {
        self.dataset.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnnError;
    use crate::params::{Algorithm, CHECKS_UNLIMITED};

    fn grid_dataset() -> Dataset {
        let rows: Vec<Vec<f32>> = (0..400)
            .map(|i| vec![(i % 20) as f32, (i / 20) as f32, ((i * 37) % 11) as f32])
            .collect();
        Dataset::from_rows(&rows).unwrap()
    }

    fn params(trees: usize) -> IndexParameters {
        IndexParameters::builder()
            .algorithm(Algorithm::KdTree)
            .trees(trees)
            .seed(11)
            .build()
            .unwrap()
    }

    fn query_ids(index: &KdTreeIndex, q: &[f32], k: usize, checks: usize) -> Vec<usize> {
        let q = ndarray::ArrayView1::from(q);
        let mut rs = KnnResultSet::new(k);
        let mut ctx = SearchContext::new(index.size(), checks);
        index.search(&q, &mut rs, &mut ctx);
        rs.into_sorted(DistanceMetric::SquaredEuclidean)
            .iter()
            .map(|n| n.index)
            .collect()
    }

    #[test]
    fn test_every_point_lands_in_exactly_one_leaf_per_tree() {
        let ds = grid_dataset();
        let index = KdTreeIndex::build(&ds, &params(3)).unwrap();
        for tree in &index.trees {
            let mut seen = vec![0usize; ds.len()];
            for node in &tree.nodes {
                if let KdNode::Leaf { points } = node {
                    for &p in points {
                        seen[p] += 1;
                    }
                }
            }
            assert!(seen.iter().all(|&c| c == 1));
        }
    }

    #[test]
    fn test_splits_respect_partition_rule() {
        let ds = grid_dataset();
        let index = KdTreeIndex::build(&ds, &params(1)).unwrap();
        let nodes = &index.trees[0].nodes;

        fn collect(nodes: &[KdNode], n: usize, out: &mut Vec<usize>) {
            match &nodes[n] {
                KdNode::Leaf { points } => out.extend(points),
                KdNode::Split { left, right, .. } => {
                    collect(nodes, *left, out);
                    collect(nodes, *right, out);
                }
            }
        }

        for node in nodes {
            if let KdNode::Split {
                dim,
                value,
                left,
                right,
            } = node
            {
                let (mut l, mut r) = (Vec::new(), Vec::new());
                collect(nodes, *left, &mut l);
                collect(nodes, *right, &mut r);
                assert!(!l.is_empty() && !r.is_empty());
                assert!(l.iter().all(|&p| ds.point(p)[*dim] < *value));
                assert!(r.iter().all(|&p| ds.point(p)[*dim] >= *value));
            }
        }
    }

    #[test]
    fn test_duplicates_form_single_leaf() {
        let rows = vec![vec![1.0f32, 2.0]; 50];
        let ds = Dataset::from_rows(&rows).unwrap();
        let index = KdTreeIndex::build(&ds, &params(2)).unwrap();
        assert_eq!(index.num_nodes(), 2);
        let ids = query_ids(&index, &[1.0, 2.0], 3, CHECKS_UNLIMITED);
        assert_eq!(ids, vec![0, 1, 2], "ties resolve by point index");
    }

    #[test]
    fn test_unlimited_checks_is_exact() {
        let ds = grid_dataset();
        let index = KdTreeIndex::build(&ds, &params(4)).unwrap();
        let linear = crate::linear::LinearIndex::new(ds.clone(), DistanceMetric::SquaredEuclidean);
        for q in [[3.3f32, 7.1, 2.0], [19.5, 0.2, 10.0], [-4.0, 25.0, 5.5]] {
            let approx = query_ids(&index, &q, 7, CHECKS_UNLIMITED);
            let mut rs = KnnResultSet::new(7);
            let mut ctx = SearchContext::new(ds.len(), CHECKS_UNLIMITED);
            linear.search(&ndarray::ArrayView1::from(&q[..]), &mut rs, &mut ctx);
            let exact: Vec<usize> = rs
                .into_sorted(DistanceMetric::SquaredEuclidean)
                .iter()
                .map(|n| n.index)
                .collect();
            assert_eq!(approx, exact);
        }
    }

    #[test]
    fn test_budget_limits_visits_once_full() {
        let ds = grid_dataset();
        let index = KdTreeIndex::build(&ds, &params(4)).unwrap();
        let q = ndarray::array![5.0f32, 5.0, 5.0];
        let mut rs = KnnResultSet::new(2);
        let mut ctx = SearchContext::new(ds.len(), 16);
        index.search(&q.view(), &mut rs, &mut ctx);
        assert_eq!(rs.len(), 2);
        assert!(ctx.checks() <= 16 + MAX_LEAF_SIZE);
    }

    #[test]
    fn test_seeded_build_is_deterministic() {
        let ds = grid_dataset();
        let a = KdTreeIndex::build(&ds, &params(3)).unwrap();
        let b = KdTreeIndex::build(&ds, &params(3)).unwrap();
        assert_eq!(a.num_nodes(), b.num_nodes());
        assert_eq!(
            query_ids(&a, &[1.5, 2.5, 3.5], 5, 20),
            query_ids(&b, &[1.5, 2.5, 3.5], 5, 20)
        );
    }

    #[test]
    fn test_absurd_tree_count_is_an_allocation_failure() {
        let ds = grid_dataset();
        for trees in [usize::MAX / 4, usize::MAX / ds.len()] {
            let err = KdTreeIndex::build(&ds, &params(trees)).unwrap_err();
            assert!(matches!(err, AnnError::AllocationFailure(_)), "trees={trees}");
        }
    }
}
