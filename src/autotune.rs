//! Automatic algorithm and parameter selection.
//!
//! The tuner draws a random sample of the dataset and splits it into a
//! calibration set and held-out queries. Every candidate on a small grid is
//! built over the calibration set, and its search budget is raised until the
//! held-out queries find their exact nearest neighbor at the requested rate.
//! Candidates are then scored by
//!
//! ```text
//! cost = (search + build_weight * build) / best_time
//!      + memory_weight * (index_bytes + data_bytes) / data_bytes
//! ```
//!
//! where `best_time` is the lowest time cost among candidates meeting the
//! target. The cheapest such candidate is rebuilt over the full dataset and
//! its budget recalibrated there.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::index::Index;
use crate::params::{Algorithm, AutotuneTarget, IndexParameters, CHECKS_UNLIMITED};

/// Calibration samples never shrink below this many points.
const MIN_SAMPLE: usize = 500;
const MIN_QUERIES: usize = 10;
const MAX_QUERIES: usize = 1000;

const KDTREE_TREES: [usize; 4] = [1, 4, 8, 16];
const KMEANS_BRANCHING: [usize; 4] = [16, 32, 64, 128];
const KMEANS_ITERATIONS: [i32; 3] = [1, 5, 10];

/// Measurements for one grid candidate on the calibration sample.
#[derive(Debug, Clone)]
pub struct CandidateReport {
    /// Candidate parameters, `checks` set to the calibrated budget.
    pub params: IndexParameters,
    /// Fraction of held-out queries whose nearest neighbor was found.
    pub precision: f32,
    pub build_secs: f64,
    pub search_secs: f64,
    pub memory_bytes: usize,
    pub cost: f64,
}

/// Outcome of a tuning run.
#[derive(Debug, Clone)]
pub struct AutotuneReport {
    /// Effective parameters of the returned index.
    pub params: IndexParameters,
    /// Precision measured on the full dataset at `params.checks`.
    pub precision: f32,
    /// Linear scan time divided by index search time for the same queries.
    pub speedup: f32,
    pub candidates: Vec<CandidateReport>,
}

impl std::fmt::Display for AutotuneReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Autotune {{ algorithm: {}, checks: {}, trees: {}, branching: {}, iterations: {}, \
             precision: {:.3}, speedup: {:.2}x, candidates: {} }}",
            self.params.algorithm,
            self.params.checks,
            self.params.trees,
            self.params.branching,
            self.params.iterations,
            self.precision,
            self.speedup,
            self.candidates.len(),
        )
    }
}

/// Pick an algorithm and parameters for `dataset`, build the index, and
/// report how it was chosen.
///
/// Never fails for lack of a good candidate: when nothing on the grid meets
/// the target, the candidate with the highest precision wins.
pub fn autotune(dataset: &Dataset, target: &AutotuneTarget) -> Result<(Index, AutotuneReport)> {
    target.validate()?;
    let seed = target.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let base = IndexParameters {
        metric: target.metric,
        seed: Some(seed),
        ..IndexParameters::default()
    };

    if dataset.len() < 2 {
        let index = Index::build(
            dataset,
            &IndexParameters {
                algorithm: Algorithm::Linear,
                ..base
            },
        )?;
        let report = AutotuneReport {
            params: index.params().clone(),
            precision: 1.0,
            speedup: 1.0,
            candidates: Vec::new(),
        };
        return Ok((index, report));
    }

    let wanted = (dataset.len() as f64 * f64::from(target.sample_fraction)).ceil() as usize;
    let sample_size = wanted.max(MIN_SAMPLE).min(dataset.len());
    let num_queries = (sample_size / 10)
        .clamp(MIN_QUERIES, MAX_QUERIES)
        .min(sample_size - 1);

    let (sample, picked) = dataset.sample(sample_size, &mut rng);
    let mut is_query = vec![false; sample.len()];
    for pos in index::sample(&mut rng, sample.len(), num_queries) {
        is_query[pos] = true;
    }
    let (query_pos, train_pos): (Vec<usize>, Vec<usize>) =
        (0..sample.len()).partition(|&pos| is_query[pos]);
    let train = sample.select(&train_pos)?;
    let held_out = Calibration::new(&train, sample.select(&query_pos)?, &base, 0)?;

    let mut candidates = Vec::new();
    for params in candidate_grid(&base) {
        candidates.push(evaluate(&train, params, &held_out, target.target_precision)?);
    }
    score(&mut candidates, target, train.memory_bytes());
    let chosen = select(&candidates, target.target_precision);

    let mut index = Index::build(dataset, &candidates[chosen].params)?;
    let (precision, speedup) = if index.algorithm() == Algorithm::Linear {
        (1.0, 1.0)
    } else {
        let query_rows: Vec<usize> = query_pos.iter().map(|&pos| picked[pos]).collect();
        let full = Calibration::new(dataset, dataset.select(&query_rows)?, &base, 1)?;
        let (checks, precision) =
            full.checks_for(&index, target.target_precision, dataset.len());
        index.set_checks(checks);
        let linear_secs = full.time_search(&full.baseline, CHECKS_UNLIMITED);
        let index_secs = full.time_search(&index, checks).max(f64::EPSILON);
        (precision, (linear_secs / index_secs) as f32)
    };

    let report = AutotuneReport {
        params: index.params().clone(),
        precision,
        speedup,
        candidates,
    };
    tracing::info!(
        algorithm = %report.params.algorithm,
        checks = report.params.checks,
        trees = report.params.trees,
        branching = report.params.branching,
        iterations = report.params.iterations,
        precision = report.precision,
        speedup = report.speedup,
        "autotune selected parameters"
    );
    Ok((index, report))
}

fn candidate_grid(base: &IndexParameters) -> Vec<IndexParameters> {
    let mut grid = vec![IndexParameters {
        algorithm: Algorithm::Linear,
        ..base.clone()
    }];
    for trees in KDTREE_TREES {
        grid.push(IndexParameters {
            algorithm: Algorithm::KdTree,
            trees,
            ..base.clone()
        });
    }
    for branching in KMEANS_BRANCHING {
        for iterations in KMEANS_ITERATIONS {
            grid.push(IndexParameters {
                algorithm: Algorithm::KMeans,
                branching,
                iterations,
                ..base.clone()
            });
        }
    }
    grid
}

fn evaluate(
    train: &Dataset,
    mut params: IndexParameters,
    calibration: &Calibration,
    target_precision: f32,
) -> Result<CandidateReport> {
    let start = Instant::now();
    let index = Index::build(train, &params)?;
    let build_secs = start.elapsed().as_secs_f64();

    let (checks, precision) = if params.algorithm == Algorithm::Linear {
        (params.checks, calibration.precision(&index, params.checks))
    } else {
        calibration.checks_for(&index, target_precision, train.len())
    };
    params.checks = checks;
    let search_secs = calibration.time_search(&index, checks);

    tracing::debug!(
        algorithm = %params.algorithm,
        trees = params.trees,
        branching = params.branching,
        iterations = params.iterations,
        checks,
        precision,
        build_ms = build_secs * 1e3,
        search_ms = search_secs * 1e3,
        "autotune candidate"
    );
    Ok(CandidateReport {
        memory_bytes: index.used_memory(),
        params,
        precision,
        build_secs,
        search_secs,
        cost: 0.0,
    })
}

fn score(candidates: &mut [CandidateReport], target: &AutotuneTarget, data_bytes: usize) {
    let build_weight = f64::from(target.build_weight);
    let memory_weight = f64::from(target.memory_weight);
    let time_cost = |c: &CandidateReport| c.search_secs + build_weight * c.build_secs;

    let meeting = candidates
        .iter()
        .filter(|c| c.precision >= target.target_precision)
        .map(time_cost)
        .fold(f64::INFINITY, f64::min);
    let best_time = if meeting.is_finite() {
        meeting
    } else {
        candidates.iter().map(time_cost).fold(f64::INFINITY, f64::min)
    }
    .max(f64::EPSILON);

    let data_bytes = data_bytes.max(1) as f64;
    for c in candidates.iter_mut() {
        let memory_cost = (c.memory_bytes as f64 + data_bytes) / data_bytes;
        c.cost = time_cost(c) / best_time + memory_weight * memory_cost;
    }
}

/// Cheapest candidate meeting the target, else the most precise one.
fn select(candidates: &[CandidateReport], target_precision: f32) -> usize {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.precision >= target_precision)
        .min_by(|(_, a), (_, b)| a.cost.total_cmp(&b.cost))
        .or_else(|| {
            candidates.iter().enumerate().max_by(|(_, a), (_, b)| {
                a.precision
                    .total_cmp(&b.precision)
                    .then(b.cost.total_cmp(&a.cost))
            })
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Queries with the exact distance to the neighbor they should find.
struct Calibration {
    queries: Dataset,
    truth: Vec<f32>,
    /// Leading results to ignore; 1 when queries are dataset points.
    skip: usize,
    baseline: Index,
}

impl Calibration {
    fn new(data: &Dataset, queries: Dataset, base: &IndexParameters, skip: usize) -> Result<Self> {
        let baseline = Index::build(
            data,
            &IndexParameters {
                algorithm: Algorithm::Linear,
                ..base.clone()
            },
        )?;
        let truth = baseline
            .knn_search_batch(&queries, skip + 1, CHECKS_UNLIMITED)?
            .iter()
            .map(|r| r.get(skip).map_or(f32::INFINITY, |n| n.distance))
            .collect();
        Ok(Self {
            queries,
            truth,
            skip,
            baseline,
        })
    }

    fn precision(&self, index: &Index, checks: usize) -> f32 {
        let hits = (0..self.queries.len())
            .filter(|&q| {
                let (found, _) = index.search_one(&self.queries.point(q), self.skip + 1, checks);
                found
                    .get(self.skip)
                    .map_or(true, |n| n.distance <= self.truth[q])
            })
            .count();
        hits as f32 / self.queries.len() as f32
    }

    fn time_search(&self, index: &Index, checks: usize) -> f64 {
        let start = Instant::now();
        for q in 0..self.queries.len() {
            std::hint::black_box(index.search_one(&self.queries.point(q), self.skip + 1, checks));
        }
        start.elapsed().as_secs_f64()
    }

    /// Smallest budget in `1..=max_checks` reaching `target`, with the
    /// precision it achieves. Relies on precision never dropping as the
    /// budget grows.
    fn checks_for(&self, index: &Index, target: f32, max_checks: usize) -> (usize, f32) {
        let max_checks = max_checks.max(1);
        let mut hi = 1;
        let mut precision = self.precision(index, hi);
        while precision < target && hi < max_checks {
            hi = hi.saturating_mul(2).min(max_checks);
            precision = self.precision(index, hi);
        }
        if precision < target {
            return (hi, precision);
        }

        let mut lo = hi / 2;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let p = self.precision(index, mid);
            if p >= target {
                hi = mid;
                precision = p;
            } else {
                lo = mid;
            }
        }
        (hi, precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn clustered(n: usize, dim: usize, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|i| {
                let c = (i % 8) as f32 * 10.0;
                (0..dim).map(|_| c + rng.gen_range(-1.0..1.0)).collect()
            })
            .collect();
        Dataset::from_rows(&rows).unwrap()
    }

    fn report(precision: f32, cost: f64) -> CandidateReport {
        CandidateReport {
            params: IndexParameters::default(),
            precision,
            build_secs: 0.0,
            search_secs: 0.0,
            memory_bytes: 0,
            cost,
        }
    }

    #[test]
    fn test_select_prefers_cheapest_meeting_target() {
        let c = vec![report(0.95, 3.0), report(0.85, 1.0), report(0.92, 2.0)];
        assert_eq!(select(&c, 0.9), 2);
    }

    #[test]
    fn test_select_falls_back_to_best_precision() {
        let c = vec![report(0.5, 1.0), report(0.7, 4.0), report(0.7, 2.0)];
        assert_eq!(select(&c, 0.99), 2);
    }

    #[test]
    fn test_score_normalizes_by_best_meeting_time() {
        let mut c = vec![report(0.95, 0.0), report(0.95, 0.0), report(0.1, 0.0)];
        c[0].search_secs = 2.0;
        c[1].search_secs = 4.0;
        c[2].search_secs = 1.0;
        let target = AutotuneTarget::new(0.9).with_weights(0.0, 0.0);
        score(&mut c, &target, 100);
        assert!((c[0].cost - 1.0).abs() < 1e-9);
        assert!((c[1].cost - 2.0).abs() < 1e-9);
        assert!((c[2].cost - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_memory_weight_penalizes_large_indexes() {
        let mut c = vec![report(1.0, 0.0), report(1.0, 0.0)];
        c[0].search_secs = 1.0;
        c[1].search_secs = 1.0;
        c[1].memory_bytes = 300;
        let target = AutotuneTarget::new(0.9).with_weights(0.0, 1.0);
        score(&mut c, &target, 100);
        assert!((c[0].cost - 2.0).abs() < 1e-9);
        assert!((c[1].cost - 5.0).abs() < 1e-9);
        assert_eq!(select(&c, 0.9), 0);
    }

    #[test]
    fn test_autotune_meets_target_on_full_dataset() {
        let ds = clustered(2000, 8, 1);
        let target = AutotuneTarget::new(0.9).with_seed(5);
        let (index, report) = autotune(&ds, &target).unwrap();
        assert_eq!(report.candidates.len(), 1 + 4 + 12);
        assert!(report.precision >= 0.9, "{report}");
        assert!(report.speedup > 0.0);
        assert_eq!(index.params(), &report.params);
        assert_eq!(report.params.seed, Some(5));
    }

    #[test]
    fn test_same_seed_calibrates_the_same_grid() {
        let ds = clustered(3000, 6, 4);
        let target = AutotuneTarget::new(0.8).with_seed(21);
        let (_, a) = autotune(&ds, &target).unwrap();
        let (_, b) = autotune(&ds, &target).unwrap();
        assert_eq!(a.candidates.len(), b.candidates.len());
        for (x, y) in a.candidates.iter().zip(&b.candidates) {
            assert_eq!(x.params, y.params);
            assert_eq!(x.precision, y.precision);
        }
    }

    #[test]
    fn test_zero_weights_pick_fastest_meeting_candidate() {
        let ds = clustered(1500, 4, 2);
        let target = AutotuneTarget::new(0.9).with_weights(0.0, 0.0).with_seed(11);
        let (_, report) = autotune(&ds, &target).unwrap();
        let fastest = report
            .candidates
            .iter()
            .filter(|c| c.precision >= 0.9)
            .min_by(|a, b| a.search_secs.total_cmp(&b.search_secs))
            .unwrap();
        assert_eq!(report.params.algorithm, fastest.params.algorithm);
        assert_eq!(report.params.trees, fastest.params.trees);
        assert_eq!(report.params.branching, fastest.params.branching);
        assert_eq!(report.params.iterations, fastest.params.iterations);
    }

    #[test]
    fn test_tiny_datasets() {
        let one = Dataset::from_rows(&[vec![1.0f32, 2.0]]).unwrap();
        let (index, report) = autotune(&one, &AutotuneTarget::default()).unwrap();
        assert_eq!(index.algorithm(), Algorithm::Linear);
        assert_eq!(report.speedup, 1.0);

        let three = Dataset::from_rows(&[vec![0.0f32], vec![1.0], vec![5.0]]).unwrap();
        let (index, _) = autotune(&three, &AutotuneTarget::new(1.0)).unwrap();
        let res = index.knn_search(&[0.9], 10, index.params().checks).unwrap();
        assert_eq!(res.len(), 3);
        assert_eq!(res[0].index, 1);
    }
}
