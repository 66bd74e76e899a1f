use crate::distance::DistanceMetric;
use crate::error::{AnnError, Result};

/// Search budget meaning "visit everything": tree searches become exact.
pub const CHECKS_UNLIMITED: usize = usize::MAX;

/// Index structure to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "persistence",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Algorithm {
    /// Exhaustive scan. Exact.
    Linear,
    /// Forest of randomized KD-trees.
    KdTree,
    /// Hierarchical k-means tree.
    KMeans,
    /// A KD-forest and a k-means tree searched together.
    Composite,
}

impl Algorithm {
    /// Numeric code used by the parameter tuple.
    pub fn code(&self) -> i64 {
        match self {
            Algorithm::Linear => 0,
            Algorithm::KdTree => 1,
            Algorithm::KMeans => 2,
            Algorithm::Composite => 3,
        }
    }
}

impl TryFrom<i64> for Algorithm {
    type Error = AnnError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Algorithm::Linear),
            1 => Ok(Algorithm::KdTree),
            2 => Ok(Algorithm::KMeans),
            3 => Ok(Algorithm::Composite),
            other => Err(AnnError::UnsupportedAlgorithm(other)),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Algorithm::Linear => "linear",
            Algorithm::KdTree => "kdtree",
            Algorithm::KMeans => "kmeans",
            Algorithm::Composite => "composite",
        };
        f.write_str(name)
    }
}

/// How the k-means tree seeds each clustering round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "persistence",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum CentersInit {
    /// Distinct points picked uniformly at random.
    #[default]
    Random,
    /// Farthest-first traversal.
    Gonzales,
    /// k-means++ (D² weighted sampling).
    KMeansPP,
}

impl CentersInit {
    pub fn code(&self) -> i64 {
        match self {
            CentersInit::Random => 0,
            CentersInit::Gonzales => 1,
            CentersInit::KMeansPP => 2,
        }
    }
}

impl TryFrom<i64> for CentersInit {
    type Error = AnnError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(CentersInit::Random),
            1 => Ok(CentersInit::Gonzales),
            2 => Ok(CentersInit::KMeansPP),
            other => Err(AnnError::UnsupportedCentersInit(other)),
        }
    }
}

/// Concrete build and search parameters for one index.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "persistence",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct IndexParameters {
    pub algorithm: Algorithm,
    /// Default search budget: points examined per query.
    /// [`CHECKS_UNLIMITED`] makes tree searches exact.
    pub checks: usize,
    /// Number of randomized KD-trees.
    pub trees: usize,
    /// Branching factor of the k-means tree (>= 2).
    pub branching: usize,
    /// Maximum refinement rounds per k-means clustering; `-1` runs each
    /// clustering until it converges or hits an internal round limit.
    pub iterations: i32,
    pub centers_init: CentersInit,
    pub metric: DistanceMetric,
    /// RNG seed. Filled in at build time when left unset.
    pub seed: Option<u64>,
}

impl Default for IndexParameters {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::KdTree,
            checks: 32,
            trees: 4,
            branching: 32,
            iterations: 5,
            centers_init: CentersInit::Random,
            metric: DistanceMetric::SquaredEuclidean,
            seed: None,
        }
    }
}

impl IndexParameters {
    /// Start building parameters with the builder pattern.
    pub fn builder() -> IndexParametersBuilder {
        IndexParametersBuilder::new()
    }

    /// Check that every knob relevant to `algorithm` is in range.
    pub fn validate(&self) -> Result<()> {
        if self.checks == 0 {
            return Err(AnnError::InvalidArgument("checks must be > 0".into()));
        }
        if matches!(self.algorithm, Algorithm::KdTree | Algorithm::Composite) && self.trees == 0 {
            return Err(AnnError::InvalidArgument("trees must be > 0".into()));
        }
        if matches!(self.algorithm, Algorithm::KMeans | Algorithm::Composite) {
            if self.branching < 2 {
                return Err(AnnError::InvalidArgument(format!(
                    "branching must be >= 2, got {}",
                    self.branching
                )));
            }
            if self.iterations < -1 || self.iterations == 0 {
                return Err(AnnError::InvalidArgument(format!(
                    "iterations must be -1 or > 0, got {}",
                    self.iterations
                )));
            }
        }
        Ok(())
    }

    /// `[checks, algorithm, trees, branching, iterations, centers_init]`.
    ///
    /// Unlimited checks are written as `0`: a negative first entry is the
    /// autotune marker, so this form always reads back as manual parameters.
    pub fn to_tuple(&self) -> [f64; 6] {
        let checks = if self.checks == CHECKS_UNLIMITED {
            0.0
        } else {
            self.checks as f64
        };
        [
            checks,
            self.algorithm.code() as f64,
            self.trees as f64,
            self.branching as f64,
            self.iterations as f64,
            self.centers_init.code() as f64,
        ]
    }
}

/// Fluent builder for [`IndexParameters`].
#[derive(Debug, Default)]
pub struct IndexParametersBuilder {
    params: IndexParameters,
}

impl IndexParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.params.algorithm = algorithm;
        self
    }

    pub fn checks(mut self, checks: usize) -> Self {
        self.params.checks = checks;
        self
    }

    pub fn unlimited_checks(mut self) -> Self {
        self.params.checks = CHECKS_UNLIMITED;
        self
    }

    pub fn trees(mut self, trees: usize) -> Self {
        self.params.trees = trees;
        self
    }

    pub fn branching(mut self, branching: usize) -> Self {
        self.params.branching = branching;
        self
    }

    pub fn iterations(mut self, iterations: i32) -> Self {
        self.params.iterations = iterations;
        self
    }

    pub fn centers_init(mut self, init: CentersInit) -> Self {
        self.params.centers_init = init;
        self
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.params.metric = metric;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.params.seed = Some(seed);
        self
    }

    /// Validate and return the parameters.
    pub fn build(self) -> Result<IndexParameters> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// A target-precision directive: let the autotuner pick the algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct AutotuneTarget {
    /// Desired fraction of queries whose nearest neighbor is found, in `[0, 1]`.
    pub target_precision: f32,
    /// Weight of build time relative to search time.
    pub build_weight: f32,
    /// Weight of memory overhead relative to search time.
    pub memory_weight: f32,
    /// Fraction of the dataset used for calibration builds.
    pub sample_fraction: f32,
    pub metric: DistanceMetric,
    pub seed: Option<u64>,
}

impl Default for AutotuneTarget {
    fn default() -> Self {
        Self {
            target_precision: 0.9,
            build_weight: 0.01,
            memory_weight: 0.0,
            sample_fraction: 0.1,
            metric: DistanceMetric::SquaredEuclidean,
            seed: None,
        }
    }
}

impl AutotuneTarget {
    pub fn new(target_precision: f32) -> Self {
        Self {
            target_precision,
            ..Self::default()
        }
    }

    pub fn with_weights(mut self, build_weight: f32, memory_weight: f32) -> Self {
        self.build_weight = build_weight;
        self.memory_weight = memory_weight;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.target_precision) {
            return Err(AnnError::InvalidArgument(format!(
                "target precision must be between 0 and 1, got {}",
                self.target_precision
            )));
        }
        if !(self.build_weight >= 0.0 && self.memory_weight >= 0.0) {
            return Err(AnnError::InvalidArgument(
                "build and memory weights must be non-negative".into(),
            ));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(AnnError::InvalidArgument(format!(
                "sample fraction must be in (0, 1], got {}",
                self.sample_fraction
            )));
        }
        Ok(())
    }
}

/// Exactly one of manual parameters or a target-precision directive
/// governs a build.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildMode {
    Manual(IndexParameters),
    Autotune(AutotuneTarget),
}

impl BuildMode {
    /// Decode the legacy numeric parameter vector.
    ///
    /// A negative first entry selects autotuning and reads
    /// `[_, target_precision, build_weight, memory_weight]`; otherwise the
    /// vector is `[checks, algorithm, trees, branching, iterations,
    /// centers_init]`. Missing trailing entries keep their defaults.
    pub fn from_tuple(values: &[f64]) -> Result<Self> {
        let first = *values
            .first()
            .ok_or_else(|| AnnError::InvalidArgument("empty parameter vector".into()))?;

        if first < 0.0 {
            let mut target = AutotuneTarget::default();
            target.target_precision = *values.get(1).ok_or_else(|| {
                AnnError::InvalidArgument("autotune directive needs a target precision".into())
            })? as f32;
            if let Some(&w) = values.get(2) {
                target.build_weight = w as f32;
            }
            if let Some(&w) = values.get(3) {
                target.memory_weight = w as f32;
            }
            target.validate()?;
            return Ok(BuildMode::Autotune(target));
        }

        let mut params = IndexParameters::default();
        params.checks = match whole(first, "checks")? {
            0 => CHECKS_UNLIMITED,
            n => n as usize,
        };
        if let Some(&v) = values.get(1) {
            let code = code(v).ok_or(AnnError::UnsupportedAlgorithm(-1))?;
            params.algorithm = Algorithm::try_from(code)?;
        }
        if let Some(&v) = values.get(2) {
            params.trees = whole(v, "trees")? as usize;
        }
        if let Some(&v) = values.get(3) {
            params.branching = whole(v, "branching")? as usize;
        }
        if let Some(&v) = values.get(4) {
            params.iterations = code(v)
                .and_then(|i| i32::try_from(i).ok())
                .ok_or_else(|| AnnError::InvalidArgument(format!("bad iterations value {v}")))?;
        }
        if let Some(&v) = values.get(5) {
            params.centers_init =
                CentersInit::try_from(code(v).ok_or(AnnError::UnsupportedCentersInit(-1))?)?;
        }
        params.validate()?;
        Ok(BuildMode::Manual(params))
    }
}

/// Integral value of `v`, if it has one.
fn code(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 {
        Some(v as i64)
    } else {
        None
    }
}

fn whole(v: f64, name: &str) -> Result<u64> {
    code(v)
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| {
            AnnError::InvalidArgument(format!("{name} must be a non-negative integer, got {v}"))
        })
}
