//! Configuration for hybridsearch.
//!
//! Input validation limits and tuning defaults are compile-time constants.
//! Per-collection runtime configuration is carried by [`CollectionConfig`], which
//! can be loaded from JSON and is validated before a collection is created.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::IndexStrategy;
use serde::{Deserialize, Serialize};

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 64;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Seed for HNSW level assignment, so graphs built from the same insert order are identical.
pub const HNSW_LEVEL_SEED: u64 = 0x5eed_4e53_u64;

/// Default number of IVF partitions (centroids, `L`).
pub const IVF_DEFAULT_NLIST: usize = 64;

/// Default number of IVF partitions probed per query (`P`).
pub const IVF_DEFAULT_NPROBE: usize = 8;

/// Maximum number of vectors sampled for centroid training.
pub const IVF_DEFAULT_TRAINING_SAMPLE: usize = 20_000;

/// Minimum number of vectors before centroids are trained. Below this, one partition is used.
pub const IVF_MIN_TRAINING_POINTS: usize = 32;

/// Lloyd iterations after k-means++ seeding.
pub const KMEANS_DEFAULT_ITERATIONS: usize = 20;

/// Seed for k-means++ initialization and training-sample selection.
pub const KMEANS_SEED: u64 = 20_240_921;

/// Combined selectivity below which the planner filters before searching.
pub const DEFAULT_SELECTIVITY_THRESHOLD: f64 = 0.1;

/// Lower clamp for combined selectivity estimates.
pub const DEFAULT_MIN_SELECTIVITY: f64 = 1e-4;

/// Growth factor for the search-then-filter fetch size (`k' = k * multiplier`).
pub const DEFAULT_OVERFETCH_MULTIPLIER: usize = 4;

/// Maximum number of re-fetches in search-then-filter after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Candidate sets at or below this size are scored by exact flat scan.
pub const DEFAULT_BRUTE_FORCE_THRESHOLD: usize = 4_096;

/// Once an `AND`'s running set is this small, remaining children check stored
/// values per candidate instead of walking their index.
pub const CANDIDATE_SCAN_LIMIT: u64 = 2_048;

/// Number of equi-depth buckets in per-field range histograms.
pub const DEFAULT_HISTOGRAM_BUCKETS: usize = 32;

/// Assumed selectivity of a range comparison when no histogram applies.
pub const DEFAULT_RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// Assumed selectivity of an equality comparison on a path the inverted index cannot answer.
pub const DEFAULT_EQUALITY_SELECTIVITY: f64 = 0.005;

/// Fraction of tombstoned vectors above which [`maintenance_needed`] reports true.
///
/// [`maintenance_needed`]: crate::storage::Collection::maintenance_needed
pub const DEFAULT_COMPACT_RATIO: f64 = 0.2;

/// Default retrieval depth (`k`) for a query.
pub const DEFAULT_K: usize = 10;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 10_000;

/// Maximum pagination offset for search results.
pub const MAX_OFFSET: usize = 100_000;

/// Maximum length of a collection name in characters.
pub const MAX_COLLECTION_NAME_LEN: usize = 128;

/// Maximum length of a document id in bytes.
pub const MAX_ID_LEN: usize = 512;

/// Maximum number of documents per batch upsert.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Maximum total serialized size of metadata in bytes (64 KB).
pub const MAX_METADATA_BYTES: usize = 65_536;

/// Maximum nesting depth of metadata documents.
pub const MAX_METADATA_DEPTH: usize = 32;

/// Maximum nesting depth of a predicate tree.
pub const MAX_PREDICATE_DEPTH: usize = 64;

/// Maximum number of values in an `IN` list.
pub const MAX_IN_LIST: usize = 1_024;

/// Query planner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Selectivity below which filter-then-search is chosen.
    pub selectivity_threshold: f64,
    /// Lower clamp for combined selectivity estimates.
    pub min_selectivity: f64,
    /// Search-then-filter fetch growth factor (must be at least 2).
    pub overfetch_multiplier: usize,
    /// Search-then-filter retry cap.
    pub max_retries: usize,
    /// Candidate sets up to this size are scored by exact flat scan.
    pub brute_force_threshold: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            selectivity_threshold: DEFAULT_SELECTIVITY_THRESHOLD,
            min_selectivity: DEFAULT_MIN_SELECTIVITY,
            overfetch_multiplier: DEFAULT_OVERFETCH_MULTIPLIER,
            max_retries: DEFAULT_MAX_RETRIES,
            brute_force_threshold: DEFAULT_BRUTE_FORCE_THRESHOLD,
        }
    }
}

impl PlannerConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.selectivity_threshold) {
            return Err(Error::InvalidConfig(format!(
                "selectivity_threshold {} outside [0, 1]",
                self.selectivity_threshold
            )));
        }
        if !(self.min_selectivity > 0.0 && self.min_selectivity <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "min_selectivity {} outside (0, 1]",
                self.min_selectivity
            )));
        }
        if self.overfetch_multiplier < 2 {
            return Err(Error::InvalidConfig(
                "overfetch_multiplier must be at least 2".into(),
            ));
        }
        if self.max_retries > 16 {
            return Err(Error::InvalidConfig(format!(
                "max_retries {} exceeds 16",
                self.max_retries
            )));
        }
        Ok(())
    }
}

/// Per-collection configuration: metric, index strategy and planner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Distance metric, fixed for the collection's lifetime.
    pub metric: DistanceMetric,
    /// ANN index strategy and build parameters.
    pub index: IndexStrategy,
    /// Planner thresholds.
    pub planner: PlannerConfig,
    /// Equi-depth buckets per attribute histogram.
    pub histogram_buckets: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            index: IndexStrategy::default(),
            planner: PlannerConfig::default(),
            histogram_buckets: DEFAULT_HISTOGRAM_BUCKETS,
        }
    }
}

impl CollectionConfig {
    /// Default configuration with the given metric and index strategy.
    pub fn new(metric: DistanceMetric, index: IndexStrategy) -> Self {
        Self {
            metric,
            index,
            ..Self::default()
        }
    }

    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CollectionConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every tunable against its allowed range.
    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;
        self.planner.validate()?;
        if self.histogram_buckets == 0 {
            return Err(Error::InvalidConfig(
                "histogram_buckets must be positive".into(),
            ));
        }
        Ok(())
    }
}
