//! Vector index abstraction.
//!
//! [`VectorIndex`] is the seam between the collection and its ANN strategy. Two
//! strategies implement it: [`HnswIndex`] (graph) and [`IvfIndex`] (partitioned).
//! [`flat_search`] is the exact fallback used for small candidate sets.
//!
//! Ids handled here are the collection's internal `u32` ids, never [`DocId`]s.
//!
//! [`DocId`]: crate::document::DocId

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::ivf::{IvfConfig, IvfIndex};
use ordered_float::OrderedFloat;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use std::fmt;

/// Set of internal document ids.
pub type IdSet = RoaringBitmap;

/// A search result from an index: internal id plus distance (lower is closer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u32,
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: u32, distance: f32) -> Self {
        Self { id, distance }
    }
}

/// Per-query recall knobs. `None` falls back to the index configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchParams {
    /// HNSW candidate list size at layer 0.
    pub ef_search: Option<usize>,
    /// IVF partitions probed.
    pub nprobe: Option<usize>,
}

/// Approximate k-NN index over fixed-dimension vectors.
pub trait VectorIndex: Send + Sync + fmt::Debug {
    /// Short strategy name for logs and query plans.
    fn kind(&self) -> &'static str;

    fn dimension(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    /// Number of live (non-tombstoned) vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of removed vectors still occupying space until the next rebuild.
    fn tombstones(&self) -> usize;

    /// `true` when a rebuild would train structure the index is still missing.
    fn needs_training(&self) -> bool {
        false
    }

    /// Returns `true` if `id` is live in the index.
    fn contains(&self, id: u32) -> bool;

    /// Stored vector of a live id.
    fn vector(&self, id: u32) -> Option<&[f32]>;

    /// All live ids.
    fn ids(&self) -> IdSet;

    /// Inserts a vector under a fresh id. Fails without modifying the index on
    /// dimension mismatch, non-finite input or an id already present.
    fn insert(&mut self, id: u32, vector: &[f32]) -> Result<()>;

    /// Tombstones `id`. Returns `false` if it was not live.
    fn remove(&mut self, id: u32) -> bool;

    /// Top-`k` nearest live vectors by ascending distance.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>>;

    /// Broader parameters for a retry after a short result, or `None` once
    /// `params` already reach every live vector.
    fn widen(&self, params: &SearchParams) -> Option<SearchParams> {
        let _ = params;
        None
    }

    /// Top-`k` nearest live vectors whose ids are in `allowed`.
    fn search_within(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        allowed: &IdSet,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>>;

    /// Shared query checks: metric and dimension.
    fn check_query(&self, query: &[f32], metric: DistanceMetric) -> Result<()> {
        if metric != self.metric() {
            return Err(Error::MetricMismatch {
                expected: self.metric(),
                actual: metric,
            });
        }
        validate_vector(query, self.dimension())
    }
}

/// Index strategy and its build parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexStrategy {
    Hnsw(HnswConfig),
    Ivf(IvfConfig),
}

impl Default for IndexStrategy {
    fn default() -> Self {
        IndexStrategy::Hnsw(HnswConfig::default())
    }
}

impl IndexStrategy {
    pub fn validate(&self) -> Result<()> {
        match self {
            IndexStrategy::Hnsw(c) => c.validate(),
            IndexStrategy::Ivf(c) => c.validate(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndexStrategy::Hnsw(_) => "hnsw",
            IndexStrategy::Ivf(_) => "ivf",
        }
    }

    /// Creates an empty index.
    pub fn build(&self, dimension: usize, metric: DistanceMetric) -> Box<dyn VectorIndex> {
        match self {
            IndexStrategy::Hnsw(c) => Box::new(HnswIndex::new(dimension, metric, c.clone())),
            IndexStrategy::Ivf(c) => Box::new(IvfIndex::new(dimension, metric, c.clone())),
        }
    }

    /// Builds a fully populated index from `(id, vector)` pairs. IVF centroids are
    /// trained on the input before insertion.
    pub fn build_from(
        &self,
        dimension: usize,
        metric: DistanceMetric,
        vectors: &[(u32, Vec<f32>)],
    ) -> Result<Box<dyn VectorIndex>> {
        match self {
            IndexStrategy::Hnsw(c) => {
                let mut index = HnswIndex::new(dimension, metric, c.clone());
                for (id, v) in vectors {
                    index.insert(*id, v)?;
                }
                Ok(Box::new(index))
            }
            IndexStrategy::Ivf(c) => {
                let mut index = IvfIndex::new(dimension, metric, c.clone());
                index.train(vectors.iter().map(|(_, v)| v.as_slice()))?;
                for (id, v) in vectors {
                    index.insert(*id, v)?;
                }
                Ok(Box::new(index))
            }
        }
    }
}

/// Rejects vectors of the wrong length or with NaN/infinite components.
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
        return Err(Error::NonFiniteVector { position });
    }
    Ok(())
}

/// Orders neighbors by ascending distance, then ascending id.
pub fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_unstable_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Exact top-`k` over an explicit candidate iterator.
///
/// Keeps a bounded max-heap of size `k`, so memory stays `O(k)` regardless of
/// the number of candidates. Output is sorted by (distance, id).
pub fn flat_search<'a, I>(
    query: &[f32],
    k: usize,
    metric: DistanceMetric,
    candidates: I,
) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (u32, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(k + 1);
    for (id, vector) in candidates {
        let d = OrderedFloat(metric.distance(query, vector));
        if heap.len() < k {
            heap.push((d, id));
        } else if let Some(&worst) = heap.peek() {
            if (d, id) < worst {
                heap.pop();
                heap.push((d, id));
            }
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|(d, id)| Neighbor::new(id, d.0))
        .collect()
}
