//! Graph storage and build parameters.

use crate::config;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HNSW build and search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Link budget per node on layers above 0.
    pub m: usize,
    /// Link budget per node on layer 0.
    pub m_max0: usize,
    /// Candidate list width while linking a new node.
    pub ef_construction: usize,
    /// Default layer-0 candidate list width for queries.
    pub ef_search: usize,
    /// Cap on node levels.
    pub max_layers: usize,
    /// Seed for level assignment.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            seed: config::HNSW_LEVEL_SEED,
        }
    }
}

impl HnswConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::InvalidConfig(format!("hnsw m {} must be >= 2", self.m)));
        }
        if self.m_max0 < self.m {
            return Err(Error::InvalidConfig(format!(
                "hnsw m_max0 {} must be >= m {}",
                self.m_max0, self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(Error::InvalidConfig(
                "hnsw ef_construction and ef_search must be positive".into(),
            ));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "hnsw max_layers {} outside 1..=255",
                self.max_layers
            )));
        }
        Ok(())
    }
}

/// Layered proximity graph over one contiguous vector arena.
///
/// Nodes are addressed by a dense node number; `node_ids` maps each node to the
/// collection's internal id. Removed nodes stay in the graph as tombstones and are
/// still traversed for navigation, but never returned.
#[derive(Debug)]
pub struct HnswIndex {
    pub config: HnswConfig,
    pub metric: DistanceMetric,
    // SoA: f32 vector arena, all vectors contiguous
    pub vectors: Vec<f32>,
    // SoA: graph structure
    pub neighbors: Vec<Vec<Vec<u32>>>, // [node][layer][neighbor nodes]
    pub layers: Vec<u8>,
    pub deleted: Vec<bool>,
    pub node_ids: Vec<u32>,
    pub id_to_node: HashMap<u32, u32>,
    // Index metadata
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    pub dimension: usize,
    pub node_count: u32,
    pub live_count: usize,
    rng: StdRng,
}

impl HnswIndex {
    /// Creates a new empty HNSW index with the given dimension and configuration.
    pub fn new(dimension: usize, metric: DistanceMetric, config: HnswConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            metric,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            node_ids: Vec::new(),
            id_to_node: HashMap::new(),
            entry_point: None,
            max_layer: 0,
            dimension,
            node_count: 0,
            live_count: 0,
            rng,
        }
    }

    /// Creates a new empty HNSW index with default configuration (M=16, ef_c=200).
    pub fn with_default_config(dimension: usize, metric: DistanceMetric) -> Self {
        Self::new(dimension, metric, HnswConfig::default())
    }

    /// Generate a random layer for a new node using exponential distribution.
    pub fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Vector of a node. O(1) slice into the contiguous arena.
    #[inline]
    pub fn node_vector(&self, node: u32) -> &[f32] {
        let start = node as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Exact distance from `query` to a node.
    #[inline]
    pub fn distance_to(&self, query: &[f32], node: u32) -> f32 {
        self.metric.distance(query, self.node_vector(node))
    }

    /// Returns `true` if the node has been tombstoned.
    #[inline]
    pub fn is_deleted(&self, node: u32) -> bool {
        self.deleted[node as usize]
    }

    /// Mark the node holding `id` as deleted.
    pub fn mark_deleted(&mut self, id: u32) -> bool {
        match self.id_to_node.remove(&id) {
            Some(node) => {
                self.deleted[node as usize] = true;
                self.live_count -= 1;
                true
            }
            None => false,
        }
    }

    /// Append a node's SoA fields. Returns the new node number.
    pub(crate) fn push_node(
        &mut self,
        id: u32,
        vector: &[f32],
        neighbors: Vec<Vec<u32>>,
        level: usize,
    ) -> u32 {
        let node = self.node_count;
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(neighbors);
        self.layers.push(level as u8);
        self.deleted.push(false);
        self.node_ids.push(id);
        self.id_to_node.insert(id, node);
        self.node_count += 1;
        self.live_count += 1;
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_level_is_deterministic() {
        let mut a = HnswIndex::with_default_config(4, DistanceMetric::Cosine);
        let mut b = HnswIndex::with_default_config(4, DistanceMetric::Cosine);
        let la: Vec<usize> = (0..200).map(|_| a.random_level()).collect();
        let lb: Vec<usize> = (0..200).map(|_| b.random_level()).collect();
        assert_eq!(la, lb);
        assert!(la.iter().all(|&l| l < config::HNSW_DEFAULT_MAX_LAYERS));
        // Most nodes land on layer 0 for M=16
        let zeros = la.iter().filter(|&&l| l == 0).count();
        assert!(zeros > 150, "expected mostly layer 0, got {zeros}/200");
    }

    #[test]
    fn test_config_validation() {
        assert!(HnswConfig::default().validate().is_ok());
        let bad = HnswConfig {
            m_max0: 4,
            ..HnswConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = HnswConfig {
            ef_search: 0,
            ..HnswConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
