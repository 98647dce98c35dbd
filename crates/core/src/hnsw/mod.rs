//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Vectors are stored as raw f32 in a contiguous arena and every distance is exact.
//! The graph uses a Struct-of-Arrays (SoA) layout: one vector arena plus separate
//! arrays for neighbor lists, layer assignments and tombstones.
//!
//! Recall is governed by `ef_search` (per collection, overridable per query through
//! [`SearchParams`]). With the defaults (M=16, ef_construction=200, ef_search=64)
//! recall@10 against exact search is above 0.9 on typical embedding data.

/// HNSW graph structure, configuration, and data storage.
pub mod graph;
/// HNSW insertion algorithm with bidirectional connections and heuristic pruning.
pub mod insert;
/// HNSW search: single-layer search, multi-layer KNN, and filtered search.
pub mod search;
/// Epoch-stamped visited set for graph traversal.
pub mod visited;

pub use graph::{HnswConfig, HnswIndex};
pub use search::{knn_search, knn_search_filtered};

use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::index::{flat_search, sort_neighbors, IdSet, Neighbor, SearchParams, VectorIndex};

impl HnswIndex {
    fn to_neighbors(&self, raw: Vec<(f32, u32)>) -> Vec<Neighbor> {
        let mut out: Vec<Neighbor> = raw
            .into_iter()
            .map(|(d, node)| Neighbor::new(self.node_ids[node as usize], d))
            .collect();
        sort_neighbors(&mut out);
        out
    }

    fn effective_ef(&self, params: &SearchParams) -> usize {
        params.ef_search.unwrap_or(self.config.ef_search).max(1)
    }
}

impl VectorIndex for HnswIndex {
    fn kind(&self) -> &'static str {
        "hnsw"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.live_count
    }

    fn tombstones(&self) -> usize {
        self.node_count as usize - self.live_count
    }

    fn contains(&self, id: u32) -> bool {
        self.id_to_node.contains_key(&id)
    }

    fn vector(&self, id: u32) -> Option<&[f32]> {
        self.id_to_node.get(&id).map(|&node| self.node_vector(node))
    }

    fn ids(&self) -> IdSet {
        self.id_to_node.keys().copied().collect()
    }

    fn insert(&mut self, id: u32, vector: &[f32]) -> Result<()> {
        HnswIndex::insert(self, id, vector)
    }

    fn remove(&mut self, id: u32) -> bool {
        self.mark_deleted(id)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>> {
        self.check_query(query, metric)?;
        let raw = knn_search(self, query, k, self.effective_ef(params));
        Ok(self.to_neighbors(raw))
    }

    fn search_within(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        allowed: &IdSet,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>> {
        self.check_query(query, metric)?;
        let filter = |node: u32| allowed.contains(self.node_ids[node as usize]);
        let raw = knn_search_filtered(self, query, k, self.effective_ef(params), &filter);

        // The graph walk can strand a sparse allowed set; fall back to exact scan.
        let reachable = allowed
            .iter()
            .filter(|id| self.id_to_node.contains_key(id))
            .take(k)
            .count();
        if raw.len() < reachable {
            let candidates = allowed
                .iter()
                .filter_map(|id| self.vector(id).map(|v| (id, v)));
            return Ok(flat_search(query, k, metric, candidates));
        }
        Ok(self.to_neighbors(raw))
    }
}
