//! Node insertion: greedy descent, per-layer candidate search, diversity-pruned
//! links in both directions.

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use crate::index::validate_vector;

impl HnswIndex {
    /// Insert a vector under the internal id `id`.
    ///
    /// The vector is checked before the graph is touched; on error the index is unchanged.
    pub fn insert(&mut self, id: u32, vector: &[f32]) -> Result<()> {
        validate_vector(vector, self.dimension)?;
        if self.id_to_node.contains_key(&id) {
            return Err(Error::InternalConsistency(format!(
                "id {id} is already present in the hnsw index"
            )));
        }
        let level = self.random_level();

        // First node: push SoA fields and return
        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => {
                let node = self.push_node(id, vector, vec![Vec::new(); level + 1], level);
                self.entry_point = Some(node);
                self.max_layer = level;
                return Ok(());
            }
        };
        let mut current_ep = entry_point;

        // One visited set for every layer of this insert
        let mut visited = VisitedSet::new(self.node_count as usize);

        // Descend with ef=1 through layers above the new node's level
        for layer in (level + 1..=self.max_layer).rev() {
            let results = construction_search(
                self,
                vector,
                &[current_ep],
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, nearest)) = results.first() {
                current_ep = nearest;
            }
        }

        // Link layers top..=0. Tombstoned nodes stay eligible as neighbors so
        // deletes do not fragment the graph.
        let top = level.min(self.max_layer);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut seeds = vec![current_ep];
        for layer in (0..=top).rev() {
            let candidates = construction_search(
                self,
                vector,
                &seeds,
                self.config.ef_construction,
                layer,
                &mut visited,
            );
            let m_max = self.max_links(layer);
            let selected = select_neighbors_heuristic(self, &candidates, m_max);
            node_neighbors[layer] = selected.iter().map(|&(_, n)| n).collect();

            // This layer's candidates seed the next one down
            seeds = candidates.iter().map(|&(_, n)| n).collect();
            if seeds.is_empty() {
                seeds.push(entry_point);
            }
        }

        let node = self.push_node(id, vector, node_neighbors, level);

        // Back-links; a neighbor over capacity is re-pruned with the same heuristic
        for layer in 0..=top {
            let m_max = self.max_links(layer);
            let my_neighbors: Vec<u32> = self.neighbors[node as usize][layer].clone();
            for &neighbor in &my_neighbors {
                let nid = neighbor as usize;

                if self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].resize_with(layer + 1, Vec::new);
                }
                let links = &mut self.neighbors[nid][layer];
                links.push(node);
                if links.len() <= m_max {
                    continue;
                }
                let base = self.node_vector(neighbor);
                let scored: Vec<(f32, u32)> = self.neighbors[nid][layer]
                    .iter()
                    .map(|&other| (self.metric.distance(base, self.node_vector(other)), other))
                    .collect();
                self.neighbors[nid][layer] = select_neighbors_heuristic(self, &scored, m_max)
                    .into_iter()
                    .map(|(_, n)| n)
                    .collect();
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(node);
        }
        Ok(())
    }

    #[inline]
    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }
}

/// Layer search during construction: tombstoned nodes count as results.
fn construction_search(
    index: &HnswIndex,
    vector: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    search_layer(index, vector, entry_points, ef, layer, visited, &|_: u32| true, true)
}

/// Keeps up to `m` candidates, nearest first, skipping any candidate that is
/// closer to an already kept neighbor than to the base node. Leftover slots are
/// filled with the nearest skipped candidates.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut ordered = candidates.to_vec();
    ordered.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut kept: Vec<(f32, u32)> = Vec::with_capacity(m);
    let mut skipped: Vec<(f32, u32)> = Vec::new();
    for &(to_base, node) in &ordered {
        if kept.len() == m {
            break;
        }
        let v = index.node_vector(node);
        let occluded = kept
            .iter()
            .any(|&(_, k)| index.metric.distance(v, index.node_vector(k)) < to_base);
        if occluded {
            skipped.push((to_base, node));
        } else {
            kept.push((to_base, node));
        }
    }
    let room = m - kept.len();
    kept.extend(skipped.into_iter().take(room));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::hnsw::HnswConfig;

    #[test]
    fn test_insert_links_are_bounded() {
        let cfg = HnswConfig {
            m: 4,
            m_max0: 8,
            ef_construction: 32,
            ..HnswConfig::default()
        };
        let mut index = HnswIndex::new(2, DistanceMetric::Euclidean, cfg);
        for i in 0..60u32 {
            let angle = i as f32 * 0.1;
            index.insert(i, &[angle.cos() * (1.0 + i as f32), angle.sin()]).unwrap();
        }
        assert_eq!(index.node_count, 60);
        for node in 0..index.node_count as usize {
            for (layer, links) in index.neighbors[node].iter().enumerate() {
                let cap = if layer == 0 { 8 } else { 4 };
                assert!(links.len() <= cap, "node {node} layer {layer} has {}", links.len());
            }
        }
        assert!(!index.neighbors[0][0].is_empty());
    }

    #[test]
    fn test_insert_rejects_bad_vectors_without_change() {
        let mut index = HnswIndex::with_default_config(3, DistanceMetric::Cosine);
        index.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        assert!(index.insert(1, &[1.0, 0.0]).is_err());
        assert!(index.insert(1, &[f32::INFINITY, 0.0, 0.0]).is_err());
        assert!(index.insert(0, &[0.0, 1.0, 0.0]).is_err());
        assert_eq!(index.node_count, 1);
        assert_eq!(index.vectors.len(), 3);
    }
}
