//! Graph traversal: best-first search within one layer and the top-down k-NN walk.
//!
//! Both accept an acceptance test over node numbers. Rejected and tombstoned nodes
//! are expanded like any other node but never enter the result set.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

thread_local! {
    /// Per-thread visited set, grown on demand and reused by every query on the thread.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Best-first search of one layer.
///
/// Returns up to `ef` closest nodes to the query at the given layer, sorted by
/// ascending distance. A node enters the results only if `filter_fn` accepts it and,
/// unless `include_deleted` is set, it is not tombstoned. `visited` is cleared first.
#[allow(clippy::too_many_arguments)]
pub fn search_layer<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    filter_fn: &F,
    include_deleted: bool,
) -> Vec<(f32, u32)> {
    visited.clear();
    // Min-heap of candidates to expand, max-heap of current results
    let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>> =
        BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst distance, avoids repeated heap peeks in the hot loop
    let mut worst_dist = f32::MAX;
    let accept = |node: u32| (include_deleted || !index.is_deleted(node)) && filter_fn(node);

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = index.distance_to(query, ep);
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            if accept(ep) {
                results.push((OrderedFloat(dist), ep));
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.0 .0);
                }
            }
        }
    }

    while let Some(Reverse((OrderedFloat(c_dist), node))) = candidates.pop() {
        // Nearest unexpanded candidate cannot improve a full result set
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        let node_links = &index.neighbors[node as usize];
        if layer >= node_links.len() {
            continue;
        }

        for &neighbor in &node_links[layer] {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = index.distance_to(query, neighbor);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                if accept(neighbor) {
                    results.push((OrderedFloat(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                    if results.len() >= ef {
                        worst_dist = results.peek().map_or(f32::MAX, |r| r.0 .0);
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|(d, node)| (d.0, node))
        .collect()
}

/// Top-`k` `(distance, node)` pairs, nearest first.
pub fn knn_search(index: &HnswIndex, query: &[f32], k: usize, ef: usize) -> Vec<(f32, u32)> {
    knn_search_filtered(index, query, k, ef, &|_: u32| true)
}

/// Top-`k` nodes accepted by `filter_fn`.
///
/// Layer 0 is searched with `max(ef, k)`. When that yields fewer than `k` accepted
/// nodes the search is repeated with ef doubled, up to four times the starting value.
pub fn knn_search_filtered<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    ef: usize,
    filter_fn: &F,
) -> Vec<(f32, u32)> {
    let Some(entry_point) = index.entry_point else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(index.node_count as usize);

        // Upper layers route greedily and ignore the filter
        let mut entry = entry_point;
        for layer in (1..=index.max_layer).rev() {
            let step = search_layer(
                index,
                query,
                &[entry],
                1,
                layer,
                &mut visited,
                &|_: u32| true,
                true,
            );
            if let Some(&(_, closer)) = step.first() {
                entry = closer;
            }
        }

        let start = ef.max(k);
        let cap = (start * 4).min(index.node_count as usize);
        let mut width = start;
        loop {
            let mut found = search_layer(
                index,
                query,
                &[entry],
                width,
                0,
                &mut visited,
                filter_fn,
                false,
            );
            if found.len() >= k || width >= cap {
                found.truncate(k);
                return found;
            }
            width = (width * 2).min(cap);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn grid_index() -> HnswIndex {
        let mut index = HnswIndex::with_default_config(2, DistanceMetric::Euclidean);
        let mut id = 0;
        for x in 0..10 {
            for y in 0..10 {
                index.insert(id, &[x as f32, y as f32]).unwrap();
                id += 1;
            }
        }
        index
    }

    #[test]
    fn test_knn_finds_exact_point() {
        let index = grid_index();
        let results = knn_search(&index, &[3.0, 7.0], 1, 64);
        assert_eq!(results.len(), 1);
        let node = results[0].1;
        assert_eq!(index.node_vector(node), &[3.0, 7.0]);
        assert!(results[0].0 < 1e-6);
    }

    #[test]
    fn test_knn_results_sorted() {
        let index = grid_index();
        let results = knn_search(&index, &[4.2, 4.9], 10, 64);
        assert_eq!(results.len(), 10);
        assert!(results.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_filtered_search_respects_filter() {
        let index = grid_index();
        // Only nodes with x >= 8 pass
        let filter = |node: u32| index.node_vector(node)[0] >= 8.0;
        let results = knn_search_filtered(&index, &[0.0, 0.0], 5, 64, &filter);
        assert_eq!(results.len(), 5);
        for (_, node) in &results {
            assert!(index.node_vector(*node)[0] >= 8.0);
        }
    }

    #[test]
    fn test_deleted_nodes_excluded() {
        let mut index = grid_index();
        // id 0 is the point (0, 0)
        assert!(index.mark_deleted(0));
        let results = knn_search(&index, &[0.0, 0.0], 3, 64);
        assert!(results.iter().all(|&(_, node)| index.node_ids[node as usize] != 0));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_empty_index() {
        let index = HnswIndex::with_default_config(2, DistanceMetric::Cosine);
        assert!(knn_search(&index, &[1.0, 0.0], 5, 64).is_empty());
    }
}
