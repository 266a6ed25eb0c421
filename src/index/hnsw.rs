//! HNSW (Hierarchical Navigable Small World) graph over unit vectors.
//!
//! Based on Malkov & Yashunin (2018): a multi-layer graph where layer 0
//! holds every element, higher layers hold exponentially fewer, and search
//! zooms in from the top layer. Distance is `1 − ⟨a, b⟩` on unit vectors,
//! so returned scores are raw inner products in `[-1, 1]`.
//!
//! Nodes are keyed by their insertion position: the graph is append-only
//! and position N is exactly the index's internal id N. Deletions never
//! touch the graph (the index tombstones and post-filters); compaction
//! rebuilds a fresh graph from the survivors.
//!
//! The whole structure is serializable, so a persisted snapshot restores
//! the exact graph — identical neighbors, identical search results.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::vector;

/// Tunable construction and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Bidirectional links per element above layer 0.
    pub m: usize,
    /// Links per element at layer 0 (typically `2 * m`).
    pub m0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search; raised to `k` when smaller.
    pub ef_search: usize,
    /// Level-generation normalization factor, `1 / ln(m)`.
    pub ml: f32,
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m0: m * 2,
            ef_construction,
            ef_search,
            ml: 1.0 / (m as f32).ln(),
        }
    }
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200, 64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// Neighbor sets per layer; `connections.len()` is the node's top layer + 1.
    connections: Vec<HashSet<usize>>,
}

/// The graph itself. All ids are insertion positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    dims: usize,
    params: HnswParams,
    nodes: Vec<Node>,
    entry_point: Option<usize>,
    max_layer: usize,
}

impl HnswGraph {
    pub fn new(dims: usize, params: HnswParams) -> Self {
        Self {
            dims,
            params,
            nodes: Vec::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        self.nodes.get(id).map(|n| n.vector.as_slice())
    }

    /// Insert a vector; its id is the current length. The caller guarantees
    /// dimension and unit norm.
    pub fn insert(&mut self, embedding: Vec<f32>) -> usize {
        debug_assert_eq!(embedding.len(), self.dims);

        let node_id = self.nodes.len();
        let node_level = self.random_level();

        let mut connections = Vec::with_capacity(node_level + 1);
        for _ in 0..=node_level {
            connections.push(HashSet::new());
        }

        self.nodes.push(Node {
            vector: embedding,
            connections,
        });

        if self.entry_point.is_none() {
            self.entry_point = Some(node_id);
            self.max_layer = node_level;
            return node_id;
        }

        self.link_node(node_id, node_level);

        if node_level > self.max_layer {
            self.max_layer = node_level;
            self.entry_point = Some(node_id);
        }

        node_id
    }

    /// K approximate nearest neighbors as `(id, inner-product score)`,
    /// best first, ties broken by lower id.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if self.nodes.is_empty() || k == 0 {
            return Vec::new();
        }
        debug_assert_eq!(query.len(), self.dims);

        let entry_point = self.entry_point.expect("non-empty graph has an entry point");
        let mut current_nearest = vec![entry_point];

        for layer in (1..=self.max_layer).rev() {
            current_nearest = self.search_layer(query, &current_nearest, 1, layer);
        }

        let ef = self.params.ef_search.max(k);
        current_nearest = self.search_layer(query, &current_nearest, ef, 0);

        let mut results: Vec<(usize, f32)> = current_nearest
            .into_iter()
            .map(|id| (id, vector::dot(query, &self.nodes[id].vector)))
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results.truncate(k);
        results
    }

    /// Exponential-decay level assignment.
    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let uniform: f32 = rng.gen_range(f32::EPSILON..1.0);
        (-uniform.ln() * self.params.ml).floor() as usize
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        1.0 - vector::dot(a, b)
    }

    fn link_node(&mut self, node_id: usize, node_level: usize) {
        let entry_point = self.entry_point.expect("link_node requires an entry point");
        let query = self.nodes[node_id].vector.clone();
        let mut current_nearest = vec![entry_point];

        // Descend to the target layer.
        for layer in (node_level + 1..=self.max_layer).rev() {
            current_nearest = self.search_layer(&query, &current_nearest, 1, layer);
        }

        for layer in (0..=node_level.min(self.max_layer)).rev() {
            current_nearest =
                self.search_layer(&query, &current_nearest, self.params.ef_construction, layer);

            let m = if layer == 0 { self.params.m0 } else { self.params.m };
            let neighbors = self.select_neighbors(&current_nearest, &query, m);

            for &neighbor_id in &neighbors {
                self.nodes[node_id].connections[layer].insert(neighbor_id);

                if layer < self.nodes[neighbor_id].connections.len() {
                    self.nodes[neighbor_id].connections[layer].insert(node_id);

                    // Prune the neighbor back down to its budget.
                    if self.nodes[neighbor_id].connections[layer].len() > m {
                        let neighbor_vec = self.nodes[neighbor_id].vector.clone();
                        let candidates: Vec<usize> = self.nodes[neighbor_id].connections[layer]
                            .iter()
                            .copied()
                            .collect();
                        let pruned = self.select_neighbors(&candidates, &neighbor_vec, m);
                        self.nodes[neighbor_id].connections[layer] = pruned.into_iter().collect();
                    }
                }
            }
        }
    }

    /// Greedy beam search within one layer. Returns ids closest-first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<usize> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates = BinaryHeap::new(); // min-heap by distance
        let mut best = BinaryHeap::new(); // max-heap by distance

        for &ep in entry_points {
            let dist = self.distance(query, &self.nodes[ep].vector);
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            best.push((OrderedFloat(dist), ep));
            visited.insert(ep);
        }

        while let Some(Reverse((current_dist, current_id))) = candidates.pop() {
            if best.len() >= ef {
                if let Some(&(furthest_dist, _)) = best.peek() {
                    if current_dist > furthest_dist {
                        break;
                    }
                }
            }

            if layer < self.nodes[current_id].connections.len() {
                for &neighbor_id in &self.nodes[current_id].connections[layer] {
                    if !visited.insert(neighbor_id) {
                        continue;
                    }

                    let dist = OrderedFloat(self.distance(query, &self.nodes[neighbor_id].vector));
                    if best.len() < ef {
                        candidates.push(Reverse((dist, neighbor_id)));
                        best.push((dist, neighbor_id));
                    } else if let Some(&(furthest_dist, _)) = best.peek() {
                        if dist < furthest_dist {
                            candidates.push(Reverse((dist, neighbor_id)));
                            best.push((dist, neighbor_id));
                            if best.len() > ef {
                                best.pop();
                            }
                        }
                    }
                }
            }
        }

        let mut results: Vec<(f32, usize)> = best
            .into_iter()
            .map(|(OrderedFloat(dist), id)| (dist, id))
            .collect();
        results.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        results.into_iter().map(|(_, id)| id).collect()
    }

    /// Diversity heuristic from the paper (SELECT-NEIGHBORS-HEURISTIC):
    /// keep a candidate only if it is closer to the query than to any
    /// already-selected neighbor, back-filling with pruned ones if short.
    fn select_neighbors(&self, candidates: &[usize], query: &[f32], m: usize) -> Vec<usize> {
        let mut scored: Vec<(f32, usize)> = candidates
            .iter()
            .map(|&id| (self.distance(query, &self.nodes[id].vector), id))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut selected: Vec<usize> = Vec::with_capacity(m);
        let mut pruned: Vec<usize> = Vec::new();

        for (dist_to_query, candidate_id) in scored {
            if selected.len() >= m {
                break;
            }

            let candidate_vec = &self.nodes[candidate_id].vector;
            let behind_a_neighbor = selected.iter().any(|&sel| {
                self.distance(candidate_vec, &self.nodes[sel].vector) < dist_to_query
            });

            if behind_a_neighbor {
                pruned.push(candidate_id);
            } else {
                selected.push(candidate_id);
            }
        }

        for pruned_id in pruned {
            if selected.len() >= m {
                break;
            }
            selected.push(pruned_id);
        }

        selected
    }
}

/// f32 wrapper ordered for the heaps.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        vector::normalize(&mut v);
        v
    }

    fn random_unit_vector(dims: usize, seed: u64) -> Vec<f32> {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        unit((0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
    }

    #[test]
    fn ids_are_insertion_positions() {
        let mut graph = HnswGraph::new(3, HnswParams::default());
        assert_eq!(graph.insert(unit(vec![1.0, 0.0, 0.0])), 0);
        assert_eq!(graph.insert(unit(vec![0.0, 1.0, 0.0])), 1);
        assert_eq!(graph.insert(unit(vec![0.0, 0.0, 1.0])), 2);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn search_empty_graph() {
        let graph = HnswGraph::new(3, HnswParams::default());
        assert!(graph.search(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn exact_match_scores_one() {
        let mut graph = HnswGraph::new(3, HnswParams::default());
        let v = unit(vec![0.5, 0.5, 0.7071]);
        graph.insert(v.clone());

        let results = graph.search(&v, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 0);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn nearest_neighbor_wins() {
        let mut graph = HnswGraph::new(3, HnswParams::default());
        graph.insert(unit(vec![1.0, 0.0, 0.0]));
        graph.insert(unit(vec![0.0, 1.0, 0.0]));
        graph.insert(unit(vec![0.0, 0.0, 1.0]));
        graph.insert(unit(vec![1.0, 1.0, 0.0]));

        let results = graph.search(&unit(vec![1.0, 0.1, 0.0]), 2);
        assert_eq!(results[0].0, 0);
        assert!(results[0].1 > 0.9);
    }

    #[test]
    fn results_sorted_and_bounded() {
        let dims = 32;
        let mut graph = HnswGraph::new(dims, HnswParams::default());
        for i in 0..200 {
            graph.insert(random_unit_vector(dims, i));
        }

        let query = random_unit_vector(dims, 9999);
        let results = graph.search(&query, 20);
        assert_eq!(results.len(), 20);
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        for (_, score) in &results {
            assert!((-1.0..=1.0).contains(score));
        }
    }

    #[test]
    fn recall_on_planted_neighbors() {
        let dims = 32;
        let mut graph = HnswGraph::new(dims, HnswParams::default());
        let query = random_unit_vector(dims, 0);

        // First 10 vectors lean heavily toward the query.
        for i in 0..100u64 {
            let mut v = random_unit_vector(dims, i + 1);
            if i < 10 {
                for j in 0..dims {
                    v[j] = query[j] * 0.9 + v[j] * 0.1;
                }
                vector::normalize(&mut v);
            }
            graph.insert(v);
        }

        let results = graph.search(&query, 10);
        let found = results.iter().filter(|(id, _)| *id < 10).count();
        assert!(found >= 7, "recall too low: {}/10", found);
    }

    #[test]
    fn snapshot_restores_identical_results() {
        let dims = 16;
        let mut graph = HnswGraph::new(dims, HnswParams::default());
        for i in 0..50 {
            graph.insert(random_unit_vector(dims, i));
        }

        let bytes = bincode::serialize(&graph).unwrap();
        let restored: HnswGraph = bincode::deserialize(&bytes).unwrap();

        for seed in [7u64, 8, 9] {
            let query = random_unit_vector(dims, 1000 + seed);
            assert_eq!(graph.search(&query, 10), restored.search(&query, 10));
        }
    }
}
