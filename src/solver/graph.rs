//! Shared weighted-graph machinery the SPM and DSPM solvers both run their
//! best-first search over: a common [`Graph`] contract (so the only real
//! difference between SPM and DSPM is which graph gets built) plus the
//! Dijkstra-style search itself, with index-stable tie-breaking so the
//! result is deterministic regardless of push order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};

use ordered_float::OrderedFloat;

use crate::mesh::{MeshIndex, NodeId};

/// A weighted graph over eikonal nodes (primary vertices, persistent
/// secondary nodes, and — for DSPM — solve-local tertiary nodes).
pub trait Graph {
    fn num_nodes(&self) -> usize;
    /// Every node sharing a tetrahedron face with `id`.
    fn neighbors(&self, id: NodeId) -> Vec<NodeId>;
    fn edge_weight(&self, a: NodeId, b: NodeId) -> f64;
}

impl Graph for MeshIndex {
    fn num_nodes(&self) -> usize {
        MeshIndex::num_nodes(self)
    }

    fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        MeshIndex::neighbors(self, id).to_vec()
    }

    fn edge_weight(&self, a: NodeId, b: NodeId) -> f64 {
        MeshIndex::edge_weight(self, a, b)
    }
}

/// Runs a Dijkstra-style best-first search from `seeds`, returning the
/// tentative time at every node (`f64::INFINITY` if unreached).
///
/// Decrease-key is simulated by pushing a fresh heap entry and skipping
/// stale pops once a node is marked visited. Ties break on node index (the
/// heap key's second tuple field) so the result is deterministic regardless
/// of push order; `stop` is polled between pops for cooperative
/// cancellation.
pub fn shortest_paths(
    graph: &impl Graph,
    seeds: impl IntoIterator<Item = (NodeId, f64)>,
    stop: &AtomicBool,
) -> Vec<f64> {
    let n = graph.num_nodes();
    let mut dist = vec![f64::INFINITY; n];
    let mut visited = vec![false; n];
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, NodeId)>> = BinaryHeap::new();

    for (id, t) in seeds {
        if t < dist[id] {
            dist[id] = t;
            heap.push(Reverse((OrderedFloat(t), id)));
        }
    }

    while let Some(Reverse((OrderedFloat(t), u))) = heap.pop() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if visited[u] || t > dist[u] {
            continue;
        }
        visited[u] = true;

        for v in graph.neighbors(u) {
            if visited[v] {
                continue;
            }
            let cand = t + graph.edge_weight(u, v);
            if cand < dist[v] {
                dist[v] = cand;
                heap.push(Reverse((OrderedFloat(cand), v)));
            }
        }
    }

    dist
}
