//! Dynamic Shortest-Path Method: SPM run over a source-local overlay graph
//! that adds tertiary nodes near the source for extra accuracy, then
//! discards them. The overlay never mutates [`MeshIndex`] — it is built and
//! dropped inside a single [`DspmSolver::solve`] call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;

use crate::config::RaytracerConfig;
use crate::error::{RaytraceError, Result};
use crate::geometry::{edge_key, Point3, VertexIdx};
use crate::mesh::{MeshIndex, NodeId};

use super::graph::{shortest_paths, Graph};
use super::spm::out_of_grid;
use super::{EikonalSolver, SolveOutput, Source};

pub struct DspmSolver {
    n_tertiary: usize,
    radius_tertiary: f64,
}

impl DspmSolver {
    pub fn new(config: &RaytracerConfig) -> Result<Self> {
        Ok(Self {
            n_tertiary: config.n_tertiary,
            radius_tertiary: config.radius_tertiary,
        })
    }
}

impl EikonalSolver for DspmSolver {
    fn solve(
        &self,
        mesh: &MeshIndex,
        sources: &[Source],
        _config: &RaytracerConfig,
        stop: &AtomicBool,
    ) -> Result<SolveOutput> {
        if sources.is_empty() {
            return Err(out_of_grid(Point3::origin()));
        }

        // Tertiary placement is keyed to a single source location; for an
        // event with several source rows (a virtual-source shape, not the
        // `aggregate_src` compound source DSPM already rejects at the
        // public boundary) the centroid of the group stands in for "the
        // source" the radius is measured from.
        let center = centroid(sources.iter().map(|s| s.position));

        let overlay = Overlay::build(mesh, center, self.n_tertiary, self.radius_tertiary);

        let mut seeds = Vec::new();
        for src in sources {
            seed_source_overlay(mesh, &overlay, src, &mut seeds)?;
        }

        let dist = shortest_paths(&overlay, seeds, stop);
        if stop.load(std::sync::atomic::Ordering::Relaxed) {
            #[cfg(feature = "logging")]
            log::debug!("DSPM search cancelled before completion");
            return Err(RaytraceError::ConvergenceFailure {
                maxit: 0,
                eps: 0.0,
            });
        }
        let vertex_times = dist[..mesh.num_vertices()].to_vec();

        Ok(SolveOutput {
            vertex_times,
            converged: true,
        })
    }
}

fn centroid(points: impl Iterator<Item = Point3>) -> Point3 {
    let mut sum = nalgebra::Vector3::zeros();
    let mut n = 0usize;
    for p in points {
        sum += p.coords;
        n += 1;
    }
    Point3::from(sum / n.max(1) as f64)
}

/// The solve-local overlay graph: the base mesh's primary+secondary nodes,
/// plus tertiary nodes on every edge of every tetrahedron whose centroid
/// lies within `radius_tertiary` of the source.
struct Overlay<'a> {
    mesh: &'a MeshIndex,
    base: usize,
    extra_positions: Vec<Point3>,
    tertiary_per_edge: HashMap<(VertexIdx, VertexIdx), Vec<NodeId>>,
    /// Extra adjacency entries introduced by tertiary nodes, keyed by node
    /// id (both newly-added ids and base ids that gained a new tertiary
    /// neighbor).
    extra_adjacency: HashMap<NodeId, Vec<NodeId>>,
}

impl<'a> Overlay<'a> {
    fn build(mesh: &'a MeshIndex, center: Point3, n_tertiary: usize, radius: f64) -> Self {
        let base = mesh.num_nodes();
        let mut extra_positions = Vec::new();
        let mut tertiary_per_edge: HashMap<(VertexIdx, VertexIdx), Vec<NodeId>> = HashMap::new();

        let mut eligible = Vec::new();
        if n_tertiary > 0 {
            for (tet_idx, tet) in mesh.tets().iter().enumerate() {
                let [a, b, c, d] = tet.vertices;
                let c0 = centroid(
                    [a, b, c, d]
                        .into_iter()
                        .map(|v| mesh.vertex(v).position),
                );
                if (c0 - center).norm() <= radius {
                    eligible.push(tet_idx);
                }
            }
        }

        for &tet_idx in &eligible {
            let tet = mesh.tet(tet_idx);
            for (a, b) in tet.edges() {
                tertiary_per_edge.entry((a, b)).or_insert_with(|| {
                    let pa = mesh.vertex(a).position;
                    let pb = mesh.vertex(b).position;
                    let mut ids = Vec::with_capacity(n_tertiary);
                    for slot in 1..=n_tertiary {
                        let t = slot as f64 / (n_tertiary as f64 + 1.0);
                        ids.push(base + extra_positions.len());
                        extra_positions.push(pa + (pb - pa) * t);
                    }
                    ids
                });
            }
        }

        let mut edge_set: HashSet<(NodeId, NodeId)> = HashSet::new();
        for &tet_idx in &eligible {
            let tet = mesh.tet(tet_idx);
            for face in tet.faces() {
                let mut face_nodes: Vec<NodeId> = face.to_vec();
                for i in 0..3 {
                    let a = face[i];
                    let b = face[(i + 1) % 3];
                    face_nodes.extend(mesh.secondary().nodes_on_edge(a, b).iter().copied());
                    if let Some(ids) = tertiary_per_edge.get(&edge_key(a, b)) {
                        face_nodes.extend(ids.iter().copied());
                    }
                }
                for i in 0..face_nodes.len() {
                    for j in (i + 1)..face_nodes.len() {
                        let u = face_nodes[i];
                        let v = face_nodes[j];
                        // Already connected through the base mesh's own
                        // adjacency table; no need to duplicate the edge.
                        if u < base && v < base {
                            continue;
                        }
                        edge_set.insert(if u < v { (u, v) } else { (v, u) });
                    }
                }
            }
        }

        let mut extra_adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (u, v) in edge_set {
            extra_adjacency.entry(u).or_default().push(v);
            extra_adjacency.entry(v).or_default().push(u);
        }

        Self {
            mesh,
            base,
            extra_positions,
            tertiary_per_edge,
            extra_adjacency,
        }
    }

    fn node_position(&self, id: NodeId) -> Point3 {
        if id < self.base {
            self.mesh.node_position(id)
        } else {
            self.extra_positions[id - self.base]
        }
    }

    fn tertiary_on_edge(&self, a: VertexIdx, b: VertexIdx) -> &[NodeId] {
        self.tertiary_per_edge
            .get(&edge_key(a, b))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Graph for Overlay<'_> {
    fn num_nodes(&self) -> usize {
        self.base + self.extra_positions.len()
    }

    fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = if id < self.base {
            self.mesh.neighbors(id).to_vec()
        } else {
            Vec::new()
        };
        if let Some(extra) = self.extra_adjacency.get(&id) {
            out.extend(extra.iter().copied());
        }
        out
    }

    fn edge_weight(&self, a: NodeId, b: NodeId) -> f64 {
        let pa = self.node_position(a);
        let pb = self.node_position(b);
        let dist = (pb - pa).norm();
        let s = 0.5 * (self.mesh.slowness_at(pa) + self.mesh.slowness_at(pb));
        dist * s
    }
}

/// Like [`super::spm::seed_source`] but also seeds any tertiary nodes on the
/// containing tetrahedron's edges.
fn seed_source_overlay(
    mesh: &MeshIndex,
    overlay: &Overlay,
    src: &Source,
    seeds: &mut Vec<(NodeId, f64)>,
) -> Result<()> {
    if !mesh.is_inside_bbox(src.position) {
        return Err(out_of_grid(src.position));
    }
    let tet_idx = mesh
        .locate(src.position)
        .ok_or_else(|| out_of_grid(src.position))?;
    let tet = *mesh.tet(tet_idx);
    let s = mesh.tet_slowness(tet_idx);

    let mut seed_node = |id: NodeId, p: Point3| {
        let t = src.t0 + s * (p - src.position).norm();
        seeds.push((id, t));
    };

    for v in tet.vertices {
        seed_node(v, mesh.vertex(v).position);
    }
    for (a, b) in tet.edges() {
        for &id in mesh.secondary().nodes_on_edge(a, b) {
            seed_node(id, mesh.node_position(id));
        }
        for &id in overlay.tertiary_on_edge(a, b) {
            seed_node(id, overlay.node_position(id));
        }
    }
    Ok(())
}
