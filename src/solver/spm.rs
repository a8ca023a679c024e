//! Shortest-Path Method: best-first search over the mesh's persistent
//! primary + secondary node graph. Trades physical accuracy (rays
//! constrained to graph edges) for robustness and monotonicity; denser
//! `n_secondary` sampling reduces the angular error.

use std::sync::atomic::AtomicBool;

use crate::config::RaytracerConfig;
use crate::error::{RaytraceError, Result};
use crate::geometry::Point3;
use crate::mesh::{MeshIndex, NodeId};

use super::graph::shortest_paths;
use super::{EikonalSolver, SolveOutput, Source};

pub struct SpmSolver;

impl SpmSolver {
    pub fn new(_config: &RaytracerConfig) -> Result<Self> {
        Ok(Self)
    }
}

impl EikonalSolver for SpmSolver {
    fn solve(
        &self,
        mesh: &MeshIndex,
        sources: &[Source],
        _config: &RaytracerConfig,
        stop: &AtomicBool,
    ) -> Result<SolveOutput> {
        let mut seeds = Vec::new();
        for src in sources {
            seed_source(mesh, src, &mut seeds)?;
        }

        let dist = shortest_paths(mesh, seeds, stop);
        if stop.load(std::sync::atomic::Ordering::Relaxed) {
            #[cfg(feature = "logging")]
            log::debug!("SPM search cancelled before completion");
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

/// Seeds every graph node (primary vertices and secondary nodes) belonging
/// to the tetrahedron containing `src` with a straight-line candidate time
/// from the source point, exactly as FSM seeds its Dirichlet ring.
pub(super) fn seed_source(mesh: &MeshIndex, src: &Source, seeds: &mut Vec<(NodeId, f64)>) -> Result<()> {
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
    }
    Ok(())
}

pub(super) fn out_of_grid(p: Point3) -> RaytraceError {
    RaytraceError::OutOfGrid {
        x: p.x,
        y: p.y,
        z: p.z,
    }
}
