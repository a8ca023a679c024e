//! Fast Sweeping Method: Gauss-Seidel relaxation over the mesh vertices in
//! the 8 axis-sign sweep orderings, using [`super::update`]'s local
//! candidates at each step.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RaytracerConfig;
use crate::error::{RaytraceError, Result};
use crate::geometry::{Point3, VertexIdx};
use crate::mesh::MeshIndex;
use crate::node::TravelTimeField;

use super::update::{edge_update, face_update, vertex_update};
use super::{EikonalSolver, SolveOutput, Source};

/// The 8 sign combinations sweeping alternates between, one full pass
/// being all 8. Each pass re-sorts vertices by `(sx*x, sy*y, sz*z)` and
/// relaxes them in that order, so information from every sweep direction
/// has a chance to propagate across the mesh within one pass.
const SIGN_ORDERINGS: [[f64; 3]; 8] = [
    [1.0, 1.0, 1.0],
    [1.0, 1.0, -1.0],
    [1.0, -1.0, 1.0],
    [1.0, -1.0, -1.0],
    [-1.0, 1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [-1.0, -1.0, -1.0],
];

pub struct FsmSolver;

impl EikonalSolver for FsmSolver {
    fn solve(
        &self,
        mesh: &MeshIndex,
        sources: &[Source],
        config: &RaytracerConfig,
        stop: &AtomicBool,
    ) -> Result<SolveOutput> {
        let n = mesh.num_vertices();
        let mut field = TravelTimeField::new(n);

        for src in sources {
            seed_source(mesh, src, &mut field)?;
        }

        let positions: Vec<Point3> = (0..n).map(|v| mesh.vertex(v).position).collect();

        let mut converged = false;
        for _pass in 0..config.maxit {
            if stop.load(Ordering::Relaxed) {
                #[cfg(feature = "logging")]
                log::debug!("FSM sweep cancelled before convergence");
                return Err(RaytraceError::ConvergenceFailure {
                    maxit: config.maxit,
                    eps: config.eps,
                });
            }
            let mut max_delta: f64 = 0.0;

            for signs in SIGN_ORDERINGS {
                let order = sweep_order(&positions, signs);
                for v in order {
                    if field.known[v] {
                        continue;
                    }
                    let candidate = best_candidate(mesh, v, &field.times, config);
                    let current = field.get(v);
                    if candidate < current {
                        let delta = if current.is_finite() {
                            current - candidate
                        } else {
                            f64::INFINITY
                        };
                        max_delta = if delta.is_finite() {
                            max_delta.max(delta)
                        } else {
                            f64::INFINITY
                        };
                        field.times[v] = candidate;
                    }
                }
            }

            if max_delta <= config.eps {
                converged = true;
                break;
            }
        }

        if !converged {
            #[cfg(feature = "logging")]
            log::warn!(
                "FSM did not converge within {} passes (eps = {})",
                config.maxit,
                config.eps
            );
            if config.strict_convergence {
                return Err(RaytraceError::ConvergenceFailure {
                    maxit: config.maxit,
                    eps: config.eps,
                });
            }
        }

        Ok(SolveOutput {
            vertex_times: field.times,
            converged,
        })
    }
}

/// Seeds the time field at every vertex of the tetrahedron containing the
/// source, as a straight-line candidate from the source point. These
/// vertices are held fixed for the rest of the solve — the same
/// "Dirichlet ring around the source" convention `rita`-adjacent FSM
/// implementations use to avoid the source singularity.
fn seed_source(mesh: &MeshIndex, src: &Source, field: &mut TravelTimeField) -> Result<()> {
    if !mesh.is_inside_bbox(src.position) {
        return Err(out_of_grid(src.position));
    }
    let tet_idx = mesh.locate(src.position).ok_or_else(|| out_of_grid(src.position))?;
    let tet = *mesh.tet(tet_idx);
    let s = mesh.tet_slowness(tet_idx);
    for v in tet.vertices {
        let p = mesh.vertex(v).position;
        let t = src.t0 + s * (p - src.position).norm();
        let t = t.min(field.get(v));
        field.set(v, t);
    }
    Ok(())
}

fn out_of_grid(p: Point3) -> RaytraceError {
    RaytraceError::OutOfGrid {
        x: p.x,
        y: p.y,
        z: p.z,
    }
}

fn sweep_order(positions: &[Point3], signs: [f64; 3]) -> Vec<VertexIdx> {
    let mut order: Vec<VertexIdx> = (0..positions.len()).collect();
    order.sort_by(|&a, &b| {
        let ka = (
            signs[0] * positions[a].x,
            signs[1] * positions[a].y,
            signs[2] * positions[a].z,
        );
        let kb = (
            signs[0] * positions[b].x,
            signs[1] * positions[b].y,
            signs[2] * positions[b].z,
        );
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// The smallest feasible candidate time for vertex `v`, taken over every
/// tetrahedron incident to it, using whichever of vertex/edge/face update
/// applies given which of the tet's other 3 vertices currently have a
/// finite time.
fn best_candidate(mesh: &MeshIndex, v: VertexIdx, times: &[f64], config: &RaytracerConfig) -> f64 {
    let mut best = times[v];
    let apex = mesh.vertex(v).position;

    for &tet_idx in &mesh.vertex(v).incident_tets {
        let tet = *mesh.tet(tet_idx);
        let others: Vec<VertexIdx> = tet.vertices.iter().copied().filter(|&w| w != v).collect();
        let slowness = tet_update_slowness(mesh, tet_idx, config);

        let known: Vec<VertexIdx> = others.iter().copied().filter(|&w| times[w].is_finite()).collect();

        for &w in &known {
            let cand = vertex_update(times[w], mesh.vertex(w).position, apex, slowness);
            best = best.min(cand);
        }

        for i in 0..known.len() {
            for j in (i + 1)..known.len() {
                let (a, b) = (known[i], known[j]);
                let cand = edge_update(
                    mesh.vertex(a).position,
                    times[a],
                    mesh.vertex(b).position,
                    times[b],
                    apex,
                    slowness,
                );
                best = best.min(cand);
            }
        }

        if known.len() == 3 {
            let (a, b, c) = (known[0], known[1], known[2]);
            if let Some(cand) = face_update(
                mesh.vertex(a).position,
                times[a],
                mesh.vertex(b).position,
                times[b],
                mesh.vertex(c).position,
                times[c],
                apex,
                slowness,
            ) {
                best = best.min(cand);
            }
        }
    }

    best
}

/// A single representative slowness for a tetrahedron's local update: the
/// cell value for a per-cell field, or the mean (or, with `interp_vel`,
/// the harmonic-style mean via velocity averaging) of its 4 vertex values
/// for a per-vertex field.
fn tet_update_slowness(mesh: &MeshIndex, tet_idx: crate::geometry::TetIdx, config: &RaytracerConfig) -> f64 {
    if mesh.cell_slowness() {
        return mesh.tet_slowness(tet_idx);
    }
    let tet = mesh.tet(tet_idx);
    let values: Vec<f64> = tet
        .vertices
        .iter()
        .map(|&v| mesh.vertex_slowness(v).expect("per-vertex field"))
        .collect();
    if config.interp_vel {
        let avg_velocity: f64 = values.iter().map(|s| 1.0 / s).sum::<f64>() / values.len() as f64;
        1.0 / avg_velocity
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshIndex;

    #[test]
    fn straight_line_traveltime_in_homogeneous_cube() {
        let (vertices, tets) = crate::test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, true, 0).unwrap();
        let config = RaytracerConfig::default();

        let sources = [Source {
            t0: 0.0,
            position: Point3::new(0.0, 0.0, 0.0),
        }];
        let stop = AtomicBool::new(false);
        let out = FsmSolver.solve(&mesh, &sources, &config, &stop).unwrap();
        assert!(out.converged);

        // opposite corner of a unit cube, unit slowness: straight-line time is sqrt(3)
        let far_corner = vertices
            .iter()
            .position(|v| *v == [1.0, 1.0, 1.0])
            .unwrap();
        assert!((out.vertex_times[far_corner] - 3.0_f64.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn out_of_grid_source_is_rejected() {
        let (vertices, tets) = crate::test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, true, 0).unwrap();
        let config = RaytracerConfig::default();
        let sources = [Source {
            t0: 0.0,
            position: Point3::new(5.0, 5.0, 5.0),
        }];
        assert!(matches!(
            FsmSolver.solve(&mesh, &sources, &config, &AtomicBool::new(false)),
            Err(RaytraceError::OutOfGrid { .. })
        ));
    }
}
