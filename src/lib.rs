//! # eikonet
//!
//! First-arrival traveltimes and raypaths of an idealized wavefront
//! propagating through a heterogeneous 3D medium discretized as an
//! unstructured tetrahedral mesh. The medium is a scalar slowness field
//! (reciprocal wave speed), assigned either per cell or per vertex.
//!
//! The core is three interchangeable eikonal-equation solvers — the Fast
//! Sweeping Method, the Shortest-Path Method, and the Dynamic
//! Shortest-Path Method — each paired with a gradient-based backward
//! raytracer, sitting on top of an unstructured tetrahedral mesh index and
//! a `rayon`-backed dispatcher that fans independent source problems out
//! across worker threads.
//!
//! Mesh I/O, slowness-field serialization, scripting front-ends, and
//! visualization export are boundary adapters outside this crate's scope;
//! [`Raytracer::new`] takes dense vertex/tetrahedron arrays directly.

pub mod config;
mod dispatch;
pub mod error;
pub mod events;
pub mod geometry;
pub mod mesh;
pub mod node;
mod raytrace;
pub mod solver;

#[cfg(test)]
mod test_support;

pub use config::{GradientMethod, Method, RaytracerConfig};
pub use error::{RaytraceError, Result};
pub use events::{Event, ReceiverRow, SourceRow};
pub use geometry::Point3;
pub use mesh::MeshIndex;
pub use solver::Source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// A handle that can trip a [`Raytracer`]'s cooperative cancellation flag
/// from another thread while a `raytrace` call is in flight. Obtained via
/// [`Raytracer::cancel_handle`]; cloning shares the same underlying flag.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. Workers observe this between FSM sweep
    /// passes or SPM/DSPM queue pops and unwind with
    /// [`RaytraceError::ConvergenceFailure`] as the cancellation marker;
    /// still-pending events are never started.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Output of [`Raytracer::raytrace`]: traveltimes at every receiver, in
/// input order, and — if requested — the raypath polyline to each. An
/// empty polyline signals a per-receiver raytracing failure; the
/// receiver's traveltime is still reported.
#[derive(Debug, Clone)]
pub struct RaytraceOutput {
    pub traveltimes: Vec<f64>,
    pub raypaths: Option<Vec<Vec<Point3>>>,
}

/// The public entry point. Owns an immutable mesh (modulo the atomic
/// slowness swap `set_slowness` performs) and the solver configuration
/// fixed at construction time; offers the `raytrace` operation and a
/// per-worker traveltime-field query.
pub struct Raytracer {
    mesh: MeshIndex,
    config: RaytracerConfig,
    last_fields: RwLock<Vec<Vec<f64>>>,
    stop: Arc<AtomicBool>,
}

impl Raytracer {
    /// Builds the mesh index from dense vertex/tetrahedron arrays and
    /// fixes the solver configuration for the lifetime of this
    /// `Raytracer`. `config.n_secondary` secondary nodes are generated per
    /// edge at this point regardless of `config.method`, since SPM and
    /// DSPM share the same persistent table and it is cheap to build once.
    pub fn new(
        vertices: &[[f64; 3]],
        tetrahedra: &[[u32; 4]],
        config: RaytracerConfig,
    ) -> Result<Self> {
        if config.nthreads == 0 {
            return Err(RaytraceError::InvalidMesh(
                "nthreads must be at least 1".into(),
            ));
        }
        let mesh = MeshIndex::build(
            vertices,
            tetrahedra,
            config.cell_slowness,
            config.n_secondary,
        )?;
        let last_fields = RwLock::new(vec![Vec::new(); config.nthreads]);
        Ok(Self {
            mesh,
            config,
            last_fields,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle that lets another thread cancel an in-flight `raytrace`
    /// call. The flag is cleared at the start of every `raytrace` call, so
    /// a handle obtained before one call remains valid for cancelling the
    /// next.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.stop.clone())
    }

    /// Expected slowness array length: `set_slowness` rejects anything else.
    pub fn n_params(&self) -> usize {
        self.mesh.n_params()
    }

    /// Validates and atomically replaces the slowness field. Must not be
    /// called while a `raytrace` call is in flight; the mesh's internal
    /// read-write lock enforces that for free.
    pub fn set_slowness(&self, values: &[f64]) -> Result<()> {
        self.mesh.set_slowness(values.to_vec())
    }

    /// The last traveltime field computed by worker `worker_id`, of length
    /// `|vertices|`. Empty until that worker has solved at least one
    /// event.
    pub fn get_traveltime_field(&self, worker_id: usize) -> Result<Vec<f64>> {
        if worker_id >= self.config.nthreads {
            return Err(RaytraceError::ThreadOutOfRange {
                thread_no: worker_id,
                nthreads: self.config.nthreads,
            });
        }
        let guard = self.last_fields.read().expect("traveltime field lock poisoned");
        Ok(guard[worker_id].clone())
    }

    /// The primary operation: computes the traveltime (and, optionally,
    /// the raypath) at every receiver for the sources given.
    ///
    /// All input-validation errors (`thread_no` out of range, DSPM +
    /// `aggregate_src`, an out-of-grid source or receiver, a slowness
    /// length mismatch, a source/receiver count mismatch) are reported
    /// before any solve begins and before the new slowness field (if any)
    /// is installed, so a rejected call never leaves the mesh mutated.
    pub fn raytrace(
        &self,
        sources: &[SourceRow],
        receivers: &[ReceiverRow],
        slowness: Option<&[f64]>,
        thread_no: Option<usize>,
        aggregate_src: bool,
        return_rays: bool,
    ) -> Result<RaytraceOutput> {
        if let Some(tn) = thread_no {
            if tn >= self.config.nthreads {
                return Err(RaytraceError::ThreadOutOfRange {
                    thread_no: tn,
                    nthreads: self.config.nthreads,
                });
            }
        }
        if self.config.method == Method::Dspm && aggregate_src {
            return Err(RaytraceError::IncompatibleOptions(
                "DSPM does not support aggregate_src: tertiary node placement is keyed to a single source location",
            ));
        }

        for s in sources {
            if !self.mesh.is_inside(s.position) {
                return Err(RaytraceError::OutOfGrid {
                    x: s.position.x,
                    y: s.position.y,
                    z: s.position.z,
                });
            }
        }
        for r in receivers {
            if !self.mesh.is_inside(r.position) {
                return Err(RaytraceError::OutOfGrid {
                    x: r.position.x,
                    y: r.position.y,
                    z: r.position.z,
                });
            }
        }

        // Installed only after every other up-front check has passed: this
        // is a real, irreversible mutation of shared mesh state, not itself
        // a validation step, so it must not run ahead of checks that can
        // still abort the call.
        if let Some(values) = slowness {
            self.mesh.set_slowness(values.to_vec())?;
        }

        self.stop.store(false, Ordering::Relaxed);

        let events = events::group_events(sources, receivers, aggregate_src)?;
        let solver = solver::build(&self.config)?;
        let outputs =
            dispatch::solve_events(&self.mesh, solver.as_ref(), &events, &self.config, &self.stop)?;

        self.record_last_fields(&outputs);

        let mut traveltimes = vec![f64::NAN; receivers.len()];
        let need_rays = return_rays || self.config.tt_from_rp;
        let mut raypaths: Vec<Vec<Point3>> = vec![Vec::new(); receivers.len()];

        for (event, (_worker, output)) in events.iter().zip(outputs.iter()) {
            for &recv_idx in &event.receiver_indices {
                let receiver_pos = receivers[recv_idx].position;
                traveltimes[recv_idx] = interpolate_field(&self.mesh, &output.vertex_times, receiver_pos);

                if !need_rays {
                    continue;
                }

                match raytrace::trace_ray(
                    &self.mesh,
                    &output.vertex_times,
                    receiver_pos,
                    &event.sources,
                    self.config.gradient_method,
                    self.config.min_dist,
                    recv_idx,
                ) {
                    Ok((path, t0)) => {
                        if self.config.tt_from_rp {
                            traveltimes[recv_idx] = t0 + integrate_slowness(&self.mesh, &path);
                        }
                        if return_rays {
                            raypaths[recv_idx] = path;
                        }
                    }
                    Err(_) => {
                        // Raytracing failure is per-receiver: keep the
                        // graph-derived traveltime, report an empty raypath.
                    }
                }
            }
        }

        Ok(RaytraceOutput {
            traveltimes,
            raypaths: return_rays.then_some(raypaths),
        })
    }

    fn record_last_fields(&self, outputs: &[(usize, solver::SolveOutput)]) {
        let mut guard = self.last_fields.write().expect("traveltime field lock poisoned");
        for (worker, output) in outputs {
            if let Some(slot) = guard.get_mut(*worker) {
                *slot = output.vertex_times.clone();
            }
        }
    }
}

/// Barycentric interpolation of `field` (indexed by vertex) at `p`. `p` is
/// assumed already validated as inside the mesh by the caller.
fn interpolate_field(mesh: &MeshIndex, field: &[f64], p: Point3) -> f64 {
    match mesh.locate(p) {
        Some(tet_idx) => {
            let [a, b, c, d] = mesh.tet(tet_idx).vertices;
            let pa = mesh.vertex(a).position;
            let pb = mesh.vertex(b).position;
            let pc = mesh.vertex(c).position;
            let pd = mesh.vertex(d).position;
            match geometry::barycentric_tet(pa, pb, pc, pd, p) {
                Some(bary) => {
                    bary[0] * field[a] + bary[1] * field[b] + bary[2] * field[c] + bary[3] * field[d]
                }
                None => (field[a] + field[b] + field[c] + field[d]) / 4.0,
            }
        }
        None => f64::NAN,
    }
}

/// Integrates slowness along a polyline by midpoint rule, segment by
/// segment — used to recompute a `tt_from_rp` traveltime from the
/// backward-traced ray.
fn integrate_slowness(mesh: &MeshIndex, path: &[Point3]) -> f64 {
    let mut total = 0.0;
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        let mid = Point3::from((a.coords + b.coords) / 2.0);
        total += (b - a).norm() * mesh.slowness_at(mid);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GradientMethod, Method};

    fn unit_cube_raytracer(config: RaytracerConfig) -> Raytracer {
        let (vertices, tets) = test_support::unit_cube_mesh();
        Raytracer::new(&vertices, &tets, config).unwrap()
    }

    /// Unit cube, homogeneous s=1, source/receiver at opposite corners,
    /// FSM with tight eps.
    #[test]
    fn fsm_homogeneous_unit_cube_straight_line() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-12,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);

        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 0.0, 0.0])];
        let out = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();
        assert!((out.traveltimes[0] - 1.0).abs() < 1e-6);
    }

    /// Same setup as above, run through SPM instead of FSM.
    #[test]
    fn spm_homogeneous_unit_cube_straight_line() {
        let config = RaytracerConfig {
            method: Method::Spm,
            n_secondary: 2,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);

        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 0.0, 0.0])];
        let out = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();
        assert!((out.traveltimes[0] - 1.0).abs() < 0.05);
    }

    /// Layered slowness (top half s=1, bottom half s=2), vertical
    /// source-to-receiver path along a mesh-aligned column.
    #[test]
    fn layered_slowness_vertical_path() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-10,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let (vertices, tets) = test_support::column_mesh(2, 0.5);
        let rt = Raytracer::new(&vertices, &tets, config).unwrap();

        // layer 0 (z in [0,0.5)) is the bottom (s=2), layer 1 ([0.5,1]) the
        // top (s=1), matching a source at z=1 traveling down to z=0.
        let slowness = test_support::layered_cell_slowness(2, &[2.0, 1.0]);
        rt.set_slowness(&slowness).unwrap();

        // (0,0,z) is an actual mesh vertex column, so the straight vertical
        // path coincides with mesh edges and FSM's local update is exact up
        // to floating-point error, not mesh-discretization error.
        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 1.0])];
        let receivers = vec![ReceiverRow::from_xyz([0.0, 0.0, 0.0])];
        let out = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();
        assert!((out.traveltimes[0] - 1.5).abs() < 1e-4);
    }

    /// An origin-time offset shifts the reported traveltime by exactly
    /// that offset.
    #[test]
    fn origin_time_offset_shifts_traveltime() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-12,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);

        let sources = vec![SourceRow::from_t0_xyz([5.0, 0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 0.0, 0.0])];
        let out = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();
        assert!((out.traveltimes[0] - 6.0).abs() < 1e-6);
    }

    /// An out-of-grid source is rejected.
    #[test]
    fn out_of_grid_source_is_rejected_up_front() {
        let rt = unit_cube_raytracer(RaytracerConfig::default());
        let sources = vec![SourceRow::from_xyz([2.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([0.5, 0.5, 0.5])];
        let err = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap_err();
        assert!(matches!(err, RaytraceError::OutOfGrid { .. }));
    }

    /// DSPM + aggregate_src is rejected up front.
    #[test]
    fn dspm_rejects_aggregate_src() {
        let config = RaytracerConfig {
            method: Method::Dspm,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);
        let sources = vec![
            SourceRow::from_xyz([0.0, 0.0, 0.0]),
            SourceRow::from_xyz([0.1, 0.0, 0.0]),
        ];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 1.0, 1.0])];
        let err = rt
            .raytrace(&sources, &receivers, None, None, true, false)
            .unwrap_err();
        assert!(matches!(err, RaytraceError::IncompatibleOptions(_)));
    }

    /// Parallel dispatch is deterministic vs. sequential.
    #[test]
    fn parallel_dispatch_matches_sequential() {
        let base = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-9,
            maxit: 100,
            ..RaytracerConfig::default()
        };
        let sources: Vec<SourceRow> = (0..8)
            .map(|i| SourceRow::from_xyz([0.0, 0.0, (i as f64) * 0.01]))
            .collect();
        let receivers: Vec<ReceiverRow> = (0..8)
            .map(|i| ReceiverRow::from_xyz([1.0, 1.0, (i as f64) * 0.01]))
            .collect();

        let rt_seq = unit_cube_raytracer(RaytracerConfig { nthreads: 1, ..base });
        let rt_par = unit_cube_raytracer(RaytracerConfig { nthreads: 4, ..base });

        let out_seq = rt_seq
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();
        let out_par = rt_par
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();

        assert_eq!(out_seq.traveltimes, out_par.traveltimes);
    }

    #[test]
    fn raypath_endpoints_and_tt_from_rp_consistency() {
        let config = RaytracerConfig {
            method: Method::Spm,
            n_secondary: 2,
            tt_from_rp: true,
            gradient_method: GradientMethod::Ls1,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);

        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 1.0, 1.0])];
        let out = rt
            .raytrace(&sources, &receivers, None, None, false, true)
            .unwrap();

        let rays = out.raypaths.unwrap();
        assert_eq!(rays[0].first().copied().unwrap(), Point3::new(1.0, 1.0, 1.0));
        let last = *rays[0].last().unwrap();
        assert!((last - Point3::new(0.0, 0.0, 0.0)).norm() < 1e-2);
        assert!((out.traveltimes[0] - 3.0_f64.sqrt()).abs() < 0.1);
    }

    #[test]
    fn thread_out_of_range_is_rejected() {
        let rt = unit_cube_raytracer(RaytracerConfig::default());
        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 1.0, 1.0])];
        let err = rt
            .raytrace(&sources, &receivers, None, Some(5), false, false)
            .unwrap_err();
        assert!(matches!(err, RaytraceError::ThreadOutOfRange { .. }));
    }

    #[test]
    fn slowness_scaling_scales_traveltime() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-10,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);
        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 0.0, 0.0])];

        let base = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();

        let n = rt.n_params();
        rt.set_slowness(&vec![3.0; n]).unwrap();
        let scaled = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();

        assert!((scaled.traveltimes[0] - 3.0 * base.traveltimes[0]).abs() < 1e-6);
    }

    /// Pre-tripping the cancel handle aborts the whole call with
    /// `ConvergenceFailure` rather than running any solve to completion.
    #[test]
    fn cancel_handle_aborts_pending_solve() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-12,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);

        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 0.0, 0.0])];

        rt.cancel_handle().cancel();
        let err = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap_err();
        assert!(matches!(err, RaytraceError::ConvergenceFailure { .. }));
    }

    /// The flag is cleared at the start of each call, so a stale
    /// cancellation from a previous call doesn't poison the next one.
    #[test]
    fn cancel_flag_resets_between_calls() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-12,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let rt = unit_cube_raytracer(config);
        let sources = vec![SourceRow::from_xyz([0.0, 0.0, 0.0])];
        let receivers = vec![ReceiverRow::from_xyz([1.0, 0.0, 0.0])];

        let handle = rt.cancel_handle();
        handle.cancel();
        assert!(rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .is_err());

        let out = rt
            .raytrace(&sources, &receivers, None, None, false, false)
            .unwrap();
        assert!((out.traveltimes[0] - 1.0).abs() < 1e-6);
    }

    /// Property-based: triangle inequality `T(A) <= T(B) + s_max*|A-B|` for
    /// a homogeneous medium, across 50 randomly sampled receiver pairs
    /// sharing one source.
    #[test]
    fn triangle_inequality_holds_for_random_receiver_pairs() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-10,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let (vertices, tets) = test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, config.cell_slowness, config.n_secondary).unwrap();
        let rt = Raytracer::new(&vertices, &tets, config).unwrap();
        let s_max = 1.0;

        let source = SourceRow::from_xyz([0.0, 0.0, 0.0]);
        let points = test_support::sample_interior_points(&mesh, 50, 42);
        let receivers: Vec<ReceiverRow> = points
            .iter()
            .map(|p| ReceiverRow::from_xyz([p.x, p.y, p.z]))
            .collect();

        let out = rt
            .raytrace(&[source], &receivers, None, None, true, false)
            .unwrap();

        // Slack covers FSM's discretization error on this deliberately
        // coarse 6-tetrahedron mesh (the invariant is exact only on the
        // continuum solution); it would still catch a grossly wrong field.
        let slack = 0.3;
        for i in 0..points.len() {
            for j in 0..points.len() {
                let dist = (points[i] - points[j]).norm();
                assert!(
                    out.traveltimes[i] <= out.traveltimes[j] + s_max * dist + slack,
                    "triangle inequality violated for receivers {i},{j}"
                );
            }
        }
    }

    /// Property-based: shifting every source's `t0` by `Delta` shifts every
    /// receiver's reported traveltime by exactly `Delta`, over 20 randomly
    /// sampled receivers.
    #[test]
    fn origin_time_shift_is_exact_for_random_receivers() {
        let config = RaytracerConfig {
            method: Method::Fsm,
            eps: 1e-10,
            maxit: 200,
            ..RaytracerConfig::default()
        };
        let (vertices, tets) = test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, config.cell_slowness, config.n_secondary).unwrap();
        let rt = Raytracer::new(&vertices, &tets, config).unwrap();

        let points = test_support::sample_interior_points(&mesh, 20, 7);
        let receivers: Vec<ReceiverRow> = points
            .iter()
            .map(|p| ReceiverRow::from_xyz([p.x, p.y, p.z]))
            .collect();
        let delta = 2.5;

        let base = rt
            .raytrace(
                &[SourceRow::from_xyz([0.5, 0.5, 0.5])],
                &receivers,
                None,
                None,
                true,
                false,
            )
            .unwrap();
        let shifted = rt
            .raytrace(
                &[SourceRow::from_t0_xyz([delta, 0.5, 0.5, 0.5])],
                &receivers,
                None,
                None,
                true,
                false,
            )
            .unwrap();

        for (b, s) in base.traveltimes.iter().zip(shifted.traveltimes.iter()) {
            assert!((s - b - delta).abs() < 1e-6);
        }
    }
}
