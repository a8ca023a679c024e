//! Parallel dispatch: partitions independent events across a `rayon`
//! worker pool. If the number of events is less than `nthreads` or
//! `nthreads == 1`, solves run sequentially on the caller; otherwise
//! `rayon`'s work-stealing scheduler fans them out across a pool sized to
//! `nthreads`, without this crate managing thread assignment by hand.

use std::sync::atomic::AtomicBool;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::config::RaytracerConfig;
use crate::error::{RaytraceError, Result};
use crate::events::Event;
use crate::mesh::MeshIndex;
use crate::solver::{EikonalSolver, SolveOutput};

/// Solves every event, returning each output paired with the index of the
/// worker that produced it (always `0` on the sequential path; the
/// `rayon`-local thread index otherwise) so [`crate::Raytracer`] can keep a
/// last-computed-field slot per worker for `get_traveltime_field`.
///
/// `stop` is shared by every event's solve; tripping it cancels all
/// still-running and not-yet-started events cooperatively.
pub fn solve_events(
    mesh: &MeshIndex,
    solver: &dyn EikonalSolver,
    events: &[Event],
    config: &RaytracerConfig,
    stop: &AtomicBool,
) -> Result<Vec<(usize, SolveOutput)>> {
    if events.len() < config.nthreads || config.nthreads == 1 {
        return events
            .iter()
            .map(|ev| solver.solve(mesh, &ev.sources, config, stop).map(|o| (0, o)))
            .collect();
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.nthreads)
        .build()
        .map_err(|e| RaytraceError::InvalidMesh(format!("failed to build worker pool: {e}")))?;

    pool.install(|| {
        events
            .par_iter()
            .map(|ev| {
                let worker = rayon::current_thread_index().unwrap_or(0);
                solver.solve(mesh, &ev.sources, config, stop).map(|o| (worker, o))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Method;
    use crate::geometry::Point3;
    use crate::solver::Source;

    #[test]
    fn sequential_and_parallel_dispatch_agree() {
        let (vertices, tets) = crate::test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, true, 0).unwrap();

        let events: Vec<Event> = (0..8)
            .map(|i| Event {
                sources: vec![Source {
                    t0: 0.0,
                    position: Point3::new(0.0, 0.0, 0.0),
                }],
                receiver_indices: vec![i],
            })
            .collect();

        let config_seq = RaytracerConfig {
            method: Method::Fsm,
            nthreads: 1,
            ..RaytracerConfig::default()
        };
        let config_par = RaytracerConfig {
            method: Method::Fsm,
            nthreads: 4,
            ..RaytracerConfig::default()
        };

        let solver = crate::solver::build(&config_seq).unwrap();
        let stop = AtomicBool::new(false);
        let seq = solve_events(&mesh, solver.as_ref(), &events, &config_seq, &stop).unwrap();
        let par = solve_events(&mesh, solver.as_ref(), &events, &config_par, &stop).unwrap();

        for (a, b) in seq.iter().zip(par.iter()) {
            assert_eq!(a.1.vertex_times, b.1.vertex_times);
        }
    }
}
