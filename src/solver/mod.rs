//! Eikonal solvers: a common contract, three implementations selected at
//! construction rather than through a runtime dispatch hierarchy — the
//! `method` field of [`crate::config::RaytracerConfig`] picks which one
//! [`build`] hands back, mirroring how `rita` picks a predicate backend at
//! compile time rather than through a trait object per call site.

mod dspm;
mod fsm;
mod graph;
mod spm;
pub mod update;

use std::sync::atomic::AtomicBool;

use crate::config::{Method, RaytracerConfig};
use crate::error::Result;
use crate::geometry::Point3;
use crate::mesh::MeshIndex;

pub use dspm::DspmSolver;
pub use fsm::FsmSolver;
pub use spm::SpmSolver;

/// A point source: an origin time and a position, which must lie inside
/// the mesh. An "aggregate" (compound) source is simply several of these
/// sharing one event.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    pub t0: f64,
    pub position: Point3,
}

/// Result of one solver run for one event.
#[derive(Debug, Clone)]
pub struct SolveOutput {
    /// First-arrival time at every primary vertex. Secondary/tertiary node
    /// times (where the solver used them internally) are not exposed —
    /// [`crate::raytrace`] only ever reads times at mesh vertices.
    pub vertex_times: Vec<f64>,
    /// `false` only for FSM when it hit `maxit` passes without reaching
    /// `eps` and `config.strict_convergence` is `false` (otherwise this
    /// condition is a hard [`crate::error::RaytraceError::ConvergenceFailure`]).
    pub converged: bool,
}

/// Common contract every eikonal solver satisfies.
///
/// `stop` is polled cooperatively: FSM checks it between sweep
/// passes, SPM/DSPM between priority-queue pops. A solver that observes it
/// set discards its partial result and returns
/// [`crate::error::RaytraceError::ConvergenceFailure`] as the cancellation
/// marker, which the dispatcher then propagates for the still-pending
/// events without touching work already completed by other workers.
pub trait EikonalSolver: Send + Sync {
    fn solve(
        &self,
        mesh: &MeshIndex,
        sources: &[Source],
        config: &RaytracerConfig,
        stop: &AtomicBool,
    ) -> Result<SolveOutput>;
}

/// Builds the solver named by `config.method`. Stateless solvers (each
/// holds no mesh-specific data of its own — everything it needs comes in
/// through `solve`'s arguments), so this is cheap enough to call once per
/// event if a caller prefers that over reusing one instance.
pub fn build(config: &RaytracerConfig) -> Result<Box<dyn EikonalSolver>> {
    match config.method {
        Method::Fsm => Ok(Box::new(FsmSolver)),
        Method::Spm => Ok(Box::new(SpmSolver::new(config)?)),
        Method::Dspm => Ok(Box::new(DspmSolver::new(config)?)),
    }
}
