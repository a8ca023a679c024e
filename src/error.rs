//! Public error type.
//!
//! Every fallible mesh/solver operation in this crate reports directly as
//! one of the kinds below rather than through an internal `anyhow::Result`
//! layer — unlike `rita`'s `TetDataStructure`/`Tetrahedralization`, this
//! crate never grows or flips mesh connectivity after `MeshIndex::build`,
//! so it has no class of "should never happen, internal-invariant-only"
//! failure distinct from input validation for `anyhow` to carry; everything
//! is user-reachable (bad mesh input, bad config, bad runtime state) and
//! belongs in this enum, grounded in `nav-solutions/gnss-rtk`'s
//! `solver::Error` enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaytraceError {
    #[error("slowness/velocity array length mismatch: expected {expected}, got {got}")]
    WrongSize { expected: usize, got: usize },

    #[error("point ({x}, {y}, {z}) lies outside the mesh")]
    OutOfGrid { x: f64, y: f64, z: f64 },

    #[error("unknown eikonal solver method")]
    UnknownMethod,

    #[error("incompatible solver options: {0}")]
    IncompatibleOptions(&'static str),

    #[error("fast sweeping did not converge within {maxit} iterations (eps={eps})")]
    ConvergenceFailure { maxit: usize, eps: f64 },

    #[error("raytracing failed for receiver {receiver_index}: {reason}")]
    RaytraceFailure {
        receiver_index: usize,
        reason: &'static str,
    },

    #[error("thread_no {thread_no} out of range for {nthreads} worker(s)")]
    ThreadOutOfRange { thread_no: usize, nthreads: usize },

    #[error("mesh construction failed: {0}")]
    InvalidMesh(String),
}

pub type Result<T> = std::result::Result<T, RaytraceError>;
