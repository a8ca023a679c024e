//! Construction-time configuration for a [`crate::Raytracer`].
//!
//! A plain struct with a `Default` impl, not a builder hiding process-wide
//! state: there is no global verbosity knob here, just the ordinary `log`
//! crate facade, configured by whatever binary links this library.

/// Which eikonal solver to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Fast Sweeping Method: local traveltime update at primary vertices.
    Fsm,
    /// Shortest-Path Method: best-first search over vertices + secondary nodes.
    Spm,
    /// Dynamic Shortest-Path Method: SPM plus tertiary nodes near the source.
    Dspm,
}

/// Strategy used by the backward raytracer to estimate `∇T` at a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientMethod {
    /// Linear least-squares fit over the containing tetrahedron's 4 vertices.
    Ls1,
    /// Quadratic least-squares fit over the first-ring vertex neighborhood.
    Ls2,
    /// Barycentric-weighted average of each vertex's own LS1 gradient.
    Average,
}

#[derive(Debug, Clone, Copy)]
pub struct RaytracerConfig {
    /// Slowness field length is `|cells|` if `true`, `|vertices|` if `false`.
    pub cell_slowness: bool,
    pub method: Method,
    pub gradient_method: GradientMethod,
    /// SPM/DSPM only: recompute the reported traveltime by integrating
    /// slowness along the backward-traced ray rather than reading it off
    /// the graph.
    pub tt_from_rp: bool,
    /// Per-vertex slowness only: interpolate velocity (`1/s`) rather than
    /// slowness across a tetrahedron.
    pub interp_vel: bool,
    /// FSM convergence tolerance.
    pub eps: f64,
    /// FSM max sweep-pass iterations.
    pub maxit: usize,
    /// Raytracer termination tolerance.
    pub min_dist: f64,
    /// SPM/DSPM secondary nodes per edge.
    pub n_secondary: usize,
    /// DSPM tertiary nodes per eligible edge.
    pub n_tertiary: usize,
    /// DSPM: sphere radius around the source within which tetrahedra get
    /// tertiary nodes.
    pub radius_tertiary: f64,
    /// Worker pool size for the parallel dispatch of independent events.
    pub nthreads: usize,
    /// If `true`, FSM non-convergence is a hard `RaytraceError::ConvergenceFailure`
    /// instead of a logged warning with a partial field.
    pub strict_convergence: bool,
}

impl Default for RaytracerConfig {
    fn default() -> Self {
        Self {
            cell_slowness: true,
            method: Method::Fsm,
            gradient_method: GradientMethod::Ls1,
            tt_from_rp: false,
            interp_vel: false,
            eps: 1e-5,
            maxit: 50,
            min_dist: 1e-3,
            n_secondary: 2,
            n_tertiary: 2,
            radius_tertiary: 1.0,
            nthreads: 1,
            strict_convergence: false,
        }
    }
}
