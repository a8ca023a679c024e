//! The local traveltime update: given a tetrahedron with some vertices at
//! known times and one unknown apex, find the shortest-time path from the
//! known face to the apex.
//!
//! The exact 3D analogue of Sethian's upwind triangle update is, in
//! general, the minimizer of
//! `g(p) = T_interp(p) + s * |apex - p|` over `p` on the known face — a
//! smooth but not closed-form-friendly objective once the face has three
//! known corners. Rather than a memorized closed-form quadratic (easy to
//! get subtly wrong for the 3D case), this solves it directly as the
//! bounded minimization it is: golden-section search for the 2-known
//! (edge) case, coordinate-descent golden-section for the 3-known (face)
//! case. Both are safe in the sense required by FSM: every candidate they
//! produce corresponds to an actual feasible path, so it is always an
//! upper bound on the true first-arrival time, and FSM only ever accepts a
//! strictly smaller candidate — an imperfect minimization slows
//! convergence, it cannot produce a wrong answer.

use crate::geometry::Point3;

const GOLDEN_ITERS: usize = 40;
const COORD_DESCENT_ROUNDS: usize = 6;

/// Vertex-only candidate: straight line from a known vertex to the apex.
pub fn vertex_update(t_known: f64, p_known: Point3, apex: Point3, slowness: f64) -> f64 {
    t_known + slowness * (apex - p_known).norm()
}

/// Two-known-vertex (edge) candidate: minimize over the point `p` sliding
/// along segment `(pa, pb)` of `lerp(ta, tb, tau) + slowness * |apex - p|`.
pub fn edge_update(pa: Point3, ta: f64, pb: Point3, tb: f64, apex: Point3, slowness: f64) -> f64 {
    let g = |tau: f64| {
        let p = pa + (pb - pa) * tau;
        (1.0 - tau) * ta + tau * tb + slowness * (apex - p).norm()
    };
    let tau = golden_section_min(0.0, 1.0, g);
    g(tau)
}

/// Three-known-vertex (face) candidate: minimize over `p` in the triangle
/// `(pa, pb, pc)`, barycentric weights `(alpha, beta, 1-alpha-beta)`, of
/// `alpha*ta + beta*tb + (1-alpha-beta)*tc + slowness * |apex - p|`.
///
/// Returns `None` if the minimizer falls outside the triangle (the caller
/// should fall back to the edge/vertex candidates in that case, per the
/// component design).
pub fn face_update(
    pa: Point3,
    ta: f64,
    pb: Point3,
    tb: f64,
    pc: Point3,
    tc: f64,
    apex: Point3,
    slowness: f64,
) -> Option<f64> {
    let g = |alpha: f64, beta: f64| {
        let gamma = 1.0 - alpha - beta;
        let p = pa + (pb - pa) * alpha + (pc - pa) * beta;
        alpha * ta + beta * tb + gamma * tc + slowness * (apex - p).norm()
    };

    let mut alpha = 1.0 / 3.0;
    let mut beta = 1.0 / 3.0;

    for _ in 0..COORD_DESCENT_ROUNDS {
        let beta_fixed = beta;
        alpha = golden_section_min(0.0, (1.0 - beta_fixed).max(0.0), |a| g(a, beta_fixed));
        let alpha_fixed = alpha;
        beta = golden_section_min(0.0, (1.0 - alpha_fixed).max(0.0), |b| g(alpha_fixed, b));
    }

    let gamma = 1.0 - alpha - beta;
    let tol = 1e-7;
    if alpha >= -tol && beta >= -tol && gamma >= -tol {
        Some(g(alpha, beta))
    } else {
        None
    }
}

/// Minimizes `f` over `[lo, hi]` by golden-section search. `f` need not be
/// convex; for the near-linear-plus-norm objectives used here this
/// converges to the global minimum in practice within `GOLDEN_ITERS`
/// iterations.
fn golden_section_min(mut lo: f64, mut hi: f64, f: impl Fn(f64) -> f64) -> f64 {
    if hi <= lo {
        return lo;
    }
    const INV_PHI: f64 = 0.6180339887498949;

    let mut x1 = hi - INV_PHI * (hi - lo);
    let mut x2 = lo + INV_PHI * (hi - lo);
    let mut f1 = f(x1);
    let mut f2 = f(x2);

    for _ in 0..GOLDEN_ITERS {
        if f1 < f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - INV_PHI * (hi - lo);
            f1 = f(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + INV_PHI * (hi - lo);
            f2 = f(x2);
        }
    }

    (lo + hi) / 2.0
}
