//! Backward raytracer: given a converged traveltime field, reconstructs a
//! ray from a receiver back to a source by following the negative gradient
//! of `T`, crossing from tetrahedron to tetrahedron through shared faces
//! until a tetrahedron containing a source is reached.

use std::collections::HashSet;

use nalgebra::{DMatrix, DVector, Matrix4, RowVector4, Vector3, Vector4};

use crate::config::GradientMethod;
use crate::error::{RaytraceError, Result};
use crate::geometry::{barycentric_tet, ray_face_intersection, Point3, TetIdx, VertexIdx};
use crate::mesh::MeshIndex;
use crate::solver::Source;

/// Generous bound on the number of face crossings a single ray may take
/// before it is declared a failure, derived from the mesh's tetrahedron
/// count so large meshes get a correspondingly large budget.
fn max_ray_steps(mesh: &MeshIndex) -> usize {
    (mesh.num_tets() * 4).max(10_000)
}

/// Traces the ray from `receiver` back to whichever of `sources` it
/// reaches first. Returns the polyline (receiver-first, source-last) and
/// the origin time of the source it terminated at — the caller uses the
/// latter to recompute a `tt_from_rp` traveltime by integrating slowness
/// along the path.
pub fn trace_ray(
    mesh: &MeshIndex,
    field: &[f64],
    receiver: Point3,
    sources: &[Source],
    gradient_method: GradientMethod,
    min_dist: f64,
    receiver_index: usize,
) -> Result<(Vec<Point3>, f64)> {
    if !mesh.is_inside(receiver) {
        return Err(RaytraceError::OutOfGrid {
            x: receiver.x,
            y: receiver.y,
            z: receiver.z,
        });
    }
    let mut tet_idx = mesh.locate(receiver).ok_or_else(|| RaytraceError::OutOfGrid {
        x: receiver.x,
        y: receiver.y,
        z: receiver.z,
    })?;

    let mut path = vec![receiver];
    let mut point = receiver;

    for _ in 0..max_ray_steps(mesh) {
        if let Some(src) = reached_source(mesh, point, tet_idx, sources, min_dist) {
            path.push(src.position);
            return Ok((path, src.t0));
        }

        let grad = gradient_at(mesh, field, tet_idx, point, gradient_method);
        let norm = grad.norm();
        if norm < 1e-12 {
            return Err(RaytraceError::RaytraceFailure {
                receiver_index,
                reason: "traveltime gradient vanished before reaching a source",
            });
        }
        let dir = -grad / norm;

        let tet = *mesh.tet(tet_idx);
        let mut best: Option<(f64, [VertexIdx; 3])> = None;
        for face in tet.faces() {
            let [a, b, c] = face;
            let pa = mesh.vertex(a).position;
            let pb = mesh.vertex(b).position;
            let pc = mesh.vertex(c).position;
            if let Some(t) = ray_face_intersection(point, dir, pa, pb, pc) {
                if best.map_or(true, |(bt, _)| t < bt) {
                    best = Some((t, face));
                }
            }
        }

        let (t, face) = match best {
            Some(v) => v,
            None => {
                return Err(RaytraceError::RaytraceFailure {
                    receiver_index,
                    reason: "ray did not hit any face of the current tetrahedron",
                });
            }
        };

        let next_point = point + dir * t;
        path.push(next_point);
        point = next_point;

        let next_tet = mesh
            .tets_on_face(face)
            .iter()
            .copied()
            .find(|&n| n != tet_idx);
        match next_tet {
            Some(n) => tet_idx = n,
            None => {
                return Err(RaytraceError::RaytraceFailure {
                    receiver_index,
                    reason: "ray exited the mesh boundary before reaching a source",
                });
            }
        }
    }

    Err(RaytraceError::RaytraceFailure {
        receiver_index,
        reason: "backward walk exceeded the maximum step count",
    })
}

/// Whether `point` (known to sit in `tet_idx`) has arrived at a source:
/// either `tet_idx` itself contains the source (step 3's primary
/// criterion), or `point` is within `min_dist` of one (the termination
/// guard, which also covers a receiver that starts right on top of a
/// source).
fn reached_source<'a>(
    mesh: &MeshIndex,
    point: Point3,
    tet_idx: TetIdx,
    sources: &'a [Source],
    min_dist: f64,
) -> Option<&'a Source> {
    for src in sources {
        if (src.position - point).norm() <= min_dist {
            return Some(src);
        }
        if mesh.locate(src.position) == Some(tet_idx) {
            return Some(src);
        }
    }
    None
}

fn gradient_at(
    mesh: &MeshIndex,
    field: &[f64],
    tet_idx: TetIdx,
    point: Point3,
    method: GradientMethod,
) -> Vector3<f64> {
    match method {
        GradientMethod::Ls1 => ls1_gradient(mesh, field, tet_idx),
        GradientMethod::Ls2 => ls2_gradient(mesh, field, tet_idx)
            .unwrap_or_else(|| ls1_gradient(mesh, field, tet_idx)),
        GradientMethod::Average => average_gradient(mesh, field, tet_idx, point),
    }
}

/// Linear least-squares fit `T(x) = a + b.x` over the containing tet's 4
/// vertices — exactly determined (4 equations, 4 unknowns) for a
/// non-degenerate tetrahedron.
fn ls1_gradient(mesh: &MeshIndex, field: &[f64], tet_idx: TetIdx) -> Vector3<f64> {
    linear_fit_gradient(mesh, field, &mesh.tet(tet_idx).vertices)
}

fn linear_fit_gradient(mesh: &MeshIndex, field: &[f64], verts: &[VertexIdx]) -> Vector3<f64> {
    if verts.len() < 4 {
        return Vector3::zeros();
    }
    if verts.len() == 4 {
        let mut m = Matrix4::<f64>::zeros();
        let mut rhs = Vector4::<f64>::zeros();
        for (row, &v) in verts.iter().enumerate() {
            let p = mesh.vertex(v).position;
            m.set_row(row, &RowVector4::new(1.0, p.x, p.y, p.z));
            rhs[row] = field[v];
        }
        return match m.lu().solve(&rhs) {
            Some(sol) => Vector3::new(sol[1], sol[2], sol[3]),
            None => Vector3::zeros(),
        };
    }

    // Overdetermined: minimum-norm least squares via SVD.
    let mut a = DMatrix::<f64>::zeros(verts.len(), 4);
    let mut rhs = DVector::<f64>::zeros(verts.len());
    for (row, &v) in verts.iter().enumerate() {
        let p = mesh.vertex(v).position;
        a[(row, 0)] = 1.0;
        a[(row, 1)] = p.x;
        a[(row, 2)] = p.y;
        a[(row, 3)] = p.z;
        rhs[row] = field[v];
    }
    match a.svd(true, true).solve(&rhs, 1e-12) {
        Ok(sol) => Vector3::new(sol[1], sol[2], sol[3]),
        Err(_) => Vector3::zeros(),
    }
}

/// Quadratic least-squares fit `T(x) = c0 + c.x + x^T C x` over the
/// first-ring neighborhood of the containing tet's 4 vertices (every
/// vertex sharing a tetrahedron with one of them), 10 unknowns solved by
/// SVD-based least squares.
fn ls2_gradient(mesh: &MeshIndex, field: &[f64], tet_idx: TetIdx) -> Option<Vector3<f64>> {
    let verts = first_ring(mesh, tet_idx);
    if verts.len() < 10 {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(verts.len(), 10);
    let mut rhs = DVector::<f64>::zeros(verts.len());
    for (row, &v) in verts.iter().enumerate() {
        let p = mesh.vertex(v).position;
        let (x, y, z) = (p.x, p.y, p.z);
        a.set_row(
            row,
            &nalgebra::RowDVector::from_vec(vec![
                1.0,
                x,
                y,
                z,
                x * x,
                y * y,
                z * z,
                x * y,
                x * z,
                y * z,
            ]),
        );
        rhs[row] = field[v];
    }

    let coeffs = a.svd(true, true).solve(&rhs, 1e-12).ok()?;
    let centroid = centroid_of(mesh, tet_idx);
    let (x, y, z) = (centroid.x, centroid.y, centroid.z);
    let (cx, cy, cz) = (coeffs[1], coeffs[2], coeffs[3]);
    let (cxx, cyy, czz) = (coeffs[4], coeffs[5], coeffs[6]);
    let (cxy, cxz, cyz) = (coeffs[7], coeffs[8], coeffs[9]);

    Some(Vector3::new(
        cx + 2.0 * cxx * x + cxy * y + cxz * z,
        cy + 2.0 * cyy * y + cxy * x + cyz * z,
        cz + 2.0 * czz * z + cxz * x + cyz * y,
    ))
}

fn centroid_of(mesh: &MeshIndex, tet_idx: TetIdx) -> Point3 {
    let [a, b, c, d] = mesh.tet(tet_idx).vertices;
    Point3::from(
        (mesh.vertex(a).position.coords
            + mesh.vertex(b).position.coords
            + mesh.vertex(c).position.coords
            + mesh.vertex(d).position.coords)
            / 4.0,
    )
}

fn first_ring(mesh: &MeshIndex, tet_idx: TetIdx) -> Vec<VertexIdx> {
    let mut set = HashSet::new();
    for &v in &mesh.tet(tet_idx).vertices {
        set.insert(v);
        for &t in &mesh.vertex(v).incident_tets {
            for &w in &mesh.tet(t).vertices {
                set.insert(w);
            }
        }
    }
    set.into_iter().collect()
}

/// Barycentric-weighted average of each vertex's own linear-fit gradient
/// over its incident cells.
fn average_gradient(mesh: &MeshIndex, field: &[f64], tet_idx: TetIdx, point: Point3) -> Vector3<f64> {
    let [a, b, c, d] = mesh.tet(tet_idx).vertices;
    let pa = mesh.vertex(a).position;
    let pb = mesh.vertex(b).position;
    let pc = mesh.vertex(c).position;
    let pd = mesh.vertex(d).position;
    let bary = barycentric_tet(pa, pb, pc, pd, point).unwrap_or([0.25; 4]);

    let ga = vertex_gradient(mesh, field, a);
    let gb = vertex_gradient(mesh, field, b);
    let gc = vertex_gradient(mesh, field, c);
    let gd = vertex_gradient(mesh, field, d);

    ga * bary[0] + gb * bary[1] + gc * bary[2] + gd * bary[3]
}

fn vertex_gradient(mesh: &MeshIndex, field: &[f64], v: VertexIdx) -> Vector3<f64> {
    let mut set = HashSet::new();
    set.insert(v);
    for &t in &mesh.vertex(v).incident_tets {
        for &w in &mesh.tet(t).vertices {
            set.insert(w);
        }
    }
    let verts: Vec<VertexIdx> = set.into_iter().collect();
    linear_fit_gradient(mesh, field, &verts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradientMethod;

    fn homogeneous_field(mesh: &MeshIndex, source: Point3, s: f64) -> Vec<f64> {
        (0..mesh.num_vertices())
            .map(|v| s * (mesh.vertex(v).position - source).norm())
            .collect()
    }

    #[test]
    fn ray_from_corner_to_corner_terminates_at_source() {
        let (vertices, tets) = crate::test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, true, 0).unwrap();
        let source = Point3::new(0.0, 0.0, 0.0);
        let field = homogeneous_field(&mesh, source, 1.0);

        let receiver = Point3::new(1.0, 1.0, 1.0);
        let sources = [Source {
            t0: 0.0,
            position: source,
        }];

        let (path, t0) = trace_ray(&mesh, &field, receiver, &sources, GradientMethod::Ls1, 1e-3, 0).unwrap();
        assert_eq!(t0, 0.0);
        assert_eq!(*path.first().unwrap(), receiver);
        let last = *path.last().unwrap();
        assert!((last - source).norm() < 1e-6);
    }

    #[test]
    fn flat_field_fails_raytracing() {
        let (vertices, tets) = crate::test_support::unit_cube_mesh();
        let mesh = MeshIndex::build(&vertices, &tets, true, 0).unwrap();
        let field = vec![1.0; mesh.num_vertices()];
        let receiver = Point3::new(1.0, 1.0, 1.0);
        let sources = [Source {
            t0: 0.0,
            position: Point3::new(0.0, 0.0, 0.0),
        }];
        let err = trace_ray(&mesh, &field, receiver, &sources, GradientMethod::Ls1, 1e-3, 2).unwrap_err();
        assert!(matches!(err, RaytraceError::RaytraceFailure { receiver_index: 2, .. }));
    }
}
