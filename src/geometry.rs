//! Mesh geometry primitives: points, tetrahedra, triangular faces, and the
//! barycentric/distance predicates the mesh index and raytracer build on.

use nalgebra::{Matrix3, Vector3};

/// A point in 3D space, double precision.
pub type Point3 = nalgebra::Point3<f64>;

/// Index of a vertex in the mesh's dense vertex array.
pub type VertexIdx = usize;

/// Index of a tetrahedron in the mesh's dense tetrahedron array.
pub type TetIdx = usize;

/// Tolerance used by the barycentric point-in-tetrahedron test and by
/// `MeshIndex::is_inside`'s bounding-box check.
pub const LOCATE_TOLERANCE: f64 = 1e-9;

/// For each local triangle index within a tetrahedron, the local vertex
/// indices of that face, matching the convention `rita`'s
/// `TetDataStructure` uses for its own per-tetrahedron triangle
/// subindexing (`TRIANGLE_SUBINDICES`).
pub const TRIANGLE_SUBINDICES: [[usize; 3]; 4] = [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

/// A tetrahedron, as four distinct indices into the mesh vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tetrahedron {
    pub vertices: [VertexIdx; 4],
}

impl Tetrahedron {
    pub const fn new(vertices: [VertexIdx; 4]) -> Self {
        Self { vertices }
    }

    /// The four triangular faces of this tetrahedron, each as a vertex
    /// index triple in the tetrahedron's own winding order.
    pub fn faces(&self) -> [[VertexIdx; 3]; 4] {
        TRIANGLE_SUBINDICES.map(|sub| sub.map(|i| self.vertices[i]))
    }

    /// The six edges of this tetrahedron, vertex indices sorted ascending.
    pub fn edges(&self) -> [(VertexIdx, VertexIdx); 6] {
        let v = self.vertices;
        [
            edge_key(v[0], v[1]),
            edge_key(v[0], v[2]),
            edge_key(v[0], v[3]),
            edge_key(v[1], v[2]),
            edge_key(v[1], v[3]),
            edge_key(v[2], v[3]),
        ]
    }
}

/// A face's vertex indices, sorted ascending, used as a hash key so the
/// two tetrahedra sharing a face agree on its identity regardless of
/// winding.
pub fn face_key(face: [VertexIdx; 3]) -> [VertexIdx; 3] {
    let mut f = face;
    f.sort_unstable();
    f
}

/// An undirected mesh edge, vertex indices sorted ascending.
pub fn edge_key(a: VertexIdx, b: VertexIdx) -> (VertexIdx, VertexIdx) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Barycentric coordinates of `p` with respect to tetrahedron `(a, b, c, d)`.
///
/// Returns `None` if the tetrahedron is degenerate (zero volume within
/// tolerance).
pub fn barycentric_tet(a: Point3, b: Point3, c: Point3, d: Point3, p: Point3) -> Option<[f64; 4]> {
    let mat = Matrix3::from_columns(&[a - d, b - d, c - d]);
    let det = mat.determinant();
    if det.abs() < 1e-14 {
        return None;
    }

    let rhs: Vector3<f64> = p - d;
    let sol = mat.lu().solve(&rhs)?;

    let l0 = sol[0];
    let l1 = sol[1];
    let l2 = sol[2];
    let l3 = 1.0 - l0 - l1 - l2;

    Some([l0, l1, l2, l3])
}

/// Whether `p` lies inside (or on the boundary, within `tol`) the
/// tetrahedron `(a, b, c, d)`.
pub fn point_in_tet(a: Point3, b: Point3, c: Point3, d: Point3, p: Point3, tol: f64) -> bool {
    match barycentric_tet(a, b, c, d, p) {
        Some(bary) => bary.iter().all(|&l| l >= -tol),
        None => false,
    }
}

/// Signed distance from `p` to the plane of triangle `(a, b, c)`, along the
/// triangle's outward normal (right-hand rule on `a, b, c`).
pub fn distance_to_face(a: Point3, b: Point3, c: Point3, p: Point3) -> f64 {
    let normal = (b - a).cross(&(c - a));
    let len = normal.norm();
    if len < 1e-14 {
        return 0.0;
    }
    (p - a).dot(&normal) / len
}

/// Intersects the ray `origin + t * dir` (`t > eps`) with the plane of
/// triangle `(a, b, c)`. Returns the parameter `t` of the intersection, not
/// restricted to the triangle's interior — the raytracer separately checks
/// that the hit point lies within the tet's other faces.
pub fn ray_face_intersection(
    origin: Point3,
    dir: Vector3<f64>,
    a: Point3,
    b: Point3,
    c: Point3,
) -> Option<f64> {
    let normal = (b - a).cross(&(c - a));
    let denom = normal.dot(&dir);
    if denom.abs() < 1e-14 {
        return None;
    }
    let t = normal.dot(&(a - origin)) / denom;
    if t.is_finite() && t > 1e-12 {
        Some(t)
    } else {
        None
    }
}

/// Does segment `(p0, p1)` cross triangle `(a, b, c)`, and if so, where.
///
/// Used by the mesh index to decide whether a secondary/tertiary edge node
/// lies on a shared face between two tetrahedra.
pub fn segment_face_intersection(
    p0: Point3,
    p1: Point3,
    a: Point3,
    b: Point3,
    c: Point3,
) -> Option<Point3> {
    let dir = p1 - p0;
    let seg_len = dir.norm();
    if seg_len < 1e-14 {
        return None;
    }
    let t = ray_face_intersection(p0, dir, a, b, c)?;
    if t > seg_len + 1e-9 {
        return None;
    }
    let hit = p0 + dir * t;

    // inside-triangle check via barycentric sign test in the plane
    let v0 = b - a;
    let v1 = c - a;
    let v2 = hit - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-14 {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;

    let tol = 1e-9;
    if u >= -tol && v >= -tol && w >= -tol {
        Some(hit)
    } else {
        None
    }
}
