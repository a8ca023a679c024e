//! Small synthetic meshes shared by unit tests across the crate. Not part
//! of the public API.

use rand::distributions::{Distribution, Uniform};
use rand::{rngs::StdRng, SeedableRng};

use crate::geometry::Point3;
use crate::mesh::MeshIndex;

/// A single unit cube `[0,1]^3`, fan-decomposed into 6 tetrahedra sharing
/// the main space diagonal `(0,0,0)-(1,1,1)`.
pub fn unit_cube_mesh() -> (Vec<[f64; 3]>, Vec<[u32; 4]>) {
    column_mesh(1, 1.0)
}

/// `n_layers` unit-footprint cubes of height `layer_height` stacked along
/// `z`, each layer fan-decomposed the same way as [`unit_cube_mesh`]. Used
/// by the layered-slowness test scenarios, where each layer gets its own
/// cell/vertex slowness value.
pub fn column_mesh(n_layers: usize, layer_height: f64) -> (Vec<[f64; 3]>, Vec<[u32; 4]>) {
    assert!(n_layers > 0);

    let mut vertices = Vec::with_capacity(4 * (n_layers + 1));
    for layer in 0..=n_layers {
        let z = layer as f64 * layer_height;
        vertices.push([0.0, 0.0, z]);
        vertices.push([1.0, 0.0, z]);
        vertices.push([1.0, 1.0, z]);
        vertices.push([0.0, 1.0, z]);
    }

    // Local numbering 0..3 = bottom face, 4..7 = top face, matching a unit
    // cube's corners; diagonal (0,6) is the prism's space diagonal.
    const LOCAL_TETS: [[usize; 4]; 6] = [
        [0, 1, 2, 6],
        [0, 2, 3, 6],
        [0, 3, 7, 6],
        [0, 7, 4, 6],
        [0, 4, 5, 6],
        [0, 5, 1, 6],
    ];

    let mut tets = Vec::with_capacity(6 * n_layers);
    for layer in 0..n_layers {
        let base_bottom = 4 * layer;
        let base_top = 4 * (layer + 1);
        for local in LOCAL_TETS {
            let global = local.map(|l| {
                if l < 4 {
                    (base_bottom + l) as u32
                } else {
                    (base_top + (l - 4)) as u32
                }
            });
            tets.push(global);
        }
    }

    (vertices, tets)
}

/// Per-cell slowness array for a [`column_mesh`]: 6 tets per layer, one
/// slowness value per layer.
pub fn layered_cell_slowness(n_layers: usize, per_layer: &[f64]) -> Vec<f64> {
    assert_eq!(per_layer.len(), n_layers);
    let mut values = Vec::with_capacity(6 * n_layers);
    for &s in per_layer {
        values.extend(std::iter::repeat(s).take(6));
    }
    values
}

/// Samples `n` points uniformly at random from the unit cube `[0,1]^3`,
/// rejecting samples that don't land inside any tetrahedron of `mesh`, the
/// way `rita_test_utils::sample_vertices_3d` samples a uniform point cloud
/// for its own tests. Deterministic across runs (seeded `StdRng`) so the
/// property-based tests built on this are reproducible. Only meaningful for
/// meshes whose footprint is the unit cube, i.e. [`unit_cube_mesh`].
pub fn sample_interior_points(mesh: &MeshIndex, n: usize, seed: u64) -> Vec<Point3> {
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Uniform::new_inclusive(0.0_f64, 1.0_f64);

    let mut points = Vec::with_capacity(n);
    while points.len() < n {
        let p = Point3::new(unit.sample(&mut rng), unit.sample(&mut rng), unit.sample(&mut rng));
        if mesh.is_inside(p) {
            points.push(p);
        }
    }
    points
}
