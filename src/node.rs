//! Node representation: mesh vertices, and the secondary/tertiary nodes the
//! shortest-path solvers densify the graph with.
//!
//! Primary/secondary/tertiary identity is tracked by contiguous `NodeId`
//! (`usize`) ranges rather than a tagged enum: `mesh::MeshIndex` numbers
//! primary vertices first, then secondary nodes (see
//! `mesh::SecondaryNodes::start_id`), and `solver::dspm::Overlay` extends
//! the range further for a single solve's tertiary nodes. A node's kind is
//! a range comparison the caller already has the bound for, not a value
//! that needs to travel with the node itself.

use crate::geometry::Point3;

/// A primary mesh vertex: position plus the tetrahedra it is incident to.
#[derive(Debug, Clone)]
pub struct VertexRecord {
    pub position: Point3,
    pub incident_tets: Vec<usize>,
}

impl VertexRecord {
    pub const fn new(position: Point3) -> Self {
        Self {
            position,
            incident_tets: Vec::new(),
        }
    }
}

/// Per-worker traveltime scratch space: the dense time array and a
/// known-flag array, both indexed by the solver's local node numbering
/// (primary vertices first, then, for SPM/DSPM, secondary and active
/// tertiary nodes).
#[derive(Debug, Clone)]
pub struct TravelTimeField {
    pub times: Vec<f64>,
    pub known: Vec<bool>,
}

impl TravelTimeField {
    pub fn new(len: usize) -> Self {
        Self {
            times: vec![f64::INFINITY; len],
            known: vec![false; len],
        }
    }

    pub fn get(&self, idx: usize) -> f64 {
        self.times[idx]
    }

    pub fn set(&mut self, idx: usize, t: f64) {
        self.times[idx] = t;
        self.known[idx] = true;
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}
