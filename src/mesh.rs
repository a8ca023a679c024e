//! The unstructured grid: vertex array, tetrahedron array, face/vertex
//! adjacency, and the slowness field. Built once from `(vertices,
//! tetrahedra)` and immutable thereafter except for an atomic slowness
//! swap, mirroring `rita`'s `TetDataStructure`/`Tetrahedralization` split
//! (pure connectivity vs. the parameter data laid over it) but without the
//! incremental-insertion machinery this crate has no use for: the mesh
//! here is handed over whole, not grown point by point.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{RaytraceError, Result};
use crate::geometry::{
    barycentric_tet, edge_key, face_key, point_in_tet, Point3, Tetrahedron, TetIdx, VertexIdx,
    LOCATE_TOLERANCE,
};
use crate::node::VertexRecord;

/// Global id of a node in the primary+secondary graph (tertiary nodes live
/// in a solve-local overlay and are numbered past `MeshIndex::num_nodes()`).
pub type NodeId = usize;

/// The scalar slowness (reciprocal wave speed) field.
#[derive(Debug, Clone)]
pub enum Slowness {
    /// One value per tetrahedron, piecewise constant.
    PerCell(Vec<f64>),
    /// One value per vertex, linearly interpolated inside each tetrahedron.
    PerVertex(Vec<f64>),
}

impl Slowness {
    fn len(&self) -> usize {
        match self {
            Slowness::PerCell(v) | Slowness::PerVertex(v) => v.len(),
        }
    }
}

/// Secondary nodes placed uniformly along every unique mesh edge, built
/// once at mesh construction time (independent of which solver ends up
/// running — cheap, and lets SPM/DSPM share the same table).
#[derive(Debug, Clone, Default)]
pub struct SecondaryNodes {
    pub per_edge: HashMap<(VertexIdx, VertexIdx), Vec<NodeId>>,
    pub positions: Vec<Point3>,
    pub start_id: NodeId,
}

impl SecondaryNodes {
    fn build(
        vertices: &[VertexRecord],
        edges: &[(VertexIdx, VertexIdx)],
        n_secondary: usize,
        start_id: NodeId,
    ) -> Self {
        let mut per_edge = HashMap::with_capacity(edges.len());
        let mut positions = Vec::with_capacity(edges.len() * n_secondary);

        if n_secondary == 0 {
            return Self {
                per_edge,
                positions,
                start_id,
            };
        }

        for &(a, b) in edges {
            let pa = vertices[a].position;
            let pb = vertices[b].position;
            let mut ids = Vec::with_capacity(n_secondary);
            for slot in 1..=n_secondary {
                let t = slot as f64 / (n_secondary as f64 + 1.0);
                let p = pa + (pb - pa) * t;
                ids.push(start_id + positions.len());
                positions.push(p);
            }
            per_edge.insert((a, b), ids);
        }

        Self {
            per_edge,
            positions,
            start_id,
        }
    }

    pub fn nodes_on_edge(&self, a: VertexIdx, b: VertexIdx) -> &[NodeId] {
        self.per_edge
            .get(&edge_key(a, b))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn position(&self, id: NodeId) -> Point3 {
        self.positions[id - self.start_id]
    }
}

pub struct MeshIndex {
    vertices: Vec<VertexRecord>,
    tets: Vec<Tetrahedron>,
    face_to_tets: HashMap<[VertexIdx; 3], Vec<TetIdx>>,
    bbox_min: Point3,
    bbox_max: Point3,
    slowness: RwLock<Slowness>,
    cell_slowness: bool,
    secondary: SecondaryNodes,
    /// Undirected graph topology for SPM/DSPM: `adjacency[node]` lists every
    /// node sharing a tetrahedron face with `node`. Topology only — edge
    /// weights depend on the (mutable) slowness field and are computed on
    /// demand by [`MeshIndex::edge_weight`].
    adjacency: Vec<Vec<NodeId>>,
}

impl MeshIndex {
    /// Builds the mesh index from a dense vertex array and a dense
    /// tetrahedron index array. Rejects tetrahedra that reference
    /// out-of-range or duplicated vertex indices, and rejects duplicate
    /// tetrahedra.
    pub fn build(
        vertices: &[[f64; 3]],
        tetrahedra: &[[u32; 4]],
        cell_slowness: bool,
        n_secondary: usize,
    ) -> Result<Self> {
        if vertices.is_empty() || tetrahedra.is_empty() {
            return Err(RaytraceError::InvalidMesh(
                "mesh needs at least one vertex and one tetrahedron".into(),
            ));
        }

        let n_vertices = vertices.len();
        let mut records: Vec<VertexRecord> = vertices
            .iter()
            .map(|&[x, y, z]| VertexRecord::new(Point3::new(x, y, z)))
            .collect();

        let mut tets = Vec::with_capacity(tetrahedra.len());
        let mut seen = std::collections::HashSet::with_capacity(tetrahedra.len());

        for raw in tetrahedra {
            let idx = raw.map(|v| v as usize);
            if idx.iter().any(|&v| v >= n_vertices) {
                return Err(RaytraceError::InvalidMesh(format!(
                    "tetrahedron {raw:?} references a vertex out of range"
                )));
            }
            let mut sorted = idx;
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                return Err(RaytraceError::InvalidMesh(format!(
                    "tetrahedron {raw:?} has duplicated vertices"
                )));
            }
            if !seen.insert(sorted) {
                return Err(RaytraceError::InvalidMesh(format!(
                    "duplicate tetrahedron {raw:?}"
                )));
            }

            let tet_idx = tets.len();
            for &v in &idx {
                records[v].incident_tets.push(tet_idx);
            }
            tets.push(Tetrahedron::new(idx));
        }

        let mut face_to_tets: HashMap<[VertexIdx; 3], Vec<TetIdx>> = HashMap::new();
        for (tet_idx, tet) in tets.iter().enumerate() {
            for face in tet.faces() {
                let key = face_key(face);
                let incident = face_to_tets.entry(key).or_default();
                incident.push(tet_idx);
                if incident.len() > 2 {
                    return Err(RaytraceError::InvalidMesh(format!(
                        "face {key:?} is shared by more than 2 tetrahedra"
                    )));
                }
            }
        }

        let mut bbox_min = records[0].position;
        let mut bbox_max = records[0].position;
        for rec in &records {
            bbox_min = bbox_min.inf(&rec.position);
            bbox_max = bbox_max.sup(&rec.position);
        }

        let mut edges: std::collections::BTreeSet<(VertexIdx, VertexIdx)> =
            std::collections::BTreeSet::new();
        for tet in &tets {
            for e in tet.edges() {
                edges.insert(e);
            }
        }
        let edges: Vec<_> = edges.into_iter().collect();
        let secondary = SecondaryNodes::build(&records, &edges, n_secondary, n_vertices);

        let num_nodes = n_vertices + secondary.positions.len();
        let adjacency = build_face_adjacency(&tets, &secondary, num_nodes);

        let n_params = if cell_slowness {
            tets.len()
        } else {
            n_vertices
        };
        let slowness = if cell_slowness {
            Slowness::PerCell(vec![1.0; n_params])
        } else {
            Slowness::PerVertex(vec![1.0; n_params])
        };

        Ok(Self {
            vertices: records,
            tets,
            face_to_tets,
            bbox_min,
            bbox_max,
            slowness: RwLock::new(slowness),
            cell_slowness,
            secondary,
            adjacency,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_tets(&self) -> usize {
        self.tets.len()
    }

    pub fn vertex(&self, idx: VertexIdx) -> &VertexRecord {
        &self.vertices[idx]
    }

    pub fn tet(&self, idx: TetIdx) -> &Tetrahedron {
        &self.tets[idx]
    }

    pub fn tets(&self) -> &[Tetrahedron] {
        &self.tets
    }

    pub fn secondary(&self) -> &SecondaryNodes {
        &self.secondary
    }

    /// Total number of persistent graph nodes: primary vertices plus the
    /// secondary nodes built at construction time. Tertiary nodes are
    /// numbered starting here by whichever DSPM solve adds them, and are
    /// not part of this count.
    pub fn num_nodes(&self) -> usize {
        self.vertices.len() + self.secondary.positions.len()
    }

    pub fn node_position(&self, id: NodeId) -> Point3 {
        if id < self.vertices.len() {
            self.vertices[id].position
        } else {
            self.secondary.position(id)
        }
    }

    /// Tetrahedra incident to a face (1 if the face is on the mesh
    /// boundary, 2 if interior).
    pub fn tets_on_face(&self, face: [VertexIdx; 3]) -> &[TetIdx] {
        self.face_to_tets
            .get(&face_key(face))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Linear, brute-force point location: scans every tetrahedron and
    /// returns the first one containing `p` within tolerance. Correct for
    /// meshes of the size this crate targets; a production deployment
    /// walking from a spatial hint (as `rita`'s incremental insertion
    /// walks from `near_to_idx`) would replace this with a logarithmic
    /// search without changing the public contract.
    pub fn locate(&self, p: Point3) -> Option<TetIdx> {
        self.tets.iter().enumerate().find_map(|(idx, tet)| {
            let [a, b, c, d] = tet.vertices;
            let pa = self.vertices[a].position;
            let pb = self.vertices[b].position;
            let pc = self.vertices[c].position;
            let pd = self.vertices[d].position;
            point_in_tet(pa, pb, pc, pd, p, LOCATE_TOLERANCE).then_some(idx)
        })
    }

    /// Whether `p` lies within the mesh's bounding box (enlarged by
    /// [`LOCATE_TOLERANCE`]) — a cheap pre-check used before the more
    /// expensive [`MeshIndex::locate`], and the bound `raytrace` validates
    /// sources/receivers against.
    pub fn is_inside_bbox(&self, p: Point3) -> bool {
        let tol = LOCATE_TOLERANCE.max(1e-9);
        (self.bbox_min.x - tol..=self.bbox_max.x + tol).contains(&p.x)
            && (self.bbox_min.y - tol..=self.bbox_max.y + tol).contains(&p.y)
            && (self.bbox_min.z - tol..=self.bbox_max.z + tol).contains(&p.z)
    }

    pub fn is_inside(&self, p: Point3) -> bool {
        self.is_inside_bbox(p) && self.locate(p).is_some()
    }

    /// Expected slowness array length given the field's storage mode.
    pub fn n_params(&self) -> usize {
        if self.cell_slowness {
            self.tets.len()
        } else {
            self.vertices.len()
        }
    }

    pub fn cell_slowness(&self) -> bool {
        self.cell_slowness
    }

    /// Validates and atomically replaces the slowness field. Must not be
    /// called while any solve is in flight; the write lock enforces this
    /// for free (it blocks until all read-locking solvers finish).
    pub fn set_slowness(&self, values: Vec<f64>) -> Result<()> {
        let expected = self.n_params();
        if values.len() != expected {
            return Err(RaytraceError::WrongSize {
                expected,
                got: values.len(),
            });
        }
        if values.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(RaytraceError::InvalidMesh(
                "slowness values must be finite and strictly positive".into(),
            ));
        }

        let mut guard = self.slowness.write().expect("slowness lock poisoned");
        *guard = if self.cell_slowness {
            Slowness::PerCell(values)
        } else {
            Slowness::PerVertex(values)
        };
        Ok(())
    }

    /// Slowness of a tetrahedron for the per-cell field, or the mean of its
    /// 4 vertex values for the per-vertex field (used wherever a single
    /// representative value for the whole tet is wanted, e.g. SPM edge
    /// weights).
    pub fn tet_slowness(&self, tet_idx: TetIdx) -> f64 {
        let guard = self.slowness.read().expect("slowness lock poisoned");
        match &*guard {
            Slowness::PerCell(values) => values[tet_idx],
            Slowness::PerVertex(values) => {
                let [a, b, c, d] = self.tets[tet_idx].vertices;
                (values[a] + values[b] + values[c] + values[d]) / 4.0
            }
        }
    }

    pub fn vertex_slowness(&self, v_idx: VertexIdx) -> Option<f64> {
        let guard = self.slowness.read().expect("slowness lock poisoned");
        match &*guard {
            Slowness::PerCell(_) => None,
            Slowness::PerVertex(values) => Some(values[v_idx]),
        }
    }

    pub fn is_per_vertex_slowness(&self) -> bool {
        !self.cell_slowness
    }

    /// Every graph node sharing a tetrahedron face with `id` (SPM/DSPM
    /// topology; see [`Self::adjacency`]'s doc comment).
    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        self.adjacency[id].as_slice()
    }

    /// Slowness at an arbitrary point of the mesh: the owning tetrahedron's
    /// cell value, or the barycentric interpolation of its 4 vertex values
    /// for a per-vertex field. Used by the SPM/DSPM edge-weight estimate,
    /// which has no tetrahedron index handy for an endpoint that is itself a
    /// secondary/tertiary node.
    pub fn slowness_at(&self, p: Point3) -> f64 {
        match self.locate(p) {
            Some(tet_idx) => {
                let guard = self.slowness.read().expect("slowness lock poisoned");
                match &*guard {
                    Slowness::PerCell(values) => values[tet_idx],
                    Slowness::PerVertex(values) => {
                        let [a, b, c, d] = self.tets[tet_idx].vertices;
                        let pa = self.vertices[a].position;
                        let pb = self.vertices[b].position;
                        let pc = self.vertices[c].position;
                        let pd = self.vertices[d].position;
                        match barycentric_tet(pa, pb, pc, pd, p) {
                            Some(bary) => {
                                bary[0] * values[a]
                                    + bary[1] * values[b]
                                    + bary[2] * values[c]
                                    + bary[3] * values[d]
                            }
                            None => (values[a] + values[b] + values[c] + values[d]) / 4.0,
                        }
                    }
                }
            }
            None => {
                #[cfg(feature = "logging")]
                log::debug!("slowness_at: point {p:?} did not locate inside any tetrahedron");
                self.tet_slowness(0)
            }
        }
    }

    /// Weighted SPM/DSPM edge cost between two adjacent nodes: Euclidean
    /// distance times the average of each endpoint's local slowness.
    pub fn edge_weight(&self, a: NodeId, b: NodeId) -> f64 {
        let pa = self.node_position(a);
        let pb = self.node_position(b);
        let dist = (pb - pa).norm();
        let s = 0.5 * (self.slowness_at(pa) + self.slowness_at(pb));
        dist * s
    }
}

/// Builds the undirected SPM/DSPM graph topology: for every tetrahedron
/// face, every pair of nodes on that face (the 3 corner vertices plus any
/// secondary nodes on its 3 edges) is connected.
fn build_face_adjacency(
    tets: &[Tetrahedron],
    secondary: &SecondaryNodes,
    num_nodes: usize,
) -> Vec<Vec<NodeId>> {
    let mut edge_set: std::collections::HashSet<(NodeId, NodeId)> = std::collections::HashSet::new();

    for tet in tets {
        for face in tet.faces() {
            let mut face_nodes: Vec<NodeId> = face.to_vec();
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                face_nodes.extend(secondary.nodes_on_edge(a, b).iter().copied());
            }
            for i in 0..face_nodes.len() {
                for j in (i + 1)..face_nodes.len() {
                    let u = face_nodes[i];
                    let v = face_nodes[j];
                    edge_set.insert(if u < v { (u, v) } else { (v, u) });
                }
            }
        }
    }

    let mut adjacency = vec![Vec::new(); num_nodes];
    for (u, v) in edge_set {
        adjacency[u].push(v);
        adjacency[v].push(u);
    }
    adjacency
}
