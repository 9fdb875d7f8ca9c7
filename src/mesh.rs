//! Mesh payloads handed to the host scene.
//!
//! A mesh is a vertex list plus polygon faces (triangles, quads or n-gons),
//! the same shape of data a tessellated solid produces. OBJ content can be
//! imported directly, which is how scripts bring in meshes that were not
//! generated by the kernel.

use std::collections::{HashMap, HashSet};

use glam::{DAffine3, DVec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box for a mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// Compute bounding box from a set of vertices.
    pub fn from_vertices(vertices: &[[f64; 3]]) -> Self {
        if vertices.is_empty() {
            return Self::default();
        }

        let mut min = [f64::MAX; 3];
        let mut max = [f64::MIN; 3];

        for v in vertices {
            for i in 0..3 {
                min[i] = min[i].min(v[i]);
                max[i] = max[i].max(v[i]);
            }
        }

        Self { min, max }
    }

    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

/// Vertex + polygon face data for one host mesh object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<[f64; 3]>,
    /// Each face is an ordered loop of indices into `vertices`.
    pub faces: Vec<Vec<u32>>,
}

impl MeshData {
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<Vec<u32>>) -> Self {
        Self { vertices, faces }
    }

    /// Parse a mesh from Wavefront OBJ content.
    ///
    /// Polygons are kept as-is (not triangulated) and all models in the file
    /// are merged into one mesh.
    pub fn from_obj(obj_content: &str) -> Result<Self, String> {
        let mut cursor = std::io::Cursor::new(obj_content.as_bytes());

        let load_options = tobj::LoadOptions {
            triangulate: false,
            single_index: true,
            ..Default::default()
        };

        let (models, _materials) =
            tobj::load_obj_buf(&mut cursor, &load_options, |_| Ok((vec![], HashMap::new())))
                .map_err(|e| format!("Failed to parse OBJ: {}", e))?;

        if models.is_empty() {
            return Err("OBJ content contains no models".to_string());
        }

        let mut mesh = MeshData::default();

        for model in &models {
            let source = &model.mesh;
            if source.positions.is_empty() {
                continue;
            }

            let vertices = source
                .positions
                .chunks(3)
                .filter(|p| p.len() == 3)
                .map(|p| [p[0] as f64, p[1] as f64, p[2] as f64])
                .collect();

            // Without arities every face is a triangle.
            let arities: Vec<u32> = if source.face_arities.is_empty() {
                vec![3; source.indices.len() / 3]
            } else {
                source.face_arities.clone()
            };

            let mut faces = Vec::with_capacity(arities.len());
            let mut cursor = 0usize;
            for arity in arities {
                let end = cursor + arity as usize;
                if end > source.indices.len() {
                    return Err("OBJ face indices are truncated".to_string());
                }
                faces.push(source.indices[cursor..end].to_vec());
                cursor = end;
            }

            mesh.append(&MeshData::new(vertices, faces));
        }

        if mesh.vertices.is_empty() {
            return Err("OBJ content contains no vertices".to_string());
        }

        Ok(mesh)
    }

    /// Append another mesh, offsetting its face indices.
    pub fn append(&mut self, other: &MeshData) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.faces.extend(
            other
                .faces
                .iter()
                .map(|face| face.iter().map(|i| i + offset).collect()),
        );
    }

    /// Apply an affine placement to every vertex.
    pub fn transformed(mut self, transform: &DAffine3) -> Self {
        for v in &mut self.vertices {
            let p = transform.transform_point3(DVec3::from_array(*v));
            *v = p.to_array();
        }
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Number of unique edges across all faces.
    pub fn edge_count(&self) -> usize {
        extract_edges(&self.faces).len()
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_vertices(&self.vertices)
    }

    /// Check that every face index refers to an existing vertex.
    pub fn validate(&self) -> Result<(), String> {
        let count = self.vertices.len() as u32;
        for (i, face) in self.faces.iter().enumerate() {
            if face.len() < 3 {
                return Err(format!("face {} has fewer than 3 vertices", i));
            }
            if let Some(bad) = face.iter().find(|&&idx| idx >= count) {
                return Err(format!("face {} references missing vertex {}", i, bad));
            }
        }
        Ok(())
    }
}

/// Unique undirected edges of a polygon list.
fn extract_edges(faces: &[Vec<u32>]) -> HashSet<(u32, u32)> {
    let mut edges = HashSet::new();

    for face in faces {
        if face.len() < 2 {
            continue;
        }
        for (i, &a) in face.iter().enumerate() {
            let b = face[(i + 1) % face.len()];
            let edge = if a < b { (a, b) } else { (b, a) };
            edges.insert(edge);
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_from_vertices() {
        let vertices = vec![[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 0.0]];

        let bounds = BoundingBox::from_vertices(&vertices);
        assert_eq!(bounds.min, [-1.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 2.0, 0.0]);
        assert_eq!(bounds.size(), [2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_edge_extraction() {
        let faces = vec![vec![0, 1, 2]];
        assert_eq!(extract_edges(&faces).len(), 3);

        // Two triangles sharing an edge (0-1)
        let faces = vec![vec![0, 1, 2], vec![0, 1, 3]];
        assert_eq!(extract_edges(&faces).len(), 5);
    }

    #[test]
    fn test_obj_parsing_keeps_quads() {
        let obj_content = r#"
            v 0 0 0
            v 1 0 0
            v 1 1 0
            v 0 1 0
            f 1 2 3 4
        "#;

        let mesh = MeshData::from_obj(obj_content).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 1);
        assert_eq!(mesh.faces[0].len(), 4);
        assert_eq!(mesh.edge_count(), 4);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_obj_without_vertices_is_an_error() {
        assert!(MeshData::from_obj("# nothing here\n").is_err());
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut a = MeshData::new(vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], vec![vec![0, 1, 2]]);
        let b = a.clone();
        a.append(&b);
        assert_eq!(a.vertex_count(), 6);
        assert_eq!(a.faces[1], vec![3, 4, 5]);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_transformed_translates_vertices() {
        let mesh = MeshData::new(vec![[1.0, 2.0, 3.0]], vec![]);
        let moved = mesh.transformed(&DAffine3::from_translation(DVec3::new(1.0, 0.0, -3.0)));
        assert_eq!(moved.vertices[0], [2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mesh = MeshData::new(vec![[0.0; 3]; 3], vec![vec![0, 1, 7]]);
        assert!(mesh.validate().is_err());
    }
}
