//! Indexed triangle meshes.

use glam::Vec3;

/// An indexed triangle mesh with per-vertex normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Vertex positions in world space.
    pub vertices: Vec<Vec3>,
    /// Per-vertex normals. Either empty or the same length as `vertices`.
    pub normals: Vec<Vec3>,
    /// Triangles as counter-clockwise vertex index triples (seen from outside).
    pub faces: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mesh from vertices and faces without normals.
    pub fn from_faces(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            normals: Vec::new(),
            faces,
        }
    }

    /// Returns the number of vertices.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Returns the number of triangles.
    #[must_use]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Returns true if the mesh has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Returns the unnormalized normal of a face (twice its area in length).
    #[must_use]
    pub fn face_normal(&self, face: usize) -> Vec3 {
        let [a, b, c] = self.faces[face];
        let pa = self.vertices[a as usize];
        let pb = self.vertices[b as usize];
        let pc = self.vertices[c as usize];
        (pb - pa).cross(pc - pa)
    }

    /// Recomputes per-vertex normals as area-weighted averages of face normals.
    pub fn compute_vertex_normals(&mut self) {
        self.normals = vec![Vec3::ZERO; self.vertices.len()];
        for face in 0..self.faces.len() {
            let n = self.face_normal(face);
            for &v in &self.faces[face] {
                self.normals[v as usize] += n;
            }
        }
        for normal in &mut self.normals {
            *normal = normal.normalize_or_zero();
        }
    }

    /// Drops vertices that no face references and renumbers the faces.
    pub fn remove_unreferenced_vertices(&mut self) {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut vertices = Vec::new();
        let mut normals = Vec::new();
        let has_normals = self.normals.len() == self.vertices.len();

        for face in &mut self.faces {
            for v in face.iter_mut() {
                let old = *v as usize;
                if remap[old] == u32::MAX {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        remap[old] = vertices.len() as u32;
                    }
                    vertices.push(self.vertices[old]);
                    if has_normals {
                        normals.push(self.normals[old]);
                    }
                }
                *v = remap[old];
            }
        }

        self.vertices = vertices;
        self.normals = normals;
    }

    /// Returns the axis-aligned bounding box, or `None` for an empty mesh.
    pub fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(min, max), &v| (min.min(v), max.max(v))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriangleMesh {
        TriangleMesh::from_faces(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_vertex_normals() {
        let mut mesh = quad();
        mesh.compute_vertex_normals();
        assert_eq!(mesh.normals.len(), 4);
        for n in &mesh.normals {
            assert!((*n - Vec3::Z).length() < 1e-6);
        }
    }

    #[test]
    fn test_remove_unreferenced_vertices() {
        let mut mesh = quad();
        mesh.vertices.push(Vec3::splat(9.0));
        mesh.faces = vec![[2, 3, 0]];
        mesh.remove_unreferenced_vertices();

        assert_eq!(mesh.num_vertices(), 3);
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
        assert_eq!(mesh.vertices[0], Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_bounding_box() {
        assert!(TriangleMesh::new().bounding_box().is_none());
        let (min, max) = quad().bounding_box().unwrap();
        assert_eq!(min, Vec3::ZERO);
        assert_eq!(max, Vec3::new(1.0, 1.0, 0.0));
    }
}
