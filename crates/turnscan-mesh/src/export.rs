//! Point cloud and mesh writers.
//!
//! Point sets are written as PLY with `x y z`, optional `nx ny nz` and
//! `red green blue` vertex properties. Meshes are written as PLY (vertex and
//! face elements) or Wavefront OBJ. Every writer has a stream form for callers
//! that do not write to files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use glam::Vec3;
use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use turnscan_core::{Result, ScanError, TriangleMesh};

use crate::point_set::{PointSet, SurfacePoint};

/// Default file name for the processed point cloud.
pub const DEFAULT_POINTS_FILE: &str = "point.ply";

/// Default file name for the reconstructed mesh.
pub const DEFAULT_MESH_FILE: &str = "MeshOut.obj";

/// Receives the processed point set of a pipeline run.
pub trait PointCloudWriter {
    /// Writes `points`.
    fn write_points(&mut self, points: &PointSet) -> Result<()>;
}

/// Receives the reconstructed mesh of a pipeline run.
pub trait MeshWriter {
    /// Writes `mesh`.
    fn write_mesh(&mut self, mesh: &TriangleMesh) -> Result<()>;
}

/// PLY body encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlyEncoding {
    /// Human readable text.
    Ascii,
    /// Little-endian binary.
    #[default]
    Binary,
}

impl From<PlyEncoding> for Encoding {
    fn from(encoding: PlyEncoding) -> Self {
        match encoding {
            PlyEncoding::Ascii => Encoding::Ascii,
            PlyEncoding::Binary => Encoding::BinaryLittleEndian,
        }
    }
}

/// Writes point sets to a PLY file.
#[derive(Debug, Clone)]
pub struct PlyPointWriter {
    path: PathBuf,
    encoding: PlyEncoding,
}

impl PlyPointWriter {
    /// Creates a binary PLY writer for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: PlyEncoding::default(),
        }
    }

    /// Sets the body encoding.
    pub fn with_encoding(mut self, encoding: PlyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Returns the output path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PlyPointWriter {
    fn default() -> Self {
        Self::new(DEFAULT_POINTS_FILE)
    }
}

impl PointCloudWriter for PlyPointWriter {
    fn write_points(&mut self, points: &PointSet) -> Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        write_ply_points(&mut out, points, self.encoding)?;
        out.flush()?;
        log::info!("wrote {} points to {}", points.len(), self.path.display());
        Ok(())
    }
}

/// Writes meshes to a PLY file.
#[derive(Debug, Clone)]
pub struct PlyMeshWriter {
    path: PathBuf,
    encoding: PlyEncoding,
}

impl PlyMeshWriter {
    /// Creates a binary PLY writer for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: PlyEncoding::default(),
        }
    }

    /// Sets the body encoding.
    pub fn with_encoding(mut self, encoding: PlyEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

impl MeshWriter for PlyMeshWriter {
    fn write_mesh(&mut self, mesh: &TriangleMesh) -> Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        write_ply_mesh(&mut out, mesh, self.encoding)?;
        out.flush()?;
        log::info!(
            "wrote mesh with {} faces to {}",
            mesh.num_faces(),
            self.path.display()
        );
        Ok(())
    }
}

/// Writes meshes to a Wavefront OBJ file.
#[derive(Debug, Clone)]
pub struct ObjMeshWriter {
    path: PathBuf,
}

impl ObjMeshWriter {
    /// Creates an OBJ writer for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the output path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ObjMeshWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MESH_FILE)
    }
}

impl MeshWriter for ObjMeshWriter {
    fn write_mesh(&mut self, mesh: &TriangleMesh) -> Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        write_obj_mesh(&mut out, mesh)?;
        out.flush()?;
        log::info!(
            "wrote mesh with {} faces to {}",
            mesh.num_faces(),
            self.path.display()
        );
        Ok(())
    }
}

fn export_error(err: impl std::fmt::Debug) -> ScanError {
    ScanError::Export(format!("{err:?}"))
}

fn float_property(name: &str) -> PropertyDef {
    PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Float))
}

fn vertex_element(count: usize, normals: bool, colors: bool) -> ElementDef {
    let mut element = ElementDef::new("vertex".to_string());
    element.count = count;
    for name in ["x", "y", "z"] {
        element.properties.add(float_property(name));
    }
    if normals {
        for name in ["nx", "ny", "nz"] {
            element.properties.add(float_property(name));
        }
    }
    if colors {
        for name in ["red", "green", "blue"] {
            element.properties.add(PropertyDef::new(
                name.to_string(),
                PropertyType::Scalar(ScalarType::UChar),
            ));
        }
    }
    element
}

fn vertex(position: Vec3, normal: Option<Vec3>, color: Option<[u8; 3]>) -> DefaultElement {
    let mut element = DefaultElement::new();
    element.insert("x".to_string(), Property::Float(position.x));
    element.insert("y".to_string(), Property::Float(position.y));
    element.insert("z".to_string(), Property::Float(position.z));
    if let Some(n) = normal {
        element.insert("nx".to_string(), Property::Float(n.x));
        element.insert("ny".to_string(), Property::Float(n.y));
        element.insert("nz".to_string(), Property::Float(n.z));
    }
    if let Some([r, g, b]) = color {
        element.insert("red".to_string(), Property::UChar(r));
        element.insert("green".to_string(), Property::UChar(g));
        element.insert("blue".to_string(), Property::UChar(b));
    }
    element
}

fn new_ply(encoding: PlyEncoding) -> Ply<DefaultElement> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = encoding.into();
    ply.header.comments.push("generated by turnscan".to_string());
    ply
}

fn finish_ply<W: Write>(out: &mut W, mut ply: Ply<DefaultElement>) -> Result<()> {
    ply.make_consistent().map_err(export_error)?;
    Writer::new().write_ply(out, &mut ply)?;
    Ok(())
}

/// Writes a point set as PLY. Normals are written only if every point has one.
pub fn write_ply_points<W: Write>(
    out: &mut W,
    points: &PointSet,
    encoding: PlyEncoding,
) -> Result<()> {
    let with_normals = points.has_normals();
    let mut ply = new_ply(encoding);
    ply.header
        .elements
        .add(vertex_element(points.len(), with_normals, true));

    let vertices = points
        .points()
        .iter()
        .map(|p| {
            let normal = if with_normals { p.normal } else { None };
            vertex(p.position, normal, Some(p.color))
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);
    finish_ply(out, ply)
}

/// Writes a mesh as PLY with a `vertex_indices` face list.
pub fn write_ply_mesh<W: Write>(
    out: &mut W,
    mesh: &TriangleMesh,
    encoding: PlyEncoding,
) -> Result<()> {
    let with_normals = mesh.normals.len() == mesh.vertices.len() && !mesh.is_empty();
    let mut ply = new_ply(encoding);
    ply.header
        .elements
        .add(vertex_element(mesh.num_vertices(), with_normals, false));

    let mut face_def = ElementDef::new("face".to_string());
    face_def.count = mesh.num_faces();
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    ply.header.elements.add(face_def);

    let vertices = mesh
        .vertices
        .iter()
        .enumerate()
        .map(|(i, &v)| vertex(v, with_normals.then(|| mesh.normals[i]), None))
        .collect();

    let mut faces = Vec::with_capacity(mesh.num_faces());
    for face in &mesh.faces {
        let indices = face
            .iter()
            .map(|&v| i32::try_from(v).map_err(export_error))
            .collect::<Result<Vec<i32>>>()?;
        let mut element = DefaultElement::new();
        element.insert("vertex_indices".to_string(), Property::ListInt(indices));
        faces.push(element);
    }

    ply.payload.insert("vertex".to_string(), vertices);
    ply.payload.insert("face".to_string(), faces);
    finish_ply(out, ply)
}

/// Writes a mesh as OBJ with 1-based `v`, `vn` and `f` records.
pub fn write_obj_mesh<W: Write>(out: &mut W, mesh: &TriangleMesh) -> Result<()> {
    let with_normals = mesh.normals.len() == mesh.vertices.len();
    writeln!(out, "# generated by turnscan")?;
    for v in &mesh.vertices {
        writeln!(out, "v {} {} {}", v.x, v.y, v.z)?;
    }
    if with_normals {
        for n in &mesh.normals {
            writeln!(out, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }
    for face in &mesh.faces {
        let [a, b, c] = face.map(|i| u64::from(i) + 1);
        if with_normals {
            writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}")?;
        } else {
            writeln!(out, "f {a} {b} {c}")?;
        }
    }
    Ok(())
}

/// Reads a PLY point cloud from a file.
pub fn read_ply_points(path: impl AsRef<Path>) -> Result<PointSet> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    read_ply_points_from(&mut reader)
}

/// Reads a PLY point cloud from a stream.
///
/// Requires `x y z` vertex properties; colors default to white and normals
/// are read when all three components are present.
pub fn read_ply_points_from<R: Read>(reader: &mut R) -> Result<PointSet> {
    let ply = Parser::<DefaultElement>::new().read_ply(reader)?;
    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| ScanError::Export("PLY file has no vertex element".into()))?;

    let mut points = Vec::with_capacity(vertices.len());
    for element in vertices {
        let coord = |name: &str| element.get(name).and_then(as_f32);
        let (Some(x), Some(y), Some(z)) = (coord("x"), coord("y"), coord("z")) else {
            return Err(ScanError::Export("PLY vertex is missing x, y or z".into()));
        };
        let channel = |name: &str| element.get(name).and_then(as_u8).unwrap_or(255);
        let mut point = SurfacePoint::new(
            Vec3::new(x, y, z),
            [channel("red"), channel("green"), channel("blue")],
        );
        if let (Some(nx), Some(ny), Some(nz)) = (coord("nx"), coord("ny"), coord("nz")) {
            point = point.with_normal(Vec3::new(nx, ny, nz));
        }
        points.push(point);
    }
    Ok(PointSet::from_points(points))
}

#[allow(clippy::cast_possible_truncation)]
fn as_f32(property: &Property) -> Option<f32> {
    match *property {
        Property::Float(v) => Some(v),
        Property::Double(v) => Some(v as f32),
        _ => None,
    }
}

fn as_u8(property: &Property) -> Option<u8> {
    match *property {
        Property::UChar(v) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> PointSet {
        PointSet::from_points(vec![
            SurfacePoint::new(Vec3::new(0.0, 1.0, 2.0), [255, 0, 0]).with_normal(Vec3::Y),
            SurfacePoint::new(Vec3::new(-1.5, 0.25, 3.0), [0, 128, 255]).with_normal(Vec3::X),
        ])
    }

    fn triangle() -> TriangleMesh {
        let mut mesh = TriangleMesh::from_faces(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![[0, 1, 2]],
        );
        mesh.compute_vertex_normals();
        mesh
    }

    #[test]
    fn test_ascii_points_read_back() {
        let points = sample_points();
        let mut buffer = Vec::new();
        write_ply_points(&mut buffer, &points, PlyEncoding::Ascii).unwrap();

        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("ply\n"));
        assert!(text.contains("format ascii 1.0"));
        assert!(text.contains("element vertex 2"));
        assert!(text.contains("property uchar red"));

        let read = read_ply_points_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(read, points);
    }

    #[test]
    fn test_binary_points_read_back() {
        let points = sample_points();
        let mut buffer = Vec::new();
        write_ply_points(&mut buffer, &points, PlyEncoding::Binary).unwrap();
        let header_end = buffer
            .windows(b"end_header\n".len())
            .position(|w| w == b"end_header\n")
            .unwrap();
        let header = std::str::from_utf8(&buffer[..header_end]).unwrap();
        assert!(header.contains("format binary_little_endian 1.0"));

        let read = read_ply_points_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(read, points);
    }

    #[test]
    fn test_points_without_normals() {
        let points = PointSet::from_points(vec![SurfacePoint::new(Vec3::ONE, [1, 2, 3])]);
        let mut buffer = Vec::new();
        write_ply_points(&mut buffer, &points, PlyEncoding::Ascii).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(!text.contains("property float nx"));
    }

    #[test]
    fn test_obj_mesh() {
        let mut buffer = Vec::new();
        write_obj_mesh(&mut buffer, &triangle()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.iter().filter(|l| l.starts_with("v ")).count(), 3);
        assert_eq!(lines.iter().filter(|l| l.starts_with("vn ")).count(), 3);
        assert!(lines.contains(&"v 1 0 0"));
        assert!(lines.contains(&"vn 0 0 1"));
        assert!(lines.contains(&"f 1//1 2//2 3//3"));
    }

    #[test]
    fn test_ply_mesh_header() {
        let mut buffer = Vec::new();
        write_ply_mesh(&mut buffer, &triangle(), PlyEncoding::Ascii).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("element vertex 3"));
        assert!(text.contains("element face 1"));
        assert!(text.contains("property list uchar int vertex_indices"));
        assert!(text.contains("3 0 1 2"));
    }

    #[test]
    fn test_missing_vertex_element() {
        let text = b"ply\nformat ascii 1.0\nelement face 0\nproperty list uchar int vertex_indices\nend_header\n";
        let err = read_ply_points_from(&mut text.as_slice()).unwrap_err();
        assert!(matches!(err, ScanError::Export(_)));
    }
}
