//! Shape tessellation.
//!
//! Converts kernel shapes to polygon meshes. Planar faces stay as polygons
//! (box sides are quads, cylinder caps are n-gons); curved surfaces are
//! subdivided so that the chord deviation stays within the linear tolerance.

use std::f64::consts::{PI, TAU};

use glam::DVec3;

use crate::kernel::{Geometry, KernelError, Shape};
use crate::mesh::MeshData;

const MIN_SEGMENTS: usize = 3;
const MAX_SEGMENTS: usize = 512;

/// Tessellate a shape (recursively for compounds) into one mesh.
pub fn tessellate(
    shape: &Shape,
    tolerance: f64,
    angular_tolerance: f64,
) -> Result<MeshData, KernelError> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(KernelError::InvalidTolerance(tolerance));
    }
    if !(angular_tolerance.is_finite() && angular_tolerance > 0.0) {
        return Err(KernelError::InvalidTolerance(angular_tolerance));
    }

    let mesh = tessellate_placed(shape, tolerance, angular_tolerance)?;

    let finite = mesh
        .vertices
        .iter()
        .all(|v| v.iter().all(|c| c.is_finite()));
    if !finite {
        return Err(KernelError::NonFinite);
    }

    Ok(mesh)
}

fn tessellate_placed(
    shape: &Shape,
    tolerance: f64,
    angular_tolerance: f64,
) -> Result<MeshData, KernelError> {
    let base = match &shape.geometry {
        Geometry::Box { size } => box_mesh(*size),
        Geometry::Cylinder { radius, height } => {
            let segments = segment_count(*radius, tolerance, angular_tolerance);
            cylinder_mesh(*radius, *height, segments)
        }
        Geometry::Sphere { radius } => {
            let segments = segment_count(*radius, tolerance, angular_tolerance);
            sphere_mesh(*radius, segments)
        }
        Geometry::Mesh(mesh) => mesh.clone(),
        Geometry::Compound(shapes) => {
            let mut merged = MeshData::default();
            for child in shapes {
                merged.append(&tessellate_placed(child, tolerance, angular_tolerance)?);
            }
            merged
        }
    };

    Ok(base.transformed(&shape.placement))
}

/// Segments around a full circle of `radius`.
///
/// The chord deviation of a step `a` is `r * (1 - cos(a / 2))`; the step is
/// chosen so that it stays within `tolerance`. The angular tolerance is a
/// floor on the step, so very small values never blow up the face count.
pub fn segment_count(radius: f64, tolerance: f64, angular_tolerance: f64) -> usize {
    let ratio = (1.0 - tolerance / radius).clamp(-1.0, 1.0);
    let linear_step = 2.0 * ratio.acos();
    let step = linear_step.max(angular_tolerance);

    if step <= 0.0 || !step.is_finite() {
        return MAX_SEGMENTS;
    }

    ((TAU / step).ceil() as usize).clamp(MIN_SEGMENTS, MAX_SEGMENTS)
}

fn box_mesh(size: DVec3) -> MeshData {
    let h = size / 2.0;
    let vertices = vec![
        [-h.x, -h.y, -h.z],
        [h.x, -h.y, -h.z],
        [h.x, h.y, -h.z],
        [-h.x, h.y, -h.z],
        [-h.x, -h.y, h.z],
        [h.x, -h.y, h.z],
        [h.x, h.y, h.z],
        [-h.x, h.y, h.z],
    ];
    // Counter-clockwise when viewed from outside
    let faces = vec![
        vec![0, 3, 2, 1],
        vec![4, 5, 6, 7],
        vec![0, 1, 5, 4],
        vec![2, 3, 7, 6],
        vec![0, 4, 7, 3],
        vec![1, 2, 6, 5],
    ];
    MeshData::new(vertices, faces)
}

fn cylinder_mesh(radius: f64, height: f64, segments: usize) -> MeshData {
    let half = height / 2.0;
    let n = segments as u32;

    let mut vertices = Vec::with_capacity(segments * 2);
    for z in [-half, half] {
        for i in 0..segments {
            let theta = TAU * i as f64 / segments as f64;
            vertices.push([radius * theta.cos(), radius * theta.sin(), z]);
        }
    }

    let mut faces = Vec::with_capacity(segments + 2);
    for i in 0..n {
        let next = (i + 1) % n;
        faces.push(vec![i, next, n + next, n + i]);
    }
    faces.push((0..n).rev().collect());
    faces.push((n..2 * n).collect());

    MeshData::new(vertices, faces)
}

fn sphere_mesh(radius: f64, segments: usize) -> MeshData {
    let rings = (segments / 2).max(2);
    let n = segments as u32;

    let mut vertices = Vec::with_capacity(2 + (rings - 1) * segments);
    vertices.push([0.0, 0.0, radius]);
    for k in 1..rings {
        let phi = PI * k as f64 / rings as f64;
        for i in 0..segments {
            let theta = TAU * i as f64 / segments as f64;
            vertices.push([
                radius * phi.sin() * theta.cos(),
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
            ]);
        }
    }
    vertices.push([0.0, 0.0, -radius]);

    let ring = |k: usize, i: u32| 1 + (k as u32 - 1) * n + (i % n);
    let bottom = vertices.len() as u32 - 1;

    let mut faces = Vec::new();
    for i in 0..n {
        faces.push(vec![0, ring(1, i), ring(1, i + 1)]);
    }
    for k in 1..rings - 1 {
        for i in 0..n {
            faces.push(vec![ring(k, i), ring(k + 1, i), ring(k + 1, i + 1), ring(k, i + 1)]);
        }
    }
    for i in 0..n {
        faces.push(vec![bottom, ring(rings - 1, i + 1), ring(rings - 1, i)]);
    }

    MeshData::new(vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DAffine3;

    const TOL: f64 = 0.01;

    /// Area-weighted normal of a polygon face.
    fn face_normal(mesh: &MeshData, face: &[u32]) -> DVec3 {
        let mut normal = DVec3::ZERO;
        for (i, &a) in face.iter().enumerate() {
            let p = DVec3::from_array(mesh.vertices[a as usize]);
            let q = DVec3::from_array(mesh.vertices[face[(i + 1) % face.len()] as usize]);
            normal += p.cross(q);
        }
        normal / 2.0
    }

    fn face_center(mesh: &MeshData, face: &[u32]) -> DVec3 {
        face.iter()
            .map(|&i| DVec3::from_array(mesh.vertices[i as usize]))
            .sum::<DVec3>()
            / face.len() as f64
    }

    fn assert_outward(mesh: &MeshData) {
        for face in &mesh.faces {
            let normal = face_normal(mesh, face);
            assert!(
                normal.dot(face_center(mesh, face)) > 0.0,
                "face {:?} points inward",
                face
            );
        }
    }

    #[test]
    fn test_box_is_eight_vertices_six_quads() {
        let shape = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let mesh = tessellate(&shape, TOL, TOL).unwrap();
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.face_count(), 6);
        assert!(mesh.faces.iter().all(|f| f.len() == 4));
        assert_eq!(mesh.edge_count(), 12);
        assert_eq!(mesh.bounds().size(), [1.0, 1.0, 1.0]);
        assert_outward(&mesh);
    }

    #[test]
    fn test_cylinder_topology() {
        let shape = Shape::cylinder(1.0, 2.0).unwrap();
        let mesh = tessellate(&shape, TOL, TOL).unwrap();
        let n = segment_count(1.0, TOL, TOL);
        assert_eq!(mesh.vertex_count(), 2 * n);
        assert_eq!(mesh.face_count(), n + 2);
        assert!(mesh.validate().is_ok());
        assert_outward(&mesh);
    }

    #[test]
    fn test_sphere_is_closed_and_outward() {
        let shape = Shape::sphere(2.0).unwrap();
        let mesh = tessellate(&shape, TOL, TOL).unwrap();
        assert!(mesh.validate().is_ok());
        assert_outward(&mesh);

        // Closed manifold: V - E + F = 2
        let euler = mesh.vertex_count() as i64 - mesh.edge_count() as i64
            + mesh.face_count() as i64;
        assert_eq!(euler, 2);
    }

    #[test]
    fn test_finer_tolerance_adds_segments() {
        let coarse = segment_count(1.0, 0.1, 0.01);
        let fine = segment_count(1.0, 0.001, 0.01);
        assert!(fine > coarse);
        assert!(segment_count(1.0, 10.0, 0.01) >= MIN_SEGMENTS);
        assert!(segment_count(1e9, 1e-9, 1e-12) <= MAX_SEGMENTS);
    }

    #[test]
    fn test_compound_merges_and_places_children() {
        let a = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let b = a.translated(DVec3::new(5.0, 0.0, 0.0));
        let mesh = tessellate(&a.union(&b), TOL, TOL).unwrap();
        assert_eq!(mesh.vertex_count(), 16);
        assert_eq!(mesh.face_count(), 12);
        assert_eq!(mesh.bounds().max[0], 5.5);
    }

    #[test]
    fn test_non_finite_placement_is_rejected() {
        let shape = Shape::cuboid(1.0, 1.0, 1.0)
            .unwrap()
            .transformed(DAffine3::from_translation(DVec3::new(f64::NAN, 0.0, 0.0)));
        assert_eq!(tessellate(&shape, TOL, TOL), Err(KernelError::NonFinite));
    }

    #[test]
    fn test_invalid_tolerance_is_rejected() {
        let shape = Shape::sphere(1.0).unwrap();
        assert!(tessellate(&shape, 0.0, TOL).is_err());
        assert!(tessellate(&shape, TOL, -1.0).is_err());
    }
}
