//! Parametric geometry kernel.
//!
//! The kernel exposes a closed set of renderable values:
//! - [`Shape`] - a placed solid or compound of solids
//! - [`Workplane`] - a fluent shape builder bound to a construction plane
//! - [`Assembly`] - a named group of parts and sub-assemblies, with materials
//! - [`BuildPart`] - a builder context that accumulates shapes
//!
//! [`Vector`] is a kernel value too, but it has no geometry of its own.
//!
//! Solid modeling operations (booleans, fillets) are out of scope: `union`
//! collects solids into a compound rather than fusing them.

use glam::{DAffine3, DMat3, DQuat, DVec3, EulerRot};
use thiserror::Error;

use crate::mesh::MeshData;

/// Errors raised while constructing or tessellating kernel values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("{what} must be a positive number, got {value}")]
    InvalidDimension { what: &'static str, value: f64 },

    #[error("unknown workplane '{0}' (expected XY, XZ or YZ)")]
    UnknownPlane(String),

    #[error("tolerance must be a positive number, got {0}")]
    InvalidTolerance(f64),

    #[error("shape produced non-finite vertex coordinates")]
    NonFinite,

    #[error("{0}")]
    Import(String),
}

fn positive(what: &'static str, value: f64) -> Result<f64, KernelError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(KernelError::InvalidDimension { what, value })
    }
}

/// A kernel-native 3D vector. Not renderable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector(pub DVec3);

impl Vector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(DVec3::new(x, y, z))
    }
}

/// Base geometry of a shape, before placement.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Axis-aligned box centered at the origin.
    Box { size: DVec3 },
    /// Cylinder along +Z, centered at the origin.
    Cylinder { radius: f64, height: f64 },
    Sphere { radius: f64 },
    /// Explicit polygon mesh (e.g. imported from OBJ).
    Mesh(MeshData),
    Compound(Vec<Shape>),
}

/// A placed solid or compound.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub geometry: Geometry,
    pub placement: DAffine3,
}

impl Shape {
    fn placed(geometry: Geometry) -> Self {
        Self {
            geometry,
            placement: DAffine3::IDENTITY,
        }
    }

    pub fn cuboid(length: f64, width: f64, height: f64) -> Result<Self, KernelError> {
        let size = DVec3::new(
            positive("length", length)?,
            positive("width", width)?,
            positive("height", height)?,
        );
        Ok(Self::placed(Geometry::Box { size }))
    }

    pub fn cylinder(radius: f64, height: f64) -> Result<Self, KernelError> {
        Ok(Self::placed(Geometry::Cylinder {
            radius: positive("radius", radius)?,
            height: positive("height", height)?,
        }))
    }

    pub fn sphere(radius: f64) -> Result<Self, KernelError> {
        Ok(Self::placed(Geometry::Sphere {
            radius: positive("radius", radius)?,
        }))
    }

    pub fn from_obj(obj_content: &str) -> Result<Self, KernelError> {
        let mesh = MeshData::from_obj(obj_content).map_err(KernelError::Import)?;
        mesh.validate().map_err(KernelError::Import)?;
        Ok(Self::placed(Geometry::Mesh(mesh)))
    }

    pub fn compound(shapes: Vec<Shape>) -> Self {
        Self::placed(Geometry::Compound(shapes))
    }

    /// Apply `transform` on top of the current placement.
    pub fn transformed(&self, transform: DAffine3) -> Self {
        Self {
            geometry: self.geometry.clone(),
            placement: transform * self.placement,
        }
    }

    pub fn translated(&self, offset: DVec3) -> Self {
        self.transformed(DAffine3::from_translation(offset))
    }

    /// Rotate about the origin by Euler angles in degrees (X, then Y, then Z).
    pub fn rotated(&self, x_deg: f64, y_deg: f64, z_deg: f64) -> Self {
        let rotation = DQuat::from_euler(
            EulerRot::XYZ,
            x_deg.to_radians(),
            y_deg.to_radians(),
            z_deg.to_radians(),
        );
        self.transformed(DAffine3::from_quat(rotation))
    }

    /// Collect this shape and `other` into one compound.
    pub fn union(&self, other: &Shape) -> Self {
        Self::compound(vec![self.clone(), other.clone()])
    }

    /// Number of leaf solids in this shape.
    pub fn solid_count(&self) -> usize {
        match &self.geometry {
            Geometry::Compound(shapes) => shapes.iter().map(Shape::solid_count).sum(),
            _ => 1,
        }
    }

    pub fn describe(&self) -> String {
        let kind = match &self.geometry {
            Geometry::Box { size } => format!("Box({} x {} x {})", size.x, size.y, size.z),
            Geometry::Cylinder { radius, height } => format!("Cylinder(r={}, h={})", radius, height),
            Geometry::Sphere { radius } => format!("Sphere(r={})", radius),
            Geometry::Mesh(mesh) => format!("Mesh({} faces)", mesh.face_count()),
            Geometry::Compound(shapes) => format!("Compound({} shapes)", shapes.len()),
        };
        format!("Shape<{}>", kind)
    }
}

/// Construction plane of a [`Workplane`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plane {
    #[default]
    XY,
    XZ,
    YZ,
}

impl Plane {
    pub fn parse(name: &str) -> Result<Self, KernelError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "XY" => Ok(Plane::XY),
            "XZ" => Ok(Plane::XZ),
            "YZ" => Ok(Plane::YZ),
            _ => Err(KernelError::UnknownPlane(name.to_string())),
        }
    }

    /// Local (x, y, normal) axes expressed in world space.
    pub fn basis(&self) -> DMat3 {
        match self {
            Plane::XY => DMat3::from_cols(DVec3::X, DVec3::Y, DVec3::Z),
            Plane::XZ => DMat3::from_cols(DVec3::X, DVec3::Z, DVec3::NEG_Y),
            Plane::YZ => DMat3::from_cols(DVec3::Y, DVec3::Z, DVec3::X),
        }
    }
}

/// Fluent shape builder. Every operation returns a new workplane.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workplane {
    plane: Plane,
    /// Current center in plane-local coordinates.
    origin: DVec3,
    solids: Vec<Shape>,
}

impl Workplane {
    pub fn new(plane: Plane) -> Self {
        Self {
            plane,
            ..Default::default()
        }
    }

    pub fn plane(&self) -> Plane {
        self.plane
    }

    pub fn solids(&self) -> &[Shape] {
        &self.solids
    }

    fn local_frame(&self) -> DAffine3 {
        DAffine3::from_mat3(self.plane.basis()) * DAffine3::from_translation(self.origin)
    }

    fn with_solid(&self, solid: Shape) -> Self {
        let mut next = self.clone();
        next.solids.push(solid.transformed(self.local_frame()));
        next
    }

    pub fn cuboid(&self, length: f64, width: f64, height: f64) -> Result<Self, KernelError> {
        Ok(self.with_solid(Shape::cuboid(length, width, height)?))
    }

    pub fn cylinder(&self, radius: f64, height: f64) -> Result<Self, KernelError> {
        Ok(self.with_solid(Shape::cylinder(radius, height)?))
    }

    pub fn sphere(&self, radius: f64) -> Result<Self, KernelError> {
        Ok(self.with_solid(Shape::sphere(radius)?))
    }

    /// Move the construction center within the plane.
    pub fn center(&self, x: f64, y: f64) -> Self {
        let mut next = self.clone();
        next.origin += DVec3::new(x, y, 0.0);
        next
    }

    /// Translate every solid on the stack in world space.
    pub fn translate(&self, offset: DVec3) -> Self {
        let mut next = self.clone();
        next.solids = self.solids.iter().map(|s| s.translated(offset)).collect();
        next
    }

    pub fn union_shape(&self, shape: &Shape) -> Self {
        let mut next = self.clone();
        next.solids.push(shape.clone());
        next
    }

    pub fn union(&self, other: &Workplane) -> Self {
        let mut next = self.clone();
        next.solids.extend(other.solids.iter().cloned());
        next
    }

    /// First solid on the stack, if any.
    pub fn val(&self) -> Option<Shape> {
        self.solids.first().cloned()
    }

    /// All solids collected into one compound.
    pub fn to_compound(&self) -> Shape {
        Shape::compound(self.solids.clone())
    }
}

/// A shape member of an assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: Option<String>,
    pub material: Option<String>,
    pub shape: Shape,
}

/// Named hierarchy of parts and sub-assemblies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assembly {
    pub name: Option<String>,
    pub material: Option<String>,
    pub parts: Vec<Part>,
    pub children: Vec<Assembly>,
}

impl Assembly {
    pub fn new(name: Option<String>, material: Option<String>) -> Self {
        Self {
            name,
            material,
            ..Default::default()
        }
    }

    pub fn add_part(&mut self, shape: Shape, name: Option<String>, material: Option<String>) {
        self.parts.push(Part {
            name,
            material,
            shape,
        });
    }

    pub fn add_child(&mut self, child: Assembly) {
        self.children.push(child);
    }
}

/// Builder context that accumulates shapes into one part.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildPart {
    shapes: Vec<Shape>,
}

impl BuildPart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, shape: Shape) {
        self.shapes.push(shape);
    }

    pub fn to_compound(&self) -> Shape {
        Shape::compound(self.shapes.clone())
    }
}

/// The closed set of values the geometry builder knows how to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ParametricObject {
    Shape(Shape),
    ShapeBuilder(Workplane),
    Assembly(Assembly),
    BuilderContext(BuildPart),
}

impl ParametricObject {
    /// Canonical shape for every variant except assemblies.
    pub fn to_shape(&self) -> Option<Shape> {
        match self {
            ParametricObject::Shape(shape) => Some(shape.clone()),
            ParametricObject::ShapeBuilder(workplane) => Some(workplane.to_compound()),
            ParametricObject::BuilderContext(builder) => Some(builder.to_compound()),
            ParametricObject::Assembly(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParametricObject::Shape(_) => "Shape",
            ParametricObject::ShapeBuilder(_) => "Workplane",
            ParametricObject::Assembly(_) => "Assembly",
            ParametricObject::BuilderContext(_) => "BuildPart",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_must_be_positive() {
        assert!(Shape::cuboid(1.0, 1.0, 1.0).is_ok());
        assert_eq!(
            Shape::cuboid(1.0, -2.0, 1.0),
            Err(KernelError::InvalidDimension {
                what: "width",
                value: -2.0
            })
        );
        assert!(Shape::sphere(f64::NAN).is_err());
        assert!(Shape::cylinder(0.0, 1.0).is_err());
    }

    #[test]
    fn test_plane_parsing() {
        assert_eq!(Plane::parse("xz").unwrap(), Plane::XZ);
        assert!(Plane::parse("AB").is_err());
    }

    #[test]
    fn test_plane_basis_is_right_handed() {
        for plane in [Plane::XY, Plane::XZ, Plane::YZ] {
            let basis = plane.basis();
            assert!((basis.determinant() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_workplane_stacks_solids() {
        let wp = Workplane::new(Plane::XY)
            .cuboid(1.0, 1.0, 1.0)
            .unwrap()
            .center(2.0, 0.0)
            .cylinder(0.5, 1.0)
            .unwrap();
        assert_eq!(wp.solids().len(), 2);
        assert_eq!(wp.to_compound().solid_count(), 2);

        // The second solid sits at the moved center
        let second = &wp.solids()[1];
        assert!((second.placement.translation - DVec3::new(2.0, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_workplane_xz_maps_local_y_to_world_z() {
        let wp = Workplane::new(Plane::XZ).center(0.0, 3.0).sphere(1.0).unwrap();
        let placed = &wp.solids()[0];
        assert!((placed.placement.translation - DVec3::new(0.0, 0.0, 3.0)).length() < 1e-12);
    }

    #[test]
    fn test_union_collects_solids() {
        let a = Workplane::new(Plane::XY).cuboid(1.0, 1.0, 1.0).unwrap();
        let b = Workplane::new(Plane::XY).sphere(1.0).unwrap();
        assert_eq!(a.union(&b).solids().len(), 2);

        let shape = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        assert_eq!(shape.union(&shape).solid_count(), 2);
    }

    #[test]
    fn test_to_shape_per_variant() {
        let shape = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let mut builder = BuildPart::new();
        builder.add(shape.clone());

        assert!(ParametricObject::Shape(shape.clone()).to_shape().is_some());
        assert_eq!(
            ParametricObject::BuilderContext(builder).to_shape().unwrap().solid_count(),
            1
        );
        assert!(ParametricObject::Assembly(Assembly::default()).to_shape().is_none());
    }
}
