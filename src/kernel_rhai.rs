//! Rhai integration for the geometry kernel.
//!
//! Registers the kernel types and their fluent builders with the Rhai engine.
//! Scripts reach the kernel through the `kernel` namespace value (aliased as
//! `cq`):
//!
//! - `kernel.box(l, w, h)`, `kernel.cylinder(r, h)`, `kernel.sphere(r)`
//! - `kernel.workplane()` / `kernel.workplane("XZ")`
//! - `kernel.assembly()` / `kernel.assembly(#{ name: "a", material: "wood" })`
//! - `kernel.build_part()`, `kernel.compound([..])`, `kernel.vec(x, y, z)`
//! - `kernel.import_obj(text)`

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map};

use crate::kernel::{
    Assembly, BuildPart, KernelError, ParametricObject, Plane, Shape, Vector, Workplane,
};

/// Names under which the kernel namespace is exposed to scripts.
pub const KERNEL_ALIASES: &[&str] = &["kernel", "cq"];

/// Script-facing handle to the kernel namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kernel;

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

fn kernel_error(err: KernelError) -> Box<EvalAltResult> {
    err.to_string().into()
}

/// Convert a Rhai number (float or integer) to f64.
fn number(value: &Dynamic, what: &str) -> RhaiResult<f64> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f64);
    }
    Err(format!("Expected number for {}, got {}", what, value.type_name()).into())
}

fn vector3(x: &Dynamic, y: &Dynamic, z: &Dynamic) -> RhaiResult<glam::DVec3> {
    Ok(glam::DVec3::new(
        number(x, "x")?,
        number(y, "y")?,
        number(z, "z")?,
    ))
}

fn option_string(options: &Map, key: &str) -> RhaiResult<Option<String>> {
    match options.get(key) {
        None => Ok(None),
        Some(value) if value.is_unit() => Ok(None),
        Some(value) => value
            .clone()
            .into_string()
            .map(Some)
            .map_err(|got| format!("Option '{}' must be a string, got {}", key, got).into()),
    }
}

/// Recognize a kernel value inside a Rhai dynamic.
pub fn parametric_object(value: &Dynamic) -> Option<ParametricObject> {
    if let Some(shape) = value.clone().try_cast::<Shape>() {
        return Some(ParametricObject::Shape(shape));
    }
    if let Some(workplane) = value.clone().try_cast::<Workplane>() {
        return Some(ParametricObject::ShapeBuilder(workplane));
    }
    if let Some(assembly) = value.clone().try_cast::<Assembly>() {
        return Some(ParametricObject::Assembly(assembly));
    }
    if let Some(builder) = value.clone().try_cast::<BuildPart>() {
        return Some(ParametricObject::BuilderContext(builder));
    }
    None
}

/// Convert a shape-like value (Shape, Workplane or BuildPart) to a Shape.
fn to_shape(value: &Dynamic, context: &str) -> RhaiResult<Shape> {
    parametric_object(value)
        .and_then(|obj| obj.to_shape())
        .ok_or_else(|| {
            format!(
                "{} expects a Shape, Workplane or BuildPart, got {}",
                context,
                value.type_name()
            )
            .into()
        })
}

fn add_to_assembly(
    assembly: &mut Assembly,
    value: Dynamic,
    name: Option<String>,
    material: Option<String>,
) -> RhaiResult<()> {
    match parametric_object(&value) {
        Some(ParametricObject::Assembly(mut child)) => {
            if name.is_some() {
                child.name = name;
            }
            if material.is_some() {
                child.material = material;
            }
            assembly.add_child(child);
            Ok(())
        }
        Some(other) => match other.to_shape() {
            Some(shape) => {
                assembly.add_part(shape, name, material);
                Ok(())
            }
            None => Err(format!("Assembly.add cannot add {}", other.type_name()).into()),
        },
        None => Err(format!(
            "Assembly.add expects a Shape, Workplane, Assembly or BuildPart, got {}",
            value.type_name()
        )
        .into()),
    }
}

/// Register kernel types and functions with a Rhai engine.
pub fn register_kernel_api(engine: &mut Engine) {
    engine.register_type_with_name::<Kernel>("Kernel");
    engine.register_type_with_name::<Shape>("Shape");
    engine.register_type_with_name::<Workplane>("Workplane");
    engine.register_type_with_name::<Assembly>("Assembly");
    engine.register_type_with_name::<BuildPart>("BuildPart");
    engine.register_type_with_name::<Vector>("Vector");

    // === Kernel namespace: primitives ===
    engine.register_fn(
        "box",
        |_: &mut Kernel, l: Dynamic, w: Dynamic, h: Dynamic| -> RhaiResult<Shape> {
            Shape::cuboid(number(&l, "length")?, number(&w, "width")?, number(&h, "height")?)
                .map_err(kernel_error)
        },
    );
    engine.register_fn(
        "cylinder",
        |_: &mut Kernel, r: Dynamic, h: Dynamic| -> RhaiResult<Shape> {
            Shape::cylinder(number(&r, "radius")?, number(&h, "height")?).map_err(kernel_error)
        },
    );
    engine.register_fn("sphere", |_: &mut Kernel, r: Dynamic| -> RhaiResult<Shape> {
        Shape::sphere(number(&r, "radius")?).map_err(kernel_error)
    });
    engine.register_fn(
        "import_obj",
        |_: &mut Kernel, text: ImmutableString| -> RhaiResult<Shape> {
            Shape::from_obj(text.as_str()).map_err(kernel_error)
        },
    );
    engine.register_fn(
        "compound",
        |_: &mut Kernel, items: Array| -> RhaiResult<Shape> {
            let shapes = items
                .iter()
                .map(|item| to_shape(item, "kernel.compound"))
                .collect::<RhaiResult<Vec<_>>>()?;
            Ok(Shape::compound(shapes))
        },
    );
    engine.register_fn(
        "vec",
        |_: &mut Kernel, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<Vector> {
            Ok(Vector(vector3(&x, &y, &z)?))
        },
    );

    // === Kernel namespace: builders ===
    engine.register_fn("workplane", |_: &mut Kernel| Workplane::new(Plane::XY));
    engine.register_fn(
        "workplane",
        |_: &mut Kernel, plane: ImmutableString| -> RhaiResult<Workplane> {
            Ok(Workplane::new(Plane::parse(&plane).map_err(kernel_error)?))
        },
    );
    engine.register_fn("assembly", |_: &mut Kernel| Assembly::default());
    engine.register_fn(
        "assembly",
        |_: &mut Kernel, options: Map| -> RhaiResult<Assembly> {
            Ok(Assembly::new(
                option_string(&options, "name")?,
                option_string(&options, "material")?,
            ))
        },
    );
    engine.register_fn("build_part", |_: &mut Kernel| BuildPart::new());

    // === Shape ===
    engine.register_fn(
        "translate",
        |s: &mut Shape, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<Shape> {
            Ok(s.translated(vector3(&x, &y, &z)?))
        },
    );
    engine.register_fn("translate", |s: &mut Shape, v: Vector| s.translated(v.0));
    engine.register_fn(
        "rotate",
        |s: &mut Shape, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<Shape> {
            Ok(s.rotated(number(&x, "x")?, number(&y, "y")?, number(&z, "z")?))
        },
    );
    engine.register_fn("union", |s: &mut Shape, other: Dynamic| -> RhaiResult<Shape> {
        Ok(s.union(&to_shape(&other, "Shape.union")?))
    });
    engine.register_get("solid_count", |s: &mut Shape| s.solid_count() as i64);
    engine.register_fn("to_string", |s: &mut Shape| s.describe());
    engine.register_fn("to_debug", |s: &mut Shape| s.describe());

    // === Workplane ===
    engine.register_fn(
        "box",
        |wp: &mut Workplane, l: Dynamic, w: Dynamic, h: Dynamic| -> RhaiResult<Workplane> {
            wp.cuboid(number(&l, "length")?, number(&w, "width")?, number(&h, "height")?)
                .map_err(kernel_error)
        },
    );
    engine.register_fn(
        "cylinder",
        |wp: &mut Workplane, r: Dynamic, h: Dynamic| -> RhaiResult<Workplane> {
            wp.cylinder(number(&r, "radius")?, number(&h, "height")?)
                .map_err(kernel_error)
        },
    );
    engine.register_fn(
        "sphere",
        |wp: &mut Workplane, r: Dynamic| -> RhaiResult<Workplane> {
            wp.sphere(number(&r, "radius")?).map_err(kernel_error)
        },
    );
    engine.register_fn(
        "center",
        |wp: &mut Workplane, x: Dynamic, y: Dynamic| -> RhaiResult<Workplane> {
            Ok(wp.center(number(&x, "x")?, number(&y, "y")?))
        },
    );
    engine.register_fn(
        "translate",
        |wp: &mut Workplane, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<Workplane> {
            Ok(wp.translate(vector3(&x, &y, &z)?))
        },
    );
    engine.register_fn("translate", |wp: &mut Workplane, v: Vector| wp.translate(v.0));
    engine.register_fn(
        "union",
        |wp: &mut Workplane, other: Dynamic| -> RhaiResult<Workplane> {
            if let Some(other) = other.clone().try_cast::<Workplane>() {
                return Ok(wp.union(&other));
            }
            Ok(wp.union_shape(&to_shape(&other, "Workplane.union")?))
        },
    );
    engine.register_fn("val", |wp: &mut Workplane| -> RhaiResult<Shape> {
        wp.val()
            .ok_or_else(|| "Workplane.val called on an empty workplane".into())
    });
    engine.register_fn("compound", |wp: &mut Workplane| wp.to_compound());
    engine.register_get("size", |wp: &mut Workplane| wp.solids().len() as i64);

    // === Assembly ===
    engine.register_fn(
        "add",
        |a: &mut Assembly, value: Dynamic| -> RhaiResult<()> {
            add_to_assembly(a, value, None, None)
        },
    );
    engine.register_fn(
        "add",
        |a: &mut Assembly, value: Dynamic, options: Map| -> RhaiResult<()> {
            let name = option_string(&options, "name")?;
            let material = option_string(&options, "material")?;
            add_to_assembly(a, value, name, material)
        },
    );
    engine.register_get_set(
        "name",
        |a: &mut Assembly| -> Dynamic { a.name.clone().map_or(Dynamic::UNIT, Dynamic::from) },
        |a: &mut Assembly, name: Dynamic| a.name = name.into_string().ok(),
    );
    engine.register_get_set(
        "material",
        |a: &mut Assembly| -> Dynamic {
            a.material.clone().map_or(Dynamic::UNIT, Dynamic::from)
        },
        |a: &mut Assembly, material: Dynamic| {
            a.material = material.into_string().ok()
        },
    );

    // === BuildPart ===
    engine.register_fn(
        "add",
        |b: &mut BuildPart, value: Dynamic| -> RhaiResult<()> {
            b.add(to_shape(&value, "BuildPart.add")?);
            Ok(())
        },
    );

    // === Vector ===
    engine.register_get("x", |v: &mut Vector| v.0.x);
    engine.register_get("y", |v: &mut Vector| v.0.y);
    engine.register_get("z", |v: &mut Vector| v.0.z);
    engine.register_fn("to_string", |v: &mut Vector| {
        format!("Vector({}, {}, {})", v.0.x, v.0.y, v.0.z)
    });
}
