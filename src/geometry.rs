//! Geometry builder.
//!
//! Building happens in two halves:
//! - [`lower`] turns evaluated bindings into a [`ParametricNode`] forest,
//!   tessellating every shape. It touches no host state, so it runs on the
//!   worker next to the evaluation.
//! - [`instantiate`] replaces a root's generated objects with the nodes. It
//!   mutates the host scene and must run on the host thread.
//!
//! A value the builder does not recognize fails the whole lowering, so a
//! build failure never touches the scene.

use crate::binding::GeneratedObjectRef;
use crate::error::Failure;
use crate::kernel::{Assembly, ParametricObject};
use crate::mesh::MeshData;
use crate::scene_graph::{HostScene, ObjectId, Selection};
use crate::scripting::{NameBindings, Value};
use crate::tessellate::tessellate;

/// Lowered geometry: a mesh-less group or a mesh leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct ParametricNode {
    pub name: String,
    /// Material names to try, nearest first: the node's own, then those
    /// inherited from enclosing assemblies.
    pub materials: Vec<String>,
    pub mesh: Option<MeshData>,
    pub children: Vec<ParametricNode>,
}

impl ParametricNode {
    pub fn leaf(name: impl Into<String>, materials: Vec<String>, mesh: MeshData) -> Self {
        Self {
            name: name.into(),
            materials,
            mesh: Some(mesh),
            children: Vec::new(),
        }
    }

    pub fn group(
        name: impl Into<String>,
        materials: Vec<String>,
        children: Vec<ParametricNode>,
    ) -> Self {
        Self {
            name: name.into(),
            materials,
            mesh: None,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.mesh.is_some()
    }
}

/// Lower every renderable binding, in declaration order.
///
/// Primitives and unit are skipped (they are attributes); any other value
/// that is not a kernel object fails with the binding's name and type.
pub fn lower(
    bindings: &NameBindings,
    tolerance: f64,
    angular_tolerance: f64,
) -> Result<Vec<ParametricNode>, Failure> {
    let mut nodes = Vec::new();

    for (name, value) in bindings.iter() {
        match value {
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Unit => {}
            Value::Object(ParametricObject::Assembly(assembly)) => {
                nodes.push(lower_assembly(
                    name,
                    assembly,
                    name,
                    &[],
                    tolerance,
                    angular_tolerance,
                )?);
            }
            Value::Object(obj) => {
                let shape = obj.to_shape().ok_or_else(|| {
                    Failure::build(name, format!("Unsupported object type {}", obj.type_name()))
                })?;
                let mesh = tessellate(&shape, tolerance, angular_tolerance)
                    .map_err(|e| Failure::build(name, e.to_string()))?;
                nodes.push(ParametricNode::leaf(name.clone(), Vec::new(), mesh));
            }
            Value::Other { type_name } => {
                return Err(Failure::build(
                    name,
                    format!("Unsupported object type {}", type_name),
                ));
            }
        }
    }

    Ok(nodes)
}

fn lower_assembly(
    binding: &str,
    assembly: &Assembly,
    fallback_name: &str,
    inherited: &[String],
    tolerance: f64,
    angular_tolerance: f64,
) -> Result<ParametricNode, Failure> {
    let name = assembly
        .name
        .clone()
        .unwrap_or_else(|| fallback_name.to_string());
    let materials = with_own(assembly.material.as_deref(), inherited);

    let mut children = Vec::with_capacity(assembly.parts.len() + assembly.children.len());

    for part in &assembly.parts {
        let mesh = tessellate(&part.shape, tolerance, angular_tolerance)
            .map_err(|e| Failure::build(binding, e.to_string()))?;
        children.push(ParametricNode::leaf(
            part.name.clone().unwrap_or_else(|| name.clone()),
            with_own(part.material.as_deref(), &materials),
            mesh,
        ));
    }

    for child in &assembly.children {
        children.push(lower_assembly(
            binding,
            child,
            &name,
            &materials,
            tolerance,
            angular_tolerance,
        )?);
    }

    Ok(ParametricNode::group(name, materials, children))
}

/// Prepend an own material to an inherited candidate list.
fn with_own(own: Option<&str>, inherited: &[String]) -> Vec<String> {
    own.map(str::to_string)
        .into_iter()
        .chain(inherited.iter().cloned())
        .collect()
}

/// Destroy every referenced object and clear the list. Objects that are
/// already gone are skipped.
pub fn teardown<S: HostScene + ?Sized>(scene: &mut S, generated: &mut Vec<GeneratedObjectRef>) {
    for r in generated.drain(..) {
        if let Err(e) = scene.destroy_object(r.object) {
            log::debug!("Skipping removal of '{}': {}", r.name, e);
        }
    }
}

fn restore_selection<S: HostScene + ?Sized>(scene: &mut S, selection: &Selection) {
    let restored = Selection {
        active: selection.active.filter(|id| scene.contains(*id)),
        selected: selection
            .selected
            .iter()
            .copied()
            .filter(|id| scene.contains(*id))
            .collect(),
    };
    scene.set_selection(&restored);
}

fn create_node<S: HostScene + ?Sized>(
    scene: &mut S,
    node: &ParametricNode,
    parent: ObjectId,
    created: &mut Vec<GeneratedObjectRef>,
) -> Result<(), crate::error::SceneError> {
    let id = scene.create_object(&node.name, node.mesh.clone());
    created.push(GeneratedObjectRef {
        object: id,
        name: node.name.clone(),
    });

    scene.link_into_scene(id)?;
    scene.set_parent(id, parent)?;

    if node.is_leaf() {
        // An unresolvable name falls back to the next inherited one.
        let mut resolved = None;
        for name in &node.materials {
            match scene.lookup_material(name) {
                Some(material_id) => {
                    resolved = Some(material_id);
                    break;
                }
                None => log::warn!("Material '{}' not found for '{}'", name, node.name),
            }
        }
        if let Some(material_id) = resolved {
            scene.apply_material(id, material_id)?;
        }
    }

    for child in &node.children {
        create_node(scene, child, id, created)?;
    }

    Ok(())
}

/// Replace the objects in `prior` with freshly created ones for `nodes`.
///
/// Selection is captured first, `prior` is torn down and cleared, new objects
/// are created under `root`, then the selection is restored. A host error
/// stops creation; the refs created so far are still returned with it.
pub fn instantiate<S: HostScene + ?Sized>(
    scene: &mut S,
    root: ObjectId,
    nodes: &[ParametricNode],
    prior: &mut Vec<GeneratedObjectRef>,
) -> (Vec<GeneratedObjectRef>, Option<Failure>) {
    let selection = scene.selection();

    teardown(scene, prior);

    let mut created = Vec::new();
    let mut failure = None;
    for node in nodes {
        if let Err(e) = create_node(scene, node, root, &mut created) {
            failure = Some(Failure::build(&node.name, e.to_string()));
            break;
        }
    }

    restore_selection(scene, &selection);

    (created, failure)
}

/// Lower and instantiate in one step.
///
/// The returned refs are always the root's current generated set: on a
/// lowering failure nothing is touched and `prior` is returned as it was.
pub fn build<S: HostScene + ?Sized>(
    scene: &mut S,
    bindings: &NameBindings,
    root: ObjectId,
    prior: &mut Vec<GeneratedObjectRef>,
    tolerance: f64,
    angular_tolerance: f64,
) -> (Vec<GeneratedObjectRef>, Option<Failure>) {
    match lower(bindings, tolerance, angular_tolerance) {
        Ok(nodes) => instantiate(scene, root, &nodes, prior),
        Err(failure) => (prior.clone(), Some(failure)),
    }
}
