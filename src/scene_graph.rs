//! Host scene interface and an in-memory scene graph.
//!
//! The pipeline only talks to the host through [`HostScene`]. [`SceneGraph`]
//! is the implementation used by the headless CLI host and by tests; a real
//! host application provides its own.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::SceneError;
use crate::mesh::MeshData;

/// Unique identifier for host scene objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Unique identifier for host materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

/// The host's active object and selected set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub active: Option<ObjectId>,
    pub selected: Vec<ObjectId>,
}

/// The subset of the host scene API the pipeline needs.
///
/// All calls happen on the host's governing thread.
pub trait HostScene {
    /// Create an object, empty when `mesh` is `None`.
    fn create_object(&mut self, name: &str, mesh: Option<MeshData>) -> ObjectId;

    /// Destroy an object. Fails if it no longer exists.
    fn destroy_object(&mut self, id: ObjectId) -> Result<(), SceneError>;

    fn set_parent(&mut self, child: ObjectId, parent: ObjectId) -> Result<(), SceneError>;

    /// Link an object into the active scene so it is visible.
    fn link_into_scene(&mut self, id: ObjectId) -> Result<(), SceneError>;

    fn lookup_material(&self, name: &str) -> Option<MaterialId>;

    fn apply_material(&mut self, id: ObjectId, material: MaterialId) -> Result<(), SceneError>;

    fn contains(&self, id: ObjectId) -> bool;

    fn selection(&self) -> Selection;

    fn set_selection(&mut self, selection: &Selection);
}

/// One object stored in the [`SceneGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    pub mesh: Option<MeshData>,
    pub parent: Option<ObjectId>,
    pub materials: Vec<MaterialId>,
    /// Whether the object is linked into the scene (rendered).
    pub linked: bool,
}

/// Structural summary of an object subtree, used for comparisons and dumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneTreeNode {
    pub name: String,
    pub vertex_count: Option<usize>,
    pub face_count: Option<usize>,
    pub materials: Vec<String>,
    pub children: Vec<SceneTreeNode>,
}

/// In-memory scene graph implementing [`HostScene`].
#[derive(Debug, Default, Serialize)]
pub struct SceneGraph {
    objects: BTreeMap<ObjectId, SceneObject>,
    materials: BTreeMap<MaterialId, String>,
    #[serde(skip)]
    material_names: HashMap<String, MaterialId>,
    selection: Selection,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    fn new_id(&mut self) -> u64 {
        // Default-constructed graphs start at 0; ids are never reused.
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a material by name, returning the existing one if present.
    pub fn add_material(&mut self, name: &str) -> MaterialId {
        if let Some(id) = self.material_names.get(name) {
            return *id;
        }
        let id = MaterialId(self.new_id());
        self.materials.insert(id, name.to_string());
        self.material_names.insert(name.to_string(), id);
        id
    }

    pub fn material_name(&self, id: MaterialId) -> Option<&str> {
        self.materials.get(&id).map(|s| s.as_str())
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &SceneObject)> {
        self.objects.iter().map(|(id, obj)| (*id, obj))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Direct children of an object, in creation order.
    pub fn children(&self, parent: ObjectId) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, obj)| obj.parent == Some(parent))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Find objects by name.
    pub fn find_by_name(&self, name: &str) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, obj)| obj.name == name)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Summarise the subtree rooted at `id`.
    pub fn tree(&self, id: ObjectId) -> Option<SceneTreeNode> {
        let obj = self.objects.get(&id)?;
        let children = self
            .children(id)
            .into_iter()
            .filter_map(|child| self.tree(child))
            .collect();

        Some(SceneTreeNode {
            name: obj.name.clone(),
            vertex_count: obj.mesh.as_ref().map(|m| m.vertex_count()),
            face_count: obj.mesh.as_ref().map(|m| m.face_count()),
            materials: obj
                .materials
                .iter()
                .filter_map(|m| self.material_name(*m).map(str::to_string))
                .collect(),
            children,
        })
    }

    /// Select an object (does not change the active object).
    pub fn select(&mut self, id: ObjectId) {
        if self.objects.contains_key(&id) && !self.selection.selected.contains(&id) {
            self.selection.selected.push(id);
        }
    }

    pub fn set_active(&mut self, id: Option<ObjectId>) {
        self.selection.active = id.filter(|id| self.objects.contains_key(id));
    }

    /// Whether `ancestor` appears on the parent chain of `id`.
    fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = self.objects.get(&id).and_then(|o| o.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.objects.get(&parent).and_then(|o| o.parent);
        }
        false
    }
}

impl HostScene for SceneGraph {
    fn create_object(&mut self, name: &str, mesh: Option<MeshData>) -> ObjectId {
        let id = ObjectId(self.new_id());
        self.objects.insert(
            id,
            SceneObject {
                name: name.to_string(),
                mesh,
                parent: None,
                materials: Vec::new(),
                linked: false,
            },
        );
        id
    }

    fn destroy_object(&mut self, id: ObjectId) -> Result<(), SceneError> {
        if self.objects.remove(&id).is_none() {
            return Err(SceneError::ObjectNotFound(id));
        }

        // Orphan the children rather than cascading.
        for obj in self.objects.values_mut() {
            if obj.parent == Some(id) {
                obj.parent = None;
            }
        }

        self.selection.selected.retain(|s| *s != id);
        if self.selection.active == Some(id) {
            self.selection.active = None;
        }
        Ok(())
    }

    fn set_parent(&mut self, child: ObjectId, parent: ObjectId) -> Result<(), SceneError> {
        if !self.objects.contains_key(&parent) {
            return Err(SceneError::ObjectNotFound(parent));
        }
        if child == parent || self.is_ancestor(child, parent) {
            return Err(SceneError::InvalidParent(child));
        }
        let obj = self
            .objects
            .get_mut(&child)
            .ok_or(SceneError::ObjectNotFound(child))?;
        obj.parent = Some(parent);
        Ok(())
    }

    fn link_into_scene(&mut self, id: ObjectId) -> Result<(), SceneError> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(SceneError::ObjectNotFound(id))?;
        obj.linked = true;
        Ok(())
    }

    fn lookup_material(&self, name: &str) -> Option<MaterialId> {
        self.material_names.get(name).copied()
    }

    fn apply_material(&mut self, id: ObjectId, material: MaterialId) -> Result<(), SceneError> {
        if !self.materials.contains_key(&material) {
            return Err(SceneError::MaterialNotFound(material));
        }
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(SceneError::ObjectNotFound(id))?;
        if obj.mesh.is_none() {
            return Err(SceneError::NoMesh(id));
        }
        obj.materials.push(material);
        Ok(())
    }

    fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    fn selection(&self) -> Selection {
        self.selection.clone()
    }

    fn set_selection(&mut self, selection: &Selection) {
        self.selection.selected = selection
            .selected
            .iter()
            .copied()
            .filter(|id| self.objects.contains_key(id))
            .collect();
        self.selection.active = selection.active.filter(|id| self.objects.contains_key(id));
    }
}
