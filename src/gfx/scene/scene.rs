use std::rc::Rc;

use cgmath::Matrix4;

use crate::error::SceneError;
use crate::gfx::scene::node::{NodeId, SceneNode};
use crate::gfx::scene::renderable::Renderable;

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// A tree of [`SceneNode`]s stored in an arena.
///
/// The scene owns every node. Children are owned by their parent in the
/// sense that deleting a node deletes its whole subtree; the parent link is
/// only used to walk upwards. The root always exists and its world matrix is
/// the identity.
#[derive(Debug)]
pub struct Scene {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    world_updates: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut scene = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            world_updates: 0,
        };
        scene.root = scene.allocate(SceneNode::new(None));
        scene
    }

    fn allocate(&mut self, node: SceneNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<SceneNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a node under `parent`. The new node starts dirty.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        renderable: Option<Rc<Renderable>>,
    ) -> Result<NodeId, SceneError> {
        if !self.contains(parent) {
            return Err(SceneError::MissingNode(parent));
        }
        let child = self.allocate(SceneNode::new(renderable));
        self.link(parent, child);
        Ok(child)
    }

    /// Creates a detached node. It is not drawn until [`Scene::attach`]ed.
    pub fn create_node(&mut self, renderable: Option<Rc<Renderable>>) -> NodeId {
        self.allocate(SceneNode::new(renderable))
    }

    /// Makes a detached node a child of `parent`.
    ///
    /// Fails if either node is missing, if `child` already has a parent (or
    /// is the root), or if `parent` lies inside `child`'s subtree.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        if !self.contains(parent) {
            return Err(SceneError::MissingNode(parent));
        }
        let Some(node) = self.node(child) else {
            return Err(SceneError::MissingNode(child));
        };
        if node.parent.is_some() || child == self.root {
            return Err(SceneError::AlreadyParented(child));
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(SceneError::Cycle { parent, child });
        }
        self.link(parent, child);
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
            node.mark_dirty();
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    /// Whether `ancestor` is `node` or lies on its path to the root.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    /// Deletes `child` and its subtree if it is a direct child of `parent`.
    pub fn delete_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let Some(position) = self
            .node(parent)
            .and_then(|p| p.children.iter().position(|c| *c == child))
        else {
            return false;
        };
        self.delete_child_at(parent, position)
    }

    /// Deletes the `index`-th child of `parent` and its subtree.
    pub fn delete_child_at(&mut self, parent: NodeId, index: usize) -> bool {
        let Some(node) = self.node_mut(parent) else {
            return false;
        };
        if index >= node.children.len() {
            return false;
        }
        let child = node.children.remove(index);
        self.destroy_subtree(child);
        true
    }

    /// Deletes every child of `parent`.
    pub fn delete_all(&mut self, parent: NodeId) {
        let children = match self.node_mut(parent) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        for child in children {
            self.destroy_subtree(child);
        }
    }

    /// Deletes a detached node and its subtree.
    pub fn delete_detached(&mut self, id: NodeId) -> bool {
        let detached = id != self.root && self.node(id).is_some_and(|n| n.parent.is_none());
        if detached {
            self.destroy_subtree(id);
        }
        detached
    }

    fn destroy_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.release(current) {
                stack.extend(node.children);
            }
        }
    }

    /// Recomputes `world = parent.world * local` and clears the dirty flag.
    ///
    /// On the root, or a detached node, only the flag is cleared; their
    /// world matrix stays as it is (identity unless set otherwise).
    pub fn update_world_from_parent(&mut self, id: NodeId) {
        let parent_world = self
            .node(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.node(p))
            .map(|p| p.world_transform());

        let Some(node) = self.node_mut(id) else {
            return;
        };
        match parent_world {
            Some(parent_world) => {
                let world = parent_world * node.local_transform();
                node.set_world(world);
                self.world_updates += 1;
            }
            None => node.clear_dirty(),
        }
    }

    /// Cached world matrix of `id`.
    pub fn world_transform(&self, id: NodeId) -> Option<Matrix4<f32>> {
        self.node(id).map(|n| n.world_transform())
    }

    /// How many world matrices have been recomputed so far.
    pub fn world_updates(&self) -> u64 {
        self.world_updates
    }

    /// Depth-first pre-order walk from `start`.
    ///
    /// A node is recomputed when it or any ancestor on the walk was dirty,
    /// before its children are visited. `visit` sees each node after its
    /// world matrix is resolved.
    pub fn walk<F>(&mut self, start: NodeId, parent_dirty: bool, mut visit: F)
    where
        F: FnMut(NodeId, &SceneNode),
    {
        let mut stack = vec![(start, parent_dirty)];
        while let Some((id, parent_dirty)) = stack.pop() {
            let Some(dirty) = self.node(id).map(|n| parent_dirty || n.is_dirty()) else {
                continue;
            };
            if dirty {
                self.update_world_from_parent(id);
            }
            let Some(node) = self.node(id) else {
                continue;
            };
            visit(id, node);
            stack.extend(node.children.iter().rev().map(|child| (*child, dirty)));
        }
    }

    /// Resolves every stale world matrix without drawing.
    pub fn update_world(&mut self) {
        self.walk(self.root, false, |_, _| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::math::mat4_approx_eq;
    use cgmath::{Deg, One, Quaternion, Rotation3, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_transform(scene: &mut Scene, id: NodeId, rng: &mut StdRng) {
        let node = scene.node_mut(id).unwrap();
        node.set_translation(Vector3::new(
            rng.random_range(-5.0..5.0),
            rng.random_range(-5.0..5.0),
            rng.random_range(-5.0..5.0),
        ));
        let axis = Vector3::new(
            rng.random_range(0.1f32..1.0),
            rng.random_range(0.1f32..1.0),
            rng.random_range(0.1f32..1.0),
        );
        node.set_rotation(Quaternion::from_axis_angle(
            cgmath::InnerSpace::normalize(axis),
            Deg(rng.random_range(-180.0f32..180.0)),
        ));
        node.set_scale(Vector3::new(
            rng.random_range(0.5..2.0),
            rng.random_range(0.5..2.0),
            rng.random_range(0.5..2.0),
        ));
    }

    #[test]
    fn test_world_is_product_of_ancestor_locals() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut scene = Scene::new();
        let mut nodes = vec![scene.root()];
        for _ in 0..40 {
            let parent = nodes[rng.random_range(0..nodes.len())];
            let child = scene.create_child(parent, None).unwrap();
            random_transform(&mut scene, child, &mut rng);
            nodes.push(child);
        }
        scene.update_world();

        for &id in &nodes[1..] {
            let mut expected = Matrix4::one();
            let mut current = id;
            while current != scene.root() {
                let node = scene.node(current).unwrap();
                expected = node.local_transform() * expected;
                current = node.parent().unwrap();
            }
            let world = scene.world_transform(id).unwrap();
            assert!(mat4_approx_eq(&world, &expected, 1e-3));
        }
    }

    #[test]
    fn test_dirty_propagates_to_descendants_only() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.create_child(root, None).unwrap();
        let a1 = scene.create_child(a, None).unwrap();
        let a2 = scene.create_child(a1, None).unwrap();
        let b = scene.create_child(root, None).unwrap();
        let b1 = scene.create_child(b, None).unwrap();
        scene.update_world();
        assert_eq!(scene.world_updates(), 5);

        let sibling_world = scene.world_transform(b1).unwrap();
        scene
            .node_mut(a)
            .unwrap()
            .translate(Vector3::new(1.0, 2.0, 3.0));
        scene.update_world();

        assert_eq!(scene.world_updates(), 5 + 3);
        assert_eq!(scene.world_transform(b1).unwrap(), sibling_world);
        let moved = scene.world_transform(a2).unwrap();
        assert_eq!(moved.w.truncate(), Vector3::new(1.0, 2.0, 3.0));

        // nothing dirty: no recomputation at all
        scene.update_world();
        assert_eq!(scene.world_updates(), 8);
    }

    #[test]
    fn test_world_read_is_cached_until_traversal() {
        let mut scene = Scene::new();
        let child = scene.create_child(scene.root(), None).unwrap();
        scene
            .node_mut(child)
            .unwrap()
            .set_translation(Vector3::new(0.0, 4.0, 0.0));
        assert_eq!(scene.world_transform(child).unwrap(), Matrix4::one());

        scene.update_world();
        assert_eq!(
            scene.world_transform(child).unwrap(),
            Matrix4::from_translation(Vector3::new(0.0, 4.0, 0.0))
        );
    }

    #[test]
    fn test_root_update_only_clears_dirty() {
        let mut scene = Scene::new();
        let root = scene.root();
        scene
            .node_mut(root)
            .unwrap()
            .set_translation(Vector3::new(9.0, 9.0, 9.0));
        scene.update_world_from_parent(root);

        let node = scene.node(root).unwrap();
        assert!(!node.is_dirty());
        assert_eq!(node.world_transform(), Matrix4::one());
        assert_eq!(scene.world_updates(), 0);
    }

    #[test]
    fn test_delete_child_removes_subtree() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.create_child(root, None).unwrap();
        let a1 = scene.create_child(a, None).unwrap();
        let b = scene.create_child(root, None).unwrap();

        assert!(!scene.delete_child(b, a));
        assert!(scene.delete_child(root, a));
        assert!(!scene.contains(a));
        assert!(!scene.contains(a1));
        assert_eq!(scene.node(root).unwrap().children(), &[b]);

        assert!(!scene.delete_child_at(root, 3));
        assert!(scene.delete_child_at(root, 0));
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut scene = Scene::new();
        let root = scene.root();
        let old = scene.create_child(root, None).unwrap();
        scene.delete_all(root);
        let new = scene.create_child(root, None).unwrap();

        assert_eq!(old.index, new.index);
        assert!(!scene.contains(old));
        assert!(scene.contains(new));
    }

    #[test]
    fn test_attach_rejects_cycles_and_second_parent() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.create_node(None);
        let b = scene.create_child(root, None).unwrap();

        assert_eq!(scene.attach(root, a), Ok(()));
        assert!(scene.node(a).unwrap().is_dirty());
        assert_eq!(scene.attach(b, a), Err(SceneError::AlreadyParented(a)));
        assert_eq!(scene.attach(a, root), Err(SceneError::AlreadyParented(root)));

        let c = scene.create_node(None);
        let d = scene.create_child(c, None).unwrap();
        assert_eq!(scene.attach(d, c), Err(SceneError::Cycle { parent: d, child: c }));
        assert!(scene.delete_detached(c));
        assert!(!scene.contains(d));
    }
}
