//! Scene graph nodes.

use std::rc::Rc;

use cgmath::{Matrix4, One, Quaternion, Rad, Rotation3, Vector3};

use crate::gfx::scene::renderable::Renderable;

/// Stable handle to a node in a [`Scene`](super::Scene).
///
/// The generation makes handles to deleted nodes invalid even after their
/// slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One node: a local transform, a cached world matrix and an optional renderable.
///
/// Transform setters only mark the node dirty. The world matrix is
/// recomputed during traversal, so [`SceneNode::world_transform`] returns
/// whatever the last traversal produced.
#[derive(Debug, Clone)]
pub struct SceneNode {
    translation: Vector3<f32>,
    rotation: Quaternion<f32>,
    scale: Vector3<f32>,
    world: Matrix4<f32>,
    dirty: bool,
    renderable: Option<Rc<Renderable>>,
    stencil_index: u32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl SceneNode {
    pub(crate) fn new(renderable: Option<Rc<Renderable>>) -> Self {
        Self {
            translation: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            world: Matrix4::one(),
            dirty: false,
            renderable,
            stencil_index: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    /// `translation * rotation * scale`.
    pub fn local_transform(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.translation)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// World matrix as of the last traversal.
    pub fn world_transform(&self) -> Matrix4<f32> {
        self.world
    }

    pub(crate) fn set_world(&mut self, world: Matrix4<f32>) {
        self.world = world;
        self.dirty = false;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Id written to the stencil buffer for picking. `0` means not selectable.
    pub fn stencil_index(&self) -> u32 {
        self.stencil_index
    }

    pub fn set_stencil_index(&mut self, index: u32) {
        self.stencil_index = index;
    }

    pub fn set_translation(&mut self, translation: Vector3<f32>) {
        self.translation = translation;
        self.dirty = true;
    }

    pub fn translate(&mut self, delta: Vector3<f32>) {
        self.translation += delta;
        self.dirty = true;
    }

    pub fn translation(&self) -> Vector3<f32> {
        self.translation
    }

    pub fn set_scale(&mut self, scale: Vector3<f32>) {
        self.scale = scale;
        self.dirty = true;
    }

    /// Multiplies the scale component-wise.
    pub fn scale(&mut self, factor: Vector3<f32>) {
        self.scale.x *= factor.x;
        self.scale.y *= factor.y;
        self.scale.z *= factor.z;
        self.dirty = true;
    }

    pub fn scale_factors(&self) -> Vector3<f32> {
        self.scale
    }

    pub fn set_rotation(&mut self, rotation: Quaternion<f32>) {
        self.rotation = rotation;
        self.dirty = true;
    }

    /// Applies `rotation` after the current one, in local space.
    pub fn rotate(&mut self, rotation: Quaternion<f32>) {
        self.rotation = self.rotation * rotation;
        self.dirty = true;
    }

    pub fn rotate_axis(&mut self, axis: Vector3<f32>, angle: Rad<f32>) {
        self.rotate(Quaternion::from_axis_angle(axis, angle));
    }

    pub fn rotate_x(&mut self, angle: Rad<f32>) {
        self.rotate(Quaternion::from_angle_x(angle));
    }

    pub fn rotate_y(&mut self, angle: Rad<f32>) {
        self.rotate(Quaternion::from_angle_y(angle));
    }

    pub fn rotate_z(&mut self, angle: Rad<f32>) {
        self.rotate(Quaternion::from_angle_z(angle));
    }

    pub fn rotation(&self) -> Quaternion<f32> {
        self.rotation
    }

    pub fn renderable(&self) -> Option<&Rc<Renderable>> {
        self.renderable.as_ref()
    }

    pub fn set_renderable(&mut self, renderable: Option<Rc<Renderable>>) {
        self.renderable = renderable;
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::math::mat4_approx_eq;
    use cgmath::Deg;

    #[test]
    fn test_local_transform_scales_then_rotates_then_translates() {
        let mut node = SceneNode::new(None);
        node.set_translation(Vector3::new(5.0, 0.0, 0.0));
        node.rotate_y(Deg(90.0).into());
        node.set_scale(Vector3::new(2.0, 2.0, 2.0));

        let expected = Matrix4::from_translation(Vector3::new(5.0, 0.0, 0.0))
            * Matrix4::from_angle_y(Deg(90.0))
            * Matrix4::from_scale(2.0);
        assert!(mat4_approx_eq(&node.local_transform(), &expected, 1e-5));
    }

    #[test]
    fn test_mutators_mark_dirty() {
        let mut node = SceneNode::new(None);
        assert!(!node.is_dirty());
        node.scale(Vector3::new(1.0, 2.0, 1.0));
        assert!(node.is_dirty());

        node.clear_dirty();
        node.rotate_axis(Vector3::unit_x(), Rad(0.5));
        assert!(node.is_dirty());
    }

    #[test]
    fn test_stencil_index_defaults_to_unselectable() {
        let mut node = SceneNode::new(None);
        assert_eq!(node.stencil_index(), 0);
        node.set_stencil_index(7);
        assert_eq!(node.stencil_index(), 7);
        assert!(!node.is_dirty());
    }
}
