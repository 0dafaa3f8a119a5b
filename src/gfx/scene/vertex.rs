//! # Vertex format
//!
//! The single interleaved vertex format used by [`Mesh`](super::mesh::Mesh).

use cgmath::{Vector2, Vector3};

use crate::gfx::resources::layout::{ElementType, VertexBufferLayout};

/// A mesh vertex.
///
/// # Memory Layout
///
/// `#[repr(C)]` with four tightly packed float fields, 44 bytes in total.
/// Shader inputs `position`, `texCoord`, `normal` and `color` read them at
/// locations 0 to 3.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    /// Vertex at `position` with zero normal, zero texture coordinates and white color.
    pub fn at(position: Vector3<f32>) -> Self {
        Self {
            position: position.into(),
            tex_coord: [0.0, 0.0],
            normal: [0.0, 0.0, 0.0],
            color: [1.0, 1.0, 1.0],
        }
    }

    pub fn with_tex_coord(mut self, tex_coord: Vector2<f32>) -> Self {
        self.tex_coord = tex_coord.into();
        self
    }

    pub fn with_normal(mut self, normal: Vector3<f32>) -> Self {
        self.normal = normal.into();
        self
    }

    pub fn with_color(mut self, color: Vector3<f32>) -> Self {
        self.color = color.into();
        self
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position.into()
    }

    pub fn normal(&self) -> Vector3<f32> {
        self.normal.into()
    }

    /// Layout matching the field order above.
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout::from_elements([
            (ElementType::Vec3, "position"),
            (ElementType::Vec2, "texCoord"),
            (ElementType::Vec3, "normal"),
            (ElementType::Vec3, "color"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride() as usize, std::mem::size_of::<Vertex>());
        let offsets: Vec<u32> = layout.elements().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20, 32]);
    }
}
