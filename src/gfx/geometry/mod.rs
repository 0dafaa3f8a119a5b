//! # Procedural Geometry Generation
//!
//! Generators for common primitive shapes, so simple scenes need no model files.
//!
//! ## Supported Primitives
//!
//! - **Cube**: Unit cube with flat per-face normals
//! - **Sphere**: UV sphere with configurable resolution
//! - **Plane**: Flat XZ plane with configurable size and subdivisions
//! - **Triangle**: A single colored triangle
//!
//! ## Usage
//!
//! ```rust
//! use thistle::gfx::geometry::{cube, generate_plane, generate_sphere};
//!
//! // Ready-to-draw 36-vertex cube
//! let mesh = cube();
//! assert_eq!(mesh.vertices().len(), 36);
//!
//! // Indexed data for a sphere with 32 segments
//! let sphere_data = generate_sphere(32, 16);
//!
//! // A 10x10 plane with 4 subdivisions, drawn through an index buffer once uploaded
//! let plane = generate_plane(10.0, 10.0, 4, 4).to_indexed_mesh(cgmath::Vector3::new(0.5, 0.5, 0.5));
//! assert_eq!(plane.indices().len(), 96);
//! ```

pub mod primitives;

pub use primitives::*;

use cgmath::{Vector2, Vector3};

use crate::gfx::scene::mesh::Mesh;
use crate::gfx::scene::vertex::Vertex;

/// Indexed geometry with separate attribute streams.
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    /// Vertex positions (x, y, z)
    pub vertices: Vec<[f32; 3]>,
    /// Texture coordinates (u, v)
    pub tex_coords: Vec<[f32; 2]>,
    /// Normal vectors (x, y, z)
    pub normals: Vec<[f32; 3]>,
    /// Triangle indices (counter-clockwise winding)
    pub indices: Vec<u32>,
}

impl GeometryData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Interleaves the streams into [`Vertex`] values, one per position.
    ///
    /// Missing normals default to +Y and missing texture coordinates to zero.
    pub fn to_vertices(&self, color: Vector3<f32>) -> Vec<Vertex> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let normal = self.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]);
                let tex = self.tex_coords.get(i).copied().unwrap_or([0.0, 0.0]);
                Vertex::at(Vector3::from(*p))
                    .with_normal(Vector3::from(normal))
                    .with_tex_coord(Vector2::from(tex))
                    .with_color(color)
            })
            .collect()
    }

    /// Expands the index list into a flat triangle list.
    ///
    /// Out-of-range indices are skipped together with their whole triangle.
    pub fn to_triangle_list(&self, color: Vector3<f32>) -> Vec<Vertex> {
        let unique = self.to_vertices(color);
        self.indices
            .chunks_exact(3)
            .filter_map(|tri| {
                let a = unique.get(tri[0] as usize)?;
                let b = unique.get(tri[1] as usize)?;
                let c = unique.get(tri[2] as usize)?;
                Some([*a, *b, *c])
            })
            .flatten()
            .collect()
    }

    /// Builds a mesh that keeps the shared vertices and draws through an index buffer.
    pub fn to_indexed_mesh(&self, color: Vector3<f32>) -> Mesh {
        let mut mesh = Mesh::from_vertices(self.to_vertices(color));
        mesh.set_indices(self.indices.clone());
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{Gpu, RecordingBackend};
    use std::rc::Rc;

    #[test]
    fn test_triangle_list_skips_bad_indices() {
        let mut data = GeometryData::new();
        data.vertices = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        data.indices = vec![0, 1, 2, 0, 1, 9];

        let list = data.to_triangle_list(Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(list[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(list[2].color, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_indexed_mesh_counts() {
        let gpu: Gpu = Rc::new(RecordingBackend::new());
        let mut mesh = generate_cube().to_indexed_mesh(Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(mesh.vertices().len(), 24);
        assert!(!mesh.is_indexed());

        mesh.update_buffer_data(&gpu);
        assert!(mesh.is_indexed());
        assert_eq!(mesh.draw_count(), 36);
    }
}
