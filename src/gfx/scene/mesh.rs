//! Triangle meshes and their GPU copies.
//!
//! A [`Mesh`] keeps an un-indexed vertex list on the CPU (three vertices per
//! triangle, shared corners duplicated) and mirrors it into a vertex buffer.
//! Edits only mark the mesh dirty; [`Mesh::update_buffer_data`] performs the
//! upload, and the renderer calls it before drawing when
//! [`Mesh::auto_buffer_update`] is on.
//!
//! Normal generation works on positions rather than indices: vertices that
//! sit at exactly the same position are treated as one corner, which is what
//! lets a duplicated-vertex mesh shade smoothly.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, SquareMatrix, Vector3, Vector4, Zero};

use crate::error::{BufferError, ObjError};
use crate::gfx::backend::Gpu;
use crate::gfx::resources::buffer::{GpuBuffer, IndexBuffer, VertexBuffer};
use crate::gfx::resources::texture::Texture;
use crate::gfx::resources::vertex_array::VertexArray;
use crate::gfx::scene::obj;
use crate::gfx::scene::vertex::Vertex;

/// A mesh shared between renderables.
pub type SharedMesh = Rc<RefCell<Mesh>>;

#[derive(Debug)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    vertex_array: Option<VertexArray>,
    vertex_buffer: Option<VertexBuffer>,
    vertex_count: u32,
    indices: Vec<u32>,
    index_buffer: Option<IndexBuffer>,
    index_count: u32,
    dirty: bool,
    auto_buffer_update: bool,
    texture: Option<Rc<Texture>>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            vertex_array: None,
            vertex_buffer: None,
            vertex_count: 0,
            indices: Vec::new(),
            index_buffer: None,
            index_count: 0,
            dirty: false,
            auto_buffer_update: true,
            texture: None,
        }
    }

    pub fn from_vertices(vertices: Vec<Vertex>) -> Self {
        let mut mesh = Self::new();
        mesh.add_vertices(&vertices);
        mesh
    }

    /// Loads an OBJ file (see [`obj::load_obj`] for the accepted dialect).
    pub fn from_obj(path: impl AsRef<Path>, base_color: Vector3<f32>) -> Result<Self, ObjError> {
        let mut mesh = Self::new();
        mesh.add_obj(path, base_color)?;
        Ok(mesh)
    }

    pub fn into_shared(self) -> SharedMesh {
        Rc::new(RefCell::new(self))
    }

    /// Appends the triangles of an OBJ file.
    pub fn add_obj(&mut self, path: impl AsRef<Path>, base_color: Vector3<f32>) -> Result<(), ObjError> {
        let vertices = obj::load_obj(path, base_color)?;
        self.add_vertices(&vertices);
        Ok(())
    }

    pub fn add_vertices(&mut self, vertices: &[Vertex]) {
        self.vertices.extend_from_slice(vertices);
        self.dirty = true;
    }

    /// Appends one triangle.
    ///
    /// # Arguments
    /// * `v1`, `v2`, `v3` - Corners in counter-clockwise order
    /// * `compute_normal` - Overwrite the three normals with the flat face normal
    pub fn add_face(&mut self, v1: Vertex, v2: Vertex, v3: Vertex, compute_normal: bool) {
        let start = self.vertices.len();
        self.vertices.extend_from_slice(&[v1, v2, v3]);
        if compute_normal {
            let normal: [f32; 3] = normalize_or_zero(face_normal(&self.vertices, start)).into();
            for vertex in &mut self.vertices[start..] {
                vertex.normal = normal;
            }
        }
        self.dirty = true;
    }

    /// Switches the mesh to indexed drawing.
    ///
    /// Normal generation still walks the vertex list three at a time, so
    /// compute normals before sharing vertices through indices.
    pub fn set_indices(&mut self, indices: Vec<u32>) {
        self.indices = indices;
        self.dirty = true;
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// First-time GPU upload: creates the vertex buffer and vertex array,
    /// plus an index buffer when the mesh has indices.
    pub fn setup(&mut self, gpu: &Gpu) {
        let buffer = VertexBuffer::from_vertices(gpu, Vertex::layout(), &self.vertices);
        let mut vertex_array = VertexArray::new(gpu);
        vertex_array.add_vertex_buffer(&buffer, false);

        if !self.indices.is_empty() {
            let index_buffer = IndexBuffer::from_indices(gpu, &self.indices);
            vertex_array.set_index_buffer(&index_buffer);
            self.index_buffer = Some(index_buffer);
        }

        self.vertex_count = self.vertices.len() as u32;
        self.index_count = self.indices.len() as u32;
        self.vertex_buffer = Some(buffer);
        self.vertex_array = Some(vertex_array);
        self.dirty = false;
        log::debug!(
            "mesh set up with {} vertices, {} indices",
            self.vertex_count,
            self.index_count
        );
    }

    /// Brings the GPU copy in line with the vertex list.
    ///
    /// Does nothing when clean. Creates the buffer on first use, otherwise
    /// re-uploads in place and only reallocates when the list outgrew the
    /// buffer.
    pub fn update_buffer_data(&mut self, gpu: &Gpu) {
        if !self.dirty {
            return;
        }
        let Some(buffer) = self.vertex_buffer.as_mut() else {
            self.setup(gpu);
            return;
        };

        if upload_growing(buffer, bytemuck::cast_slice(&self.vertices)).is_err() {
            return;
        }
        self.vertex_count = self.vertices.len() as u32;

        match (self.index_buffer.as_mut(), self.indices.is_empty()) {
            (Some(index_buffer), false) => {
                if upload_growing(index_buffer, bytemuck::cast_slice(&self.indices)).is_err() {
                    return;
                }
            }
            (None, false) => {
                let index_buffer = IndexBuffer::from_indices(gpu, &self.indices);
                if let Some(vertex_array) = self.vertex_array.as_mut() {
                    vertex_array.set_index_buffer(&index_buffer);
                }
                self.index_buffer = Some(index_buffer);
            }
            // the vertex array keeps its index buffer; draw_count switches back to vertices
            (_, true) => {}
        }
        self.index_count = self.indices.len() as u32;
        self.dirty = false;
    }

    /// Drops the CPU vertex list. The GPU copy and vertex count are kept.
    pub fn clear_local_data(&mut self) {
        self.vertices.clear();
        self.vertices.shrink_to_fit();
    }

    pub fn set_texture(&mut self, texture: Option<Rc<Texture>>) {
        self.texture = texture;
    }

    pub fn texture(&self) -> Option<&Rc<Texture>> {
        self.texture.as_ref()
    }

    pub fn color_all(&mut self, color: Vector3<f32>) {
        for vertex in &mut self.vertices {
            vertex.color = color.into();
        }
        self.dirty = true;
    }

    /// Transforms every vertex by `transform`; normals use its inverse transpose.
    pub fn apply_transform(&mut self, transform: &Matrix4<f32>) {
        let linear = Matrix3::from_cols(
            transform.x.truncate(),
            transform.y.truncate(),
            transform.z.truncate(),
        );
        let normal_matrix = linear.invert().map(|m| m.transpose());

        for vertex in &mut self.vertices {
            let p = transform * Vector4::new(vertex.position[0], vertex.position[1], vertex.position[2], 1.0);
            let p = if p.w != 0.0 && p.w != 1.0 { p / p.w } else { p };
            vertex.position = p.truncate().into();

            if let Some(normal_matrix) = normal_matrix {
                vertex.normal = normalize_or_zero(normal_matrix * vertex.normal()).into();
            }
        }
        self.dirty = true;
    }

    /// Flat shading: every triangle gets its own face normal.
    pub fn compute_face_normals(&mut self) {
        for start in (0..complete_len(&self.vertices)).step_by(3) {
            let normal: [f32; 3] = normalize_or_zero(face_normal(&self.vertices, start)).into();
            for vertex in &mut self.vertices[start..start + 3] {
                vertex.normal = normal;
            }
        }
        self.dirty = true;
    }

    /// Smooth shading: vertices at the same position share the average of
    /// the face normals around that position.
    ///
    /// With `weighted` the face normals are not normalized before summing,
    /// so larger triangles pull harder.
    pub fn compute_vertex_normals(&mut self, weighted: bool) {
        self.compute_clustered_normals(None, weighted);
    }

    /// Smooth shading that keeps creases.
    ///
    /// A triangle only joins a corner's average when its face normal is
    /// within `threshold` radians of the first triangle found at that corner.
    pub fn compute_mixed_normals(&mut self, threshold: f32, weighted: bool) {
        self.compute_clustered_normals(Some(threshold), weighted);
    }

    fn compute_clustered_normals(&mut self, threshold: Option<f32>, weighted: bool) {
        let len = complete_len(&self.vertices);
        for vertex in &mut self.vertices {
            vertex.normal = [0.0; 3];
        }

        let contribution = |n: Vector3<f32>| if weighted { n } else { normalize_or_zero(n) };
        let mut processed = vec![false; len];
        let mut cluster = Vec::new();

        for i in 0..len {
            if processed[i] {
                continue;
            }
            let position = self.vertices[i].position;
            let base = face_normal(&self.vertices, triangle_start(i));
            let mut sum = contribution(base);
            cluster.push(i);

            for j in (triangle_start(i) + 3)..len {
                if processed[j] || self.vertices[j].position != position {
                    continue;
                }
                let candidate = face_normal(&self.vertices, triangle_start(j));
                if let Some(threshold) = threshold {
                    if candidate.angle(base).0 > threshold {
                        continue;
                    }
                }
                sum += contribution(candidate);
                cluster.push(j);
            }

            let normal: [f32; 3] = normalize_or_zero(sum).into();
            for &k in &cluster {
                self.vertices[k].normal = normal;
                processed[k] = true;
            }
            cluster.clear();
        }
        self.dirty = true;
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Number of vertices in the GPU copy.
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices in the GPU copy.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Whether draws should go through the index buffer.
    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
            && self
                .vertex_array
                .as_ref()
                .is_some_and(|va| va.has_index_buffer())
    }

    /// Elements a draw call covers: indices when indexed, vertices otherwise.
    pub fn draw_count(&self) -> u32 {
        if self.is_indexed() {
            self.index_count
        } else {
            self.vertex_count
        }
    }

    pub fn vertex_array(&self) -> Option<&VertexArray> {
        self.vertex_array.as_ref()
    }

    pub fn vertex_buffer(&self) -> Option<&VertexBuffer> {
        self.vertex_buffer.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn auto_buffer_update(&self) -> bool {
        self.auto_buffer_update
    }

    pub fn set_auto_buffer_update(&mut self, enabled: bool) {
        self.auto_buffer_update = enabled;
    }
}

/// Uploads `bytes` from offset 0, reallocating first if they do not fit.
fn upload_growing(buffer: &mut GpuBuffer, bytes: &[u8]) -> Result<(), BufferError> {
    if bytes.len() > buffer.capacity() {
        buffer.resize(bytes.len(), false);
    }
    buffer.upload(bytes)
}

/// Vertices that form whole triangles; a trailing partial triangle is ignored.
fn complete_len(vertices: &[Vertex]) -> usize {
    vertices.len() / 3 * 3
}

fn triangle_start(index: usize) -> usize {
    index - index % 3
}

/// Unnormalized normal of the triangle starting at `start`: `(p0 - p1) x (p1 - p2)`.
fn face_normal(vertices: &[Vertex], start: usize) -> Vector3<f32> {
    let p0 = vertices[start].position();
    let p1 = vertices[start + 1].position();
    let p2 = vertices[start + 2].position();
    (p0 - p1).cross(p1 - p2)
}

fn normalize_or_zero(v: Vector3<f32>) -> Vector3<f32> {
    if v.magnitude2() > 0.0 {
        v.normalize()
    } else {
        Vector3::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{GpuCall, RecordingBackend};
    use crate::gfx::math::vec3_approx_eq;
    use cgmath::{Deg, Rad};

    const EPS: f32 = 1e-5;

    fn v(x: f32, y: f32, z: f32) -> Vertex {
        Vertex::at(Vector3::new(x, y, z))
    }

    /// Two unit triangles sharing the edge (0,0,0)-(1,0,0), folded 90 degrees:
    /// the first faces +Z, the second +Y.
    fn folded_pair() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.add_face(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0), false);
        mesh.add_face(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 0.0, -1.0), false);
        mesh
    }

    fn normal(mesh: &Mesh, i: usize) -> Vector3<f32> {
        mesh.vertices()[i].normal()
    }

    #[test]
    fn test_face_normals_are_flat() {
        let mut mesh = folded_pair();
        mesh.compute_face_normals();
        for i in 0..3 {
            assert!(vec3_approx_eq(normal(&mesh, i), Vector3::unit_z(), EPS));
            assert!(vec3_approx_eq(normal(&mesh, i + 3), Vector3::unit_y(), EPS));
        }
    }

    #[test]
    fn test_vertex_normals_average_shared_corners() {
        let mut mesh = folded_pair();
        mesh.compute_vertex_normals(false);

        let smooth = Vector3::new(0.0, 1.0, 1.0).normalize();
        // shared corners (0,0,0) and (1,0,0): indices 0/3 and 1/4
        for (a, b) in [(0, 3), (1, 4)] {
            assert_eq!(mesh.vertices()[a].normal, mesh.vertices()[b].normal);
            assert!(vec3_approx_eq(normal(&mesh, a), smooth, EPS));
        }
        assert!(vec3_approx_eq(normal(&mesh, 2), Vector3::unit_z(), EPS));
        assert!(vec3_approx_eq(normal(&mesh, 5), Vector3::unit_y(), EPS));
    }

    #[test]
    fn test_mixed_normals_keep_creases() {
        let mut mesh = folded_pair();
        mesh.compute_mixed_normals(Rad::from(Deg(10.0f32)).0, false);
        for i in 0..3 {
            assert!(vec3_approx_eq(normal(&mesh, i), Vector3::unit_z(), EPS));
            assert!(vec3_approx_eq(normal(&mesh, i + 3), Vector3::unit_y(), EPS));
        }
    }

    #[test]
    fn test_mixed_normals_with_wide_threshold_match_smooth() {
        let mut mixed = folded_pair();
        mixed.compute_mixed_normals(std::f32::consts::PI, false);
        let mut smooth = folded_pair();
        smooth.compute_vertex_normals(false);

        for i in 0..6 {
            assert!(vec3_approx_eq(normal(&mixed, i), normal(&smooth, i), EPS));
        }
    }

    #[test]
    fn test_degenerate_triangle_gets_zero_normal() {
        let mut mesh = Mesh::new();
        mesh.add_face(v(0.0, 0.0, 0.0), v(0.0, 0.0, 0.0), v(0.0, 0.0, 0.0), true);
        mesh.compute_vertex_normals(true);
        assert!(mesh.vertices().iter().all(|v| v.normal == [0.0; 3]));
    }

    #[test]
    fn test_apply_transform_moves_positions_and_rotates_normals() {
        let mut mesh = Mesh::new();
        mesh.add_face(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0), true);
        let transform = Matrix4::from_translation(Vector3::new(0.0, 0.0, 2.0))
            * Matrix4::from_angle_x(Deg(90.0))
            * Matrix4::from_nonuniform_scale(2.0, 1.0, 1.0);
        mesh.apply_transform(&transform);

        assert!(vec3_approx_eq(mesh.vertices()[1].position(), Vector3::new(2.0, 0.0, 2.0), EPS));
        assert!(vec3_approx_eq(normal(&mesh, 0), -Vector3::unit_y(), EPS));
    }

    #[test]
    fn test_update_buffer_data_lifecycle() {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        let mut mesh = folded_pair();
        assert!(mesh.vertex_array().is_none());

        mesh.update_buffer_data(&gpu);
        assert!(mesh.vertex_array().is_some());
        assert_eq!(mesh.vertex_count(), 6);
        assert!(!mesh.is_dirty());

        // clean: nothing happens
        backend.clear_calls();
        mesh.update_buffer_data(&gpu);
        assert!(backend.calls().is_empty());

        // same size: in-place upload, no reallocation
        mesh.color_all(Vector3::new(1.0, 0.0, 0.0));
        mesh.update_buffer_data(&gpu);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::ReallocateBuffer { .. })), 0);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::WriteBuffer { .. })), 1);

        // grown: reallocates, keeps the same handle
        let handle = mesh.vertex_buffer().unwrap().handle();
        mesh.add_face(v(0.0, 0.0, 0.0), v(0.0, 1.0, 0.0), v(0.0, 0.0, 1.0), true);
        mesh.update_buffer_data(&gpu);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::ReallocateBuffer { .. })), 1);
        assert_eq!(mesh.vertex_count(), 9);
        assert_eq!(mesh.vertex_buffer().unwrap().handle(), handle);

        let uploaded = backend.buffer_floats(handle).unwrap();
        let stride = std::mem::size_of::<Vertex>() / 4;
        assert_eq!(uploaded.len(), 9 * stride);
        // color of vertex 0 sits after position, tex_coord and normal
        assert_eq!(&uploaded[8..11], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clear_local_data_keeps_gpu_copy() {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        let mut mesh = folded_pair();
        mesh.setup(&gpu);
        mesh.clear_local_data();

        assert!(mesh.vertices().is_empty());
        assert_eq!(mesh.vertex_count(), 6);
        assert!(!mesh.is_dirty());
    }
}
