//! Vertex arrays: which buffers feed which attribute slots.

use crate::gfx::backend::{check_gpu_error, Gpu, VertexArrayHandle};
use crate::gfx::resources::buffer::{IndexBuffer, VertexBuffer};

/// Binds vertex buffers to consecutive attribute slots.
///
/// Each added buffer continues numbering where the previous one stopped,
/// so a mesh buffer followed by a per-instance buffer lands on locations
/// `0..n` and `n..m`.
pub struct VertexArray {
    gpu: Gpu,
    handle: VertexArrayHandle,
    next_attribute: u32,
    vertex_buffers: usize,
    has_index_buffer: bool,
}

impl VertexArray {
    pub fn new(gpu: &Gpu) -> Self {
        let handle = gpu.create_vertex_array();
        Self {
            gpu: gpu.clone(),
            handle,
            next_attribute: 0,
            vertex_buffers: 0,
            has_index_buffer: false,
        }
    }

    /// Attaches `buffer` using its layout.
    ///
    /// A buffer without a layout cannot be described to the device and is
    /// skipped with a warning.
    pub fn add_vertex_buffer(&mut self, buffer: &VertexBuffer, instanced: bool) {
        let Some(layout) = buffer.layout() else {
            log::warn!(
                "vertex buffer {} has no layout, not attached",
                buffer.handle().0
            );
            return;
        };

        self.gpu.attach_vertex_buffer(
            self.handle,
            buffer.handle(),
            layout,
            self.next_attribute,
            instanced,
        );
        if !check_gpu_error(self.gpu.as_ref(), "attach vertex buffer") {
            self.next_attribute += layout.attribute_slots();
            self.vertex_buffers += 1;
        }
    }

    pub fn set_index_buffer(&mut self, buffer: &IndexBuffer) {
        self.gpu.attach_index_buffer(self.handle, buffer.handle());
        self.has_index_buffer = !check_gpu_error(self.gpu.as_ref(), "attach index buffer");
    }

    pub fn bind(&self) {
        self.gpu.bind_vertex_array(Some(self.handle));
    }

    pub fn unbind(&self) {
        self.gpu.bind_vertex_array(None);
    }

    pub fn handle(&self) -> VertexArrayHandle {
        self.handle
    }

    /// Attribute slot the next buffer will start at.
    pub fn next_attribute(&self) -> u32 {
        self.next_attribute
    }

    pub fn vertex_buffer_count(&self) -> usize {
        self.vertex_buffers
    }

    pub fn has_index_buffer(&self) -> bool {
        self.has_index_buffer
    }
}

impl Drop for VertexArray {
    fn drop(&mut self) {
        self.gpu.destroy_vertex_array(self.handle);
    }
}

impl std::fmt::Debug for VertexArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexArray")
            .field("handle", &self.handle)
            .field("next_attribute", &self.next_attribute)
            .field("has_index_buffer", &self.has_index_buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{GpuCall, RecordingBackend};
    use crate::gfx::resources::layout::{ElementType, VertexBufferLayout};
    use std::rc::Rc;

    #[test]
    fn test_attributes_continue_across_buffers() {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();

        let mesh_layout = VertexBufferLayout::from_elements([
            (ElementType::Vec3, "position"),
            (ElementType::Vec3, "normal"),
        ]);
        let instance_layout = VertexBufferLayout::from_elements([(ElementType::Mat4, "model")]);
        let mesh = VertexBuffer::new(&gpu, mesh_layout, 240);
        let instances = VertexBuffer::new(&gpu, instance_layout, 640);

        let mut va = VertexArray::new(&gpu);
        va.add_vertex_buffer(&mesh, false);
        va.add_vertex_buffer(&instances, true);

        assert_eq!(va.next_attribute(), 6);
        let firsts: Vec<(u32, bool)> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                GpuCall::AttachVertexBuffer {
                    first_attribute,
                    instanced,
                    ..
                } => Some((*first_attribute, *instanced)),
                _ => None,
            })
            .collect();
        assert_eq!(firsts, vec![(0, false), (2, true)]);
    }

    #[test]
    fn test_index_buffer_and_bind() {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        let ib = IndexBuffer::from_indices(&gpu, &[0, 1, 2]);

        let mut va = VertexArray::new(&gpu);
        va.set_index_buffer(&ib);
        assert!(va.has_index_buffer());

        va.bind();
        assert_eq!(backend.bound_vertex_array(), Some(va.handle()));
        va.unbind();
        assert_eq!(backend.bound_vertex_array(), None);
    }
}
