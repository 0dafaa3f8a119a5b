//! GPU buffer resources.
//!
//! [`GpuBuffer`] owns one device buffer and tracks how many bytes of it are
//! in use (`size`) against how many were allocated (`capacity`). The typed
//! wrappers [`VertexBuffer`], [`IndexBuffer`] and [`UniformBuffer`] add the
//! per-kind conveniences on top.
//!
//! Uploads never grow a buffer implicitly. An upload past the capacity is
//! logged, rejected, and leaves the buffer exactly as it was.

use std::ops::{Deref, DerefMut};

use cgmath::Matrix4;

use crate::error::BufferError;
use crate::gfx::backend::{check_gpu_error, BufferHandle, BufferKind, Gpu};
use crate::gfx::math::mat4_array;
use crate::gfx::resources::layout::VertexBufferLayout;

/// Size of one column-major 4x4 float matrix.
pub const MAT4_SIZE: usize = 64;

/// A device buffer with a logical size and a fixed capacity.
pub struct GpuBuffer {
    gpu: Gpu,
    handle: BufferHandle,
    kind: BufferKind,
    size: usize,
    capacity: usize,
    layout: Option<VertexBufferLayout>,
    stride: Option<usize>,
}

impl GpuBuffer {
    /// Allocates `capacity` bytes. The buffer starts empty (`size == 0`).
    pub fn new(gpu: &Gpu, kind: BufferKind, capacity: usize) -> Self {
        let handle = gpu.create_buffer(kind, capacity);
        check_gpu_error(gpu.as_ref(), "create buffer");
        log::debug!("created {:?} buffer {} ({} bytes)", kind, handle.0, capacity);
        Self {
            gpu: gpu.clone(),
            handle,
            kind,
            size: 0,
            capacity,
            layout: None,
            stride: None,
        }
    }

    /// Allocates exactly enough room for `data` and uploads it.
    pub fn with_data(gpu: &Gpu, kind: BufferKind, data: &[u8]) -> Self {
        let mut buffer = Self::new(gpu, kind, data.len());
        // Capacity equals the data length, so this cannot be rejected.
        let _ = buffer.upload(data);
        buffer
    }

    /// Attaches a vertex layout. Its stride becomes the unit of [`Self::count`].
    pub fn set_layout(&mut self, layout: VertexBufferLayout) {
        self.stride = match layout.stride() {
            0 => None,
            stride => Some(stride as usize),
        };
        self.layout = Some(layout);
    }

    pub fn layout(&self) -> Option<&VertexBufferLayout> {
        self.layout.as_ref()
    }

    /// Sets the element size used by [`Self::count`] when there is no layout.
    pub fn set_stride(&mut self, stride: usize) {
        self.stride = (stride > 0).then_some(stride);
    }

    /// Replaces the contents with `data`, starting at byte 0.
    pub fn upload(&mut self, data: &[u8]) -> Result<(), BufferError> {
        self.upload_at(0, data)?;
        self.size = data.len();
        Ok(())
    }

    /// Writes `data` at `offset` without touching the rest of the buffer.
    ///
    /// The logical size grows to cover the written range.
    pub fn upload_at(&mut self, offset: usize, data: &[u8]) -> Result<(), BufferError> {
        let end = offset.checked_add(data.len());
        if !end.is_some_and(|end| end <= self.capacity) {
            let err = BufferError::CapacityExceeded {
                requested: data.len(),
                offset,
                capacity: self.capacity,
            };
            log::error!("buffer {}: {}", self.handle.0, err);
            return Err(err);
        }
        self.gpu.write_buffer(self.handle, offset, data);
        check_gpu_error(self.gpu.as_ref(), "buffer upload");
        self.size = self.size.max(offset + data.len());
        Ok(())
    }

    /// Changes the capacity.
    ///
    /// With `keep_data` the first `min(size, new_capacity)` bytes survive:
    /// they are copied to an auxiliary buffer, the storage is reallocated,
    /// and the bytes are copied back. Without it the buffer comes back empty.
    pub fn resize(&mut self, new_capacity: usize, keep_data: bool) {
        let kept = if keep_data {
            self.size.min(new_capacity)
        } else {
            0
        };

        if kept > 0 {
            let aux = self.gpu.create_buffer(self.kind, kept);
            self.gpu.copy_buffer(self.handle, aux, kept);
            self.gpu.reallocate_buffer(self.handle, new_capacity);
            self.gpu.copy_buffer(aux, self.handle, kept);
            self.gpu.destroy_buffer(aux);
        } else {
            self.gpu.reallocate_buffer(self.handle, new_capacity);
        }
        check_gpu_error(self.gpu.as_ref(), "buffer resize");

        log::debug!(
            "resized buffer {}: {} -> {} bytes (kept {})",
            self.handle.0,
            self.capacity,
            new_capacity,
            kept
        );
        self.capacity = new_capacity;
        self.size = kept;
    }

    /// Reads the used part of the buffer back from the device.
    pub fn read_back(&self) -> Vec<u8> {
        let data = self.gpu.read_buffer(self.handle, 0, self.size);
        check_gpu_error(self.gpu.as_ref(), "buffer read back");
        data
    }

    /// Elements in use: `size / stride` when a stride is known, else bytes.
    pub fn count(&self) -> usize {
        match self.stride {
            Some(stride) => self.size / stride,
            None => self.size,
        }
    }

    /// Elements that fit: `capacity / stride` when a stride is known, else bytes.
    pub fn capacity_count(&self) -> usize {
        match self.stride {
            Some(stride) => self.capacity / stride,
            None => self.capacity,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        log::trace!("destroying buffer {}", self.handle.0);
        self.gpu.destroy_buffer(self.handle);
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Interleaved vertex data described by a [`VertexBufferLayout`].
#[derive(Debug)]
pub struct VertexBuffer {
    buffer: GpuBuffer,
}

impl VertexBuffer {
    /// Allocates room for `capacity` bytes of vertices.
    pub fn new(gpu: &Gpu, layout: VertexBufferLayout, capacity: usize) -> Self {
        let mut buffer = GpuBuffer::new(gpu, BufferKind::Vertex, capacity);
        buffer.set_layout(layout);
        Self { buffer }
    }

    /// Creates a buffer sized to `vertices` and uploads them.
    pub fn from_vertices<T: bytemuck::Pod>(
        gpu: &Gpu,
        layout: VertexBufferLayout,
        vertices: &[T],
    ) -> Self {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let mut buffer = GpuBuffer::with_data(gpu, BufferKind::Vertex, bytes);
        buffer.set_layout(layout);
        Self { buffer }
    }

    /// Uploads `vertices` from the start of the buffer.
    pub fn fill<T: bytemuck::Pod>(&mut self, vertices: &[T]) -> Result<(), BufferError> {
        self.buffer.upload(bytemuck::cast_slice(vertices))
    }
}

impl Deref for VertexBuffer {
    type Target = GpuBuffer;

    fn deref(&self) -> &GpuBuffer {
        &self.buffer
    }
}

impl DerefMut for VertexBuffer {
    fn deref_mut(&mut self) -> &mut GpuBuffer {
        &mut self.buffer
    }
}

/// 32-bit index data.
#[derive(Debug)]
pub struct IndexBuffer {
    buffer: GpuBuffer,
}

impl IndexBuffer {
    pub fn new(gpu: &Gpu, capacity_indices: usize) -> Self {
        let mut buffer = GpuBuffer::new(gpu, BufferKind::Index, capacity_indices * 4);
        buffer.set_stride(4);
        Self { buffer }
    }

    pub fn from_indices(gpu: &Gpu, indices: &[u32]) -> Self {
        let mut buffer = GpuBuffer::with_data(gpu, BufferKind::Index, bytemuck::cast_slice(indices));
        buffer.set_stride(4);
        Self { buffer }
    }

    pub fn fill(&mut self, indices: &[u32]) -> Result<(), BufferError> {
        self.buffer.upload(bytemuck::cast_slice(indices))
    }
}

impl Deref for IndexBuffer {
    type Target = GpuBuffer;

    fn deref(&self) -> &GpuBuffer {
        &self.buffer
    }
}

impl DerefMut for IndexBuffer {
    fn deref_mut(&mut self) -> &mut GpuBuffer {
        &mut self.buffer
    }
}

/// A uniform block bound to a fixed binding point.
///
/// Binds itself on creation, so shaders declaring a block at `binding` see
/// it without further setup.
#[derive(Debug)]
pub struct UniformBuffer {
    buffer: GpuBuffer,
    binding: u32,
}

impl UniformBuffer {
    pub fn new(gpu: &Gpu, size: usize, binding: u32) -> Self {
        let mut buffer = GpuBuffer::new(gpu, BufferKind::Uniform, size);
        buffer.set_stride(MAT4_SIZE);
        let ubo = Self { buffer, binding };
        ubo.bind();
        ubo
    }

    /// Writes `matrices` as consecutive 64 byte column-major blocks.
    ///
    /// Rejected when the matrices do not fit the block.
    pub fn fill(&mut self, matrices: &[Matrix4<f32>]) -> Result<(), BufferError> {
        let requested = matrices.len() * MAT4_SIZE;
        if requested > self.buffer.capacity() {
            let err = BufferError::UniformOverflow {
                requested,
                capacity: self.buffer.capacity(),
            };
            log::error!("uniform buffer at binding {}: {}", self.binding, err);
            return Err(err);
        }

        let mut bytes = Vec::with_capacity(requested);
        for matrix in matrices {
            bytes.extend_from_slice(bytemuck::cast_slice(&mat4_array(matrix)));
        }
        self.buffer.upload(&bytes)
    }

    pub fn bind(&self) {
        self.buffer.gpu().bind_uniform_buffer(self.buffer.handle(), self.binding);
    }

    pub fn unbind(&self) {
        self.buffer.gpu().unbind_uniform_buffer(self.binding);
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }
}

impl Deref for UniformBuffer {
    type Target = GpuBuffer;

    fn deref(&self) -> &GpuBuffer {
        &self.buffer
    }
}

impl DerefMut for UniformBuffer {
    fn deref_mut(&mut self) -> &mut GpuBuffer {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{GpuCall, GraphicsBackend, RecordingBackend};
    use crate::gfx::resources::layout::ElementType;
    use std::rc::Rc;

    fn recording() -> (Rc<RecordingBackend>, Gpu) {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        (backend, gpu)
    }

    #[test]
    fn test_upload_over_capacity_is_rejected_and_leaves_contents() {
        let (backend, gpu) = recording();
        let mut buffer = GpuBuffer::new(&gpu, BufferKind::Vertex, 8);
        buffer.upload(&[1, 2, 3, 4]).unwrap();

        let err = buffer.upload(&[9; 12]).unwrap_err();
        assert_eq!(
            err,
            BufferError::CapacityExceeded {
                requested: 12,
                offset: 0,
                capacity: 8
            }
        );
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.read_back(), vec![1, 2, 3, 4]);
        assert_eq!(
            backend.buffer_data(buffer.handle()).unwrap(),
            vec![1, 2, 3, 4, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_upload_at_huge_offset_is_rejected() {
        let (backend, gpu) = recording();
        let mut buffer = GpuBuffer::new(&gpu, BufferKind::Vertex, 8);
        buffer.upload(&[1, 2]).unwrap();

        let err = buffer.upload_at(usize::MAX, &[7, 7]).unwrap_err();
        assert!(matches!(err, BufferError::CapacityExceeded { capacity: 8, .. }));
        assert_eq!(buffer.size(), 2);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::WriteBuffer { .. })), 1);
    }

    #[test]
    fn test_resize_keeps_prefix() {
        let (backend, gpu) = recording();
        let data: Vec<u8> = (0..16).collect();
        let mut buffer = GpuBuffer::with_data(&gpu, BufferKind::Vertex, &data);
        let handle = buffer.handle();

        buffer.resize(32, true);
        assert_eq!(buffer.handle(), handle);
        assert_eq!(buffer.capacity(), 32);
        assert_eq!(buffer.read_back(), data);

        buffer.resize(6, true);
        assert_eq!(buffer.size(), 6);
        assert_eq!(buffer.read_back(), data[..6].to_vec());

        // Auxiliary buffers do not leak.
        assert_eq!(backend.live_buffers(), 1);
        assert!(backend.take_error().is_none());
    }

    #[test]
    fn test_resize_without_keep_empties_buffer() {
        let (backend, gpu) = recording();
        let mut buffer = GpuBuffer::with_data(&gpu, BufferKind::Vertex, &[7; 8]);
        backend.clear_calls();

        buffer.resize(4, false);
        assert_eq!(buffer.size(), 0);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::CopyBuffer { .. })), 0);
        assert_eq!(backend.buffer_data(buffer.handle()).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_count_uses_stride_when_known() {
        let (_backend, gpu) = recording();
        let mut layout = VertexBufferLayout::new();
        layout.add(ElementType::Vec3, "position");

        let mut vb = VertexBuffer::new(&gpu, layout, 120);
        vb.fill(&[[0.0f32; 3]; 4]).unwrap();
        assert_eq!(vb.count(), 4);
        assert_eq!(vb.capacity_count(), 10);

        let raw = GpuBuffer::with_data(&gpu, BufferKind::Vertex, &[0; 10]);
        assert_eq!(raw.count(), 10);
        assert_eq!(raw.capacity_count(), 10);

        let ib = IndexBuffer::from_indices(&gpu, &[0, 1, 2, 2, 3, 0]);
        assert_eq!(ib.count(), 6);
    }

    #[test]
    fn test_drop_destroys_device_buffer() {
        let (backend, gpu) = recording();
        {
            let _buffer = GpuBuffer::new(&gpu, BufferKind::Index, 4);
            assert_eq!(backend.live_buffers(), 1);
        }
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_uniform_fill_writes_consecutive_matrices() {
        let (backend, gpu) = recording();
        let mut ubo = UniformBuffer::new(&gpu, 2 * MAT4_SIZE, 0);
        assert_eq!(backend.bound_uniform_buffer(0), Some(ubo.handle()));

        let a = Matrix4::from_scale(2.0f32);
        let b = Matrix4::from_translation(cgmath::Vector3::new(1.0f32, 2.0, 3.0));
        ubo.fill(&[a, b]).unwrap();

        let floats = backend.buffer_floats(ubo.handle()).unwrap();
        assert_eq!(&floats[..16], &mat4_array(&a)[..]);
        assert_eq!(&floats[16..], &mat4_array(&b)[..]);
        assert_eq!(floats[28], 1.0);

        assert!(matches!(
            ubo.fill(&[a, b, a]),
            Err(BufferError::UniformOverflow { requested: 192, .. })
        ));
    }
}
