//! Graphics backend abstraction.
//!
//! Every GPU resource in the engine (buffers, vertex arrays, shaders,
//! textures, render targets) talks to the device through the
//! [`GraphicsBackend`] trait. Two implementations ship with the crate:
//!
//! - [`WgpuBackend`]: renders through wgpu onto a winit window.
//! - [`RecordingBackend`]: headless, keeps resources in CPU memory and logs
//!   every call. Tests and tools use it to observe exactly what the
//!   renderer asked the device to do.
//!
//! The backend is shared as [`Gpu`], a reference-counted trait object.
//! Methods take `&self`; the engine is single-threaded and backends use
//! interior mutability.

pub mod pipeline_cache;
pub mod recording;
pub mod wgpu_backend;

use std::rc::Rc;

pub use recording::{GpuCall, RecordingBackend};
pub use wgpu_backend::WgpuBackend;

use crate::error::GpuError;
use crate::gfx::resources::layout::VertexBufferLayout;
use crate::gfx::resources::shader::ShaderParams;
use crate::gfx::resources::texture::TextureParams;
use crate::gfx::scene::renderable::DrawMode;

/// Shared handle to the active graphics backend.
pub type Gpu = Rc<dyn GraphicsBackend>;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

handle_type!(
    /// Device-side buffer.
    BufferHandle
);
handle_type!(
    /// Vertex input binding state: attached vertex buffers plus an optional index buffer.
    VertexArrayHandle
);
handle_type!(
    /// Linked shader program.
    ProgramHandle
);
handle_type!(TextureHandle);
handle_type!(
    /// Off-screen framebuffer with color and depth/stencil attachments.
    RenderTargetHandle
);

/// Location of a per-draw uniform inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

/// A typed value for a per-draw uniform upload.
///
/// Matrices are column-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
}

impl UniformValue {
    /// Byte representation as laid out in a uniform slot.
    ///
    /// Scalars and vectors are packed. `Mat2` and `Mat3` pad each column to
    /// 16 bytes, which is how uniform address space stores them.
    pub fn to_slot_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => v.to_ne_bytes().to_vec(),
            UniformValue::Int(v) => v.to_ne_bytes().to_vec(),
            UniformValue::Bool(v) => (*v as u32).to_ne_bytes().to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Mat2(m) => padded_columns(m, 2),
            UniformValue::Mat3(m) => padded_columns(m, 3),
            UniformValue::Mat4(m) => bytemuck::cast_slice(m).to_vec(),
        }
    }
}

fn padded_columns(values: &[f32], rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() / rows * 16);
    for column in values.chunks(rows) {
        let mut padded = [0.0f32; 4];
        padded[..rows].copy_from_slice(column);
        out.extend_from_slice(bytemuck::cast_slice(&padded));
    }
    out
}

/// Which attachments a clear touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFlags {
    pub color: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl ClearFlags {
    pub const ALL: ClearFlags = ClearFlags {
        color: true,
        depth: true,
        stencil: true,
    };

    pub const COLOR_DEPTH: ClearFlags = ClearFlags {
        color: true,
        depth: true,
        stencil: false,
    };
}

/// Parameters for creating a texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub params: TextureParams,
}

/// The device operations the engine needs.
///
/// Failures never unwind through these calls. They are queued and surface
/// through [`GraphicsBackend::take_error`], usually via [`check_gpu_error`].
pub trait GraphicsBackend {
    /// Short name used in logs.
    fn name(&self) -> &str;

    // Buffers
    fn create_buffer(&self, kind: BufferKind, capacity: usize) -> BufferHandle;
    /// Replaces the storage behind `buffer` with `capacity` zeroed bytes.
    /// The handle stays valid, so vertex arrays referencing it need no update.
    fn reallocate_buffer(&self, buffer: BufferHandle, capacity: usize);
    fn write_buffer(&self, buffer: BufferHandle, offset: usize, data: &[u8]);
    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, len: usize);
    fn read_buffer(&self, buffer: BufferHandle, offset: usize, len: usize) -> Vec<u8>;
    fn destroy_buffer(&self, buffer: BufferHandle);
    fn bind_uniform_buffer(&self, buffer: BufferHandle, binding: u32);
    fn unbind_uniform_buffer(&self, binding: u32);

    // Vertex arrays
    fn create_vertex_array(&self) -> VertexArrayHandle;
    fn attach_vertex_buffer(
        &self,
        array: VertexArrayHandle,
        buffer: BufferHandle,
        layout: &VertexBufferLayout,
        first_attribute: u32,
        instanced: bool,
    );
    fn attach_index_buffer(&self, array: VertexArrayHandle, buffer: BufferHandle);
    fn bind_vertex_array(&self, array: Option<VertexArrayHandle>);
    fn destroy_vertex_array(&self, array: VertexArrayHandle);

    // Programs
    fn create_program(&self, params: &ShaderParams) -> ProgramHandle;
    /// Whether both stages compiled and the program linked.
    fn program_linked(&self, program: ProgramHandle) -> bool;
    fn bind_program(&self, program: Option<ProgramHandle>);
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn set_uniform(&self, location: UniformLocation, value: UniformValue);
    fn destroy_program(&self, program: ProgramHandle);

    // Textures
    fn create_texture(&self, desc: &TextureDesc) -> TextureHandle;
    /// Writes tightly packed RGBA8 pixels into a sub-rectangle.
    fn write_texture(&self, texture: TextureHandle, origin: [u32; 2], size: [u32; 2], rgba: &[u8]);
    fn read_texture(&self, texture: TextureHandle) -> Vec<u8>;
    fn bind_texture(&self, slot: u32, texture: Option<TextureHandle>);
    fn destroy_texture(&self, texture: TextureHandle);

    // Render targets
    fn create_render_target(&self, width: u32, height: u32) -> RenderTargetHandle;
    fn render_target_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle>;
    /// `None` binds the default framebuffer.
    fn bind_render_target(&self, target: Option<RenderTargetHandle>);
    fn destroy_render_target(&self, target: RenderTargetHandle);

    // Drawing
    fn clear(&self, flags: ClearFlags, color: [f32; 4]);
    fn set_viewport(&self, x: u32, y: u32, width: u32, height: u32);
    fn draw_arrays(&self, mode: DrawMode, first: u32, count: u32);
    fn draw_indexed(&self, mode: DrawMode, count: u32);
    fn resize(&self, width: u32, height: u32);
    fn present(&self);

    /// Pops the oldest pending device error.
    fn take_error(&self) -> Option<GpuError>;
}

/// Drains and logs pending device errors, tagging them with `context`.
///
/// Returns `true` when at least one error was reported. Call it after
/// state-mutating work whose failure should be visible in the log.
#[cfg(not(feature = "error-callback"))]
pub fn check_gpu_error(gpu: &dyn GraphicsBackend, context: &str) -> bool {
    let mut reported = false;
    while let Some(err) = gpu.take_error() {
        log::error!("[{}] {}: {}", gpu.name(), context, err);
        reported = true;
    }
    reported
}

/// With `error-callback` enabled the backend logs errors as they occur, so
/// there is nothing left to poll.
#[cfg(feature = "error-callback")]
pub fn check_gpu_error(_gpu: &dyn GraphicsBackend, _context: &str) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat3_slot_bytes_pad_columns() {
        let m = UniformValue::Mat3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let bytes = m.to_slot_bytes();
        assert_eq!(bytes.len(), 48);
        let floats = crate::gfx::math::floats_from_bytes(&bytes);
        assert_eq!(&floats[0..4], &[1.0, 2.0, 3.0, 0.0]);
        assert_eq!(&floats[8..12], &[7.0, 8.0, 9.0, 0.0]);
    }

    #[test]
    fn test_bool_uses_four_bytes() {
        assert_eq!(UniformValue::Bool(true).to_slot_bytes(), 1u32.to_ne_bytes().to_vec());
    }

    #[cfg(not(feature = "error-callback"))]
    #[test]
    fn test_check_gpu_error_drains_queue() {
        let gpu = RecordingBackend::new();
        assert!(!check_gpu_error(&gpu, "idle"));

        gpu.inject_error(GpuError::InvalidOperation("boom".into()));
        gpu.inject_error(GpuError::OutOfMemory("vram".into()));
        assert!(check_gpu_error(&gpu, "after inject"));
        assert!(gpu.take_error().is_none());
    }
}
