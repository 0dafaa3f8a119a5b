//! Headless backend that records every device call.
//!
//! Buffers and textures live in CPU memory, so uploads can be read back and
//! compared. Handles and sizes are validated the way a driver would, with
//! violations pushed onto the error queue instead of panicking.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use super::{
    BufferHandle, BufferKind, ClearFlags, GraphicsBackend, ProgramHandle, RenderTargetHandle,
    TextureDesc, TextureHandle, UniformLocation, UniformValue, VertexArrayHandle,
};
use crate::error::{GpuError, ShaderStage};
use crate::gfx::math::floats_from_bytes;
use crate::gfx::resources::layout::VertexBufferLayout;
use crate::gfx::resources::shader::ShaderParams;
use crate::gfx::scene::renderable::DrawMode;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateBuffer { buffer: BufferHandle, kind: BufferKind, capacity: usize },
    ReallocateBuffer { buffer: BufferHandle, capacity: usize },
    WriteBuffer { buffer: BufferHandle, offset: usize, len: usize },
    CopyBuffer { src: BufferHandle, dst: BufferHandle, len: usize },
    ReadBuffer { buffer: BufferHandle, offset: usize, len: usize },
    DestroyBuffer(BufferHandle),
    BindUniformBuffer { buffer: BufferHandle, binding: u32 },
    UnbindUniformBuffer { binding: u32 },
    CreateVertexArray(VertexArrayHandle),
    AttachVertexBuffer {
        array: VertexArrayHandle,
        buffer: BufferHandle,
        first_attribute: u32,
        instanced: bool,
    },
    AttachIndexBuffer { array: VertexArrayHandle, buffer: BufferHandle },
    BindVertexArray(Option<VertexArrayHandle>),
    DestroyVertexArray(VertexArrayHandle),
    CreateProgram(ProgramHandle),
    BindProgram(Option<ProgramHandle>),
    LookupUniform { program: ProgramHandle, name: String },
    SetUniform {
        program: Option<ProgramHandle>,
        name: Option<String>,
        value: UniformValue,
    },
    DestroyProgram(ProgramHandle),
    CreateTexture { texture: TextureHandle, width: u32, height: u32 },
    WriteTexture { texture: TextureHandle, origin: [u32; 2], size: [u32; 2] },
    ReadTexture(TextureHandle),
    BindTexture { slot: u32, texture: Option<TextureHandle> },
    DestroyTexture(TextureHandle),
    CreateRenderTarget { target: RenderTargetHandle, width: u32, height: u32 },
    BindRenderTarget(Option<RenderTargetHandle>),
    DestroyRenderTarget(RenderTargetHandle),
    Clear { flags: ClearFlags, color: [f32; 4] },
    SetViewport { x: u32, y: u32, width: u32, height: u32 },
    DrawArrays { mode: DrawMode, first: u32, count: u32 },
    DrawIndexed { mode: DrawMode, count: u32 },
    Resize { width: u32, height: u32 },
    Present,
}

#[derive(Debug)]
struct BufferRecord {
    kind: BufferKind,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct VertexArrayRecord {
    vertex_buffers: Vec<BufferHandle>,
    index_buffer: Option<BufferHandle>,
}

#[derive(Debug)]
struct ProgramRecord {
    uniforms: Vec<String>,
    linked: bool,
}

#[derive(Debug)]
struct TextureRecord {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

#[derive(Debug)]
struct RenderTargetRecord {
    color: TextureHandle,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<GpuCall>,
    errors: VecDeque<GpuError>,
    next_id: u32,
    buffers: HashMap<BufferHandle, BufferRecord>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArrayRecord>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    textures: HashMap<TextureHandle, TextureRecord>,
    render_targets: HashMap<RenderTargetHandle, RenderTargetRecord>,
    uniform_bindings: HashMap<u32, BufferHandle>,
    texture_slots: HashMap<u32, TextureHandle>,
    bound_program: Option<ProgramHandle>,
    bound_vertex_array: Option<VertexArrayHandle>,
    bound_render_target: Option<RenderTargetHandle>,
    surface_size: (u32, u32),
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    #[cfg(not(feature = "error-callback"))]
    fn fail(&mut self, err: GpuError) {
        log::trace!("recording backend error: {}", err);
        self.errors.push_back(err);
    }

    #[cfg(feature = "error-callback")]
    fn fail(&mut self, err: GpuError) {
        log::error!("[recording] {}", err);
    }
}

/// Backend that keeps everything in memory and logs each call.
///
/// ```
/// use thistle::gfx::backend::{BufferKind, GpuCall, GraphicsBackend, RecordingBackend};
///
/// let gpu = RecordingBackend::new();
/// let buffer = gpu.create_buffer(BufferKind::Vertex, 16);
/// gpu.write_buffer(buffer, 0, &[1, 2, 3, 4]);
///
/// assert_eq!(gpu.buffer_data(buffer).unwrap()[..4], [1, 2, 3, 4]);
/// assert_eq!(gpu.count(|c| matches!(c, GpuCall::WriteBuffer { .. })), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingBackend {
    state: RefCell<State>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.state.borrow_mut().surface_size = (800, 600);
        backend
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<GpuCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Number of logged calls matching `predicate`.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&GpuCall) -> bool,
    {
        self.state.borrow().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Queues an error as if the device had reported it.
    pub fn inject_error(&self, err: GpuError) {
        self.state.borrow_mut().errors.push_back(err);
    }

    /// Current contents of a buffer without logging a read.
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.data.clone())
    }

    /// Buffer contents decoded as `f32`s.
    pub fn buffer_floats(&self, buffer: BufferHandle) -> Option<Vec<f32>> {
        self.buffer_data(buffer).map(|bytes| floats_from_bytes(&bytes))
    }

    pub fn buffer_kind(&self, buffer: BufferHandle) -> Option<BufferKind> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.kind)
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn bound_program(&self) -> Option<ProgramHandle> {
        self.state.borrow().bound_program
    }

    pub fn bound_vertex_array(&self) -> Option<VertexArrayHandle> {
        self.state.borrow().bound_vertex_array
    }

    pub fn bound_uniform_buffer(&self, binding: u32) -> Option<BufferHandle> {
        self.state.borrow().uniform_bindings.get(&binding).copied()
    }

    pub fn bound_render_target(&self) -> Option<RenderTargetHandle> {
        self.state.borrow().bound_render_target
    }

    pub fn bound_texture(&self, slot: u32) -> Option<TextureHandle> {
        self.state.borrow().texture_slots.get(&slot).copied()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.state.borrow().surface_size
    }

    fn record(&self, call: GpuCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl GraphicsBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn create_buffer(&self, kind: BufferKind, capacity: usize) -> BufferHandle {
        let mut state = self.state.borrow_mut();
        let buffer = BufferHandle(state.next_id());
        state.buffers.insert(
            buffer,
            BufferRecord {
                kind,
                data: vec![0; capacity],
            },
        );
        state.calls.push(GpuCall::CreateBuffer {
            buffer,
            kind,
            capacity,
        });
        buffer
    }

    fn reallocate_buffer(&self, buffer: BufferHandle, capacity: usize) {
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(GpuCall::ReallocateBuffer { buffer, capacity });
        match state.buffers.get_mut(&buffer) {
            Some(record) => record.data = vec![0; capacity],
            None => state.fail(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            }),
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: usize, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        let Some(record) = state.buffers.get_mut(&buffer) else {
            state.fail(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
            return;
        };
        let capacity = record.data.len();
        let end = match offset.checked_add(data.len()) {
            Some(end) if end <= capacity => end,
            _ => {
                state.fail(GpuError::InvalidOperation(format!(
                    "write of {} bytes at {} overflows buffer {} of {} bytes",
                    data.len(),
                    offset,
                    buffer.0,
                    capacity
                )));
                return;
            }
        };
        record.data[offset..end].copy_from_slice(data);
    }

    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, len: usize) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::CopyBuffer { src, dst, len });
        let source = match state.buffers.get(&src) {
            Some(record) if record.data.len() >= len => record.data[..len].to_vec(),
            Some(_) => {
                state.fail(GpuError::InvalidOperation(format!(
                    "copy of {} bytes reads past buffer {}",
                    len, src.0
                )));
                return;
            }
            None => {
                state.fail(GpuError::InvalidHandle {
                    kind: "buffer",
                    id: src.0,
                });
                return;
            }
        };
        match state.buffers.get_mut(&dst) {
            Some(record) if record.data.len() >= len => record.data[..len].copy_from_slice(&source),
            Some(_) => state.fail(GpuError::InvalidOperation(format!(
                "copy of {} bytes writes past buffer {}",
                len, dst.0
            ))),
            None => state.fail(GpuError::InvalidHandle {
                kind: "buffer",
                id: dst.0,
            }),
        }
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: usize, len: usize) -> Vec<u8> {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::ReadBuffer {
            buffer,
            offset,
            len,
        });
        match state.buffers.get(&buffer) {
            Some(record) => {
                let start = offset.min(record.data.len());
                let end = (offset + len).min(record.data.len());
                record.data[start..end].to_vec()
            }
            None => {
                state.fail(GpuError::InvalidHandle {
                    kind: "buffer",
                    id: buffer.0,
                });
                Vec::new()
            }
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DestroyBuffer(buffer));
        if state.buffers.remove(&buffer).is_none() {
            state.fail(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
        }
        state.uniform_bindings.retain(|_, b| *b != buffer);
    }

    fn bind_uniform_buffer(&self, buffer: BufferHandle, binding: u32) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::BindUniformBuffer { buffer, binding });
        match state.buffers.get(&buffer).map(|b| b.kind) {
            Some(BufferKind::Uniform) => {
                state.uniform_bindings.insert(binding, buffer);
            }
            Some(kind) => state.fail(GpuError::InvalidOperation(format!(
                "buffer {} of kind {:?} bound as uniform block",
                buffer.0, kind
            ))),
            None => state.fail(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            }),
        }
    }

    fn unbind_uniform_buffer(&self, binding: u32) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::UnbindUniformBuffer { binding });
        state.uniform_bindings.remove(&binding);
    }

    fn create_vertex_array(&self) -> VertexArrayHandle {
        let mut state = self.state.borrow_mut();
        let array = VertexArrayHandle(state.next_id());
        state.vertex_arrays.insert(array, VertexArrayRecord::default());
        state.calls.push(GpuCall::CreateVertexArray(array));
        array
    }

    fn attach_vertex_buffer(
        &self,
        array: VertexArrayHandle,
        buffer: BufferHandle,
        layout: &VertexBufferLayout,
        first_attribute: u32,
        instanced: bool,
    ) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::AttachVertexBuffer {
            array,
            buffer,
            first_attribute,
            instanced,
        });
        if layout.is_empty() {
            state.fail(GpuError::InvalidOperation(format!(
                "vertex buffer {} attached without a layout",
                buffer.0
            )));
            return;
        }
        if !state.buffers.contains_key(&buffer) {
            state.fail(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
            return;
        }
        match state.vertex_arrays.get_mut(&array) {
            Some(record) => record.vertex_buffers.push(buffer),
            None => state.fail(GpuError::InvalidHandle {
                kind: "vertex array",
                id: array.0,
            }),
        }
    }

    fn attach_index_buffer(&self, array: VertexArrayHandle, buffer: BufferHandle) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::AttachIndexBuffer { array, buffer });
        match state.vertex_arrays.get_mut(&array) {
            Some(record) => record.index_buffer = Some(buffer),
            None => state.fail(GpuError::InvalidHandle {
                kind: "vertex array",
                id: array.0,
            }),
        }
    }

    fn bind_vertex_array(&self, array: Option<VertexArrayHandle>) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::BindVertexArray(array));
        if let Some(handle) = array {
            if !state.vertex_arrays.contains_key(&handle) {
                state.fail(GpuError::InvalidHandle {
                    kind: "vertex array",
                    id: handle.0,
                });
                return;
            }
        }
        state.bound_vertex_array = array;
    }

    fn destroy_vertex_array(&self, array: VertexArrayHandle) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DestroyVertexArray(array));
        state.vertex_arrays.remove(&array);
        if state.bound_vertex_array == Some(array) {
            state.bound_vertex_array = None;
        }
    }

    fn create_program(&self, params: &ShaderParams) -> ProgramHandle {
        let mut state = self.state.borrow_mut();
        let program = ProgramHandle(state.next_id());
        state.calls.push(GpuCall::CreateProgram(program));

        let mut linked = true;
        if params.vertex_source().trim().is_empty() {
            state.fail(GpuError::ShaderCompile {
                stage: ShaderStage::Vertex,
                message: "empty source".into(),
            });
            linked = false;
        }
        if params.fragment_source().trim().is_empty() {
            state.fail(GpuError::ShaderCompile {
                stage: ShaderStage::Fragment,
                message: "empty source".into(),
            });
            linked = false;
        }
        if !linked {
            state.fail(GpuError::ProgramLink(format!(
                "program {} has failed stages",
                program.0
            )));
        }

        let uniforms = if linked {
            params.uniforms().to_vec()
        } else {
            Vec::new()
        };
        state
            .programs
            .insert(program, ProgramRecord { uniforms, linked });
        program
    }

    fn program_linked(&self, program: ProgramHandle) -> bool {
        self.state
            .borrow()
            .programs
            .get(&program)
            .is_some_and(|p| p.linked)
    }

    fn bind_program(&self, program: Option<ProgramHandle>) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::BindProgram(program));
        if let Some(handle) = program {
            if !state.programs.contains_key(&handle) {
                state.fail(GpuError::InvalidHandle {
                    kind: "program",
                    id: handle.0,
                });
                return;
            }
        }
        state.bound_program = program;
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::LookupUniform {
            program,
            name: name.to_owned(),
        });
        state
            .programs
            .get(&program)?
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&self, location: UniformLocation, value: UniformValue) {
        let mut state = self.state.borrow_mut();
        let program = state.bound_program;
        let name = program
            .and_then(|p| state.programs.get(&p))
            .and_then(|p| p.uniforms.get(location.0 as usize))
            .cloned();
        state.calls.push(GpuCall::SetUniform {
            program,
            name: name.clone(),
            value,
        });
        if program.is_none() {
            state.fail(GpuError::InvalidOperation(
                "uniform upload with no program bound".into(),
            ));
        } else if name.is_none() {
            state.fail(GpuError::InvalidOperation(format!(
                "uniform location {} is not active",
                location.0
            )));
        }
    }

    fn destroy_program(&self, program: ProgramHandle) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DestroyProgram(program));
        state.programs.remove(&program);
        if state.bound_program == Some(program) {
            state.bound_program = None;
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> TextureHandle {
        let mut state = self.state.borrow_mut();
        let texture = TextureHandle(state.next_id());
        state.calls.push(GpuCall::CreateTexture {
            texture,
            width: desc.width,
            height: desc.height,
        });
        state.textures.insert(
            texture,
            TextureRecord {
                width: desc.width,
                height: desc.height,
                pixels: vec![0; (desc.width * desc.height * 4) as usize],
            },
        );
        texture
    }

    fn write_texture(&self, texture: TextureHandle, origin: [u32; 2], size: [u32; 2], rgba: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::WriteTexture {
            texture,
            origin,
            size,
        });
        let Some(record) = state.textures.get_mut(&texture) else {
            state.fail(GpuError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            });
            return;
        };
        let fits = origin[0] + size[0] <= record.width && origin[1] + size[1] <= record.height;
        if !fits || rgba.len() < (size[0] * size[1] * 4) as usize {
            state.fail(GpuError::InvalidOperation(format!(
                "texture write {:?}+{:?} out of range",
                origin, size
            )));
            return;
        }
        let row_bytes = (size[0] * 4) as usize;
        for row in 0..size[1] {
            let src = (row as usize) * row_bytes;
            let dst = (((origin[1] + row) * record.width + origin[0]) * 4) as usize;
            record.pixels[dst..dst + row_bytes].copy_from_slice(&rgba[src..src + row_bytes]);
        }
    }

    fn read_texture(&self, texture: TextureHandle) -> Vec<u8> {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::ReadTexture(texture));
        match state.textures.get(&texture) {
            Some(record) => record.pixels.clone(),
            None => {
                state.fail(GpuError::InvalidHandle {
                    kind: "texture",
                    id: texture.0,
                });
                Vec::new()
            }
        }
    }

    fn bind_texture(&self, slot: u32, texture: Option<TextureHandle>) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::BindTexture { slot, texture });
        match texture {
            Some(handle) if !state.textures.contains_key(&handle) => {
                state.fail(GpuError::InvalidHandle {
                    kind: "texture",
                    id: handle.0,
                });
            }
            Some(handle) => {
                state.texture_slots.insert(slot, handle);
            }
            None => {
                state.texture_slots.remove(&slot);
            }
        }
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DestroyTexture(texture));
        state.textures.remove(&texture);
        state.texture_slots.retain(|_, t| *t != texture);
    }

    fn create_render_target(&self, width: u32, height: u32) -> RenderTargetHandle {
        let mut state = self.state.borrow_mut();
        let target = RenderTargetHandle(state.next_id());
        state.calls.push(GpuCall::CreateRenderTarget {
            target,
            width,
            height,
        });
        if width == 0 || height == 0 {
            state.fail(GpuError::IncompleteFramebuffer(format!(
                "render target {} has a zero-sized attachment",
                target.0
            )));
        }
        let color = TextureHandle(state.next_id());
        state.textures.insert(
            color,
            TextureRecord {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
            },
        );
        state
            .render_targets
            .insert(target, RenderTargetRecord { color });
        target
    }

    fn render_target_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle> {
        self.state
            .borrow()
            .render_targets
            .get(&target)
            .map(|t| t.color)
    }

    fn bind_render_target(&self, target: Option<RenderTargetHandle>) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::BindRenderTarget(target));
        if let Some(handle) = target {
            if !state.render_targets.contains_key(&handle) {
                state.fail(GpuError::InvalidHandle {
                    kind: "render target",
                    id: handle.0,
                });
                return;
            }
        }
        state.bound_render_target = target;
    }

    fn destroy_render_target(&self, target: RenderTargetHandle) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DestroyRenderTarget(target));
        if let Some(record) = state.render_targets.remove(&target) {
            state.textures.remove(&record.color);
        }
        if state.bound_render_target == Some(target) {
            state.bound_render_target = None;
        }
    }

    fn clear(&self, flags: ClearFlags, color: [f32; 4]) {
        self.record(GpuCall::Clear { flags, color });
    }

    fn set_viewport(&self, x: u32, y: u32, width: u32, height: u32) {
        self.record(GpuCall::SetViewport {
            x,
            y,
            width,
            height,
        });
    }

    fn draw_arrays(&self, mode: DrawMode, first: u32, count: u32) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DrawArrays { mode, first, count });
        if state.bound_program.is_none() || state.bound_vertex_array.is_none() {
            state.fail(GpuError::InvalidOperation(
                "draw without a bound program and vertex array".into(),
            ));
        }
    }

    fn draw_indexed(&self, mode: DrawMode, count: u32) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::DrawIndexed { mode, count });
        let has_indices = state
            .bound_vertex_array
            .and_then(|va| state.vertex_arrays.get(&va))
            .is_some_and(|va| va.index_buffer.is_some());
        if state.bound_program.is_none() || !has_indices {
            state.fail(GpuError::InvalidOperation(
                "indexed draw without a program or index buffer".into(),
            ));
        }
    }

    fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        state.calls.push(GpuCall::Resize { width, height });
        state.surface_size = (width.max(1), height.max(1));
    }

    fn present(&self) {
        self.record(GpuCall::Present);
    }

    fn take_error(&self) -> Option<GpuError> {
        self.state.borrow_mut().errors.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_past_end_is_rejected() {
        let gpu = RecordingBackend::new();
        let buffer = gpu.create_buffer(BufferKind::Vertex, 4);
        gpu.write_buffer(buffer, 2, &[9, 9, 9]);

        assert_eq!(gpu.buffer_data(buffer).unwrap(), vec![0, 0, 0, 0]);
        if cfg!(not(feature = "error-callback")) {
            assert!(matches!(gpu.take_error(), Some(GpuError::InvalidOperation(_))));
        }
    }

    #[test]
    fn test_copy_buffer_moves_prefix() {
        let gpu = RecordingBackend::new();
        let a = gpu.create_buffer(BufferKind::Vertex, 4);
        let b = gpu.create_buffer(BufferKind::Vertex, 8);
        gpu.write_buffer(a, 0, &[1, 2, 3, 4]);
        gpu.copy_buffer(a, b, 3);

        assert_eq!(gpu.buffer_data(b).unwrap(), vec![1, 2, 3, 0, 0, 0, 0, 0]);
        assert!(gpu.take_error().is_none());
    }

    #[test]
    fn test_empty_shader_stage_fails_but_program_stays_bindable() {
        let gpu = RecordingBackend::new();
        let params = ShaderParams::new().with_vertex_source("vs").with_uniform("ModelMatrix");
        let program = gpu.create_program(&params);

        assert!(!gpu.program_linked(program));
        if cfg!(not(feature = "error-callback")) {
            assert!(matches!(
                gpu.take_error(),
                Some(GpuError::ShaderCompile {
                    stage: ShaderStage::Fragment,
                    ..
                })
            ));
            assert!(matches!(gpu.take_error(), Some(GpuError::ProgramLink(_))));
        }
        assert!(gpu.take_error().is_none());

        gpu.bind_program(Some(program));
        assert_eq!(gpu.bound_program(), Some(program));
        assert!(gpu.uniform_location(program, "ModelMatrix").is_none());
    }

    #[test]
    fn test_draw_without_state_reports_error() {
        let gpu = RecordingBackend::new();
        gpu.draw_arrays(DrawMode::Triangles, 0, 3);
        assert_eq!(gpu.take_error().is_some(), cfg!(not(feature = "error-callback")));
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DrawArrays { .. })), 1);
    }

    #[test]
    fn test_texture_sub_write() {
        let gpu = RecordingBackend::new();
        let texture = gpu.create_texture(&TextureDesc {
            width: 2,
            height: 2,
            params: Default::default(),
        });
        gpu.write_texture(texture, [1, 1], [1, 1], &[10, 20, 30, 40]);

        let pixels = gpu.read_texture(texture);
        assert_eq!(&pixels[12..16], &[10, 20, 30, 40]);
        assert_eq!(&pixels[0..4], &[0, 0, 0, 0]);
    }
}
