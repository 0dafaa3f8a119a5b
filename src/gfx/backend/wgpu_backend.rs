//! wgpu implementation of [`GraphicsBackend`]
//!
//! The engine issues immediate-mode style calls (bind, upload, draw). wgpu
//! wants complete render passes, so this backend records draws into passes
//! as they arrive and encodes them all in [`GraphicsBackend::present`].
//!
//! Program resource layout, per shader:
//! - group 0: uniform blocks, one binding per declared block binding point
//! - group 1: per-draw uniforms, one 64 byte slot per declared uniform in
//!   declaration order, bound with a dynamic offset into a frame arena
//! - group 2: textures, binding `2 * unit` for the texture and
//!   `2 * unit + 1` for its sampler
//!
//! Shaders are WGSL with entry points `vs_main` and `fs_main`.
//!
//! Buffer writes go through the queue, so a buffer written several times
//! within one frame is seen by every draw of that frame with its last
//! contents. Per-draw uniforms are not affected since each draw snapshots
//! them into the arena.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU64;
use std::sync::{mpsc, Arc, Mutex};

use winit::window::Window;

use super::pipeline_cache::{
    emulated_indices, topology_for, PipelineCache, PipelineKey, ProgramModules,
    VertexLayoutKey, DEPTH_FORMAT, TARGET_FORMAT,
};
use super::{
    BufferHandle, BufferKind, ClearFlags, GraphicsBackend, ProgramHandle, RenderTargetHandle,
    TextureDesc, TextureHandle, UniformLocation, UniformValue, VertexArrayHandle,
};
use crate::error::{EngineError, GpuError, ShaderStage};
use crate::gfx::resources::layout::VertexBufferLayout;
use crate::gfx::resources::shader::ShaderParams;
use crate::gfx::resources::texture::{TextureFilter, TextureParams, TextureWrap};
use crate::gfx::scene::renderable::DrawMode;

/// Size of one per-draw uniform slot.
pub const UNIFORM_SLOT_SIZE: usize = 64;

type ErrorQueue = Arc<Mutex<VecDeque<GpuError>>>;

struct BufferEntry {
    buffer: wgpu::Buffer,
    kind: BufferKind,
    size: u64,
    // Index data is mirrored on the CPU so fans and closed paths can be
    // rebuilt from it.
    shadow: Option<Vec<u8>>,
}

struct AttachedBuffer {
    buffer: BufferHandle,
    layout: VertexLayoutKey,
}

#[derive(Default)]
struct VertexArrayEntry {
    vertex_buffers: Vec<AttachedBuffer>,
    index_buffer: Option<BufferHandle>,
}

struct ProgramEntry {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    groups: [wgpu::BindGroupLayout; 3],
    uniforms: Vec<String>,
    uniform_blocks: Vec<u32>,
    texture_units: Vec<u32>,
    block_size: u64,
    staging: Vec<u8>,
    linked: bool,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
}

struct RenderTargetEntry {
    color: TextureHandle,
    depth_view: wgpu::TextureView,
}

#[derive(Default)]
struct Resources {
    next_id: u32,
    buffers: HashMap<BufferHandle, BufferEntry>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArrayEntry>,
    programs: HashMap<ProgramHandle, ProgramEntry>,
    textures: HashMap<TextureHandle, TextureEntry>,
    render_targets: HashMap<RenderTargetHandle, RenderTargetEntry>,
    block_groups: HashMap<(ProgramHandle, Vec<BufferHandle>), wgpu::BindGroup>,
    texture_groups: HashMap<(ProgramHandle, Vec<Option<TextureHandle>>), wgpu::BindGroup>,
    generated_indices: HashMap<(DrawMode, u32, u32), wgpu::Buffer>,
}

impl Resources {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct BindingState {
    program: Option<ProgramHandle>,
    vertex_array: Option<VertexArrayHandle>,
    uniform_buffers: HashMap<u32, BufferHandle>,
    textures: HashMap<u32, TextureHandle>,
    render_target: Option<RenderTargetHandle>,
    viewport: Option<[f32; 4]>,
}

#[derive(Clone, Copy)]
enum DrawRange {
    Arrays { first: u32, count: u32 },
    Indexed { count: u32 },
}

struct DrawRecord {
    pipeline: wgpu::RenderPipeline,
    program: ProgramHandle,
    draw_group_layout: wgpu::BindGroupLayout,
    block_size: u64,
    uniform_offset: u32,
    block_group: wgpu::BindGroup,
    texture_group: wgpu::BindGroup,
    vertex_buffers: Vec<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    range: DrawRange,
}

struct PassRecord {
    target: Option<RenderTargetHandle>,
    clear_color: Option<wgpu::Color>,
    clear_depth: bool,
    clear_stencil: bool,
    viewport: Option<[f32; 4]>,
    draws: Vec<DrawRecord>,
}

impl PassRecord {
    fn new(target: Option<RenderTargetHandle>, viewport: Option<[f32; 4]>) -> Self {
        Self {
            target,
            clear_color: None,
            clear_depth: false,
            clear_stencil: false,
            viewport,
            draws: Vec::new(),
        }
    }
}

#[derive(Default)]
struct FrameRecording {
    passes: Vec<PassRecord>,
    arena: Vec<u8>,
}

struct SurfaceState {
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
}

/// Backend rendering through wgpu onto a window surface.
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface_state: RefCell<SurfaceState>,
    errors: ErrorQueue,
    resources: RefCell<Resources>,
    bindings: RefCell<BindingState>,
    frame: RefCell<FrameRecording>,
    pipelines: RefCell<PipelineCache>,
    arena: RefCell<Option<wgpu::Buffer>>,
    fallback_texture: TextureEntry,
    offset_alignment: u64,
}

impl WgpuBackend {
    /// Creates the device and configures the window surface
    ///
    /// # Arguments
    /// * `window` - Window to present into
    /// * `width` - Initial surface width in pixels
    /// * `height` - Initial surface height in pixels
    /// * `vsync` - Present with `Fifo` when true, `AutoNoVsync` otherwise
    ///
    /// # Errors
    /// [`EngineError::Context`] when no surface, adapter or device can be created.
    pub async fn new(
        window: Arc<Window>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self, EngineError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| EngineError::Context(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| EngineError::Context(format!("adapter: {e}")))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("thistle device"),
                required_features: wgpu::Features::default(),
                required_limits: wgpu::Limits {
                    max_texture_dimension_2d: 4096,
                    ..wgpu::Limits::downlevel_defaults()
                },
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| EngineError::Context(format!("device: {e}")))?;

        let errors: ErrorQueue = Arc::new(Mutex::new(VecDeque::new()));
        install_error_handler(&device, errors.clone());

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| EngineError::Context("surface reports no formats".into()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let device = Arc::new(device);
        let queue = Arc::new(queue);
        let depth_view = create_depth_view(&device, config.width, config.height);
        let fallback_texture = create_texture_entry(
            &device,
            1,
            1,
            &TextureParams::default(),
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            "fallback texture",
        );
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback_texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let offset_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        log::info!(
            "wgpu backend ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            format,
            config.width,
            config.height
        );

        Ok(Self {
            surface,
            pipelines: RefCell::new(PipelineCache::new(device.clone())),
            device,
            queue,
            surface_state: RefCell::new(SurfaceState { config, depth_view }),
            errors,
            resources: RefCell::new(Resources::default()),
            bindings: RefCell::new(BindingState::default()),
            frame: RefCell::new(FrameRecording::default()),
            arena: RefCell::new(None),
            fallback_texture,
            offset_alignment,
        })
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_state.borrow().config.format
    }

    /// Number of pipelines built so far.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.borrow().len()
    }

    fn push_error(&self, err: GpuError) {
        report(&self.errors, err);
    }

    fn align(&self, size: u64) -> u64 {
        size.div_ceil(self.offset_alignment) * self.offset_alignment
    }

    /// Runs `f` inside a validation scope and returns the scope's error, if any.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let err = pollster::block_on(self.device.pop_error_scope());
        (value, err)
    }

    fn compile_stage(&self, label: &str, stage: ShaderStage, source: &str) -> (wgpu::ShaderModule, bool) {
        let (module, err) = self.scoped(|| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        match err {
            Some(err) => {
                self.push_error(GpuError::ShaderCompile {
                    stage,
                    message: err.to_string(),
                });
                (module, false)
            }
            None if source.trim().is_empty() => {
                self.push_error(GpuError::ShaderCompile {
                    stage,
                    message: "empty source".into(),
                });
                (module, false)
            }
            None => (module, true),
        }
    }

    fn current_pass<'a>(&self, frame: &'a mut FrameRecording) -> &'a mut PassRecord {
        let bindings = self.bindings.borrow();
        let reuse = frame
            .passes
            .last()
            .is_some_and(|p| p.target == bindings.render_target);
        if !reuse {
            frame
                .passes
                .push(PassRecord::new(bindings.render_target, bindings.viewport));
        }
        let last = frame.passes.len() - 1;
        &mut frame.passes[last]
    }

    fn target_format(&self, target: Option<RenderTargetHandle>) -> wgpu::TextureFormat {
        match target {
            Some(_) => TARGET_FORMAT,
            None => self.surface_state.borrow().config.format,
        }
    }

    fn record_draw(&self, mode: DrawMode, range: DrawRange) {
        let bindings = self.bindings.borrow();
        let (Some(program), Some(array)) = (bindings.program, bindings.vertex_array) else {
            self.push_error(GpuError::InvalidOperation(
                "draw without a bound program and vertex array".into(),
            ));
            return;
        };

        let mut guard = self.resources.borrow_mut();
        let resources = &mut *guard;
        let Some(entry) = resources.programs.get(&program) else {
            self.push_error(GpuError::InvalidHandle {
                kind: "program",
                id: program.0,
            });
            return;
        };
        if !entry.linked {
            log::trace!("skipping draw with unlinked program {}", program.0);
            return;
        }

        let Some(va) = resources.vertex_arrays.get(&array) else {
            self.push_error(GpuError::InvalidHandle {
                kind: "vertex array",
                id: array.0,
            });
            return;
        };

        let mut vertex_buffers = Vec::with_capacity(va.vertex_buffers.len());
        let mut layouts = Vec::with_capacity(va.vertex_buffers.len());
        for attached in &va.vertex_buffers {
            let Some(buffer) = resources.buffers.get(&attached.buffer) else {
                self.push_error(GpuError::InvalidHandle {
                    kind: "buffer",
                    id: attached.buffer.0,
                });
                return;
            };
            vertex_buffers.push(buffer.buffer.clone());
            layouts.push(attached.layout.clone());
        }

        // Resolve the index source and the final range.
        let index_handle = va.index_buffer;
        let (index_buffer, range) = match (emulates(mode), range) {
            (true, DrawRange::Arrays { first, count }) => {
                let key = (mode, first, count);
                let buffer = match resources.generated_indices.get(&key) {
                    Some(buffer) => buffer.clone(),
                    None => {
                        let sequence: Vec<u32> = (first..first + count).collect();
                        let indices = emulated_indices(mode, &sequence).unwrap_or(sequence);
                        let buffer = self.index_buffer_from(&indices);
                        resources.generated_indices.insert(key, buffer.clone());
                        buffer
                    }
                };
                let count = emulated_len(mode, count);
                (Some(buffer), DrawRange::Indexed { count })
            }
            (true, DrawRange::Indexed { count }) => {
                let Some(source) = index_handle.and_then(|h| resources.buffers.get(&h)) else {
                    self.push_error(GpuError::InvalidOperation(
                        "indexed draw without an index buffer".into(),
                    ));
                    return;
                };
                let shadow = source.shadow.as_deref().unwrap_or(&[]);
                let sequence: Vec<u32> = shadow
                    .chunks_exact(4)
                    .take(count as usize)
                    .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let indices = emulated_indices(mode, &sequence).unwrap_or(sequence);
                let len = indices.len() as u32;
                (Some(self.index_buffer_from(&indices)), DrawRange::Indexed { count: len })
            }
            (false, DrawRange::Indexed { count }) => {
                let Some(source) = index_handle.and_then(|h| resources.buffers.get(&h)) else {
                    self.push_error(GpuError::InvalidOperation(
                        "indexed draw without an index buffer".into(),
                    ));
                    return;
                };
                (Some(source.buffer.clone()), DrawRange::Indexed { count })
            }
            (false, arrays) => (None, arrays),
        };

        let key = PipelineKey {
            program,
            topology: topology_for(mode),
            strip_indexed: index_buffer.is_some(),
            vertex_layouts: layouts,
            color_format: self.target_format(bindings.render_target),
        };

        let Some(entry) = resources.programs.get(&program) else {
            return;
        };
        let pipeline = {
            let modules = ProgramModules {
                label: &entry.label,
                vertex: &entry.vertex,
                fragment: &entry.fragment,
                layout: &entry.layout,
            };
            self.pipelines.borrow_mut().get_or_create(&key, &modules)
        };
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(message) => {
                self.push_error(GpuError::Validation(message));
                return;
            }
        };

        let Some(block_group) = self.block_group(resources, program, &bindings) else {
            return;
        };
        let Some(texture_group) = self.texture_group(resources, program, &bindings) else {
            return;
        };

        let Some(entry) = resources.programs.get(&program) else {
            return;
        };
        let draw_group_layout = entry.groups[1].clone();
        let block_size = entry.block_size;

        let mut frame = self.frame.borrow_mut();
        let uniform_offset = frame.arena.len() as u32;
        frame.arena.extend_from_slice(&entry.staging);
        drop(bindings);
        self.current_pass(&mut frame).draws.push(DrawRecord {
            pipeline,
            program,
            draw_group_layout,
            block_size,
            uniform_offset,
            block_group,
            texture_group,
            vertex_buffers,
            index_buffer,
            range,
        });
    }

    fn index_buffer_from(&self, indices: &[u32]) -> wgpu::Buffer {
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("generated indices"),
            size: align4(bytes.len() as u64).max(4),
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !bytes.is_empty() {
            self.queue.write_buffer(&buffer, 0, bytes);
        }
        buffer
    }

    fn block_group(
        &self,
        resources: &mut Resources,
        program: ProgramHandle,
        bindings: &BindingState,
    ) -> Option<wgpu::BindGroup> {
        let entry = resources.programs.get(&program)?;
        let mut handles = Vec::with_capacity(entry.uniform_blocks.len());
        for binding in &entry.uniform_blocks {
            match bindings.uniform_buffers.get(binding) {
                Some(handle) => handles.push(*handle),
                None => {
                    self.push_error(GpuError::InvalidOperation(format!(
                        "program {} expects a uniform block at binding {}",
                        program.0, binding
                    )));
                    return None;
                }
            }
        }

        let key = (program, handles);
        if let Some(group) = resources.block_groups.get(&key) {
            return Some(group.clone());
        }

        let mut entries = Vec::with_capacity(key.1.len());
        for (binding, handle) in entry.uniform_blocks.iter().zip(&key.1) {
            let buffer = resources.buffers.get(handle)?;
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.buffer.as_entire_binding(),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform blocks"),
            layout: &entry.groups[0],
            entries: &entries,
        });
        resources.block_groups.insert(key, group.clone());
        Some(group)
    }

    fn texture_group(
        &self,
        resources: &mut Resources,
        program: ProgramHandle,
        bindings: &BindingState,
    ) -> Option<wgpu::BindGroup> {
        let entry = resources.programs.get(&program)?;
        let layout = entry.groups[2].clone();
        let units = entry.texture_units.clone();
        let bound: Vec<Option<TextureHandle>> = units
            .iter()
            .map(|unit| {
                bindings
                    .textures
                    .get(unit)
                    .copied()
                    .filter(|h| resources.textures.contains_key(h))
            })
            .collect();

        let key = (program, bound);
        if let Some(group) = resources.texture_groups.get(&key) {
            return Some(group.clone());
        }

        // Empty slots sample a 1x1 white texture.
        let mut entries = Vec::with_capacity(units.len() * 2);
        for (unit, handle) in units.iter().zip(&key.1) {
            let texture = handle
                .and_then(|h| resources.textures.get(&h))
                .unwrap_or(&self.fallback_texture);
            entries.push(wgpu::BindGroupEntry {
                binding: unit * 2,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: unit * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("textures"),
            layout: &layout,
            entries: &entries,
        });
        resources.texture_groups.insert(key, group.clone());
        Some(group)
    }

    fn reconfigure(&self) {
        let state = self.surface_state.borrow();
        self.surface.configure(&self.device, &state.config);
    }

    fn ensure_arena(&self, size: u64) -> wgpu::Buffer {
        let mut arena = self.arena.borrow_mut();
        if let Some(buffer) = arena.as_ref() {
            if buffer.size() >= size {
                return buffer.clone();
            }
        }
        let capacity = size.next_power_of_two().max(self.offset_alignment * 16);
        log::debug!("growing per-draw uniform arena to {} bytes", capacity);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("per-draw uniforms"),
            size: capacity,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        *arena = Some(buffer.clone());
        buffer
    }

    fn read_back(&self, encode: impl FnOnce(&mut wgpu::CommandEncoder, &wgpu::Buffer), size: u64) -> Option<Vec<u8>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("read back"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read back"),
            });
        encode(&mut encoder, &staging);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        if let Err(err) = self.device.poll(wgpu::PollType::Wait) {
            self.push_error(GpuError::Validation(format!("poll failed: {err}")));
            return None;
        }
        match rx.recv() {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range().to_vec();
                staging.unmap();
                Some(data)
            }
            Ok(Err(err)) => {
                self.push_error(GpuError::Validation(format!("map failed: {err}")));
                None
            }
            Err(_) => None,
        }
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassRecord,
        surface_view: Option<&wgpu::TextureView>,
        arena: &wgpu::Buffer,
        draw_groups: &mut HashMap<ProgramHandle, wgpu::BindGroup>,
    ) {
        let resources = self.resources.borrow();
        let surface_state = self.surface_state.borrow();
        let (color_view, depth_view) = match pass.target {
            Some(handle) => {
                let Some(target) = resources.render_targets.get(&handle) else {
                    return;
                };
                let Some(color) = resources.textures.get(&target.color) else {
                    return;
                };
                (&color.view, &target.depth_view)
            }
            None => match surface_view {
                Some(view) => (view, &surface_state.depth_view),
                None => return,
            },
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("thistle pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: match pass.clear_color {
                        Some(color) => wgpu::LoadOp::Clear(color),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: if pass.clear_depth {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if pass.clear_stencil {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some([x, y, w, h]) = pass.viewport {
            render_pass.set_viewport(x, y, w, h, 0.0, 1.0);
        }

        for draw in &pass.draws {
            let draw_group = draw_groups.entry(draw.program).or_insert_with(|| {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("per-draw uniforms"),
                    layout: &draw.draw_group_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: arena,
                            offset: 0,
                            size: NonZeroU64::new(draw.block_size),
                        }),
                    }],
                })
            });

            render_pass.set_pipeline(&draw.pipeline);
            render_pass.set_bind_group(0, &draw.block_group, &[]);
            render_pass.set_bind_group(1, &*draw_group, &[draw.uniform_offset]);
            render_pass.set_bind_group(2, &draw.texture_group, &[]);
            for (slot, buffer) in draw.vertex_buffers.iter().enumerate() {
                render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            match (draw.range, &draw.index_buffer) {
                (DrawRange::Indexed { count }, Some(indices)) => {
                    render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..count, 0, 0..1);
                }
                (DrawRange::Arrays { first, count }, _) => {
                    render_pass.draw(first..first + count, 0..1);
                }
                (DrawRange::Indexed { .. }, None) => {}
            }
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&self, kind: BufferKind, capacity: usize) -> BufferHandle {
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;
        let size = align4(capacity as u64).max(16);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match kind {
                BufferKind::Vertex => "vertex buffer",
                BufferKind::Index => "index buffer",
                BufferKind::Uniform => "uniform buffer",
            }),
            size,
            usage,
            mapped_at_creation: false,
        });

        let mut resources = self.resources.borrow_mut();
        let handle = BufferHandle(resources.next_id());
        resources.buffers.insert(
            handle,
            BufferEntry {
                buffer,
                kind,
                size,
                shadow: (kind == BufferKind::Index).then(|| vec![0; size as usize]),
            },
        );
        handle
    }

    fn reallocate_buffer(&self, buffer: BufferHandle, capacity: usize) {
        let mut guard = self.resources.borrow_mut();
        let resources = &mut *guard;
        let Some(entry) = resources.buffers.get_mut(&buffer) else {
            self.push_error(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
            return;
        };
        let size = align4(capacity as u64).max(16);
        entry.buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reallocated buffer"),
            size,
            usage: entry.buffer.usage(),
            mapped_at_creation: false,
        });
        entry.size = size;
        if let Some(shadow) = entry.shadow.as_mut() {
            *shadow = vec![0; size as usize];
        }
        resources
            .block_groups
            .retain(|(_, handles), _| !handles.contains(&buffer));
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: usize, data: &[u8]) {
        let mut resources = self.resources.borrow_mut();
        let Some(entry) = resources.buffers.get_mut(&buffer) else {
            self.push_error(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
            return;
        };
        let in_bounds = offset
            .checked_add(data.len())
            .is_some_and(|end| end as u64 <= entry.size);
        if !in_bounds || offset % 4 != 0 {
            self.push_error(GpuError::InvalidOperation(format!(
                "write of {} bytes at {} into buffer {} of {} bytes",
                data.len(),
                offset,
                buffer.0,
                entry.size
            )));
            return;
        }
        if let Some(shadow) = entry.shadow.as_mut() {
            shadow[offset..offset + data.len()].copy_from_slice(data);
        }
        if data.is_empty() {
            return;
        }
        // Queue writes must be a multiple of four bytes.
        if data.len() % 4 == 0 {
            self.queue.write_buffer(&entry.buffer, offset as u64, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align4(data.len() as u64) as usize, 0);
            self.queue.write_buffer(&entry.buffer, offset as u64, &padded);
        }
    }

    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, len: usize) {
        let mut resources = self.resources.borrow_mut();
        let (Some(source), Some(target)) = (resources.buffers.get(&src), resources.buffers.get(&dst))
        else {
            self.push_error(GpuError::InvalidHandle {
                kind: "buffer",
                id: if resources.buffers.contains_key(&src) { dst.0 } else { src.0 },
            });
            return;
        };
        let copy_len = align4(len as u64).min(source.size).min(target.size);
        if copy_len > 0 {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("buffer copy"),
                });
            encoder.copy_buffer_to_buffer(&source.buffer, 0, &target.buffer, 0, copy_len);
            self.queue.submit(Some(encoder.finish()));
        }

        let copied = source.shadow.as_ref().map(|s| s[..len.min(s.len())].to_vec());
        if let (Some(copied), Some(target)) = (copied, resources.buffers.get_mut(&dst)) {
            if let Some(shadow) = target.shadow.as_mut() {
                let n = copied.len().min(shadow.len());
                shadow[..n].copy_from_slice(&copied[..n]);
            }
        }
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: usize, len: usize) -> Vec<u8> {
        let source = {
            let resources = self.resources.borrow();
            match resources.buffers.get(&buffer) {
                Some(entry) => (entry.buffer.clone(), entry.size),
                None => {
                    self.push_error(GpuError::InvalidHandle {
                        kind: "buffer",
                        id: buffer.0,
                    });
                    return Vec::new();
                }
            }
        };
        let (gpu_buffer, size) = source;
        let start = (offset as u64).min(size) & !3;
        let end = align4((offset + len) as u64).min(size);
        if end <= start {
            return Vec::new();
        }
        let data = self.read_back(
            |encoder, staging| encoder.copy_buffer_to_buffer(&gpu_buffer, start, staging, 0, end - start),
            end - start,
        );
        let Some(data) = data else {
            return Vec::new();
        };
        let skip = offset - start as usize;
        let take = len.min(data.len().saturating_sub(skip));
        data[skip..skip + take].to_vec()
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut resources = self.resources.borrow_mut();
        // Dropping rather than destroying keeps draws recorded earlier in
        // the frame valid until they are submitted.
        if resources.buffers.remove(&buffer).is_none() {
            self.push_error(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
        }
        resources.block_groups.retain(|(_, handles), _| !handles.contains(&buffer));
        self.bindings
            .borrow_mut()
            .uniform_buffers
            .retain(|_, b| *b != buffer);
    }

    fn bind_uniform_buffer(&self, buffer: BufferHandle, binding: u32) {
        let kind = self.resources.borrow().buffers.get(&buffer).map(|b| b.kind);
        match kind {
            Some(BufferKind::Uniform) => {
                self.bindings
                    .borrow_mut()
                    .uniform_buffers
                    .insert(binding, buffer);
            }
            Some(kind) => self.push_error(GpuError::InvalidOperation(format!(
                "buffer {} of kind {:?} bound as uniform block",
                buffer.0, kind
            ))),
            None => self.push_error(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            }),
        }
    }

    fn unbind_uniform_buffer(&self, binding: u32) {
        self.bindings.borrow_mut().uniform_buffers.remove(&binding);
    }

    fn create_vertex_array(&self) -> VertexArrayHandle {
        let mut resources = self.resources.borrow_mut();
        let handle = VertexArrayHandle(resources.next_id());
        resources
            .vertex_arrays
            .insert(handle, VertexArrayEntry::default());
        handle
    }

    fn attach_vertex_buffer(
        &self,
        array: VertexArrayHandle,
        buffer: BufferHandle,
        layout: &VertexBufferLayout,
        first_attribute: u32,
        instanced: bool,
    ) {
        if layout.is_empty() {
            self.push_error(GpuError::InvalidOperation(format!(
                "vertex buffer {} attached without a layout",
                buffer.0
            )));
            return;
        }
        let mut resources = self.resources.borrow_mut();
        if !resources.buffers.contains_key(&buffer) {
            self.push_error(GpuError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
            return;
        }
        match resources.vertex_arrays.get_mut(&array) {
            Some(entry) => entry.vertex_buffers.push(AttachedBuffer {
                buffer,
                layout: VertexLayoutKey::from_layout(layout, first_attribute, instanced),
            }),
            None => self.push_error(GpuError::InvalidHandle {
                kind: "vertex array",
                id: array.0,
            }),
        }
    }

    fn attach_index_buffer(&self, array: VertexArrayHandle, buffer: BufferHandle) {
        let mut resources = self.resources.borrow_mut();
        match resources.vertex_arrays.get_mut(&array) {
            Some(entry) => entry.index_buffer = Some(buffer),
            None => self.push_error(GpuError::InvalidHandle {
                kind: "vertex array",
                id: array.0,
            }),
        }
    }

    fn bind_vertex_array(&self, array: Option<VertexArrayHandle>) {
        self.bindings.borrow_mut().vertex_array = array;
    }

    fn destroy_vertex_array(&self, array: VertexArrayHandle) {
        self.resources.borrow_mut().vertex_arrays.remove(&array);
        let mut bindings = self.bindings.borrow_mut();
        if bindings.vertex_array == Some(array) {
            bindings.vertex_array = None;
        }
    }

    fn create_program(&self, params: &ShaderParams) -> ProgramHandle {
        let label = params.label().to_owned();
        let (vertex, vertex_ok) =
            self.compile_stage(&label, ShaderStage::Vertex, params.vertex_source());
        let (fragment, fragment_ok) =
            self.compile_stage(&label, ShaderStage::Fragment, params.fragment_source());

        let uniforms = params.uniforms().to_vec();
        let uniform_blocks: Vec<u32> = params.uniform_blocks().iter().map(|(_, b)| *b).collect();
        let texture_units: Vec<u32> = params.textures().iter().map(|(_, u)| *u).collect();
        let block_size = self.align((uniforms.len().max(1) * UNIFORM_SLOT_SIZE) as u64);

        let block_entries: Vec<wgpu::BindGroupLayoutEntry> = uniform_blocks
            .iter()
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: *binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let draw_entries = [wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(block_size),
            },
            count: None,
        }];
        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = texture_units
            .iter()
            .flat_map(|unit| {
                [
                    wgpu::BindGroupLayoutEntry {
                        binding: unit * 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: unit * 2 + 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();

        let ((groups, layout), link_err) = self.scoped(|| {
            let groups = [
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("uniform blocks layout"),
                        entries: &block_entries,
                    }),
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("per-draw uniforms layout"),
                        entries: &draw_entries,
                    }),
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("textures layout"),
                        entries: &texture_entries,
                    }),
            ];
            let layout = self
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&format!("{} layout", label)),
                    bind_group_layouts: &[&groups[0], &groups[1], &groups[2]],
                    push_constant_ranges: &[],
                });
            (groups, layout)
        });

        let mut linked = vertex_ok && fragment_ok;
        if let Some(err) = link_err {
            self.push_error(GpuError::ProgramLink(err.to_string()));
            linked = false;
        } else if !linked {
            self.push_error(GpuError::ProgramLink(format!(
                "'{}' has stages that failed to compile",
                label
            )));
        }

        let mut resources = self.resources.borrow_mut();
        let handle = ProgramHandle(resources.next_id());
        log::debug!("created program {} '{}' (linked: {})", handle.0, label, linked);
        resources.programs.insert(
            handle,
            ProgramEntry {
                label,
                vertex,
                fragment,
                layout,
                groups,
                uniforms,
                uniform_blocks,
                texture_units,
                block_size,
                staging: vec![0; block_size as usize],
                linked,
            },
        );
        handle
    }

    fn program_linked(&self, program: ProgramHandle) -> bool {
        self.resources
            .borrow()
            .programs
            .get(&program)
            .is_some_and(|entry| entry.linked)
    }

    fn bind_program(&self, program: Option<ProgramHandle>) {
        self.bindings.borrow_mut().program = program;
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let resources = self.resources.borrow();
        let entry = resources.programs.get(&program)?;
        if !entry.linked {
            return None;
        }
        entry
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&self, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.bindings.borrow().program else {
            self.push_error(GpuError::InvalidOperation(
                "uniform upload with no program bound".into(),
            ));
            return;
        };
        let mut resources = self.resources.borrow_mut();
        let Some(entry) = resources.programs.get_mut(&program) else {
            return;
        };
        let start = location.0 as usize * UNIFORM_SLOT_SIZE;
        if start + UNIFORM_SLOT_SIZE > entry.staging.len() {
            self.push_error(GpuError::InvalidOperation(format!(
                "uniform location {} is not active",
                location.0
            )));
            return;
        }
        let bytes = value.to_slot_bytes();
        entry.staging[start..start + bytes.len()].copy_from_slice(&bytes);
    }

    fn destroy_program(&self, program: ProgramHandle) {
        let mut resources = self.resources.borrow_mut();
        resources.programs.remove(&program);
        resources.block_groups.retain(|(p, _), _| *p != program);
        resources.texture_groups.retain(|(p, _), _| *p != program);
        self.pipelines.borrow_mut().evict_program(program);
        let mut bindings = self.bindings.borrow_mut();
        if bindings.program == Some(program) {
            bindings.program = None;
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> TextureHandle {
        let entry = create_texture_entry(
            &self.device,
            desc.width.max(1),
            desc.height.max(1),
            &desc.params,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            "texture",
        );
        let mut resources = self.resources.borrow_mut();
        let handle = TextureHandle(resources.next_id());
        resources.textures.insert(handle, entry);
        handle
    }

    fn write_texture(&self, texture: TextureHandle, origin: [u32; 2], size: [u32; 2], rgba: &[u8]) {
        let resources = self.resources.borrow();
        let Some(entry) = resources.textures.get(&texture) else {
            self.push_error(GpuError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            });
            return;
        };
        let fits = origin[0] + size[0] <= entry.width && origin[1] + size[1] <= entry.height;
        if !fits || rgba.len() < (size[0] * size[1] * 4) as usize {
            self.push_error(GpuError::InvalidOperation(format!(
                "texture write {:?}+{:?} out of range",
                origin, size
            )));
            return;
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin[0],
                    y: origin[1],
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size[0]),
                rows_per_image: Some(size[1]),
            },
            wgpu::Extent3d {
                width: size[0],
                height: size[1],
                depth_or_array_layers: 1,
            },
        );
    }

    fn read_texture(&self, texture: TextureHandle) -> Vec<u8> {
        let (gpu_texture, width, height) = {
            let resources = self.resources.borrow();
            match resources.textures.get(&texture) {
                Some(entry) => (entry.texture.clone(), entry.width, entry.height),
                None => {
                    self.push_error(GpuError::InvalidHandle {
                        kind: "texture",
                        id: texture.0,
                    });
                    return Vec::new();
                }
            }
        };
        let row = 4 * width;
        let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let data = self.read_back(
            |encoder, staging| {
                encoder.copy_texture_to_buffer(
                    wgpu::TexelCopyTextureInfo {
                        texture: &gpu_texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::TexelCopyBufferInfo {
                        buffer: staging,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(padded_row),
                            rows_per_image: Some(height),
                        },
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                )
            },
            (padded_row * height) as u64,
        );
        let Some(data) = data else {
            return Vec::new();
        };
        data.chunks(padded_row as usize)
            .flat_map(|r| r[..row as usize].iter().copied())
            .collect()
    }

    fn bind_texture(&self, slot: u32, texture: Option<TextureHandle>) {
        let mut bindings = self.bindings.borrow_mut();
        match texture {
            Some(handle) => {
                bindings.textures.insert(slot, handle);
            }
            None => {
                bindings.textures.remove(&slot);
            }
        }
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut resources = self.resources.borrow_mut();
        resources.textures.remove(&texture);
        resources
            .texture_groups
            .retain(|(_, handles), _| !handles.contains(&Some(texture)));
        self.bindings
            .borrow_mut()
            .textures
            .retain(|_, t| *t != texture);
    }

    fn create_render_target(&self, width: u32, height: u32) -> RenderTargetHandle {
        if width == 0 || height == 0 {
            self.push_error(GpuError::IncompleteFramebuffer(format!(
                "render target of {}x{} has a zero-sized attachment",
                width, height
            )));
        }
        let (width, height) = (width.max(1), height.max(1));
        let color = create_texture_entry(
            &self.device,
            width,
            height,
            &TextureParams::default(),
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            "render target color",
        );
        let depth_view = create_depth_view(&self.device, width, height);

        let mut resources = self.resources.borrow_mut();
        let color_handle = TextureHandle(resources.next_id());
        resources.textures.insert(color_handle, color);
        let handle = RenderTargetHandle(resources.next_id());
        resources.render_targets.insert(
            handle,
            RenderTargetEntry {
                color: color_handle,
                depth_view,
            },
        );
        handle
    }

    fn render_target_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle> {
        self.resources
            .borrow()
            .render_targets
            .get(&target)
            .map(|t| t.color)
    }

    fn bind_render_target(&self, target: Option<RenderTargetHandle>) {
        self.bindings.borrow_mut().render_target = target;
    }

    fn destroy_render_target(&self, target: RenderTargetHandle) {
        let color = self
            .resources
            .borrow_mut()
            .render_targets
            .remove(&target)
            .map(|t| t.color);
        if let Some(color) = color {
            self.destroy_texture(color);
        }
        let mut bindings = self.bindings.borrow_mut();
        if bindings.render_target == Some(target) {
            bindings.render_target = None;
        }
    }

    fn clear(&self, flags: ClearFlags, color: [f32; 4]) {
        let mut frame = self.frame.borrow_mut();
        let pass = self.current_pass(&mut frame);
        if !pass.draws.is_empty() {
            // Clearing after draws starts a fresh pass on the same target.
            let (target, viewport) = (pass.target, pass.viewport);
            frame.passes.push(PassRecord::new(target, viewport));
        }
        let last = frame.passes.len() - 1;
        let pass = &mut frame.passes[last];
        if flags.color {
            pass.clear_color = Some(wgpu::Color {
                r: color[0] as f64,
                g: color[1] as f64,
                b: color[2] as f64,
                a: color[3] as f64,
            });
        }
        pass.clear_depth |= flags.depth;
        pass.clear_stencil |= flags.stencil;
    }

    fn set_viewport(&self, x: u32, y: u32, width: u32, height: u32) {
        let viewport = [x as f32, y as f32, width as f32, height as f32];
        self.bindings.borrow_mut().viewport = Some(viewport);
        let mut frame = self.frame.borrow_mut();
        let pass = self.current_pass(&mut frame);
        if pass.draws.is_empty() {
            pass.viewport = Some(viewport);
        } else {
            let target = pass.target;
            frame.passes.push(PassRecord::new(target, Some(viewport)));
        }
    }

    fn draw_arrays(&self, mode: DrawMode, first: u32, count: u32) {
        if count == 0 {
            return;
        }
        self.record_draw(mode, DrawRange::Arrays { first, count });
    }

    fn draw_indexed(&self, mode: DrawMode, count: u32) {
        if count == 0 {
            return;
        }
        self.record_draw(mode, DrawRange::Indexed { count });
    }

    fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut state = self.surface_state.borrow_mut();
        state.config.width = width;
        state.config.height = height;
        self.surface.configure(&self.device, &state.config);
        state.depth_view = create_depth_view(&self.device, width, height);
        self.bindings.borrow_mut().viewport = None;
    }

    fn present(&self) {
        let frame = std::mem::take(&mut *self.frame.borrow_mut());
        if frame.passes.is_empty() {
            return;
        }

        let needs_surface = frame.passes.iter().any(|p| p.target.is_none());
        let surface_texture = if needs_surface {
            match self.surface.get_current_texture() {
                Ok(texture) => Some(texture),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("surface lost or outdated, reconfiguring");
                    self.reconfigure();
                    return;
                }
                Err(err) => {
                    self.push_error(GpuError::Validation(format!("surface: {err}")));
                    return;
                }
            }
        } else {
            None
        };
        let surface_view = surface_texture
            .as_ref()
            .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let arena = self.ensure_arena((frame.arena.len() as u64).max(self.offset_alignment));
        if !frame.arena.is_empty() {
            self.queue.write_buffer(&arena, 0, &frame.arena);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("thistle frame"),
            });
        let mut draw_groups = HashMap::new();
        for pass in &frame.passes {
            self.encode_pass(
                &mut encoder,
                pass,
                surface_view.as_ref(),
                &arena,
                &mut draw_groups,
            );
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(texture) = surface_texture {
            texture.present();
        }
    }

    fn take_error(&self) -> Option<GpuError> {
        self.errors.lock().ok()?.pop_front()
    }
}

fn emulates(mode: DrawMode) -> bool {
    matches!(mode, DrawMode::Fan | DrawMode::ClosedPath)
}

fn emulated_len(mode: DrawMode, count: u32) -> u32 {
    match mode {
        DrawMode::Fan => count.saturating_sub(2) * 3,
        DrawMode::ClosedPath if count > 0 => count + 1,
        _ => count,
    }
}

fn align4(size: u64) -> u64 {
    size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

#[cfg(not(feature = "error-callback"))]
fn report(errors: &ErrorQueue, err: GpuError) {
    match errors.lock() {
        Ok(mut queue) => queue.push_back(err),
        Err(_) => log::error!("{}", err),
    }
}

#[cfg(feature = "error-callback")]
fn report(_errors: &ErrorQueue, err: GpuError) {
    log::error!("[wgpu] {}", err);
}

fn install_error_handler(device: &wgpu::Device, errors: ErrorQueue) {
    device.on_uncaptured_error(Box::new(move |err: wgpu::Error| {
        let err = match &err {
            wgpu::Error::OutOfMemory { .. } => GpuError::OutOfMemory(err.to_string()),
            other => GpuError::Validation(other.to_string()),
        };
        report(&errors, err);
    }));
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth stencil"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_texture_entry(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    params: &TextureParams,
    usage: wgpu::TextureUsages,
    label: &str,
) -> TextureEntry {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: address_mode(params.wrap_s),
        address_mode_v: address_mode(params.wrap_t),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter_mode(params.mag_filter),
        min_filter: filter_mode(params.min_filter),
        mipmap_filter: if params.use_mipmap {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        },
        ..Default::default()
    });
    TextureEntry {
        texture,
        view,
        sampler,
        width,
        height,
    }
}

fn address_mode(wrap: TextureWrap) -> wgpu::AddressMode {
    match wrap {
        TextureWrap::Repeat => wgpu::AddressMode::Repeat,
        TextureWrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(filter: TextureFilter) -> wgpu::FilterMode {
    match filter {
        TextureFilter::Nearest => wgpu::FilterMode::Nearest,
        TextureFilter::Linear => wgpu::FilterMode::Linear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emulated_lengths_match_generated_indices() {
        let sequence: Vec<u32> = (0..6).collect();
        let fan = emulated_indices(DrawMode::Fan, &sequence).unwrap();
        let path = emulated_indices(DrawMode::ClosedPath, &sequence).unwrap();

        assert_eq!(fan.len() as u32, emulated_len(DrawMode::Fan, 6));
        assert_eq!(path.len() as u32, emulated_len(DrawMode::ClosedPath, 6));
    }

    #[test]
    fn test_align4_rounds_up() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(5), 8);
        assert_eq!(align4(12), 12);
    }
}
