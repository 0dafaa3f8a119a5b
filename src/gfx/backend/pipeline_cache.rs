//! Render pipeline caching for the wgpu backend
//!
//! wgpu bakes topology, vertex layout and target format into the pipeline
//! object, while the engine exposes them as independent bind-time state.
//! Pipelines are therefore created lazily the first time a combination is
//! drawn and reused afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::*;

use crate::gfx::backend::ProgramHandle;
use crate::gfx::resources::layout::{ElementType, VertexBufferLayout as EngineLayout};
use crate::gfx::scene::renderable::DrawMode;

/// Depth/stencil format shared by the surface and all render targets.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

/// Color format of off-screen render targets.
pub const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Hashable form of one vertex buffer binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayoutKey {
    pub stride: BufferAddress,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayoutKey {
    /// Expands an engine layout into wgpu attributes.
    ///
    /// # Arguments
    /// * `layout` - Engine vertex layout
    /// * `first_location` - Shader location of the first attribute slot
    /// * `instanced` - Whether the buffer advances per instance
    pub fn from_layout(layout: &EngineLayout, first_location: u32, instanced: bool) -> Self {
        let mut attributes = Vec::new();
        let mut location = first_location;
        for element in layout.elements() {
            let ty = element.element_type;
            for slot in 0..ty.attribute_slots() {
                attributes.push(VertexAttribute {
                    format: slot_format(ty),
                    offset: (element.offset + slot * ty.slot_size()) as BufferAddress,
                    shader_location: location,
                });
                location += 1;
            }
        }

        Self {
            stride: layout.stride() as BufferAddress,
            step_mode: if instanced {
                VertexStepMode::Instance
            } else {
                VertexStepMode::Vertex
            },
            attributes,
        }
    }
}

fn slot_format(ty: ElementType) -> VertexFormat {
    match ty {
        ElementType::Float => VertexFormat::Float32,
        ElementType::Int => VertexFormat::Sint32,
        ElementType::Bool => VertexFormat::Uint32,
        ElementType::Vec2 | ElementType::Mat2 => VertexFormat::Float32x2,
        ElementType::Vec3 | ElementType::Mat3 => VertexFormat::Float32x3,
        ElementType::Vec4 | ElementType::Mat4 => VertexFormat::Float32x4,
    }
}

/// Native topology used to draw a mode.
///
/// `Fan` and `ClosedPath` have no native equivalent and are drawn through
/// generated index lists (see [`emulated_indices`]).
pub fn topology_for(mode: DrawMode) -> PrimitiveTopology {
    match mode {
        DrawMode::Triangles | DrawMode::Fan => PrimitiveTopology::TriangleList,
        DrawMode::Strip => PrimitiveTopology::TriangleStrip,
        DrawMode::Point => PrimitiveTopology::PointList,
        DrawMode::Line => PrimitiveTopology::LineList,
        DrawMode::Path | DrawMode::ClosedPath => PrimitiveTopology::LineStrip,
    }
}

/// Index list reproducing `Fan` or `ClosedPath` over `vertices`.
///
/// Returns `None` for modes the device draws natively.
pub fn emulated_indices(mode: DrawMode, vertices: &[u32]) -> Option<Vec<u32>> {
    match mode {
        DrawMode::Fan => {
            let mut out = Vec::with_capacity(vertices.len().saturating_sub(2) * 3);
            for pair in vertices.windows(2).skip(1) {
                out.extend_from_slice(&[vertices[0], pair[0], pair[1]]);
            }
            Some(out)
        }
        DrawMode::ClosedPath => {
            let mut out = vertices.to_vec();
            if let Some(&first) = vertices.first() {
                out.push(first);
            }
            Some(out)
        }
        _ => None,
    }
}

/// Everything that selects a distinct pipeline object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ProgramHandle,
    pub topology: PrimitiveTopology,
    pub strip_indexed: bool,
    pub vertex_layouts: Vec<VertexLayoutKey>,
    pub color_format: TextureFormat,
}

/// Compiled shader stages and layout a pipeline is built from.
pub struct ProgramModules<'a> {
    pub label: &'a str,
    pub vertex: &'a ShaderModule,
    pub fragment: &'a ShaderModule,
    pub layout: &'a PipelineLayout,
}

/// Lazily creates and caches render pipelines.
pub struct PipelineCache {
    device: Arc<Device>,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            pipelines: HashMap::new(),
        }
    }

    /// Gets or creates the pipeline for `key`
    ///
    /// Creation runs inside a validation error scope; a pipeline that fails
    /// validation is not cached and the error is returned as text.
    ///
    /// # Arguments
    /// * `key` - Pipeline state to match
    /// * `modules` - Shader stages and layout of the program named by the key
    pub fn get_or_create(
        &mut self,
        key: &PipelineKey,
        modules: &ProgramModules,
    ) -> Result<RenderPipeline, String> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(pipeline.clone());
        }

        self.device.push_error_scope(ErrorFilter::Validation);
        let pipeline = self.create_pipeline(key, modules);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(err.to_string());
        }

        log::debug!(
            "created pipeline for program {} ({:?}, {} buffers, {:?})",
            key.program.0,
            key.topology,
            key.vertex_layouts.len(),
            key.color_format
        );
        self.pipelines.insert(key.clone(), pipeline.clone());
        Ok(pipeline)
    }

    /// Drops every pipeline built from `program`.
    pub fn evict_program(&mut self, program: ProgramHandle) {
        self.pipelines.retain(|key, _| key.program != program);
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    fn create_pipeline(&self, key: &PipelineKey, modules: &ProgramModules) -> RenderPipeline {
        let buffers: Vec<VertexBufferLayout> = key
            .vertex_layouts
            .iter()
            .map(|layout| VertexBufferLayout {
                array_stride: layout.stride,
                step_mode: layout.step_mode,
                attributes: &layout.attributes,
            })
            .collect();

        let triangles = matches!(
            key.topology,
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip
        );
        let strip = matches!(
            key.topology,
            PrimitiveTopology::TriangleStrip | PrimitiveTopology::LineStrip
        );

        self.device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(modules.label),
            layout: Some(modules.layout),
            vertex: VertexState {
                module: modules.vertex,
                entry_point: Some("vs_main"),
                buffers: &buffers,
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: modules.fragment,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format: key.color_format,
                    blend: Some(BlendState::ALPHA_BLENDING),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState {
                topology: key.topology,
                strip_index_format: if strip && key.strip_indexed {
                    Some(IndexFormat::Uint32)
                } else {
                    None
                },
                front_face: FrontFace::Ccw,
                cull_mode: if triangles { Some(Face::Back) } else { None },
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_expands_to_triangle_list() {
        let indices = emulated_indices(DrawMode::Fan, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3, 0, 3, 4]);
    }

    #[test]
    fn test_closed_path_returns_to_start() {
        let indices = emulated_indices(DrawMode::ClosedPath, &[4, 5, 6]).unwrap();
        assert_eq!(indices, vec![4, 5, 6, 4]);
        assert!(emulated_indices(DrawMode::Triangles, &[0, 1, 2]).is_none());
    }

    #[test]
    fn test_matrix_attribute_expands_to_columns() {
        let mut layout = EngineLayout::new();
        layout.add(ElementType::Vec3, "position").add(ElementType::Mat4, "model");

        let key = VertexLayoutKey::from_layout(&layout, 2, true);
        let locations: Vec<u32> = key.attributes.iter().map(|a| a.shader_location).collect();
        let offsets: Vec<u64> = key.attributes.iter().map(|a| a.offset).collect();

        assert_eq!(locations, vec![2, 3, 4, 5, 6]);
        assert_eq!(offsets, vec![0, 12, 28, 44, 60]);
        assert_eq!(key.step_mode, VertexStepMode::Instance);
        assert_eq!(key.stride, 76);
    }

    #[test]
    fn test_topology_mapping() {
        assert_eq!(topology_for(DrawMode::Path), PrimitiveTopology::LineStrip);
        assert_eq!(topology_for(DrawMode::Fan), PrimitiveTopology::TriangleList);
        assert_eq!(topology_for(DrawMode::Point), PrimitiveTopology::PointList);
    }
}
