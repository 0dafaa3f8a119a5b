//! Shader programs and their parameters.
//!
//! A [`Shader`] is built from [`ShaderParams`]: stage sources plus the
//! names the program exposes (vertex inputs, per-draw uniforms, uniform
//! blocks and textures). Compile and link problems are logged through the
//! GPU error channel and never abort; a broken shader can still be bound,
//! it just draws nothing.
//!
//! The engine talks to shaders through a fixed vocabulary. Custom shaders
//! must use these names for the engine-provided data:
//!
//! | name                | kind                          |
//! |---------------------|-------------------------------|
//! | `ModelMatrix`       | per-draw uniform (mat4)       |
//! | `Camera`            | uniform block at binding 0    |
//! | `ViewMatrix`        | first matrix of `Camera`      |
//! | `ProjectionMatrix`  | second matrix of `Camera`     |
//! | `position`, `texCoord`, `normal`, `color` | vertex inputs 0..3 |

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use cgmath::{Matrix2, Matrix3, Matrix4, Vector2, Vector3, Vector4};

use crate::gfx::backend::{check_gpu_error, Gpu, ProgramHandle, UniformLocation, UniformValue};
use crate::gfx::math::{mat2_array, mat3_array, mat4_array};

/// WGSL program drawing vertex-colored meshes with simple directional light.
pub const BASIC_WGSL: &str = r#"
struct Camera {
    ViewMatrix: mat4x4<f32>,
    ProjectionMatrix: mat4x4<f32>,
};
@group(0) @binding(0) var<uniform> camera: Camera;

struct DrawUniforms {
    ModelMatrix: mat4x4<f32>,
};
@group(1) @binding(0) var<uniform> draw: DrawUniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) texCoord: vec2<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) color: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) color: vec3<f32>,
};

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world = draw.ModelMatrix * vec4<f32>(vertex.position, 1.0);
    out.clip = camera.ProjectionMatrix * camera.ViewMatrix * world;
    out.normal = (draw.ModelMatrix * vec4<f32>(vertex.normal, 0.0)).xyz;
    out.color = vertex.color;
    return out;
}

@fragment
fn fs_main(frag: VertexOutput) -> @location(0) vec4<f32> {
    let light = normalize(vec3<f32>(0.4, 1.0, 0.6));
    var n = frag.normal;
    if (dot(n, n) > 0.0) {
        n = normalize(n);
    }
    let diffuse = max(dot(n, light), 0.0);
    return vec4<f32>(frag.color * (0.25 + 0.75 * diffuse), 1.0);
}
"#;

/// Everything needed to build a shader program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderParams {
    label: String,
    vertex_source: String,
    fragment_source: String,
    inputs: Vec<(String, u32)>,
    uniforms: Vec<String>,
    uniform_blocks: Vec<(String, u32)>,
    textures: Vec<(String, u32)>,
}

impl ShaderParams {
    pub fn new() -> Self {
        Self {
            label: "shader".to_string(),
            ..Default::default()
        }
    }

    /// Parameters matching the engine's vertex format and camera block,
    /// with `ModelMatrix` as the only per-draw uniform. Sources are empty.
    pub fn standard() -> Self {
        Self::new()
            .with_inputs(&["position", "texCoord", "normal", "color"])
            .with_uniform(Shader::MODEL_MATRIX)
            .with_uniform_block(Shader::CAMERA_BLOCK, Shader::CAMERA_BINDING)
    }

    /// Reads both stage sources from disk.
    pub fn from_files(vertex: impl AsRef<Path>, fragment: impl AsRef<Path>) -> anyhow::Result<Self> {
        let vertex = vertex.as_ref();
        let fragment = fragment.as_ref();
        let vertex_source = std::fs::read_to_string(vertex)
            .with_context(|| format!("reading vertex shader {}", vertex.display()))?;
        let fragment_source = std::fs::read_to_string(fragment)
            .with_context(|| format!("reading fragment shader {}", fragment.display()))?;
        Ok(Self::new()
            .with_label(&vertex.display().to_string())
            .with_vertex_source(&vertex_source)
            .with_fragment_source(&fragment_source))
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_owned();
        self
    }

    pub fn with_vertex_source(mut self, source: &str) -> Self {
        self.vertex_source = source.to_owned();
        self
    }

    pub fn with_fragment_source(mut self, source: &str) -> Self {
        self.fragment_source = source.to_owned();
        self
    }

    /// Uses one source for both stages (WGSL modules can hold both entry points).
    pub fn with_source(self, source: &str) -> Self {
        self.with_vertex_source(source).with_fragment_source(source)
    }

    /// Declares a vertex input at an explicit location.
    pub fn with_input(mut self, name: &str, location: u32) -> Self {
        self.inputs.push((name.to_owned(), location));
        self
    }

    /// Declares vertex inputs at consecutive locations after the existing ones.
    pub fn with_inputs(mut self, names: &[&str]) -> Self {
        for name in names {
            let location = self.inputs.len() as u32;
            self.inputs.push((name.to_string(), location));
        }
        self
    }

    /// Declares a per-draw uniform. Declaration order fixes its slot.
    pub fn with_uniform(mut self, name: &str) -> Self {
        if !self.uniforms.iter().any(|u| u == name) {
            self.uniforms.push(name.to_owned());
        }
        self
    }

    pub fn with_uniforms(self, names: &[&str]) -> Self {
        names.iter().fold(self, |params, name| params.with_uniform(name))
    }

    /// Declares a uniform block read from `binding`.
    pub fn with_uniform_block(mut self, name: &str, binding: u32) -> Self {
        self.uniform_blocks.push((name.to_owned(), binding));
        self
    }

    pub fn with_uniform_blocks(self, blocks: &[(&str, u32)]) -> Self {
        blocks
            .iter()
            .fold(self, |params, (name, binding)| params.with_uniform_block(name, *binding))
    }

    /// Declares a sampled texture on texture unit `unit`.
    pub fn with_texture(mut self, name: &str, unit: u32) -> Self {
        self.textures.push((name.to_owned(), unit));
        self
    }

    pub fn with_textures(self, textures: &[(&str, u32)]) -> Self {
        textures
            .iter()
            .fold(self, |params, (name, unit)| params.with_texture(name, *unit))
    }

    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    pub fn clear_uniforms(&mut self) {
        self.uniforms.clear();
    }

    pub fn clear_uniform_blocks(&mut self) {
        self.uniform_blocks.clear();
    }

    pub fn clear_textures(&mut self) {
        self.textures.clear();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex_source(&self) -> &str {
        &self.vertex_source
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment_source
    }

    pub fn inputs(&self) -> &[(String, u32)] {
        &self.inputs
    }

    pub fn uniforms(&self) -> &[String] {
        &self.uniforms
    }

    pub fn uniform_blocks(&self) -> &[(String, u32)] {
        &self.uniform_blocks
    }

    pub fn textures(&self) -> &[(String, u32)] {
        &self.textures
    }
}

/// A linked program with a lazily filled uniform location cache.
pub struct Shader {
    gpu: Gpu,
    program: ProgramHandle,
    params: ShaderParams,
    locations: RefCell<HashMap<String, Option<UniformLocation>>>,
    compiled: bool,
}

impl Shader {
    pub const MODEL_MATRIX: &'static str = "ModelMatrix";
    pub const VIEW_MATRIX: &'static str = "ViewMatrix";
    pub const PROJECTION_MATRIX: &'static str = "ProjectionMatrix";
    pub const CAMERA_BLOCK: &'static str = "Camera";
    pub const CAMERA_BINDING: u32 = 0;

    /// Compiles and links `params`.
    ///
    /// Failures are logged; the returned shader reports
    /// `is_compiled() == false` but stays usable as a handle.
    pub fn new(gpu: &Gpu, params: ShaderParams) -> Self {
        let program = gpu.create_program(&params);
        check_gpu_error(gpu.as_ref(), &format!("building shader '{}'", params.label()));
        let compiled = gpu.program_linked(program);
        if compiled {
            log::debug!("shader '{}' ready as program {}", params.label(), program.0);
        } else {
            log::warn!("shader '{}' did not link; draws with it are dropped", params.label());
        }
        Self {
            gpu: gpu.clone(),
            program,
            params,
            locations: RefCell::new(HashMap::new()),
            compiled,
        }
    }

    /// The built-in vertex-color shader.
    pub fn basic(gpu: &Gpu) -> Self {
        Self::new(
            gpu,
            ShaderParams::standard()
                .with_label("basic")
                .with_source(BASIC_WGSL),
        )
    }

    /// Builds a shader whose stage sources are read from two files.
    ///
    /// `params` supplies the declarations; its sources are replaced.
    pub fn load_from_files(
        gpu: &Gpu,
        vertex: impl AsRef<Path>,
        fragment: impl AsRef<Path>,
        params: ShaderParams,
    ) -> anyhow::Result<Self> {
        let files = ShaderParams::from_files(vertex, fragment)?;
        let params = params
            .with_label(files.label())
            .with_vertex_source(files.vertex_source())
            .with_fragment_source(files.fragment_source());
        Ok(Self::new(gpu, params))
    }

    pub fn bind(&self) {
        self.gpu.bind_program(Some(self.program));
    }

    pub fn unbind(&self) {
        self.gpu.bind_program(None);
    }

    /// Location of `name`, resolved once and cached (misses included).
    pub fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        if let Some(location) = self.locations.borrow().get(name) {
            return *location;
        }

        let location = self.gpu.uniform_location(self.program, name);
        if location.is_none() {
            log::warn!(
                "shader '{}' has no active uniform '{}'",
                self.params.label(),
                name
            );
        }
        self.locations.borrow_mut().insert(name.to_owned(), location);
        location
    }

    /// Uploads `value` to `name` on the currently bound program.
    ///
    /// Returns `false` when the uniform does not exist; nothing is uploaded.
    pub fn set_uniform(&self, name: &str, value: UniformValue) -> bool {
        match self.uniform_location(name) {
            Some(location) => {
                self.gpu.set_uniform(location, value);
                true
            }
            None => false,
        }
    }

    pub fn set_float(&self, name: &str, value: f32) -> bool {
        self.set_uniform(name, UniformValue::Float(value))
    }

    pub fn set_int(&self, name: &str, value: i32) -> bool {
        self.set_uniform(name, UniformValue::Int(value))
    }

    pub fn set_bool(&self, name: &str, value: bool) -> bool {
        self.set_uniform(name, UniformValue::Bool(value))
    }

    pub fn set_vec2(&self, name: &str, value: Vector2<f32>) -> bool {
        self.set_uniform(name, UniformValue::Vec2(value.into()))
    }

    pub fn set_vec3(&self, name: &str, value: Vector3<f32>) -> bool {
        self.set_uniform(name, UniformValue::Vec3(value.into()))
    }

    pub fn set_vec4(&self, name: &str, value: Vector4<f32>) -> bool {
        self.set_uniform(name, UniformValue::Vec4(value.into()))
    }

    pub fn set_mat2(&self, name: &str, value: &Matrix2<f32>) -> bool {
        self.set_uniform(name, UniformValue::Mat2(mat2_array(value)))
    }

    pub fn set_mat3(&self, name: &str, value: &Matrix3<f32>) -> bool {
        self.set_uniform(name, UniformValue::Mat3(mat3_array(value)))
    }

    pub fn set_mat4(&self, name: &str, value: &Matrix4<f32>) -> bool {
        self.set_uniform(name, UniformValue::Mat4(mat4_array(value)))
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn params(&self) -> &ShaderParams {
        &self.params
    }

    /// Names resolved so far, hits and misses.
    pub fn cached_locations(&self) -> usize {
        self.locations.borrow().len()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        log::trace!("destroying program {}", self.program.0);
        self.gpu.destroy_program(self.program);
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("label", &self.params.label())
            .field("program", &self.program)
            .field("compiled", &self.compiled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{GpuCall, GraphicsBackend, RecordingBackend};
    use std::rc::Rc;

    fn recording() -> (Rc<RecordingBackend>, Gpu) {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        (backend, gpu)
    }

    #[test]
    fn test_standard_params_declare_engine_names() {
        let params = ShaderParams::standard();
        let inputs: Vec<(&str, u32)> = params
            .inputs()
            .iter()
            .map(|(n, l)| (n.as_str(), *l))
            .collect();
        assert_eq!(
            inputs,
            vec![("position", 0), ("texCoord", 1), ("normal", 2), ("color", 3)]
        );
        assert_eq!(params.uniforms(), &["ModelMatrix".to_string()]);
        assert_eq!(params.uniform_blocks(), &[("Camera".to_string(), 0)]);
    }

    #[test]
    fn test_duplicate_uniforms_are_ignored_and_clear_works() {
        let mut params = ShaderParams::new()
            .with_uniforms(&["a", "b", "a"])
            .with_textures(&[("albedo", 0)]);
        assert_eq!(params.uniforms().len(), 2);

        params.clear_uniforms();
        params.clear_textures();
        assert!(params.uniforms().is_empty());
        assert!(params.textures().is_empty());
    }

    #[test]
    fn test_uniform_location_is_resolved_once() {
        let (backend, gpu) = recording();
        let shader = Shader::basic(&gpu);
        assert!(shader.is_compiled());

        shader.bind();
        let model = Matrix4::from_scale(3.0f32);
        for _ in 0..4 {
            assert!(shader.set_mat4(Shader::MODEL_MATRIX, &model));
        }

        let lookups = backend.count(|c| matches!(c, GpuCall::LookupUniform { .. }));
        let uploads = backend.count(|c| {
            matches!(c, GpuCall::SetUniform { name: Some(n), .. } if n == "ModelMatrix")
        });
        assert_eq!(lookups, 1);
        assert_eq!(uploads, 4);
    }

    #[test]
    fn test_missing_uniform_is_cached_and_skipped() {
        let (backend, gpu) = recording();
        let shader = Shader::basic(&gpu);
        shader.bind();

        assert!(!shader.set_float("Exposure", 1.0));
        assert!(!shader.set_float("Exposure", 2.0));
        assert_eq!(shader.cached_locations(), 1);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::LookupUniform { .. })), 1);
        assert_eq!(backend.count(|c| matches!(c, GpuCall::SetUniform { .. })), 0);
    }

    #[test]
    fn test_failed_compile_is_reported_not_fatal() {
        let (backend, gpu) = recording();
        let shader = Shader::new(&gpu, ShaderParams::standard().with_vertex_source("vs"));

        assert!(!shader.is_compiled());
        assert!(backend.take_error().is_none());
        shader.bind();
        assert_eq!(backend.bound_program(), Some(shader.program()));
        assert!(!shader.set_mat4(Shader::MODEL_MATRIX, &Matrix4::from_scale(1.0)));
    }

    #[test]
    fn test_empty_vertex_stage_is_not_compiled() {
        let (backend, gpu) = recording();
        let shader = Shader::new(&gpu, ShaderParams::standard().with_vertex_source(""));

        assert!(!shader.is_compiled());
        assert!(!backend.program_linked(shader.program()));
        assert!(backend.take_error().is_none());
    }

    #[test]
    fn test_drop_destroys_program() {
        let (backend, gpu) = recording();
        let shader = Shader::basic(&gpu);
        assert_eq!(backend.live_programs(), 1);
        drop(shader);
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn test_load_from_missing_files_errors() {
        let (_backend, gpu) = recording();
        let result = Shader::load_from_files(
            &gpu,
            "does/not/exist.vert.wgsl",
            "does/not/exist.frag.wgsl",
            ShaderParams::standard(),
        );
        assert!(result.is_err());
    }
}
