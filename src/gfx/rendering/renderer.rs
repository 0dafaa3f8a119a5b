//! Batching scene renderer.
//!
//! A frame runs `begin -> traverse/submit -> draw -> end`. Submissions are
//! grouped by shader, then by mesh and draw mode, so that `draw` binds each
//! shader once and each mesh once per shader no matter how many nodes share
//! them. Groups keep first-submission order.

use std::rc::Rc;

use cgmath::Matrix4;

use crate::config::EngineConfig;
use crate::gfx::backend::{check_gpu_error, ClearFlags, Gpu};
use crate::gfx::camera::{Camera, CameraUbo};
use crate::gfx::resources::shader::Shader;
use crate::gfx::scene::mesh::{Mesh, SharedMesh};
use crate::gfx::scene::renderable::{DrawMode, Renderable};
use crate::gfx::scene::Scene;

/// Where the renderer is in its frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    /// Between `begin` and `end`.
    Recording,
}

/// Work done by the renderer, counted per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub shader_binds: u32,
    pub mesh_binds: u32,
    pub draw_calls: u32,
    /// Submissions dropped for a missing shader or an unbuilt mesh.
    pub skipped: u32,
}

#[derive(Debug)]
struct MeshGroup {
    mesh: SharedMesh,
    mode: DrawMode,
    transforms: Vec<Matrix4<f32>>,
}

#[derive(Debug)]
struct ShaderGroup {
    shader: Rc<Shader>,
    meshes: Vec<MeshGroup>,
}

pub struct Renderer {
    gpu: Gpu,
    auto_clear: bool,
    clear_stencil: bool,
    clear_color: [f32; 4],
    state: FrameState,
    groups: Vec<ShaderGroup>,
    active_ubo: Option<CameraUbo>,
    stats: FrameStats,
    last_stats: FrameStats,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.gpu.name())
            .field("auto_clear", &self.auto_clear)
            .field("clear_stencil", &self.clear_stencil)
            .field("clear_color", &self.clear_color)
            .field("state", &self.state)
            .field("groups", &self.groups)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Renderer {
    pub fn new(gpu: &Gpu) -> Self {
        Self {
            gpu: gpu.clone(),
            auto_clear: true,
            clear_stencil: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            state: FrameState::Idle,
            groups: Vec::new(),
            active_ubo: None,
            stats: FrameStats::default(),
            last_stats: FrameStats::default(),
        }
    }

    pub fn with_config(gpu: &Gpu, config: &EngineConfig) -> Self {
        let mut renderer = Self::new(gpu);
        renderer.auto_clear = config.auto_clear;
        renderer.clear_stencil = config.clear_stencil;
        renderer.clear_color = config.clear_color;
        renderer
    }

    /// Clears color and depth, plus stencil when stencil clearing is on.
    pub fn clear(&self) {
        let flags = if self.clear_stencil {
            ClearFlags::ALL
        } else {
            ClearFlags::COLOR_DEPTH
        };
        self.gpu.clear(flags, self.clear_color);
    }

    /// Starts a frame: clears when auto-clear is on, then binds the camera's
    /// uniform block and uploads its view and projection.
    pub fn begin(&mut self, camera: &Camera) {
        if self.state != FrameState::Idle {
            log::warn!("Renderer::begin called twice without end; ignoring");
            return;
        }
        if self.auto_clear {
            self.clear();
        }

        match camera.ubo() {
            Some(ubo) => {
                ubo.borrow().bind();
                if let Err(err) = camera.upload() {
                    log::warn!("camera upload failed: {}", err);
                }
            }
            None => log::warn!("camera has no uniform block; view and projection are not uploaded"),
        }

        self.active_ubo = camera.ubo().cloned();
        self.stats = FrameStats::default();
        self.state = FrameState::Recording;
    }

    /// Walks the scene from its root, resolving dirty world matrices and
    /// submitting every renderable found.
    pub fn traverse(&mut self, scene: &mut Scene) {
        if self.state != FrameState::Recording {
            log::warn!("Renderer::traverse called outside begin/end; ignoring");
            return;
        }
        let root = scene.root();
        scene.walk(root, false, |_, node| {
            if let Some(renderable) = node.renderable() {
                self.submit(renderable, node.world_transform());
            }
        });
    }

    /// Queues one instance of `renderable` at `world`.
    ///
    /// Syncs the mesh first when it auto-updates. Renderables without a
    /// shader or without a built mesh are skipped.
    pub fn submit(&mut self, renderable: &Rc<Renderable>, world: Matrix4<f32>) {
        if self.state != FrameState::Recording {
            log::warn!("Renderer::submit called outside begin/end; ignoring");
            return;
        }
        if !self.prepare_mesh(renderable.mesh()) {
            self.stats.skipped += 1;
            return;
        }
        let Some(shader) = renderable.shader() else {
            self.stats.skipped += 1;
            return;
        };

        let group = match self.groups.iter().position(|g| Rc::ptr_eq(&g.shader, shader)) {
            Some(index) => &mut self.groups[index],
            None => {
                self.groups.push(ShaderGroup {
                    shader: shader.clone(),
                    meshes: Vec::new(),
                });
                let last = self.groups.len() - 1;
                &mut self.groups[last]
            }
        };

        let mode = renderable.mode();
        match group
            .meshes
            .iter_mut()
            .find(|m| m.mode == mode && Rc::ptr_eq(&m.mesh, renderable.mesh()))
        {
            Some(mesh_group) => mesh_group.transforms.push(world),
            None => group.meshes.push(MeshGroup {
                mesh: renderable.mesh().clone(),
                mode,
                transforms: vec![world],
            }),
        }
    }

    /// Issues the queued draws: shader outermost, then mesh, then one draw
    /// per transform with the transform as `ModelMatrix`.
    pub fn draw(&mut self) {
        if self.state != FrameState::Recording {
            log::warn!("Renderer::draw called outside begin/end; ignoring");
            return;
        }
        for group in &self.groups {
            group.shader.bind();
            self.stats.shader_binds += 1;

            for mesh_group in &group.meshes {
                let mesh = mesh_group.mesh.borrow();
                let Some(vertex_array) = mesh.vertex_array() else {
                    continue;
                };
                vertex_array.bind();
                if let Some(texture) = mesh.texture() {
                    texture.bind(0);
                }
                self.stats.mesh_binds += 1;

                for transform in &mesh_group.transforms {
                    group.shader.set_mat4(Shader::MODEL_MATRIX, transform);
                    issue_draw(&self.gpu, &mesh, mesh_group.mode);
                    self.stats.draw_calls += 1;
                }
                vertex_array.unbind();
            }
            group.shader.unbind();
        }
        check_gpu_error(&*self.gpu, "renderer draw");
    }

    /// Ends the frame: unbinds the camera block and drops all groups.
    pub fn end(&mut self) {
        if self.state != FrameState::Recording {
            log::warn!("Renderer::end called without begin; ignoring");
            return;
        }
        if let Some(ubo) = self.active_ubo.take() {
            ubo.borrow().unbind();
        }
        self.groups.clear();
        self.last_stats = self.stats;
        self.state = FrameState::Idle;
    }

    /// Renders a whole scene with batching: `begin`, `traverse`, `draw`, `end`.
    pub fn draw_scene(&mut self, scene: &mut Scene, camera: &Camera) {
        self.begin(camera);
        self.traverse(scene);
        self.draw();
        self.end();
    }

    /// Draws one renderable right away, without batching.
    ///
    /// The camera block must already be bound, typically by `begin`.
    pub fn draw_renderable(&mut self, renderable: &Rc<Renderable>, model: &Matrix4<f32>) {
        if !self.prepare_mesh(renderable.mesh()) {
            self.stats.skipped += 1;
            return;
        }
        let Some(shader) = renderable.shader() else {
            self.stats.skipped += 1;
            return;
        };
        let mesh = renderable.mesh().borrow();
        let Some(vertex_array) = mesh.vertex_array() else {
            return;
        };

        vertex_array.bind();
        shader.bind();
        if let Some(texture) = mesh.texture() {
            texture.bind(0);
        }
        shader.set_mat4(Shader::MODEL_MATRIX, model);
        issue_draw(&self.gpu, &mesh, renderable.mode());
        self.stats.shader_binds += 1;
        self.stats.mesh_binds += 1;
        self.stats.draw_calls += 1;
        shader.unbind();
        vertex_array.unbind();
        check_gpu_error(&*self.gpu, "renderer draw_renderable");
    }

    /// Syncs a mesh if it auto-updates and reports whether it can be drawn.
    fn prepare_mesh(&self, mesh: &SharedMesh) -> bool {
        let Ok(mut mesh) = mesh.try_borrow_mut() else {
            log::warn!("mesh is borrowed elsewhere during rendering; skipping");
            return false;
        };
        if mesh.auto_buffer_update() {
            mesh.update_buffer_data(&self.gpu);
        }
        mesh.vertex_array().is_some()
    }

    pub fn set_auto_clear(&mut self, auto_clear: bool) {
        self.auto_clear = auto_clear;
    }

    pub fn auto_clear(&self) -> bool {
        self.auto_clear
    }

    pub fn set_clear_stencil(&mut self, clear_stencil: bool) {
        self.clear_stencil = clear_stencil;
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Counters of the frame in progress.
    pub fn current_stats(&self) -> FrameStats {
        self.stats
    }

    /// Counters of the last finished frame.
    pub fn stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Transforms queued since `begin`.
    pub fn pending_draws(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.meshes.iter())
            .map(|m| m.transforms.len())
            .sum()
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }
}

fn issue_draw(gpu: &Gpu, mesh: &Mesh, mode: DrawMode) {
    if mesh.is_indexed() {
        gpu.draw_indexed(mode, mesh.draw_count());
    } else {
        gpu.draw_arrays(mode, 0, mesh.vertex_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{GpuCall, RecordingBackend, UniformValue};
    use crate::gfx::geometry::{cube, generate_cube, triangle};
    use crate::gfx::math::{floats_from_bytes, mat4_array};
    use cgmath::{Deg, Vector3};

    struct Fixture {
        backend: Rc<RecordingBackend>,
        gpu: Gpu,
        camera: Camera,
    }

    fn fixture() -> Fixture {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        let mut camera = Camera::perspective(60.0, 1.5, 0.1, 100.0, Vector3::new(0.0, 0.0, 0.0));
        camera.create_ubo(&gpu);
        Fixture { backend, gpu, camera }
    }

    fn is_program_bind(call: &GpuCall) -> bool {
        matches!(call, GpuCall::BindProgram(Some(_)))
    }

    fn is_mesh_bind(call: &GpuCall) -> bool {
        matches!(call, GpuCall::BindVertexArray(Some(_)))
    }

    fn is_draw(call: &GpuCall) -> bool {
        matches!(call, GpuCall::DrawArrays { .. } | GpuCall::DrawIndexed { .. })
    }

    #[test]
    fn test_shared_pair_binds_once_and_draws_per_node() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let mesh = cube().into_shared();

        let mut scene = Scene::new();
        for i in 0..4 {
            let renderable = Renderable::triangles(mesh.clone(), shader.clone());
            let node = scene.create_child(scene.root(), Some(renderable)).unwrap();
            scene
                .node_mut(node)
                .unwrap()
                .set_translation(Vector3::new(i as f32, 0.0, 0.0));
        }

        let mut renderer = Renderer::new(&f.gpu);
        renderer.begin(&f.camera);
        renderer.traverse(&mut scene);
        assert_eq!(renderer.pending_draws(), 4);

        f.backend.clear_calls();
        renderer.draw();
        renderer.end();

        assert_eq!(f.backend.count(is_program_bind), 1);
        assert_eq!(f.backend.count(is_mesh_bind), 1);
        assert_eq!(f.backend.count(is_draw), 4);
        assert_eq!(
            f.backend.count(|c| matches!(c, GpuCall::LookupUniform { .. })),
            1
        );
        assert_eq!(
            renderer.stats(),
            FrameStats {
                shader_binds: 1,
                mesh_binds: 1,
                draw_calls: 4,
                skipped: 0,
            }
        );
        assert_eq!(renderer.pending_draws(), 0);
    }

    #[test]
    fn test_groups_follow_first_submission_order() {
        let f = fixture();
        let shader_a = Rc::new(Shader::basic(&f.gpu));
        let shader_b = Rc::new(Shader::basic(&f.gpu));
        let mesh_1 = cube().into_shared();
        let mesh_2 = triangle().into_shared();

        let mut renderer = Renderer::new(&f.gpu);
        renderer.begin(&f.camera);
        let identity = Matrix4::from_scale(1.0);
        renderer.submit(&Renderable::triangles(mesh_1.clone(), shader_a.clone()), identity);
        renderer.submit(&Renderable::triangles(mesh_1.clone(), shader_b.clone()), identity);
        renderer.submit(&Renderable::triangles(mesh_2.clone(), shader_a.clone()), identity);
        renderer.submit(&Renderable::triangles(mesh_1.clone(), shader_a.clone()), identity);

        f.backend.clear_calls();
        renderer.draw();
        renderer.end();

        let order: Vec<GpuCall> = f
            .backend
            .calls()
            .into_iter()
            .filter(|c| is_program_bind(c) || is_draw(c))
            .collect();
        assert_eq!(
            order,
            vec![
                GpuCall::BindProgram(Some(shader_a.program())),
                GpuCall::DrawArrays { mode: DrawMode::Triangles, first: 0, count: 36 },
                GpuCall::DrawArrays { mode: DrawMode::Triangles, first: 0, count: 36 },
                GpuCall::DrawArrays { mode: DrawMode::Triangles, first: 0, count: 3 },
                GpuCall::BindProgram(Some(shader_b.program())),
                GpuCall::DrawArrays { mode: DrawMode::Triangles, first: 0, count: 36 },
            ]
        );
        assert_eq!(renderer.stats().mesh_binds, 3);
    }

    #[test]
    fn test_draw_mode_splits_mesh_groups() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let mesh = triangle().into_shared();

        let mut renderer = Renderer::new(&f.gpu);
        renderer.begin(&f.camera);
        let identity = Matrix4::from_scale(1.0);
        let lines = Rc::new(Renderable::new(mesh.clone(), Some(shader.clone()), DrawMode::ClosedPath));
        renderer.submit(&Renderable::triangles(mesh.clone(), shader.clone()), identity);
        renderer.submit(&lines, identity);
        renderer.draw();
        renderer.end();

        assert_eq!(renderer.stats().mesh_binds, 2);
        assert_eq!(
            f.backend.count(|c| matches!(c, GpuCall::DrawArrays { mode: DrawMode::ClosedPath, count: 3, .. })),
            1
        );
    }

    #[test]
    fn test_incomplete_renderables_are_skipped() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));

        let mut scene = Scene::new();
        let no_shader = Rc::new(Renderable::new(cube().into_shared(), None, DrawMode::Triangles));
        let empty_mesh = Renderable::triangles(Mesh::new().into_shared(), shader);
        scene.create_child(scene.root(), Some(no_shader)).unwrap();
        scene.create_child(scene.root(), Some(empty_mesh)).unwrap();

        let mut renderer = Renderer::new(&f.gpu);
        renderer.draw_scene(&mut scene, &f.camera);

        assert_eq!(f.backend.count(is_draw), 0);
        assert_eq!(renderer.stats().skipped, 2);
    }

    #[test]
    fn test_cube_scene_end_to_end() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let cube = Renderable::triangles(cube().into_shared(), shader);

        let mut scene = Scene::new();
        let id = scene.create_child(scene.root(), Some(cube)).unwrap();
        let node = scene.node_mut(id).unwrap();
        node.set_translation(Vector3::new(5.0, 0.0, 0.0));
        node.rotate_y(Deg(90.0).into());

        let mut renderer = Renderer::new(&f.gpu);
        renderer.draw_scene(&mut scene, &f.camera);

        let draws: Vec<GpuCall> = f.backend.calls().into_iter().filter(is_draw).collect();
        assert_eq!(
            draws,
            vec![GpuCall::DrawArrays { mode: DrawMode::Triangles, first: 0, count: 36 }]
        );

        let model = f
            .backend
            .calls()
            .into_iter()
            .find_map(|c| match c {
                GpuCall::SetUniform { name: Some(name), value: UniformValue::Mat4(m), .. }
                    if name == Shader::MODEL_MATRIX =>
                {
                    Some(m)
                }
                _ => None,
            })
            .unwrap();
        let expected = Matrix4::from_translation(Vector3::new(5.0, 0.0, 0.0)) * Matrix4::from_angle_y(Deg(90.0));
        for (got, want) in model.iter().zip(mat4_array(&expected).iter()) {
            assert!((got - want).abs() < 1e-5, "{:?} != {:?}", model, expected);
        }

        let ubo = f.camera.ubo().unwrap().borrow().handle();
        let floats = floats_from_bytes(&f.backend.buffer_data(ubo).unwrap());
        assert_eq!(&floats[..16], &mat4_array(&f.camera.view_matrix()));
        assert_eq!(&floats[16..32], &mat4_array(&f.camera.projection_matrix()));
        assert_eq!(f.backend.bound_uniform_buffer(Shader::CAMERA_BINDING), None);
    }

    #[test]
    fn test_begin_clears_per_settings() {
        let f = fixture();
        let mut renderer = Renderer::new(&f.gpu);
        renderer.set_clear_color([0.2, 0.3, 0.4, 1.0]);

        renderer.begin(&f.camera);
        renderer.end();
        renderer.set_clear_stencil(false);
        renderer.begin(&f.camera);
        renderer.end();
        renderer.set_auto_clear(false);
        renderer.begin(&f.camera);
        renderer.end();

        let clears: Vec<GpuCall> = f
            .backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GpuCall::Clear { .. }))
            .collect();
        assert_eq!(
            clears,
            vec![
                GpuCall::Clear { flags: ClearFlags::ALL, color: [0.2, 0.3, 0.4, 1.0] },
                GpuCall::Clear { flags: ClearFlags::COLOR_DEPTH, color: [0.2, 0.3, 0.4, 1.0] },
            ]
        );
    }

    #[test]
    fn test_out_of_order_calls_are_ignored() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let mut renderer = Renderer::new(&f.gpu);

        renderer.submit(&Renderable::triangles(cube().into_shared(), shader), Matrix4::from_scale(1.0));
        assert_eq!(renderer.pending_draws(), 0);

        renderer.end();
        assert_eq!(renderer.state(), FrameState::Idle);

        f.backend.clear_calls();
        renderer.draw();
        assert!(f.backend.calls().is_empty());
        assert_eq!(renderer.current_stats().shader_binds, 0);

        renderer.begin(&f.camera);
        renderer.begin(&f.camera);
        assert_eq!(renderer.state(), FrameState::Recording);
        assert_eq!(f.backend.count(|c| matches!(c, GpuCall::Clear { .. })), 1);
        renderer.end();
    }

    #[test]
    fn test_debug_names_backend() {
        let f = fixture();
        let renderer = Renderer::new(&f.gpu);
        let text = format!("{renderer:?}");
        assert!(text.contains("recording"));
        assert!(text.contains("Idle"));
    }

    #[test]
    fn test_indexed_mesh_draws_through_index_buffer() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let mesh = generate_cube()
            .to_indexed_mesh(Vector3::new(1.0, 1.0, 1.0))
            .into_shared();

        let mut renderer = Renderer::new(&f.gpu);
        renderer.begin(&f.camera);
        renderer.submit(&Renderable::triangles(mesh, shader), Matrix4::from_scale(1.0));
        renderer.draw();
        renderer.end();

        assert_eq!(
            f.backend.count(|c| *c == GpuCall::DrawIndexed { mode: DrawMode::Triangles, count: 36 }),
            1
        );
    }

    #[test]
    fn test_dirty_mesh_uploads_before_next_frame() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let mesh = triangle().into_shared();
        let renderable = Renderable::triangles(mesh.clone(), shader);

        let mut renderer = Renderer::new(&f.gpu);
        renderer.begin(&f.camera);
        renderer.submit(&renderable, Matrix4::from_scale(1.0));
        renderer.draw();
        renderer.end();

        mesh.borrow_mut().color_all(Vector3::new(1.0, 0.0, 0.0));
        f.backend.clear_calls();
        renderer.begin(&f.camera);
        renderer.submit(&renderable, Matrix4::from_scale(1.0));
        renderer.draw();
        renderer.end();

        let vertex_buffer = mesh.borrow().vertex_buffer().unwrap().handle();
        assert_eq!(
            f.backend.count(|c| matches!(c, GpuCall::WriteBuffer { buffer, .. } if *buffer == vertex_buffer)),
            1
        );
        assert!(!mesh.borrow().is_dirty());
    }

    #[test]
    fn test_draw_renderable_immediately() {
        let f = fixture();
        let shader = Rc::new(Shader::basic(&f.gpu));
        let renderable = Renderable::triangles(triangle().into_shared(), shader.clone());
        let mut renderer = Renderer::new(&f.gpu);

        renderer.draw_renderable(&renderable, &Matrix4::from_scale(2.0));

        assert_eq!(f.backend.count(is_draw), 1);
        assert_eq!(f.backend.bound_program(), None);
        assert_eq!(f.backend.bound_vertex_array(), None);
        assert_eq!(renderer.current_stats().draw_calls, 1);
    }
}
