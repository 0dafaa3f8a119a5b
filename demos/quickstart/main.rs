//! # Thistle Quickstart
//!
//! A ground plane with a spinning cube that carries a smaller orbiting cube.
//! Every cube shares one mesh and one shader, so the renderer issues one
//! shader bind and one mesh bind per frame for all of them.
//!
//! ## Usage:
//! ```bash
//! cargo run --example quickstart
//! ```
//!
//! ## Controls:
//! - WASD / Q / E: move
//! - Right mouse drag: look around
//! - Escape: quit

use std::rc::Rc;

use thistle::prelude::*;

#[derive(Default)]
struct Quickstart {
    scene: Scene,
    camera: Option<Camera>,
    spinner: Option<NodeId>,
}

impl App for Quickstart {
    fn init(&mut self, gpu: &Gpu) -> anyhow::Result<()> {
        let shader = Rc::new(Shader::basic(gpu));

        let mut cube_mesh = cube();
        cube_mesh.color_all(Vector3::new(0.9, 0.5, 0.2));
        let cube_mesh = cube_mesh.into_shared();

        let mut ground = plane(20.0, 20.0);
        ground.color_all(Vector3::new(0.3, 0.35, 0.3));
        let ground = Renderable::triangles(ground.into_shared(), shader.clone());

        let root = self.scene.root();
        let floor = self.scene.create_child(root, Some(ground))?;
        if let Some(node) = self.scene.node_mut(floor) {
            node.set_translation(Vector3::new(0.0, -1.0, 0.0));
        }

        let spinner = self
            .scene
            .create_child(root, Some(Renderable::triangles(cube_mesh.clone(), shader.clone())))?;
        let moon = self
            .scene
            .create_child(spinner, Some(Renderable::triangles(cube_mesh, shader)))?;
        if let Some(node) = self.scene.node_mut(moon) {
            node.set_translation(Vector3::new(2.0, 0.5, 0.0));
            node.set_scale(Vector3::new(0.4, 0.4, 0.4));
        }
        self.spinner = Some(spinner);

        let mut camera = Camera::perspective(60.0, 1200.0 / 800.0, 0.1, 200.0, Vector3::new(0.0, 3.0, 8.0));
        camera.look_at(Vector3::new(0.0, 0.0, 0.0));
        camera.create_ubo(gpu);
        self.camera = Some(camera);
        Ok(())
    }

    fn update(&mut self, dt: f32, input: &InputState) {
        if let Some(node) = self.spinner.and_then(|id| self.scene.node_mut(id)) {
            node.rotate_y(Rad(dt));
        }

        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        camera.process_move(input.wasd_movement(), dt);
        if input.mouse_down(MouseButton::Right) {
            let offset = input.mouse_offset();
            camera.process_orbit(Vector2::new(-offset.x, -offset.y), 1.0, false);
        }
    }

    fn display(&mut self, renderer: &mut Renderer, _dt: f32) {
        if let Some(camera) = self.camera.as_ref() {
            renderer.draw_scene(&mut self.scene, camera);
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(camera) = self.camera.as_mut() {
            camera.resize(width, height);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::default()
        .with_title("thistle quickstart")
        .with_clear_color([0.55, 0.6, 0.7, 1.0]);
    Engine::new(config, Quickstart::default()).run()
}
