//! Point light parameters uploaded as shader uniforms.

use cgmath::Vector3;

use crate::gfx::resources::shader::Shader;

pub const LIGHT_POSITION: &str = "LightPosition";
pub const LIGHT_COLOR: &str = "LightColor";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    position: Vector3<f32>,
    color: Vector3<f32>,
    intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0))
    }
}

impl Light {
    /// A light of unit intensity.
    pub fn new(position: Vector3<f32>, color: Vector3<f32>) -> Self {
        Self {
            position,
            color,
            intensity: 1.0,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    pub fn set_position(&mut self, position: Vector3<f32>) {
        self.position = position;
    }

    pub fn color(&self) -> Vector3<f32> {
        self.color
    }

    pub fn set_color(&mut self, color: Vector3<f32>) {
        self.color = color;
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
    }

    /// Color scaled by intensity, as the shader receives it.
    pub fn radiance(&self) -> Vector3<f32> {
        self.color * self.intensity
    }

    /// Binds `shader` and uploads the position and scaled color to the named
    /// uniforms. Returns `false` when either uniform is missing.
    pub fn upload(&self, shader: &Shader, position_uniform: &str, color_uniform: &str) -> bool {
        shader.bind();
        let position = shader.set_vec3(position_uniform, self.position);
        let color = shader.set_vec3(color_uniform, self.radiance());
        shader.unbind();
        position && color
    }

    /// [`Light::upload`] with the default `LightPosition` / `LightColor` names.
    pub fn upload_default(&self, shader: &Shader) -> bool {
        self.upload(shader, LIGHT_POSITION, LIGHT_COLOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{Gpu, GpuCall, RecordingBackend, UniformValue};
    use crate::gfx::resources::shader::ShaderParams;
    use std::rc::Rc;

    fn lit_shader() -> (Rc<RecordingBackend>, Shader) {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        let shader = Shader::new(
            &gpu,
            ShaderParams::standard()
                .with_label("lit")
                .with_vertex_source("vs")
                .with_fragment_source("fs")
                .with_uniform(LIGHT_POSITION)
                .with_uniform(LIGHT_COLOR),
        );
        (backend, shader)
    }

    #[test]
    fn test_upload_scales_color_by_intensity() {
        let (backend, shader) = lit_shader();
        let light = Light::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(1.0, 0.5, 0.0)).with_intensity(2.0);
        backend.clear_calls();

        assert!(light.upload_default(&shader));

        let values: Vec<UniformValue> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                GpuCall::SetUniform { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                UniformValue::Vec3([1.0, 2.0, 3.0]),
                UniformValue::Vec3([2.0, 1.0, 0.0]),
            ]
        );
        assert_eq!(backend.bound_program(), None);
    }

    #[test]
    fn test_missing_uniform_reports_false() {
        let (_backend, shader) = lit_shader();
        let light = Light::default();
        assert!(!light.upload(&shader, LIGHT_POSITION, "AmbientColor"));
        assert_eq!(light.radiance(), Vector3::new(1.0, 1.0, 1.0));
    }
}
