//! Free-flying camera with a shared view/projection uniform block.

use std::cell::RefCell;
use std::f32::consts::PI;
use std::rc::Rc;

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Quaternion, Rad, Rotation, Rotation3, Vector2, Vector3};

use super::projection::Projection;
use crate::error::BufferError;
use crate::gfx::backend::Gpu;
use crate::gfx::resources::buffer::{UniformBuffer, MAT4_SIZE};
use crate::gfx::resources::shader::Shader;

pub const DEFAULT_MOVE_SPEED: f32 = 3.0;
pub const DEFAULT_ORBIT_SPEED: f32 = 0.05;
/// Closest the view direction may get to straight up or down, in radians.
pub const DEFAULT_VERTICAL_MARGIN: f32 = 0.15;

/// Camera-relative movement axes, each usually in -1..=1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Movement {
    pub right: f32,
    pub up: f32,
    pub forward: f32,
}

impl Movement {
    pub fn new(right: f32, up: f32, forward: f32) -> Self {
        Self { right, up, forward }
    }

    pub fn is_zero(&self) -> bool {
        self.right == 0.0 && self.up == 0.0 && self.forward == 0.0
    }
}

/// Shared handle to the camera's uniform block.
pub type CameraUbo = Rc<RefCell<UniformBuffer>>;

/// A camera defined by a position, a view direction and a world up vector.
///
/// The view matrix is derived from those three every time one of them
/// changes. Several cameras may share one uniform block; the renderer
/// uploads the active camera's matrices into it at the start of a frame.
#[derive(Debug)]
pub struct Camera {
    position: Vector3<f32>,
    world_up: Vector3<f32>,
    front: Vector3<f32>,
    right: Vector3<f32>,
    up: Vector3<f32>,
    move_speed: f32,
    orbit_speed: f32,
    margin: f32,
    view: Matrix4<f32>,
    projection: Projection,
    projection_matrix: Matrix4<f32>,
    ubo: Option<CameraUbo>,
}

impl Camera {
    /// Camera at `position` looking down -Z with +Y as world up.
    pub fn new(projection: Projection, position: Vector3<f32>) -> Self {
        let mut camera = Self {
            position,
            world_up: Vector3::unit_y(),
            front: -Vector3::unit_z(),
            right: Vector3::unit_x(),
            up: Vector3::unit_y(),
            move_speed: DEFAULT_MOVE_SPEED,
            orbit_speed: DEFAULT_ORBIT_SPEED,
            margin: DEFAULT_VERTICAL_MARGIN,
            view: Matrix4::from_scale(1.0),
            projection,
            projection_matrix: projection.matrix(),
            ubo: None,
        };
        camera.update_view();
        camera
    }

    /// # Arguments
    /// * `fov` - Vertical field of view in degrees
    pub fn perspective(fov: f32, aspect: f32, near: f32, far: f32, position: Vector3<f32>) -> Self {
        Self::new(
            Projection::Perspective {
                fov: Deg(fov),
                aspect,
                near,
                far,
            },
            position,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn orthographic(
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
        position: Vector3<f32>,
    ) -> Self {
        Self::new(
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            },
            position,
        )
    }

    fn update_view(&mut self) {
        self.right = self.front.cross(self.world_up).normalize();
        self.up = self.right.cross(self.front);
        self.view = Matrix4::look_to_rh(Point3::from_vec(self.position), self.front, self.up);
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn projection_matrix(&self) -> Matrix4<f32> {
        self.projection_matrix
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.projection_matrix = projection.matrix();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.projection.resize(width, height);
        self.projection_matrix = self.projection.matrix();
    }

    pub fn set_position(&mut self, position: Vector3<f32>) {
        self.position = position;
        self.update_view();
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    /// Sets the world up vector. Ignored when zero or parallel to the view direction.
    pub fn set_up(&mut self, up: Vector3<f32>) {
        if up.magnitude2() == 0.0 || parallel(self.front, up) {
            log::warn!("camera up {:?} is zero or parallel to the view direction; ignoring", up);
            return;
        }
        self.world_up = up.normalize();
        self.update_view();
    }

    pub fn world_up(&self) -> Vector3<f32> {
        self.world_up
    }

    pub fn front(&self) -> Vector3<f32> {
        self.front
    }

    pub fn right(&self) -> Vector3<f32> {
        self.right
    }

    pub fn up(&self) -> Vector3<f32> {
        self.up
    }

    /// Turns the camera towards `target`. Ignored when `target` is the camera
    /// position or lies straight along the world up axis.
    pub fn look_at(&mut self, target: Vector3<f32>) {
        let direction = target - self.position;
        if direction.magnitude2() == 0.0 {
            log::warn!("look_at target equals the camera position; ignoring");
            return;
        }
        if parallel(direction, self.world_up) {
            log::warn!("look_at direction is parallel to the world up vector; ignoring");
            return;
        }
        self.front = direction.normalize();
        self.update_view();
    }

    /// Moves along the camera axes at the move speed, `dt` in seconds.
    pub fn process_move(&mut self, movement: Movement, dt: f32) {
        if movement.is_zero() {
            return;
        }
        let offsets = Vector3::new(movement.right, movement.up, movement.forward).normalize()
            * self.move_speed
            * dt;
        self.position += self.right * offsets.x + self.up * offsets.y + self.front * offsets.z;
        self.update_view();
    }

    /// Rotates the view direction by a 2D offset, usually the mouse delta.
    ///
    /// `offset.x` yaws around the camera up axis and `offset.y` pitches
    /// around the right axis. Pitch stops short of the world up and down
    /// directions by the vertical margin.
    pub fn process_orbit(&mut self, offset: Vector2<f32>, dt: f32, invert: bool) {
        let direction = if invert { -1.0 } else { 1.0 };
        let yaw = direction * offset.x * self.orbit_speed * dt;
        let mut pitch = direction * offset.y * self.orbit_speed * dt;

        let diff = self.front.angle(self.world_up).0;
        if diff - pitch < self.margin {
            pitch = diff - self.margin;
        } else if PI - diff + pitch < self.margin {
            pitch = -(PI - diff - self.margin);
        }

        let q = Quaternion::from_axis_angle(self.right, Rad(pitch))
            * Quaternion::from_axis_angle(self.up, Rad(yaw));
        self.front = q.rotate_vector(self.front).normalize();
        self.update_view();
    }

    pub fn set_move_speed(&mut self, speed: f32) {
        self.move_speed = speed;
    }

    pub fn set_orbit_speed(&mut self, speed: f32) {
        self.orbit_speed = speed;
    }

    pub fn set_vertical_margin(&mut self, margin: f32) {
        self.margin = margin;
    }

    pub fn set_ubo(&mut self, ubo: Option<CameraUbo>) {
        self.ubo = ubo;
    }

    pub fn ubo(&self) -> Option<&CameraUbo> {
        self.ubo.as_ref()
    }

    /// Creates a view/projection block at the camera binding and attaches it.
    pub fn create_ubo(&mut self, gpu: &Gpu) -> CameraUbo {
        let ubo = Rc::new(RefCell::new(UniformBuffer::new(
            gpu,
            2 * MAT4_SIZE,
            Shader::CAMERA_BINDING,
        )));
        self.ubo = Some(ubo.clone());
        ubo
    }

    /// Writes `{view, projection}` into the attached uniform block.
    ///
    /// Does nothing when no block is attached.
    pub fn upload(&self) -> Result<(), BufferError> {
        match &self.ubo {
            Some(ubo) => ubo.borrow_mut().fill(&[self.view, self.projection_matrix]),
            None => Ok(()),
        }
    }
}

/// True when `a` and `b` point along the same line, leaving no right axis.
fn parallel(a: Vector3<f32>, b: Vector3<f32>) -> bool {
    a.normalize().cross(b.normalize()).magnitude2() < 1e-10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::RecordingBackend;
    use crate::gfx::math::{mat4_approx_eq, mat4_array, vec3_approx_eq};
    use cgmath::{SquareMatrix, Vector4};

    fn camera_at(position: Vector3<f32>) -> Camera {
        Camera::perspective(60.0, 1.5, 0.1, 200.0, position)
    }

    #[test]
    fn test_default_view_at_origin_is_identity() {
        let camera = camera_at(Vector3::new(0.0, 0.0, 0.0));
        assert!(mat4_approx_eq(&camera.view_matrix(), &Matrix4::identity(), 1e-6));
        assert!(vec3_approx_eq(camera.right(), Vector3::unit_x(), 1e-6));
    }

    #[test]
    fn test_look_at_puts_target_on_negative_z() {
        let mut camera = camera_at(Vector3::new(0.0, 5.0, 10.0));
        camera.look_at(Vector3::new(0.0, 0.0, 0.0));

        let eye_space = camera.view_matrix() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!(eye_space.x.abs() < 1e-5);
        assert!(eye_space.y.abs() < 1e-5);
        assert!((eye_space.z + 125.0f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_vertical_look_at_keeps_previous_pose() {
        let mut camera = camera_at(Vector3::new(0.0, 0.0, 0.0));
        let view = camera.view_matrix();

        camera.look_at(Vector3::new(0.0, 5.0, 0.0));
        camera.look_at(Vector3::new(0.0, -2.0, 0.0));
        assert!(vec3_approx_eq(camera.front(), -Vector3::unit_z(), 1e-6));
        assert!(mat4_approx_eq(&camera.view_matrix(), &view, 1e-6));

        camera.set_up(Vector3::new(0.0, 0.0, 3.0));
        camera.set_up(Vector3::new(0.0, 0.0, 0.0));
        assert!(vec3_approx_eq(camera.world_up(), Vector3::unit_y(), 1e-6));

        let view: [[f32; 4]; 4] = camera.view_matrix().into();
        assert!(view.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_process_move_forward() {
        let mut camera = camera_at(Vector3::new(0.0, 0.0, 0.0));
        camera.process_move(Movement::new(0.0, 0.0, 1.0), 0.5);
        assert!(vec3_approx_eq(camera.position(), Vector3::new(0.0, 0.0, -1.5), 1e-6));

        camera.process_move(Movement::default(), 1.0);
        assert!(vec3_approx_eq(camera.position(), Vector3::new(0.0, 0.0, -1.5), 1e-6));
    }

    #[test]
    fn test_orbit_stops_at_vertical_margin() {
        let mut camera = camera_at(Vector3::new(0.0, 0.0, 0.0));
        for _ in 0..50 {
            camera.process_orbit(Vector2::new(0.0, 400.0), 0.1, false);
        }
        let angle = camera.front().angle(camera.world_up()).0;
        assert!((angle - DEFAULT_VERTICAL_MARGIN).abs() < 1e-3);

        for _ in 0..50 {
            camera.process_orbit(Vector2::new(0.0, 400.0), 0.1, true);
        }
        let angle = camera.front().angle(camera.world_up()).0;
        assert!((angle - (PI - DEFAULT_VERTICAL_MARGIN)).abs() < 1e-3);
    }

    #[test]
    fn test_resize_changes_aspect() {
        let mut camera = camera_at(Vector3::new(0.0, 0.0, 0.0));
        camera.resize(800, 400);
        assert_eq!(
            camera.projection(),
            Projection::Perspective {
                fov: Deg(60.0),
                aspect: 2.0,
                near: 0.1,
                far: 200.0,
            }
        );
        camera.resize(800, 0);
        assert!(matches!(camera.projection(), Projection::Perspective { aspect, .. } if aspect == 2.0));
    }

    #[test]
    fn test_upload_writes_view_then_projection() {
        let backend = Rc::new(RecordingBackend::new());
        let gpu: Gpu = backend.clone();
        let mut camera = camera_at(Vector3::new(1.0, 2.0, 3.0));
        let ubo = camera.create_ubo(&gpu);

        camera.upload().unwrap();
        let floats = backend.buffer_floats(ubo.borrow().handle()).unwrap();
        assert_eq!(floats.len(), 32);
        assert_eq!(&floats[..16], &mat4_array(&camera.view_matrix()));
        assert_eq!(&floats[16..], &mat4_array(&camera.projection_matrix()));
        assert_eq!(backend.bound_uniform_buffer(Shader::CAMERA_BINDING), Some(ubo.borrow().handle()));
    }
}
