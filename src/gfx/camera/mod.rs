//! Cameras and projections.

#[allow(clippy::module_inception)]
pub mod camera;
pub mod projection;

pub use camera::{Camera, CameraUbo, Movement};
pub use projection::{Projection, OPENGL_TO_WGPU_MATRIX};
