//! Thistle 3D Engine
//!
//! A small real-time 3D engine: a scene graph with lazily resolved world
//! transforms, meshes mirrored into GPU buffers, and a renderer that batches
//! draws by shader and mesh. Rendering goes through wgpu on a winit window,
//! or through a recording backend for headless use and tests.

pub mod app;
pub mod config;
pub mod error;
pub mod gfx;
pub mod input;
pub mod logging;
pub mod prelude;

pub use app::{App, Engine};
