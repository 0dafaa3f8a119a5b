//! # Graphics Module
//!
//! ## Architecture Overview
//!
//! - **Backend** ([`backend`]) - The device seam: wgpu or a recording mock
//! - **Resources** ([`resources`]) - Buffers, vertex arrays, shaders, textures
//! - **Scene** ([`scene`]) - Meshes, renderables and the node hierarchy
//! - **Camera** ([`camera`]) - View and projection with a shared uniform block
//! - **Rendering** ([`rendering`]) - The batching renderer
//! - **Geometry** ([`geometry`]) - Procedural primitive shapes
//! - **Light** ([`light`]) - Point light uniforms
//!
//! Every resource holds a [`backend::Gpu`] and releases its device object on drop.

pub mod backend;
pub mod camera;
pub mod geometry;
pub mod light;
pub mod math;
pub mod rendering;
pub mod resources;
pub mod scene;

pub use camera::Camera;
pub use light::Light;
pub use rendering::Renderer;
pub use scene::Scene;
