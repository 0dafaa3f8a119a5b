//! # Thistle Prelude
//!
//! Commonly used types in one import:
//!
//! ```rust
//! use thistle::prelude::*;
//! ```

pub use crate::app::{App, Engine};
pub use crate::config::EngineConfig;
pub use crate::input::InputState;

pub use crate::gfx::backend::Gpu;
pub use crate::gfx::camera::{Camera, Movement, Projection};
pub use crate::gfx::geometry::{cube, generate_cube, generate_plane, generate_sphere, plane, triangle, GeometryData};
pub use crate::gfx::light::Light;
pub use crate::gfx::rendering::Renderer;
pub use crate::gfx::resources::{Shader, ShaderParams, Texture, TextureParams};
pub use crate::gfx::scene::{DrawMode, Mesh, NodeId, Renderable, Scene, SharedMesh, Vertex};

pub use cgmath::{Deg, InnerSpace, Matrix4, Quaternion, Rad, Vector2, Vector3, Zero};
pub use winit::event::{ElementState, MouseButton};
pub use winit::keyboard::KeyCode;
