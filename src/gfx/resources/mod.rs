//! GPU resource wrappers
//!
//! Buffers, vertex arrays, shaders and textures. Each wrapper owns its
//! device object and releases it on drop.

pub mod buffer;
pub mod layout;
pub mod shader;
pub mod texture;
pub mod vertex_array;

pub use buffer::{GpuBuffer, IndexBuffer, UniformBuffer, VertexBuffer};
pub use layout::{ElementType, VertexBufferLayout, VertexElement};
pub use shader::{Shader, ShaderParams};
pub use texture::{RenderTargetTexture, Texture, TextureFilter, TextureParams, TextureWrap};
pub use vertex_array::VertexArray;
