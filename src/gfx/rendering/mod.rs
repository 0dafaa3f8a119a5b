//! Frame rendering.
//!
//! [`Renderer`] turns a [`Scene`](crate::gfx::scene::Scene) and a
//! [`Camera`](crate::gfx::camera::Camera) into batched draw calls.

pub mod renderer;

pub use renderer::{FrameState, FrameStats, Renderer};
