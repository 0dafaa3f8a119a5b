//! # Scene Module
//!
//! Meshes, renderables and the node hierarchy that places them in the world.
//!
//! ## Key Components
//!
//! - [`Scene`] - Arena-backed node tree with lazily resolved world matrices
//! - [`SceneNode`] - Local transform, cached world matrix, optional renderable
//! - [`Mesh`] - CPU vertex list mirrored into a GPU vertex buffer
//! - [`Renderable`] - Immutable mesh + shader + [`DrawMode`] triple
//! - [`Vertex`] - The interleaved vertex format
//!
//! ## Usage
//!
//! ```no_run
//! use std::rc::Rc;
//! use cgmath::{Deg, Vector3};
//! use thistle::gfx::backend::{Gpu, RecordingBackend};
//! use thistle::gfx::geometry::cube;
//! use thistle::gfx::resources::Shader;
//! use thistle::gfx::scene::{Renderable, Scene};
//!
//! let gpu: Gpu = Rc::new(RecordingBackend::new());
//! let shader = Rc::new(Shader::basic(&gpu));
//! let cube = Renderable::triangles(cube().into_shared(), shader);
//!
//! let mut scene = Scene::new();
//! let node = scene.create_child(scene.root(), Some(cube)).unwrap();
//! let node = scene.node_mut(node).unwrap();
//! node.set_translation(Vector3::new(5.0, 0.0, 0.0));
//! node.rotate_y(Deg(90.0).into());
//! ```

pub mod mesh;
pub mod node;
pub mod obj;
pub mod renderable;
pub mod scene;
pub mod vertex;

pub use mesh::{Mesh, SharedMesh};
pub use node::{NodeId, SceneNode};
pub use renderable::{DrawMode, Renderable};
pub use scene::Scene;
pub use vertex::Vertex;
