//! Drawable units: a mesh, the shader that draws it, and a topology.

use std::rc::Rc;

use crate::gfx::resources::shader::Shader;
use crate::gfx::scene::mesh::SharedMesh;

/// How a mesh's vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    #[default]
    Triangles,
    /// Triangle strip.
    Strip,
    /// Triangle fan around the first vertex.
    Fan,
    Point,
    /// Independent line segments.
    Line,
    /// Open line strip.
    Path,
    /// Line strip returning to its first vertex.
    ClosedPath,
}

/// Immutable (mesh, shader, mode) triple.
///
/// Share it between nodes with `Rc` to draw the same thing several times;
/// the renderer batches such nodes into one shader and mesh bind.
#[derive(Debug)]
pub struct Renderable {
    mesh: SharedMesh,
    shader: Option<Rc<Shader>>,
    mode: DrawMode,
}

impl Renderable {
    pub fn new(mesh: SharedMesh, shader: Option<Rc<Shader>>, mode: DrawMode) -> Self {
        Self { mesh, shader, mode }
    }

    /// Triangles drawn with `shader`.
    pub fn triangles(mesh: SharedMesh, shader: Rc<Shader>) -> Rc<Self> {
        Rc::new(Self::new(mesh, Some(shader), DrawMode::Triangles))
    }

    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    pub fn shader(&self) -> Option<&Rc<Shader>> {
        self.shader.as_ref()
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }
}
