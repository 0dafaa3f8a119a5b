//! Error types shared across the engine.
//!
//! Nothing in the per-frame path returns these as hard failures. Buffers,
//! textures and the scene report them so callers can decide; the renderer
//! logs and skips. Only [`EngineError::Context`] stops an application.

use thiserror::Error;

/// Errors reported by the graphics device.
///
/// These travel through the polled error queue of a
/// [`GraphicsBackend`](crate::gfx::backend::GraphicsBackend) rather than
/// through return values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GpuError {
    #[error("shader compilation failed ({stage}): {message}")]
    ShaderCompile { stage: ShaderStage, message: String },

    #[error("program link failed: {0}")]
    ProgramLink(String),

    #[error("invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("incomplete framebuffer: {0}")]
    IncompleteFramebuffer(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("validation: {0}")]
    Validation(String),
}

/// Stage a shader compile error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Errors from buffer uploads and resizes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("upload of {requested} bytes at offset {offset} exceeds capacity {capacity}")]
    CapacityExceeded {
        requested: usize,
        offset: usize,
        capacity: usize,
    },

    #[error("uniform data of {requested} bytes does not fit a {capacity} byte block")]
    UniformOverflow { requested: usize, capacity: usize },
}

/// Errors from texture creation and image loading.
#[derive(Debug, Error)]
pub enum TextureError {
    #[error("failed to load image {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("image {width}x{height} at ({x}, {y}) does not fit a {target_width}x{target_height} texture")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },
}

/// Errors from reading OBJ mesh files.
#[derive(Debug, Error)]
pub enum ObjError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("tobj: {0}")]
    Tobj(#[from] tobj::LoadError),
}

/// Errors from scene graph edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("node {0:?} does not exist")]
    MissingNode(crate::gfx::scene::NodeId),

    #[error("node {0:?} already has a parent")]
    AlreadyParented(crate::gfx::scene::NodeId),

    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    Cycle {
        parent: crate::gfx::scene::NodeId,
        child: crate::gfx::scene::NodeId,
    },
}

/// Fatal errors raised while bringing the application up.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not create a graphics context: {0}")]
    Context(String),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}
