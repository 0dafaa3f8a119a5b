//! Engine configuration.

use crate::logging::LoggingConfig;

/// Settings used by [`crate::app::Engine`] when it opens the window and
/// builds the renderer.
///
/// Built with `Default` plus `with_*` calls:
///
/// ```no_run
/// use thistle::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_title("Demo")
///     .with_size(1280, 720)
///     .with_vsync(true);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub resizable: bool,
    pub clear_color: [f32; 4],
    pub auto_clear: bool,
    pub clear_stencil: bool,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "thistle".to_string(),
            width: 1200,
            height: 800,
            vsync: true,
            resizable: true,
            clear_color: [0.1, 0.1, 0.12, 1.0],
            auto_clear: true,
            clear_stencil: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_owned();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    /// Sets the color used when the renderer clears the frame.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Turns automatic clearing at the start of each frame on or off.
    pub fn with_auto_clear(mut self, auto_clear: bool) -> Self {
        self.auto_clear = auto_clear;
        self
    }

    pub fn with_clear_stencil(mut self, clear_stencil: bool) -> Self {
        self.clear_stencil = clear_stencil;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Width over height, guarded against a zero-height window.
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = EngineConfig::default()
            .with_title("cubes")
            .with_size(800, 600)
            .with_auto_clear(false);

        assert_eq!(config.title, "cubes");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.auto_clear);
        assert!(config.clear_stencil);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let config = EngineConfig::default().with_size(0, 0);
        assert_eq!((config.width, config.height), (1, 1));
        assert!((config.aspect_ratio() - 1.0).abs() < f32::EPSILON);
    }
}
