//! Sampled textures and off-screen render targets.
//!
//! Images are decoded with the `image` crate, converted to RGBA8 and
//! flipped vertically so texture coordinate (0, 0) is the bottom-left
//! corner of the picture.

use std::path::Path;

use crate::error::TextureError;
use crate::gfx::backend::{
    check_gpu_error, ClearFlags, Gpu, RenderTargetHandle, TextureDesc, TextureHandle,
};

/// Coordinate wrapping outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureWrap {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

/// Sampling parameters fixed at texture creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureParams {
    pub wrap_s: TextureWrap,
    pub wrap_t: TextureWrap,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub use_mipmap: bool,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            wrap_s: TextureWrap::Repeat,
            wrap_t: TextureWrap::Repeat,
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            use_mipmap: true,
        }
    }
}

impl TextureParams {
    /// Same wrap mode on both axes.
    pub fn with_wrap(mut self, wrap: TextureWrap) -> Self {
        self.wrap_s = wrap;
        self.wrap_t = wrap;
        self
    }

    pub fn with_wrap_st(mut self, wrap_s: TextureWrap, wrap_t: TextureWrap) -> Self {
        self.wrap_s = wrap_s;
        self.wrap_t = wrap_t;
        self
    }

    /// Same filter for minification and magnification.
    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.min_filter = filter;
        self.mag_filter = filter;
        self
    }

    pub fn with_min_mag(mut self, min: TextureFilter, mag: TextureFilter) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self
    }

    pub fn with_mipmap(mut self, use_mipmap: bool) -> Self {
        self.use_mipmap = use_mipmap;
        self
    }
}

/// Decodes an image file into bottom-up RGBA8 rows.
fn load_rgba(path: &Path) -> Result<(u32, u32, Vec<u8>), TextureError> {
    let image = image::open(path).map_err(|source| TextureError::Load {
        path: path.display().to_string(),
        source,
    })?;
    let rgba = image.flipv().to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((width, height, rgba.into_raw()))
}

/// A 2D RGBA8 texture.
pub struct Texture {
    gpu: Gpu,
    handle: TextureHandle,
    width: u32,
    height: u32,
    params: TextureParams,
    owned: bool,
}

impl Texture {
    /// Creates a zero-filled texture.
    pub fn empty(gpu: &Gpu, width: u32, height: u32, params: TextureParams) -> Self {
        let handle = gpu.create_texture(&TextureDesc {
            width,
            height,
            params,
        });
        check_gpu_error(gpu.as_ref(), "create empty texture");
        log::debug!("texture {} created ({}x{})", handle.0, width, height);
        Self {
            gpu: gpu.clone(),
            handle,
            width,
            height,
            params,
            owned: true,
        }
    }

    /// Creates a texture from tightly packed RGBA8 pixels, first row at the bottom.
    pub fn from_rgba(gpu: &Gpu, width: u32, height: u32, rgba: &[u8], params: TextureParams) -> Self {
        let texture = Self::empty(gpu, width, height, params);
        texture.gpu.write_texture(texture.handle, [0, 0], [width, height], rgba);
        check_gpu_error(texture.gpu.as_ref(), "upload texture data");
        texture
    }

    /// Loads an image file.
    ///
    /// # Arguments
    /// * `gpu` - Backend the texture is created on
    /// * `path` - Any format the `image` crate can decode (png, jpeg, bmp)
    /// * `params` - Wrap and filter settings
    pub fn from_file(gpu: &Gpu, path: impl AsRef<Path>, params: TextureParams) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let (width, height, rgba) = load_rgba(path).inspect_err(|e| log::error!("{}", e))?;
        Ok(Self::from_rgba(gpu, width, height, &rgba, params))
    }

    /// Overwrites every texel with zero.
    pub fn clear(&mut self) {
        let zeros = vec![0u8; (self.width * self.height * 4) as usize];
        self.gpu
            .write_texture(self.handle, [0, 0], [self.width, self.height], &zeros);
        check_gpu_error(self.gpu.as_ref(), "clear texture");
    }

    /// Copies an image into the texture with its lower-left corner at `start`.
    ///
    /// Images that do not fit are rejected and the texture is left unchanged.
    pub fn mix_image(&mut self, path: impl AsRef<Path>, start: [u32; 2]) -> Result<(), TextureError> {
        let (width, height, rgba) = load_rgba(path.as_ref()).inspect_err(|e| log::error!("{}", e))?;
        self.write_region(start, width, height, &rgba)
    }

    /// Writes RGBA8 pixels into a sub-rectangle, with the same bounds check as
    /// [`Texture::mix_image`].
    pub fn write_region(&mut self, start: [u32; 2], width: u32, height: u32, rgba: &[u8]) -> Result<(), TextureError> {
        let fits = start[0]
            .checked_add(width)
            .is_some_and(|right| right <= self.width)
            && start[1]
                .checked_add(height)
                .is_some_and(|top| top <= self.height);
        if !fits {
            let err = TextureError::OutOfBounds {
                x: start[0],
                y: start[1],
                width,
                height,
                target_width: self.width,
                target_height: self.height,
            };
            log::error!("{}", err);
            return Err(err);
        }

        self.gpu.write_texture(self.handle, start, [width, height], rgba);
        check_gpu_error(self.gpu.as_ref(), "update texture data");
        Ok(())
    }

    /// Replaces the whole texture with an image, adopting its size.
    pub fn replace_image(&mut self, path: impl AsRef<Path>) -> Result<(), TextureError> {
        let (width, height, rgba) = load_rgba(path.as_ref()).inspect_err(|e| log::error!("{}", e))?;

        if (width, height) != (self.width, self.height) {
            let handle = self.gpu.create_texture(&TextureDesc {
                width,
                height,
                params: self.params,
            });
            if self.owned {
                self.gpu.destroy_texture(self.handle);
            }
            self.handle = handle;
            self.width = width;
            self.height = height;
            self.owned = true;
        }

        self.gpu.write_texture(self.handle, [0, 0], [width, height], &rgba);
        check_gpu_error(self.gpu.as_ref(), "replace texture data");
        Ok(())
    }

    pub fn bind(&self, slot: u32) {
        self.gpu.bind_texture(slot, Some(self.handle));
    }

    pub fn unbind(&self, slot: u32) {
        self.gpu.bind_texture(slot, None);
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn params(&self) -> TextureParams {
        self.params
    }

    /// Reads the texels back (RGBA8, bottom row first).
    pub fn read_pixels(&self) -> Vec<u8> {
        self.gpu.read_texture(self.handle)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.owned {
            self.gpu.destroy_texture(self.handle);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("handle", &self.handle)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Off-screen framebuffer whose color attachment can be sampled afterwards.
pub struct RenderTargetTexture {
    gpu: Gpu,
    handle: RenderTargetHandle,
    color: Texture,
    clear_color: Option<[f32; 4]>,
}

impl RenderTargetTexture {
    pub fn new(gpu: &Gpu, width: u32, height: u32) -> Self {
        let handle = gpu.create_render_target(width, height);
        let incomplete = check_gpu_error(gpu.as_ref(), "create render target");
        if incomplete {
            log::warn!("render target {} is not complete, drawing into it does nothing", handle.0);
        }
        let color_handle = gpu.render_target_texture(handle).unwrap_or(TextureHandle(0));
        Self {
            gpu: gpu.clone(),
            handle,
            color: Texture {
                gpu: gpu.clone(),
                handle: color_handle,
                width,
                height,
                params: TextureParams::default().with_wrap(TextureWrap::ClampToEdge).with_mipmap(false),
                owned: false,
            },
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
        }
    }

    /// Color used when the target is bound; `None` keeps the previous contents.
    pub fn set_clear_color(&mut self, color: Option<[f32; 4]>) {
        self.clear_color = color;
    }

    /// Redirects drawing into this target, clearing it first if a clear color is set.
    pub fn bind(&self) {
        self.gpu.bind_render_target(Some(self.handle));
        self.gpu.set_viewport(0, 0, self.color.width, self.color.height);
        if let Some(color) = self.clear_color {
            self.gpu.clear(ClearFlags::ALL, color);
        }
    }

    /// Restores the default framebuffer.
    pub fn unbind(&self) {
        self.gpu.bind_render_target(None);
        let (width, height) = (self.color.width, self.color.height);
        log::trace!("render target {} ({}x{}) unbound", self.handle.0, width, height);
    }

    /// The color attachment, for sampling in later passes.
    pub fn texture(&self) -> &Texture {
        &self.color
    }

    pub fn handle(&self) -> RenderTargetHandle {
        self.handle
    }
}

impl Drop for RenderTargetTexture {
    fn drop(&mut self) {
        self.gpu.destroy_render_target(self.handle);
    }
}
