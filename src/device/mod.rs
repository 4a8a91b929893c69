//! The GPU seam used by the render pipeline.
//!
//! [`RenderDevice`] is deliberately narrow: it covers the handful of
//! operations the pipeline itself issues (allocate and release images, bind a
//! render destination, bind inputs, resolve, present). Everything a node draws
//! goes through the concrete device type the node is written against.
//!
//! # Implementations
//!
//! - [`WgpuDevice`]: real GPU work through wgpu, presenting to a window surface
//! - [`HeadlessDevice`]: records commands without touching a GPU; used by tests

mod headless;
mod wgpu_device;

pub use headless::{Command, HeadlessDevice};
pub use wgpu_device::{WgpuDevice, texture_format};

use thiserror::Error;

slotmap::new_key_type! {
    /// Handle to an image owned by a [`RenderDevice`].
    pub struct ImageId;
}

/// Pixel format of a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Rgba8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl ImageFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

/// Description of an image to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// `1` for a regular image, more for a multisampled one.
    pub sample_count: u32,
}

impl ImageDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            sample_count: 1,
        }
    }

    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// Optional min/mag filter overrides applied when an input is bound.
///
/// `None` leaves the device default ([`Filter::Linear`]) in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerFilters {
    pub min: Option<Filter>,
    pub mag: Option<Filter>,
}

impl SamplerFilters {
    pub fn new(min: Option<Filter>, mag: Option<Filter>) -> Self {
        Self { min, mag }
    }

    pub fn nearest() -> Self {
        Self::new(Some(Filter::Nearest), Some(Filter::Nearest))
    }

    /// Effective `(min, mag)` filters after applying defaults.
    pub fn resolve(self) -> (Filter, Filter) {
        (self.min.unwrap_or_default(), self.mag.unwrap_or_default())
    }
}

/// What happens to a render destination's previous contents when it is bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f64; 4]),
    Load,
}

/// Pixel rectangle on the display surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Errors raised by device implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("image {0:?} does not exist on this device")]
    UnknownImage(ImageId),
    #[error("unsupported sample count {0}")]
    UnsupportedSampleCount(u32),
    #[error("no render target is bound")]
    NoActiveTarget,
    #[error("resolve between mismatched images: {0}")]
    ResolveMismatch(String),
    #[error("surface error: {0}")]
    Surface(String),
}

/// Operations the render pipeline issues against a GPU.
///
/// All calls are synchronous from the engine's point of view; any queuing a
/// driver does behind them is not modeled.
pub trait RenderDevice {
    /// Allocates an image.
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId, DeviceError>;

    /// Releases an image. Unknown ids are ignored.
    fn release_image(&mut self, image: ImageId);

    /// Description of a live image.
    fn image_desc(&self, image: ImageId) -> Option<&ImageDesc>;

    /// Makes `colors` (and optionally `depth`) the active render destination.
    fn begin_target(
        &mut self,
        colors: &[ImageId],
        depth: Option<ImageId>,
        load: LoadOp,
    ) -> Result<(), DeviceError>;

    /// Detaches the active render destination.
    fn end_target(&mut self);

    /// Binds `image` as the sampled input at `slot`.
    fn bind_input(
        &mut self,
        slot: u32,
        image: ImageId,
        filters: SamplerFilters,
    ) -> Result<(), DeviceError>;

    /// Unbinds every input.
    fn clear_inputs(&mut self);

    /// Copies a multisampled image into a single-sample image of the same size.
    ///
    /// A single-sample `src` is rejected with [`DeviceError::UnsupportedSampleCount`].
    fn resolve(&mut self, src: ImageId, dst: ImageId) -> Result<(), DeviceError>;

    /// Draws `image` into the display surface inside `viewport`.
    fn present(&mut self, image: ImageId, viewport: Viewport) -> Result<(), DeviceError>;

    /// Flushes recorded work.
    fn submit(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_default_to_linear() {
        assert_eq!(
            SamplerFilters::default().resolve(),
            (Filter::Linear, Filter::Linear)
        );
        let overridden = SamplerFilters::new(Some(Filter::Nearest), None);
        assert_eq!(overridden.resolve(), (Filter::Nearest, Filter::Linear));
    }

    #[test]
    fn sample_count_never_zero() {
        let desc = ImageDesc::new("a", 4, 4, ImageFormat::Rgba8Unorm).with_samples(0);
        assert_eq!(desc.sample_count, 1);
    }
}
