//! Offscreen render targets owned by pipeline stages.

use crate::device::{DeviceError, ImageDesc, ImageFormat, ImageId, LoadOp, RenderDevice};
use crate::render_graph::OutputSlot;

/// Attachment layout of a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    pub color_count: u32,
    pub color_format: ImageFormat,
    pub depth: bool,
    /// `1` for single-sample targets.
    pub sample_count: u32,
}

impl TargetLayout {
    /// The same layout without multisampling, as used for resolve targets.
    pub fn single_sample(&self) -> Self {
        Self {
            sample_count: 1,
            ..self.clone()
        }
    }
}

/// An off-screen framebuffer: `color_count` color images plus an optional
/// depth image, all the same size.
///
/// Render targets are rendered to as the active destination of a stage and
/// sampled by downstream stages. The owning stage recreates them whenever the
/// frame's render resolution changes; a target never resizes in place.
///
/// Images are owned by the device; the target only holds their ids, so
/// [`RenderTarget::release`] must be called to free them.
#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    width: u32,
    height: u32,
    sample_count: u32,
    colors: Vec<ImageId>,
    depth: Option<ImageId>,
}

impl RenderTarget {
    /// Allocates every attachment of `layout` at `width` x `height`.
    ///
    /// On failure, images allocated so far are released again.
    ///
    /// # Arguments
    ///
    /// * `device` - Device that owns the images
    /// * `label` - Debug label prefix (visible in GPU debuggers like RenderDoc)
    /// * `width`, `height` - Size in pixels, usually the frame's render resolution
    /// * `layout` - Attachment counts, formats and sample count
    pub fn create<D: RenderDevice>(
        device: &mut D,
        label: &str,
        width: u32,
        height: u32,
        layout: &TargetLayout,
    ) -> Result<Self, DeviceError> {
        let mut target = Self {
            label: label.to_string(),
            width,
            height,
            sample_count: layout.sample_count.max(1),
            colors: Vec::with_capacity(layout.color_count as usize),
            depth: None,
        };

        for index in 0..layout.color_count {
            let desc = ImageDesc::new(
                format!("{label} color {index}"),
                width,
                height,
                layout.color_format,
            )
            .with_samples(target.sample_count);
            match device.create_image(&desc) {
                Ok(image) => target.colors.push(image),
                Err(e) => {
                    target.release(device);
                    return Err(e);
                }
            }
        }

        if layout.depth {
            let desc = ImageDesc::new(
                format!("{label} depth"),
                width,
                height,
                ImageFormat::Depth32Float,
            )
            .with_samples(target.sample_count);
            match device.create_image(&desc) {
                Ok(image) => target.depth = Some(image),
                Err(e) => {
                    target.release(device);
                    return Err(e);
                }
            }
        }

        log::debug!(
            "RenderTarget: allocated {:?} {}x{} ({} color, depth: {}, {} samples)",
            target.label,
            width,
            height,
            target.colors.len(),
            target.depth.is_some(),
            target.sample_count
        );
        Ok(target)
    }

    /// Frees every attachment on the device.
    pub fn release<D: RenderDevice>(self, device: &mut D) {
        log::debug!(
            "RenderTarget: releasing {:?} {}x{}",
            self.label,
            self.width,
            self.height
        );
        for image in self.colors.into_iter().chain(self.depth) {
            device.release_image(image);
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Whether the target already has the requested size.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    pub fn color(&self, index: u32) -> Option<ImageId> {
        self.colors.get(index as usize).copied()
    }

    pub fn colors(&self) -> &[ImageId] {
        &self.colors
    }

    pub fn depth(&self) -> Option<ImageId> {
        self.depth
    }

    /// Image backing an output slot.
    pub fn image(&self, slot: OutputSlot) -> Option<ImageId> {
        match slot {
            OutputSlot::Color(index) => self.color(index),
            OutputSlot::Depth => self.depth,
        }
    }

    /// Exchanges color attachment `index` with `other`.
    ///
    /// Used for ping-pong passes: the image just written moves out into
    /// `other` and the previous contents of `other` become the attachment.
    /// Returns `false` if the index is out of range.
    pub fn swap_color(&mut self, index: u32, other: &mut ImageId) -> bool {
        match self.colors.get_mut(index as usize) {
            Some(image) => {
                std::mem::swap(image, other);
                true
            }
            None => false,
        }
    }

    /// Binds the target as the device's active render destination.
    pub fn bind<D: RenderDevice>(&self, device: &mut D, load: LoadOp) -> Result<(), DeviceError> {
        device.begin_target(&self.colors, self.depth, load)
    }

    /// Detaches the target from the device.
    pub fn unbind<D: RenderDevice>(&self, device: &mut D) {
        device.end_target();
    }
}
