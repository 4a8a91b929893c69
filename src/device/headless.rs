//! Headless device for testing and running without GPU hardware.
//!
//! Nothing is rendered. Each call is appended to a command log, and every
//! image carries a `contents` tag so tests can follow data through the
//! pipeline: [`HeadlessDevice::draw`] stamps the active target, a clear empties
//! it, and [`RenderDevice::resolve`] copies the tag across.

use std::collections::BTreeMap;

use slotmap::SlotMap;

use super::{DeviceError, ImageDesc, ImageId, LoadOp, RenderDevice, SamplerFilters, Viewport};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateImage { image: ImageId, desc: ImageDesc },
    ReleaseImage(ImageId),
    BeginTarget {
        colors: Vec<ImageId>,
        depth: Option<ImageId>,
        load: LoadOp,
    },
    EndTarget,
    BindInput {
        slot: u32,
        image: ImageId,
        filters: SamplerFilters,
    },
    ClearInputs,
    Draw(String),
    Resolve { src: ImageId, dst: ImageId },
    Present { image: ImageId, viewport: Viewport },
    Submit,
}

#[derive(Debug)]
struct HeadlessImage {
    desc: ImageDesc,
    contents: Option<String>,
}

#[derive(Debug)]
struct ActiveTarget {
    colors: Vec<ImageId>,
    depth: Option<ImageId>,
}

/// Recording device with no GPU behind it.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    images: SlotMap<ImageId, HeadlessImage>,
    commands: Vec<Command>,
    target: Option<ActiveTarget>,
    inputs: BTreeMap<u32, (ImageId, SamplerFilters)>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        "Headless"
    }

    /// Simulates a draw: stamps every image of the active target with `tag`.
    pub fn draw(&mut self, tag: impl Into<String>) -> Result<(), DeviceError> {
        let tag = tag.into();
        let target = self.target.as_ref().ok_or(DeviceError::NoActiveTarget)?;
        for id in target.colors.iter().chain(target.depth.iter()) {
            if let Some(image) = self.images.get_mut(*id) {
                image.contents = Some(tag.clone());
            }
        }
        log::trace!("Headless: draw {tag:?}");
        self.commands.push(Command::Draw(tag));
        Ok(())
    }

    /// Writes `tag` directly into an image, e.g. to model an uploaded texture.
    pub fn write(&mut self, image: ImageId, tag: impl Into<String>) -> Result<(), DeviceError> {
        let image = self
            .images
            .get_mut(image)
            .ok_or(DeviceError::UnknownImage(image))?;
        image.contents = Some(tag.into());
        Ok(())
    }

    /// Contents tag of an image; `None` when cleared or never written.
    pub fn contents(&self, image: ImageId) -> Option<&str> {
        self.images.get(image)?.contents.as_deref()
    }

    /// Image currently bound at an input slot.
    pub fn input(&self, slot: u32) -> Option<ImageId> {
        self.inputs.get(&slot).map(|(image, _)| *image)
    }

    /// Color images of the active target.
    pub fn active_colors(&self) -> Option<&[ImageId]> {
        self.target.as_ref().map(|t| t.colors.as_slice())
    }

    pub fn is_live(&self, image: ImageId) -> bool {
        self.images.contains_key(image)
    }

    /// Number of images currently allocated.
    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drains the command log.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    fn check(&self, image: ImageId) -> Result<&HeadlessImage, DeviceError> {
        self.images.get(image).ok_or(DeviceError::UnknownImage(image))
    }
}

impl RenderDevice for HeadlessDevice {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId, DeviceError> {
        log::trace!(
            "Headless: creating image {:?} ({}x{}, {} samples)",
            desc.label,
            desc.width,
            desc.height,
            desc.sample_count
        );
        let image = self.images.insert(HeadlessImage {
            desc: desc.clone(),
            contents: None,
        });
        self.commands.push(Command::CreateImage {
            image,
            desc: desc.clone(),
        });
        Ok(image)
    }

    fn release_image(&mut self, image: ImageId) {
        if self.images.remove(image).is_some() {
            log::trace!("Headless: released image {image:?}");
            self.commands.push(Command::ReleaseImage(image));
        }
    }

    fn image_desc(&self, image: ImageId) -> Option<&ImageDesc> {
        self.images.get(image).map(|i| &i.desc)
    }

    fn begin_target(
        &mut self,
        colors: &[ImageId],
        depth: Option<ImageId>,
        load: LoadOp,
    ) -> Result<(), DeviceError> {
        for id in colors.iter().chain(depth.iter()) {
            self.check(*id)?;
        }
        if let LoadOp::Clear(_) = load {
            for id in colors.iter().chain(depth.iter()) {
                if let Some(image) = self.images.get_mut(*id) {
                    image.contents = None;
                }
            }
        }
        self.target = Some(ActiveTarget {
            colors: colors.to_vec(),
            depth,
        });
        self.commands.push(Command::BeginTarget {
            colors: colors.to_vec(),
            depth,
            load,
        });
        Ok(())
    }

    fn end_target(&mut self) {
        self.target = None;
        self.commands.push(Command::EndTarget);
    }

    fn bind_input(
        &mut self,
        slot: u32,
        image: ImageId,
        filters: SamplerFilters,
    ) -> Result<(), DeviceError> {
        let desc = &self.check(image)?.desc;
        if desc.sample_count > 1 {
            return Err(DeviceError::UnsupportedSampleCount(desc.sample_count));
        }
        self.inputs.insert(slot, (image, filters));
        self.commands.push(Command::BindInput {
            slot,
            image,
            filters,
        });
        Ok(())
    }

    fn clear_inputs(&mut self) {
        self.inputs.clear();
        self.commands.push(Command::ClearInputs);
    }

    fn resolve(&mut self, src: ImageId, dst: ImageId) -> Result<(), DeviceError> {
        let source = self.check(src)?;
        if source.desc.sample_count <= 1 {
            return Err(DeviceError::UnsupportedSampleCount(source.desc.sample_count));
        }
        let contents = source.contents.clone();
        let src_size = source.desc.size();
        let destination = self.check(dst)?;
        if src_size != destination.desc.size() {
            return Err(DeviceError::ResolveMismatch(format!(
                "{:?} -> {:?}",
                src_size,
                destination.desc.size()
            )));
        }
        if let Some(image) = self.images.get_mut(dst) {
            image.contents = contents;
        }
        self.commands.push(Command::Resolve { src, dst });
        Ok(())
    }

    fn present(&mut self, image: ImageId, viewport: Viewport) -> Result<(), DeviceError> {
        self.check(image)?;
        self.commands.push(Command::Present { image, viewport });
        Ok(())
    }

    fn submit(&mut self) {
        self.commands.push(Command::Submit);
    }
}
