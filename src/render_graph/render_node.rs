//! The core render node trait for the render graph.

use std::collections::BTreeMap;
use std::fmt;

use crate::assets::AssetCache;
use crate::device::{ImageFormat, ImageId, RenderDevice};
use crate::error::NodeError;
use crate::render_graph::RenderTarget;
use crate::settings::FrameSettings;
use crate::transform::TransformStack;

/// Identifies one output of a node: a color attachment index or the depth image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputSlot {
    Color(u32),
    Depth,
}

impl From<u32> for OutputSlot {
    fn from(index: u32) -> Self {
        Self::Color(index)
    }
}

impl fmt::Display for OutputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Color(index) => write!(f, "{index}"),
            Self::Depth => f.write_str("depth"),
        }
    }
}

/// Resources handed to [`RenderNode::create`].
pub struct CreateContext<'a, D> {
    pub device: &'a mut D,
    /// Pipeline-owned cache for resources shared between nodes.
    pub assets: &'a mut AssetCache,
    pub settings: &'a FrameSettings,
}

/// Execution context passed to [`RenderNode::render`] for one pass.
///
/// The stage's render target is already bound as the active destination and
/// every connected upstream output is bound at its input slot.
pub struct RenderContext<'a, D> {
    pub device: &'a mut D,
    pub settings: &'a FrameSettings,
    /// Seeded with `settings.view_projection` at the start of each stage.
    pub transforms: &'a mut TransformStack,
    inputs: &'a BTreeMap<u32, ImageId>,
    target: &'a RenderTarget,
}

impl<'a, D> RenderContext<'a, D> {
    pub(crate) fn new(
        device: &'a mut D,
        settings: &'a FrameSettings,
        transforms: &'a mut TransformStack,
        inputs: &'a BTreeMap<u32, ImageId>,
        target: &'a RenderTarget,
    ) -> Self {
        Self {
            device,
            settings,
            transforms,
            inputs,
            target,
        }
    }

    /// Image bound at input `slot`, if any.
    pub fn input(&self, slot: u32) -> Option<ImageId> {
        self.inputs.get(&slot).copied()
    }

    /// All bound inputs in slot order.
    pub fn inputs(&self) -> impl Iterator<Item = (u32, ImageId)> + '_ {
        self.inputs.iter().map(|(slot, image)| (*slot, *image))
    }

    /// The render target this pass writes into.
    pub fn target(&self) -> &RenderTarget {
        self.target
    }
}

/// Trait for render graph nodes.
///
/// A node declares its capabilities (outputs, multisampling, pass count) and
/// the pipeline owns everything derived from them: the stage's render target,
/// the resolve target for multisampled nodes and the swap image for
/// multi-pass nodes. The node only issues drawing work.
///
/// # Execution Flow
///
/// 1. `create()` is called once, the first time the stage runs
/// 2. `render()` is called `pass_count()` times per frame, in increasing pass order
/// 3. `release()` is called when the pipeline is torn down
///
/// `update()` is driven separately by [`RenderPipeline::update`](crate::RenderPipeline::update).
///
/// # Implementing Custom Nodes
///
/// ```ignore
/// struct Outline;
///
/// impl RenderNode<HeadlessDevice> for Outline {
///     fn name(&self) -> &str {
///         "Outline"
///     }
///
///     fn render(
///         &mut self,
///         ctx: &mut RenderContext<'_, HeadlessDevice>,
///         _pass: u32,
///     ) -> Result<(), NodeError> {
///         ctx.device.draw("outline")?;
///         Ok(())
///     }
/// }
/// ```
pub trait RenderNode<D: RenderDevice> {
    /// Unique name of this node within its graph.
    fn name(&self) -> &str;

    /// Number of color attachments in the node's render target. Must be at least 1.
    fn color_output_count(&self) -> u32 {
        1
    }

    fn has_depth_output(&self) -> bool {
        false
    }

    /// Sample count of the render target; `0` disables multisampling.
    fn multi_sample_count(&self) -> u32 {
        0
    }

    /// Number of ping-pong passes per frame. Must be at least 1.
    fn pass_count(&self) -> u32 {
        1
    }

    /// Format of every color attachment.
    fn color_format(&self) -> ImageFormat {
        ImageFormat::Rgba8Unorm
    }

    /// Valid output slots, derived from the capabilities.
    fn output_slots(&self) -> Vec<OutputSlot> {
        let mut slots: Vec<OutputSlot> = (0..self.color_output_count())
            .map(OutputSlot::Color)
            .collect();
        if self.has_depth_output() {
            slots.push(OutputSlot::Depth);
        }
        slots
    }

    /// One-time resource allocation before the first render.
    fn create(&mut self, _ctx: &mut CreateContext<'_, D>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Issues drawing work for pass `pass`.
    fn render(&mut self, ctx: &mut RenderContext<'_, D>, pass: u32) -> Result<(), NodeError>;

    /// Releases resources the node owns and hands back cached assets.
    ///
    /// Render targets belong to the pipeline and are not touched here.
    fn release(&mut self, _assets: &mut AssetCache) {}

    /// Per-frame state advance, independent of rendering.
    fn update(&mut self, _settings: &FrameSettings, _dt: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    struct GBuffer;

    impl RenderNode<HeadlessDevice> for GBuffer {
        fn name(&self) -> &str {
            "GBuffer"
        }

        fn color_output_count(&self) -> u32 {
            3
        }

        fn has_depth_output(&self) -> bool {
            true
        }

        fn render(
            &mut self,
            _ctx: &mut RenderContext<'_, HeadlessDevice>,
            _pass: u32,
        ) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    fn output_slots_follow_capabilities() {
        assert_eq!(
            GBuffer.output_slots(),
            vec![
                OutputSlot::Color(0),
                OutputSlot::Color(1),
                OutputSlot::Color(2),
                OutputSlot::Depth
            ]
        );
    }

    #[test]
    fn slot_display() {
        assert_eq!(OutputSlot::from(1).to_string(), "1");
        assert_eq!(OutputSlot::Depth.to_string(), "depth");
    }
}
