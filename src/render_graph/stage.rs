//! Runtime instance of a render node inside a pipeline.

use std::collections::BTreeMap;

use crate::assets::AssetCache;
use crate::device::{ImageDesc, ImageId, LoadOp, RenderDevice, SamplerFilters};
use crate::error::{Error, Result};
use crate::render_graph::{
    CreateContext, OutputSlot, RenderContext, RenderNode, RenderTarget, TargetLayout,
};
use crate::settings::{FrameSettings, PipelineConfig};
use crate::transform::TransformStack;

/// An input of a stage, resolved to the upstream stage that feeds it.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    /// Destination input slot on this stage.
    pub slot: u32,
    /// Index of the producing stage in pipeline order.
    pub source: usize,
    pub source_slot: OutputSlot,
    pub filters: SamplerFilters,
}

/// A node plus the render targets the pipeline allocates for it.
///
/// Stages own their targets exclusively:
///
/// - `target`: where every pass renders, multisampled if the node asks for it
/// - `resolve`: single-sample copy of `target` read by downstream stages (multisampled nodes only)
/// - `swap`: spare color image for ping-pong passes (multi-pass nodes only)
///
/// All three are allocated lazily the first time the stage runs and
/// reallocated when the frame's render resolution changes.
pub struct RenderStage<D: RenderDevice> {
    node: Box<dyn RenderNode<D>>,
    created: bool,
    inputs: Vec<InputBinding>,
    target: Option<RenderTarget>,
    resolve: Option<RenderTarget>,
    swap: Option<ImageId>,
}

impl<D: RenderDevice> RenderStage<D> {
    pub(crate) fn new(node: Box<dyn RenderNode<D>>, mut inputs: Vec<InputBinding>) -> Self {
        inputs.sort_by_key(|binding| binding.slot);
        Self {
            node,
            created: false,
            inputs,
            target: None,
            resolve: None,
            swap: None,
        }
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn node(&self) -> &dyn RenderNode<D> {
        self.node.as_ref()
    }

    pub fn node_mut(&mut self) -> &mut dyn RenderNode<D> {
        self.node.as_mut()
    }

    /// Whether the node's `create` hook has run.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Input bindings, sorted by destination slot.
    pub fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    /// The target every pass renders into.
    pub fn target(&self) -> Option<&RenderTarget> {
        self.target.as_ref()
    }

    /// Single-sample resolve target of a multisampled stage.
    pub fn resolve_target(&self) -> Option<&RenderTarget> {
        self.resolve.as_ref()
    }

    /// Spare ping-pong image of a multi-pass stage.
    pub fn swap_image(&self) -> Option<ImageId> {
        self.swap
    }

    /// One sample is a regular target; only counts above it need a resolve.
    fn is_multisampled(&self) -> bool {
        self.node.multi_sample_count() > 1
    }

    /// Image downstream stages read for `slot`.
    ///
    /// Multisampled stages always hand out their resolved image.
    pub fn output(&self, slot: OutputSlot) -> Result<ImageId> {
        if !self.node.output_slots().contains(&slot) {
            return Err(Error::InvalidConfiguration {
                node: self.name().to_string(),
                reason: format!("no output slot `{slot}`"),
            });
        }
        let readable = if self.is_multisampled() {
            self.resolve.as_ref()
        } else {
            self.target.as_ref()
        };
        readable
            .and_then(|target| target.image(slot))
            .ok_or_else(|| Error::TargetNotReady {
                node: self.name().to_string(),
                slot,
            })
    }

    /// Runs one frame of this stage.
    ///
    /// `upstream` holds every stage ordered before this one; input bindings
    /// index into it.
    pub(crate) fn execute(
        &mut self,
        upstream: &[RenderStage<D>],
        device: &mut D,
        assets: &mut AssetCache,
        settings: &FrameSettings,
        config: &PipelineConfig,
    ) -> Result<()> {
        self.ensure_created(device, assets, settings)?;
        self.ensure_targets(device, settings)?;
        let mut bound = self.bind_inputs(upstream, device)?;
        self.run_passes(device, settings, config, &mut bound)?;
        self.resolve_multisample(device)
    }

    fn ensure_created(
        &mut self,
        device: &mut D,
        assets: &mut AssetCache,
        settings: &FrameSettings,
    ) -> Result<()> {
        if self.created {
            return Ok(());
        }
        log::debug!("RenderStage: creating node `{}`", self.name());
        let mut ctx = CreateContext {
            device,
            assets,
            settings,
        };
        self.node
            .create(&mut ctx)
            .map_err(|source| Error::CreateNode {
                node: self.node.name().to_string(),
                source,
            })?;
        self.created = true;
        Ok(())
    }

    fn layout(&self) -> TargetLayout {
        let samples = self.node.multi_sample_count();
        TargetLayout {
            color_count: self.node.color_output_count(),
            color_format: self.node.color_format(),
            depth: self.node.has_depth_output(),
            sample_count: samples.max(1),
        }
    }

    fn ensure_targets(&mut self, device: &mut D, settings: &FrameSettings) -> Result<()> {
        let (width, height) = settings.render_size();
        if self
            .target
            .as_ref()
            .is_some_and(|target| target.matches(width, height))
        {
            return Ok(());
        }

        // Drop everything sized for the old resolution before allocating.
        self.release_targets(device);
        if let Err(e) = self.allocate_targets(device, width, height) {
            self.release_targets(device);
            return Err(e);
        }
        Ok(())
    }

    fn allocate_targets(&mut self, device: &mut D, width: u32, height: u32) -> Result<()> {
        let layout = self.layout();
        let name = self.node.name().to_string();
        self.target = Some(RenderTarget::create(
            device, &name, width, height, &layout,
        )?);

        if self.is_multisampled() {
            self.resolve = Some(RenderTarget::create(
                device,
                &format!("{name} resolve"),
                width,
                height,
                &layout.single_sample(),
            )?);
        }

        if self.node.pass_count() > 1 {
            let desc = ImageDesc::new(
                format!("{name} swap"),
                width,
                height,
                layout.color_format,
            );
            self.swap = Some(device.create_image(&desc)?);
        }
        Ok(())
    }

    fn bind_inputs(
        &self,
        upstream: &[RenderStage<D>],
        device: &mut D,
    ) -> Result<BTreeMap<u32, ImageId>> {
        device.clear_inputs();
        let mut bound = BTreeMap::new();
        for binding in &self.inputs {
            let image = match upstream.get(binding.source) {
                Some(stage) => stage.output(binding.source_slot)?,
                None => {
                    return Err(Error::TargetNotReady {
                        node: self.name().to_string(),
                        slot: binding.source_slot,
                    });
                }
            };
            device.bind_input(binding.slot, image, binding.filters)?;
            bound.insert(binding.slot, image);
        }
        Ok(bound)
    }

    fn run_passes(
        &mut self,
        device: &mut D,
        settings: &FrameSettings,
        config: &PipelineConfig,
        bound: &mut BTreeMap<u32, ImageId>,
    ) -> Result<()> {
        let Some(target) = self.target.as_mut() else {
            return Err(Error::TargetNotReady {
                node: self.node.name().to_string(),
                slot: OutputSlot::Color(0),
            });
        };
        let passes = self.node.pass_count().max(1);
        let swap_filters = self
            .inputs
            .iter()
            .find(|binding| binding.slot == 0)
            .map(|binding| binding.filters)
            .unwrap_or_default();

        let mut transforms = TransformStack::new(settings.view_projection);
        for pass in 0..passes {
            let load = if pass == 0 {
                LoadOp::Clear(config.clear_color)
            } else {
                // Ping-pong: the image just written becomes input 0 and the
                // spare image becomes the write destination.
                target.unbind(device);
                if let Some(swap) = self.swap.as_mut() {
                    target.swap_color(0, swap);
                    device.bind_input(0, *swap, swap_filters)?;
                    bound.insert(0, *swap);
                }
                LoadOp::Load
            };
            target.bind(device, load)?;

            let mut ctx = RenderContext::new(device, settings, &mut transforms, bound, target);
            if let Err(source) = self.node.render(&mut ctx, pass) {
                target.unbind(device);
                return Err(Error::RenderNode {
                    node: self.node.name().to_string(),
                    source,
                });
            }
        }
        target.unbind(device);
        Ok(())
    }

    fn resolve_multisample(&mut self, device: &mut D) -> Result<()> {
        let (Some(target), Some(resolve)) = (self.target.as_ref(), self.resolve.as_ref()) else {
            return Ok(());
        };
        for (src, dst) in target.colors().iter().zip(resolve.colors()) {
            device.resolve(*src, *dst)?;
        }
        if let (Some(src), Some(dst)) = (target.depth(), resolve.depth()) {
            device.resolve(src, dst)?;
        }
        Ok(())
    }

    fn release_targets(&mut self, device: &mut D) {
        if let Some(target) = self.target.take() {
            target.release(device);
        }
        if let Some(resolve) = self.resolve.take() {
            resolve.release(device);
        }
        if let Some(swap) = self.swap.take() {
            device.release_image(swap);
        }
    }

    /// Frees the stage's targets and the node's own resources.
    ///
    /// The next frame creates the node again from scratch.
    pub(crate) fn release(&mut self, device: &mut D, assets: &mut AssetCache) {
        self.release_targets(device);
        if self.created {
            log::debug!("RenderStage: releasing node `{}`", self.name());
            self.node.release(assets);
            self.created = false;
        }
    }
}
