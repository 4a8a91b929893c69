//! Frame execution over a linearized render graph.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::assets::AssetCache;
use crate::device::{ImageId, RenderDevice, Viewport};
use crate::error::{Error, Result};
use crate::render_graph::{OutputSlot, RenderStage};
use crate::settings::{FrameSettings, PipelineConfig};

/// Wall time one stage took during the last frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    pub name: String,
    pub elapsed: Duration,
}

/// Ordered list of stages produced by
/// [`RenderGraph::create_pipeline`](crate::RenderGraph::create_pipeline).
///
/// Each call to [`render`](Self::render) runs every stage once, in
/// topological order, on the calling thread:
///
/// ```text
/// for each stage:
///     create node (first frame only)
///     (re)allocate targets if the render size changed
///     bind upstream outputs as inputs
///     run pass 0..pass_count, ping-ponging slot 0 after each pass
///     resolve multisampled targets
/// ```
///
/// A failing stage aborts the rest of the frame; the error carries the
/// node's name. Work recorded before the failure is still submitted.
pub struct RenderPipeline<D: RenderDevice> {
    stages: Vec<RenderStage<D>>,
    index: IndexMap<String, usize>,
    assets: AssetCache,
    config: PipelineConfig,
    timings: Vec<StageTiming>,
}

impl<D: RenderDevice> RenderPipeline<D> {
    pub(crate) fn new(stages: Vec<RenderStage<D>>, config: PipelineConfig) -> Self {
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, stage)| (stage.name().to_string(), i))
            .collect();
        Self {
            stages,
            index,
            assets: AssetCache::new(),
            config,
            timings: Vec::new(),
        }
    }

    /// Executes every stage once.
    ///
    /// # Errors
    ///
    /// - [`Error::CreateNode`] / [`Error::RenderNode`] when a node hook fails
    /// - [`Error::TargetNotReady`] when an input's producer has no target
    /// - [`Error::Device`] for device failures
    pub fn render(&mut self, device: &mut D, settings: &FrameSettings) -> Result<()> {
        self.timings.clear();
        if self.stages.is_empty() {
            log::debug!("RenderPipeline: nothing to render");
            return Ok(());
        }

        for i in 0..self.stages.len() {
            let (upstream, rest) = self.stages.split_at_mut(i);
            let stage = &mut rest[0];

            let start = Instant::now();
            if let Err(e) = stage.execute(upstream, device, &mut self.assets, settings, &self.config)
            {
                // Work recorded by earlier stages belongs to this frame.
                device.submit();
                return Err(e);
            }
            let elapsed = start.elapsed();

            if elapsed > self.config.frame_budget {
                log::warn!(
                    "stage `{}` took {:.2} ms, over the {:.2} ms frame budget",
                    stage.name(),
                    elapsed.as_secs_f64() * 1000.0,
                    self.config.frame_budget.as_secs_f64() * 1000.0
                );
            }
            self.timings.push(StageTiming {
                name: stage.name().to_string(),
                elapsed,
            });
        }

        device.submit();
        Ok(())
    }

    /// Draws the last stage's primary color output onto the display.
    ///
    /// The image is centered and letterboxed to keep the render aspect ratio
    /// when the display size differs.
    pub fn render_to_screen(&mut self, device: &mut D, settings: &FrameSettings) -> Result<()> {
        let Some(last) = self.stages.last() else {
            log::debug!("RenderPipeline: nothing to present");
            return Ok(());
        };
        let image = last.output(OutputSlot::Color(0))?;
        let viewport = fit_viewport(settings.render_size(), settings.display_size());
        device.present(image, viewport)?;
        Ok(())
    }

    /// Advances every node's state in stage order.
    pub fn update(&mut self, settings: &FrameSettings, dt: f32) {
        for stage in &mut self.stages {
            stage.node_mut().update(settings, dt);
        }
    }

    /// Releases every stage's targets and node resources, then collects
    /// unreferenced assets.
    ///
    /// The pipeline stays usable: the next [`render`](Self::render) creates
    /// everything again.
    pub fn release(&mut self, device: &mut D) {
        for stage in &mut self.stages {
            stage.release(device, &mut self.assets);
        }
        let collected = self.assets.collect_garbage();
        log::debug!("RenderPipeline: released all stages ({collected} assets collected)");
    }

    /// Image a stage hands to its consumers for `slot`.
    ///
    /// Multisampled stages return their resolved image.
    pub fn output_image(&self, name: &str, slot: impl Into<OutputSlot>) -> Result<ImageId> {
        self.stage(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))?
            .output(slot.into())
    }

    pub fn stage(&self, name: &str) -> Option<&RenderStage<D>> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.name())
    }

    pub fn stages(&self) -> &[RenderStage<D>] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Per-stage timings of the last frame, in execution order.
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetCache {
        &mut self.assets
    }

    /// Drops cached assets no node references any more.
    pub fn collect_garbage(&mut self) -> usize {
        self.assets.collect_garbage()
    }
}

/// Largest rectangle with the aspect ratio of `render` that fits centered in
/// `display`.
pub fn fit_viewport(render: (u32, u32), display: (u32, u32)) -> Viewport {
    let (dw, dh) = (display.0 as f32, display.1 as f32);
    if render.0 == 0 || render.1 == 0 || display.0 == 0 || display.1 == 0 {
        return Viewport {
            x: 0.0,
            y: 0.0,
            width: dw,
            height: dh,
        };
    }
    let (rw, rh) = (render.0 as f32, render.1 as f32);
    let scale = (dw / rw).min(dh / rh);
    let (width, height) = (rw * scale, rh * scale);
    Viewport {
        x: (dw - width) * 0.5,
        y: (dh - height) * 0.5,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_aspect_fills_display() {
        let vp = fit_viewport((640, 360), (1920, 1080));
        assert_eq!(
            vp,
            Viewport {
                x: 0.0,
                y: 0.0,
                width: 1920.0,
                height: 1080.0
            }
        );
    }

    #[test]
    fn wide_display_pillarboxes() {
        let vp = fit_viewport((256, 256), (800, 400));
        assert_eq!(vp.width, 400.0);
        assert_eq!(vp.height, 400.0);
        assert_eq!(vp.x, 200.0);
        assert_eq!(vp.y, 0.0);
    }

    #[test]
    fn tall_display_letterboxes() {
        let vp = fit_viewport((200, 100), (400, 600));
        assert_eq!(vp.width, 400.0);
        assert_eq!(vp.height, 200.0);
        assert_eq!(vp.x, 0.0);
        assert_eq!(vp.y, 200.0);
    }

    #[test]
    fn degenerate_sizes_cover_display() {
        let vp = fit_viewport((0, 0), (320, 200));
        assert_eq!(vp.width, 320.0);
        assert_eq!(vp.height, 200.0);
    }
}
