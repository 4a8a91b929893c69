//! Post-processing render nodes that sample upstream outputs.

use std::rc::Rc;

use crate::assets::AssetCache;
use crate::device::{ImageFormat, WgpuDevice};
use crate::effect_pass::{EffectPass, EffectPassDesc, EffectUniforms, compile_shader};
use crate::error::NodeError;
use crate::render_graph::{CreateContext, RenderContext, RenderNode};

/// Render node for screen-space post-processing effects.
///
/// `PostProcessNode` samples `inputs` upstream images (bound at group 1, two
/// bindings per input) and writes one color output. Common uses include:
///
/// - Blur effects, as a multi-pass ping-pong with [`with_passes`](Self::with_passes)
/// - Compositing several stages (`inputs > 1`)
/// - Color grading and tonemapping
///
/// On passes after the first, input slot 0 holds the image written by the
/// previous pass and `u.pass_index` tells the shader which pass is running.
///
/// # Example
///
/// ```ignore
/// let blur = PostProcessNode::new("Blur", include_str!("../shaders/blur.wgsl"), 1)
///     .with_passes(4);
/// let mix = PostProcessNode::new("Mix", include_str!("../shaders/mix.wgsl"), 2)
///     .with_multisample(4);
/// ```
pub struct PostProcessNode {
    name: String,
    source: String,
    inputs: u32,
    passes: u32,
    samples: u32,
    format: ImageFormat,
    shader_key: String,
    effect: Option<EffectPass>,
}

impl PostProcessNode {
    /// Creates a single-pass post-process node.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique node name within the graph
    /// * `source` - WGSL defining `fs` and its `@group(1)` input bindings
    /// * `inputs` - Number of sampled inputs the shader declares
    pub fn new(name: impl Into<String>, source: impl Into<String>, inputs: u32) -> Self {
        let name = name.into();
        Self {
            shader_key: format!("shader:{name}"),
            name,
            source: source.into(),
            inputs,
            passes: 1,
            samples: 0,
            format: ImageFormat::Rgba8Unorm,
            effect: None,
        }
    }

    /// Runs the shader `passes` times per frame, ping-ponging its output.
    pub fn with_passes(mut self, passes: u32) -> Self {
        self.passes = passes;
        self
    }

    /// Renders into a multisampled target resolved for downstream stages.
    pub fn with_multisample(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Shares the compiled shader with other nodes acquiring the same key.
    pub fn with_shader_key(mut self, key: impl Into<String>) -> Self {
        self.shader_key = key.into();
        self
    }
}

impl RenderNode<WgpuDevice> for PostProcessNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn multi_sample_count(&self) -> u32 {
        self.samples
    }

    fn pass_count(&self) -> u32 {
        self.passes
    }

    fn color_format(&self) -> ImageFormat {
        self.format
    }

    fn create(&mut self, ctx: &mut CreateContext<'_, WgpuDevice>) -> Result<(), NodeError> {
        let gpu = ctx.device.gpu();
        let module: Rc<wgpu::ShaderModule> = ctx.assets.acquire(&self.shader_key, || {
            compile_shader(gpu, &self.shader_key, &self.source)
        })?;
        self.effect = Some(EffectPass::new(
            gpu,
            &module,
            &EffectPassDesc {
                label: &self.name,
                inputs: self.inputs,
                format: self.format,
                sample_count: self.samples.max(1),
                passes: self.passes,
            },
        ));
        log::debug!(
            "PostProcessNode `{}`: {} inputs, {} passes, {} samples",
            self.name,
            self.inputs,
            self.passes,
            self.samples
        );
        Ok(())
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_, WgpuDevice>,
        pass: u32,
    ) -> Result<(), NodeError> {
        let effect = self
            .effect
            .as_ref()
            .ok_or_else(|| format!("`{}` rendered before create", self.name))?;
        let inputs = effect.bind_device_inputs(ctx.device)?;

        let (width, height) = ctx.target().size();
        let uniforms = EffectUniforms {
            resolution: [width as f32, height as f32],
            time: ctx.settings.time,
            pass_index: pass,
            view_projection: ctx.transforms.top().to_cols_array_2d(),
        };
        effect.draw(ctx.device, &uniforms, inputs.as_ref())
    }

    fn release(&mut self, assets: &mut AssetCache) {
        if self.effect.take().is_some() {
            assets.release(&self.shader_key);
        }
    }
}
