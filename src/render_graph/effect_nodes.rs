//! Effect render nodes for full-screen shader effects.

use std::rc::Rc;

use crate::assets::AssetCache;
use crate::device::{ImageFormat, WgpuDevice};
use crate::effect_pass::{EffectPass, EffectPassDesc, EffectUniforms, compile_shader};
use crate::error::NodeError;
use crate::render_graph::{CreateContext, RenderContext, RenderNode};

/// Render node for full-screen procedural shader effects.
///
/// `EffectNode` has no inputs. It is typically a graph source that renders a
/// procedural background, a raymarched scene, or any effect computed purely
/// from the uniforms (resolution, time, view-projection).
///
/// The shader module is cached in the pipeline's [`AssetCache`] under
/// `shader:<name>`. Nodes only share a module when they are given the same
/// key with [`with_shader_key`](Self::with_shader_key).
///
/// # Example
///
/// ```ignore
/// let sky = EffectNode::new("Sky", include_str!("../shaders/sky.wgsl"))
///     .with_format(ImageFormat::Rgba16Float);
/// graph.add_node(sky)?;
/// ```
pub struct EffectNode {
    name: String,
    source: String,
    format: ImageFormat,
    shader_key: String,
    effect: Option<EffectPass>,
}

impl EffectNode {
    /// Creates a new effect node from fragment shader source.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique node name within the graph
    /// * `source` - WGSL defining `fs`; the prelude supplies `vs` and the uniforms
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            shader_key: format!("shader:{name}"),
            name,
            source: source.into(),
            format: ImageFormat::Rgba8Unorm,
            effect: None,
        }
    }

    /// Sets the color format of the node's render target.
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

impl RenderNode<WgpuDevice> for EffectNode {
    fn name(&self) -> &str {
        &self.name
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
                inputs: 0,
                format: self.format,
                sample_count: 1,
                passes: 1,
            },
        ));
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
        let (width, height) = ctx.target().size();
        let uniforms = EffectUniforms {
            resolution: [width as f32, height as f32],
            time: ctx.settings.time,
            pass_index: pass,
            view_projection: ctx.transforms.top().to_cols_array_2d(),
        };
        effect.draw(ctx.device, &uniforms, None)
    }

    fn release(&mut self, assets: &mut AssetCache) {
        if self.effect.take().is_some() {
            assets.release(&self.shader_key);
        }
    }
}
