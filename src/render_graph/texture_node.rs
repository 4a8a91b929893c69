//! Texture source node: uploads an image and draws it into its target.

use std::rc::Rc;

use image::RgbaImage;

use crate::assets::AssetCache;
use crate::device::WgpuDevice;
use crate::effect_pass::{EffectPass, EffectPassDesc, EffectUniforms, compile_shader};
use crate::error::NodeError;
use crate::gpu::GpuContext;
use crate::render_graph::{CreateContext, RenderContext, RenderNode};

const TEXTURE_SHADER: &str = r#"
@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@fragment
fn fs(in: VsOut) -> @location(0) vec4f {
    return textureSample(source, source_sampler, in.uv);
}
"#;

const TEXTURE_SHADER_KEY: &str = "shader:texture-blit";

struct Uploaded {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

impl Uploaded {
    fn new(gpu: &GpuContext, image: &RgbaImage, label: &str) -> Self {
        use wgpu::util::DeviceExt;

        let (width, height) = image.dimensions();
        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            image.as_raw(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Nearest keeps tilesets crisp when the render size is larger than the image.
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label} Sampler")),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
        }
    }
}

/// Render node that draws a CPU-side image, stretched over its target.
///
/// The image is uploaded in [`create`](RenderNode::create). Use it as the
/// source of a graph (tilesets, lookup tables, generated maps).
pub struct TextureNode {
    name: String,
    image: RgbaImage,
    uploaded: Option<Uploaded>,
    effect: Option<EffectPass>,
}

impl TextureNode {
    pub fn new(name: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            name: name.into(),
            image,
            uploaded: None,
            effect: None,
        }
    }

    /// Load the image from a file.
    pub fn from_file(name: impl Into<String>, path: &str) -> Result<Self, image::ImageError> {
        Ok(Self::new(name, image::open(path)?.to_rgba8()))
    }

    /// Load the image from embedded bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::new(name, image::load_from_memory(bytes)?.to_rgba8()))
    }

    /// Blocky procedural noise in earthy tones, for graphs without image assets.
    pub fn noise(name: impl Into<String>, size: u32, seed: u32) -> Self {
        const PALETTE: [[u8; 3]; 6] = [
            [139, 90, 43],
            [128, 128, 128],
            [85, 85, 85],
            [160, 120, 60],
            [100, 70, 40],
            [86, 125, 70],
        ];

        let image = RgbaImage::from_fn(size, size, |x, y| {
            let base = PALETTE[(hash(x / 4, y / 4, seed) % PALETTE.len() as u32) as usize];
            let variation = (hash(x, y, seed.wrapping_add(1000)) % 24) as i32 - 12;
            let channel = |c: u8| (c as i32 + variation).clamp(0, 255) as u8;
            image::Rgba([channel(base[0]), channel(base[1]), channel(base[2]), 255])
        });
        Self::new(name, image)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

fn hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_add(x.wrapping_mul(374761393));
    h = h.wrapping_add(y.wrapping_mul(668265263));
    h ^= h >> 13;
    h = h.wrapping_mul(1274126177);
    h ^= h >> 16;
    h
}

impl RenderNode<WgpuDevice> for TextureNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&mut self, ctx: &mut CreateContext<'_, WgpuDevice>) -> Result<(), NodeError> {
        let gpu = ctx.device.gpu();
        let module: Rc<wgpu::ShaderModule> = ctx.assets.acquire(TEXTURE_SHADER_KEY, || {
            compile_shader(gpu, "Texture Blit Shader", TEXTURE_SHADER)
        })?;
        self.effect = Some(EffectPass::new(
            gpu,
            &module,
            &EffectPassDesc {
                label: &self.name,
                inputs: 1,
                format: self.color_format(),
                sample_count: 1,
                passes: 1,
            },
        ));
        self.uploaded = Some(Uploaded::new(gpu, &self.image, &self.name));
        let (width, height) = self.image.dimensions();
        log::debug!("TextureNode `{}`: uploaded {width}x{height}", self.name);
        Ok(())
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_, WgpuDevice>,
        pass: u32,
    ) -> Result<(), NodeError> {
        let (Some(effect), Some(uploaded)) = (self.effect.as_ref(), self.uploaded.as_ref()) else {
            return Err(format!("`{}` rendered before create", self.name).into());
        };
        let inputs = effect.bind_views(ctx.device.gpu(), &[(&uploaded.view, &uploaded.sampler)]);

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
        self.uploaded = None;
        if self.effect.take().is_some() {
            assets.release(TEXTURE_SHADER_KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic() {
        let a = TextureNode::noise("Tex", 16, 7);
        let b = TextureNode::noise("Tex", 16, 7);
        assert_eq!(a.dimensions(), (16, 16));
        assert_eq!(a.image, b.image);
        assert!(a.image.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn decodes_embedded_png() {
        let mut png = Vec::new();
        RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let node = TextureNode::from_bytes("Tileset", &png).unwrap();
        assert_eq!(node.dimensions(), (3, 2));
        assert_eq!(node.image.get_pixel(2, 1), &image::Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(TextureNode::from_bytes("Broken", b"not an image").is_err());
    }
}
