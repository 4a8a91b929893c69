//! wgpu implementation of [`RenderDevice`].
//!
//! Images are wgpu textures kept in a slot map. Work is recorded into one
//! command encoder that is opened lazily and flushed by
//! [`RenderDevice::submit`] (and before presenting). Nodes draw by opening a
//! render pass on the active target with [`WgpuDevice::begin_pass`] and
//! sampling the bound inputs through [`WgpuDevice::input_view`] and
//! [`WgpuDevice::input_sampler`].

use std::collections::{BTreeMap, HashMap};

use slotmap::SlotMap;

use super::{
    DeviceError, Filter, ImageDesc, ImageFormat, ImageId, LoadOp, RenderDevice, SamplerFilters,
    Viewport,
};
use crate::gpu::GpuContext;

/// Maps an [`ImageFormat`] to the wgpu texture format used for it.
pub fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ImageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ImageFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

struct GpuImage {
    desc: ImageDesc,
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct ActiveTarget {
    colors: Vec<ImageId>,
    depth: Option<ImageId>,
    /// Load op for the first render pass opened on this target.
    pending: Option<LoadOp>,
}

/// Fullscreen blit used to present an image onto the surface.
struct BlitPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

const BLIT_SHADER: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> VsOut {
    let uv = vec2f(f32((vi << 1u) & 2u), f32(vi & 2u));
    var out: VsOut;
    out.pos = vec4f(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2f(uv.x, 1.0 - uv.y);
    return out;
}

@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

@fragment
fn fs(in: VsOut) -> @location(0) vec4f {
    return textureSample(src_texture, src_sampler, in.uv);
}
"#;

impl BlitPipeline {
    fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Present Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Present Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Present Blit Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Blit Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Present Blit Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            layout,
            sampler,
        }
    }
}

/// Writes sample 0 of a multisampled depth image into a single-sample one.
///
/// Render-pass resolves only cover color attachments, so depth goes through
/// a fullscreen draw that outputs `frag_depth`.
struct DepthResolvePipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

const DEPTH_RESOLVE_SHADER: &str = r#"
@vertex
fn vs(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4f {
    let uv = vec2f(f32((vi << 1u) & 2u), f32(vi & 2u));
    return vec4f(uv * 2.0 - 1.0, 0.0, 1.0);
}

@group(0) @binding(0) var src_depth: texture_depth_multisampled_2d;

@fragment
fn fs(@builtin(position) pos: vec4f) -> @builtin(frag_depth) f32 {
    return textureLoad(src_depth, vec2i(pos.xy), 0);
}
"#;

impl DepthResolvePipeline {
    fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Depth Resolve Shader"),
            source: wgpu::ShaderSource::Wgsl(DEPTH_RESOLVE_SHADER.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Resolve Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: true,
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Depth Resolve Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Depth Resolve Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: texture_format(ImageFormat::Depth32Float),
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self { pipeline, layout }
    }
}

/// Texture usages for an image.
///
/// Multisampled color images are only rendered to and resolved. Multisampled
/// depth images are also read by the depth resolve draw.
fn image_usage(desc: &ImageDesc) -> wgpu::TextureUsages {
    if desc.sample_count <= 1 {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
    } else if desc.format.is_depth() {
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
    } else {
        wgpu::TextureUsages::RENDER_ATTACHMENT
    }
}

/// [`RenderDevice`] backed by wgpu and a window surface.
pub struct WgpuDevice {
    gpu: GpuContext,
    images: SlotMap<ImageId, GpuImage>,
    encoder: Option<wgpu::CommandEncoder>,
    target: Option<ActiveTarget>,
    inputs: BTreeMap<u32, (ImageId, SamplerFilters)>,
    samplers: HashMap<(Filter, Filter), wgpu::Sampler>,
    blit: Option<BlitPipeline>,
    depth_resolve: Option<DepthResolvePipeline>,
}

impl WgpuDevice {
    pub fn new(gpu: GpuContext) -> Self {
        Self {
            gpu,
            images: SlotMap::with_key(),
            encoder: None,
            target: None,
            inputs: BTreeMap::new(),
            samplers: HashMap::new(),
            blit: None,
            depth_resolve: None,
        }
    }

    /// The wrapped wgpu context.
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Resizes the display surface. Stage targets follow `FrameSettings`.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    /// View of the image bound at input `slot`.
    pub fn input_view(&self, slot: u32) -> Option<&wgpu::TextureView> {
        let (image, _) = self.inputs.get(&slot)?;
        self.images.get(*image).map(|i| &i.view)
    }

    /// Sampler carrying the filters requested for input `slot`.
    pub fn input_sampler(&self, slot: u32) -> Option<&wgpu::Sampler> {
        let (_, filters) = self.inputs.get(&slot)?;
        self.samplers.get(&filters.resolve())
    }

    /// Opens a render pass on the active target.
    ///
    /// The first pass opened after [`RenderDevice::begin_target`] applies the
    /// target's load op; later passes load the existing contents.
    pub fn begin_pass(&mut self, label: &str) -> Result<wgpu::RenderPass<'_>, DeviceError> {
        let target = self.target.as_mut().ok_or(DeviceError::NoActiveTarget)?;
        let load = target.pending.take().unwrap_or(LoadOp::Load);

        let mut colors = Vec::with_capacity(target.colors.len());
        for id in &target.colors {
            let image = self.images.get(*id).ok_or(DeviceError::UnknownImage(*id))?;
            colors.push(Some(wgpu::RenderPassColorAttachment {
                view: &image.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load(load),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            }));
        }

        let depth = match target.depth {
            Some(id) => {
                let image = self.images.get(id).ok_or(DeviceError::UnknownImage(id))?;
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &image.view,
                    depth_ops: Some(wgpu::Operations {
                        load: match load {
                            LoadOp::Clear(_) => wgpu::LoadOp::Clear(1.0),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            }
            None => None,
        };

        let gpu = &self.gpu;
        let encoder = self.encoder.get_or_insert_with(|| {
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Stagegraph Frame Encoder"),
                })
        });

        Ok(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &colors,
            depth_stencil_attachment: depth,
            timestamp_writes: None,
            occlusion_query_set: None,
        }))
    }

    fn ensure_sampler(&mut self, filters: SamplerFilters) {
        let key = filters.resolve();
        let device = &self.gpu.device;
        self.samplers.entry(key).or_insert_with(|| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Stage Input Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                min_filter: filter_mode(key.0),
                mag_filter: filter_mode(key.1),
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        });
    }

    fn resolve_depth(&mut self, src: &wgpu::TextureView, dst: &wgpu::TextureView) {
        let gpu = &self.gpu;
        let resolve = self
            .depth_resolve
            .get_or_insert_with(|| DepthResolvePipeline::new(gpu));
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Resolve Bind Group"),
            layout: &resolve.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(src),
            }],
        });

        let encoder = self.encoder.get_or_insert_with(|| {
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Stagegraph Frame Encoder"),
                })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Depth Resolve"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: dst,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&resolve.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let gpu = &self.gpu;
        self.encoder.get_or_insert_with(|| {
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Stagegraph Frame Encoder"),
                })
        })
    }
}

fn color_load(load: LoadOp) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
        LoadOp::Load => wgpu::LoadOp::Load,
    }
}

impl RenderDevice for WgpuDevice {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId, DeviceError> {
        if !matches!(desc.sample_count, 1 | 4) {
            return Err(DeviceError::UnsupportedSampleCount(desc.sample_count));
        }
        let usage = image_usage(desc);

        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: desc.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        log::trace!(
            "wgpu: created {:?} {}x{} ({} samples)",
            desc.label,
            desc.width,
            desc.height,
            desc.sample_count
        );
        Ok(self.images.insert(GpuImage {
            desc: desc.clone(),
            texture,
            view,
        }))
    }

    fn release_image(&mut self, image: ImageId) {
        if let Some(released) = self.images.remove(image) {
            log::trace!("wgpu: released {:?}", released.desc.label);
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
            if !self.images.contains_key(*id) {
                return Err(DeviceError::UnknownImage(*id));
            }
        }
        self.target = Some(ActiveTarget {
            colors: colors.to_vec(),
            depth,
            pending: Some(load),
        });
        Ok(())
    }

    fn end_target(&mut self) {
        // A clear nobody opened a pass for still has to land.
        let needs_clear = matches!(
            self.target.as_ref().and_then(|t| t.pending),
            Some(LoadOp::Clear(_))
        );
        if needs_clear {
            if let Err(e) = self.begin_pass("Stage Clear") {
                log::warn!("wgpu: could not apply pending clear: {e}");
            }
        }
        self.target = None;
    }

    fn bind_input(
        &mut self,
        slot: u32,
        image: ImageId,
        filters: SamplerFilters,
    ) -> Result<(), DeviceError> {
        let desc = &self
            .images
            .get(image)
            .ok_or(DeviceError::UnknownImage(image))?
            .desc;
        if desc.sample_count > 1 {
            return Err(DeviceError::UnsupportedSampleCount(desc.sample_count));
        }
        self.ensure_sampler(filters);
        self.inputs.insert(slot, (image, filters));
        Ok(())
    }

    fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    fn resolve(&mut self, src: ImageId, dst: ImageId) -> Result<(), DeviceError> {
        let source = self.images.get(src).ok_or(DeviceError::UnknownImage(src))?;
        let destination = self.images.get(dst).ok_or(DeviceError::UnknownImage(dst))?;
        if source.desc.size() != destination.desc.size() {
            return Err(DeviceError::ResolveMismatch(format!(
                "{:?} -> {:?}",
                source.desc.size(),
                destination.desc.size()
            )));
        }
        if source.desc.sample_count <= 1 {
            return Err(DeviceError::UnsupportedSampleCount(source.desc.sample_count));
        }
        if destination.desc.sample_count != 1 {
            return Err(DeviceError::UnsupportedSampleCount(
                destination.desc.sample_count,
            ));
        }

        let src_view = source.view.clone();
        let dst_view = destination.view.clone();
        if source.desc.format.is_depth() {
            log::trace!("wgpu: depth resolve of {:?}", source.desc.label);
            self.resolve_depth(&src_view, &dst_view);
            return Ok(());
        }

        let encoder = self.encoder();
        let resolve_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Multisample Resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &src_view,
                resolve_target: Some(&dst_view),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        drop(resolve_pass);
        Ok(())
    }

    fn present(&mut self, image: ImageId, viewport: Viewport) -> Result<(), DeviceError> {
        self.submit();

        let view = self
            .images
            .get(image)
            .ok_or(DeviceError::UnknownImage(image))?
            .view
            .clone();

        let output = match self.gpu.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                self.gpu.surface.configure(&self.gpu.device, &self.gpu.config);
                return Err(DeviceError::Surface(e.to_string()));
            }
            Err(e) => return Err(DeviceError::Surface(e.to_string())),
        };
        let screen_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let blit = self.blit.get_or_insert_with(|| BlitPipeline::new(&self.gpu));
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Blit Bind Group"),
            layout: &blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&blit.sampler),
                },
            ],
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &screen_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(
                viewport.x,
                viewport.y,
                viewport.width,
                viewport.height,
                0.0,
                1.0,
            );
            pass.set_pipeline(&blit.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(format: ImageFormat, samples: u32) -> ImageDesc {
        ImageDesc::new("test", 16, 16, format).with_samples(samples)
    }

    #[test]
    fn multisampled_depth_is_readable_for_resolve() {
        let usage = image_usage(&desc(ImageFormat::Depth32Float, 4));
        assert!(usage.contains(wgpu::TextureUsages::TEXTURE_BINDING));
        assert!(usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn resolved_depth_is_a_render_attachment() {
        let usage = image_usage(&desc(ImageFormat::Depth32Float, 1));
        assert!(usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(usage.contains(wgpu::TextureUsages::TEXTURE_BINDING));
    }

    #[test]
    fn multisampled_color_is_render_only() {
        let usage = image_usage(&desc(ImageFormat::Rgba8Unorm, 4));
        assert_eq!(usage, wgpu::TextureUsages::RENDER_ATTACHMENT);
    }
}
