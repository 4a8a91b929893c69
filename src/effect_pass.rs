//! Fullscreen shader passes shared by the wgpu render nodes.
//!
//! [`EffectPass`] draws a single triangle covering the active render target,
//! so a fragment shader runs once per pixel. Every shader is compiled with a
//! prelude that declares the uniform block, the vertex entry point and the
//! [`VsOut`] varyings; the node's source only supplies `fs` and its inputs.
//!
//! # Shader Interface
//!
//! ```wgsl
//! // Provided by the prelude:
//! struct Uniforms {
//!     resolution: vec2f,
//!     time: f32,
//!     pass_index: u32,
//!     view_projection: mat4x4f,
//! }
//! @group(0) @binding(0) var<uniform> u: Uniforms;
//! struct VsOut { @builtin(position) pos: vec4f, @location(0) uv: vec2f }
//!
//! // Declared by the shader, two bindings per input:
//! @group(1) @binding(0) var input0: texture_2d<f32>;
//! @group(1) @binding(1) var input0_sampler: sampler;
//!
//! @fragment
//! fn fs(in: VsOut) -> @location(0) vec4f {
//!     return textureSample(input0, input0_sampler, in.uv);
//! }
//! ```
//!
//! Multi-pass nodes read `u.pass_index`. Each pass gets its own uniform slot,
//! so all passes recorded into one frame see their own values.

use crate::device::{ImageFormat, WgpuDevice, texture_format};
use crate::error::NodeError;
use crate::gpu::GpuContext;

/// WGSL prepended to every effect shader.
pub const PRELUDE: &str = r#"
struct Uniforms {
    resolution: vec2f,
    time: f32,
    pass_index: u32,
    view_projection: mat4x4f,
}
@group(0) @binding(0) var<uniform> u: Uniforms;

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
"#;

/// Uniforms uploaded for every pass.
///
/// The layout matches the prelude's `Uniforms` (80 bytes, 16-byte aligned).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EffectUniforms {
    /// Render target resolution in pixels `[width, height]`.
    pub resolution: [f32; 2],
    /// Elapsed time in seconds since application start.
    pub time: f32,
    pub pass_index: u32,
    pub view_projection: [[f32; 4]; 4],
}

/// Static shape of an [`EffectPass`].
#[derive(Debug, Clone)]
pub struct EffectPassDesc<'a> {
    pub label: &'a str,
    /// Number of sampled inputs, bound at group 1.
    pub inputs: u32,
    pub format: ImageFormat,
    /// Sample count of the target this pass draws into.
    pub sample_count: u32,
    /// Number of passes per frame; one uniform slot each.
    pub passes: u32,
}

/// Compiles an effect shader with the [`PRELUDE`] prepended.
pub fn compile_shader(gpu: &GpuContext, label: &str, source: &str) -> wgpu::ShaderModule {
    let full = format!("{PRELUDE}\n{source}");
    gpu.device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(full.into()),
        })
}

/// A fullscreen shader pass with N sampled inputs.
pub struct EffectPass {
    label: String,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_stride: u64,
    passes: u32,
    input_layout: Option<wgpu::BindGroupLayout>,
    inputs: u32,
}

impl EffectPass {
    /// Builds the pipeline and uniform storage for `module`.
    pub fn new(gpu: &GpuContext, module: &wgpu::ShaderModule, desc: &EffectPassDesc<'_>) -> Self {
        let device = &gpu.device;
        let passes = desc.passes.max(1);

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let size = std::mem::size_of::<EffectUniforms>() as u64;
        let uniform_stride = size.div_ceil(alignment) * alignment;

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Uniforms", desc.label)),
            size: uniform_stride * u64::from(passes),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(size),
                },
                count: None,
            }],
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Effect Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(size),
                }),
            }],
        });

        let input_layout = (desc.inputs > 0).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..desc.inputs)
                .flat_map(|i| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: i * 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: i * 2 + 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Effect Input Layout"),
                entries: &entries,
            })
        });

        let mut layouts = vec![&uniform_layout];
        layouts.extend(input_layout.as_ref());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: texture_format(desc.format),
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
            multisample: wgpu::MultisampleState {
                count: desc.sample_count.max(1),
                ..Default::default()
            },
            multiview: None,
            cache: None,
        });

        Self {
            label: desc.label.to_string(),
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            passes,
            input_layout,
            inputs: desc.inputs,
        }
    }

    pub fn input_count(&self) -> u32 {
        self.inputs
    }

    /// Builds the input bind group from the images the pipeline bound on `device`.
    ///
    /// Returns `None` for passes without inputs.
    pub fn bind_device_inputs(
        &self,
        device: &WgpuDevice,
    ) -> Result<Option<wgpu::BindGroup>, NodeError> {
        let mut views = Vec::with_capacity(self.inputs as usize);
        for slot in 0..self.inputs {
            let view = device
                .input_view(slot)
                .ok_or_else(|| format!("`{}`: input slot {slot} is not bound", self.label))?;
            let sampler = device
                .input_sampler(slot)
                .ok_or_else(|| format!("`{}`: no sampler for input slot {slot}", self.label))?;
            views.push((view, sampler));
        }
        Ok(self.bind_views(device.gpu(), &views))
    }

    /// Builds the input bind group from explicit views, in slot order.
    pub fn bind_views(
        &self,
        gpu: &GpuContext,
        views: &[(&wgpu::TextureView, &wgpu::Sampler)],
    ) -> Option<wgpu::BindGroup> {
        let layout = self.input_layout.as_ref()?;
        let entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .flat_map(|(i, (view, sampler))| {
                let i = i as u32;
                [
                    wgpu::BindGroupEntry {
                        binding: i * 2,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: i * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ]
            })
            .collect();
        Some(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Effect Input Bind Group"),
            layout,
            entries: &entries,
        }))
    }

    /// Uploads `uniforms` into the slot for `uniforms.pass_index` and draws the
    /// fullscreen triangle into the device's active target.
    pub fn draw(
        &self,
        device: &mut WgpuDevice,
        uniforms: &EffectUniforms,
        inputs: Option<&wgpu::BindGroup>,
    ) -> Result<(), NodeError> {
        if uniforms.pass_index >= self.passes {
            return Err(format!(
                "`{}`: pass {} out of range ({} passes)",
                self.label, uniforms.pass_index, self.passes
            )
            .into());
        }
        if self.inputs > 0 && inputs.is_none() {
            return Err(format!("`{}`: inputs are not bound", self.label).into());
        }

        let offset = u64::from(uniforms.pass_index) * self.uniform_stride;
        device.gpu().queue.write_buffer(
            &self.uniform_buffer,
            offset,
            bytemuck::cast_slice(std::slice::from_ref(uniforms)),
        );

        let mut pass = device.begin_pass(&self.label)?;
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.uniform_bind_group, &[offset as u32]);
        if let Some(inputs) = inputs {
            pass.set_bind_group(1, inputs, &[]);
        }
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<EffectUniforms>(), 80);
    }
}
