//! # Stagegraph
//!
//! **A dataflow render-pipeline executor.**
//!
//! Declare rendering stages as named nodes, wire their output slots to each
//! other's input slots, and let the pipeline schedule them: topological
//! order, lazily sized offscreen targets, ping-pong multi-pass stages and
//! multisample resolves.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stagegraph::*;
//!
//! fn main() -> std::result::Result<(), AppError> {
//!     run(AppConfig::new().title("Blur"), |_device| {
//!         let mut graph = RenderGraph::new();
//!         graph.add_node(TextureNode::noise("Tex", 64, 7))?;
//!         graph.add_node(
//!             PostProcessNode::new("Blur", include_str!("shaders/blur.wgsl"), 1).with_passes(4),
//!         )?;
//!         graph.connect("Tex", 0, "Blur", 0)?;
//!         Ok(graph)
//!     })
//! }
//! ```
//!
//! ## Layers
//!
//! - [`DirectedGraph`]: generic topological sort with cycle detection
//! - [`RenderGraph`]: node registry and connection validation
//! - [`RenderPipeline`]: per-frame execution of the linearized graph
//! - [`RenderDevice`]: the narrow GPU seam, implemented by [`WgpuDevice`] and
//!   the GPU-free [`HeadlessDevice`]

mod app;
mod assets;
pub mod device;
mod digraph;
mod effect_pass;
mod error;
mod gpu;
mod render_graph;
mod settings;
mod transform;

pub use app::{AppConfig, AppError, run};
pub use assets::AssetCache;
pub use device::{
    Filter, HeadlessDevice, ImageDesc, ImageFormat, ImageId, LoadOp, RenderDevice, SamplerFilters,
    Viewport, WgpuDevice,
};
pub use digraph::{CycleError, DirectedGraph};
pub use effect_pass::{EffectPass, EffectPassDesc, EffectUniforms};
pub use error::{Error, NodeError, Result};
pub use gpu::GpuContext;
pub use render_graph::{
    Connection, CreateContext, EffectNode, InputBinding, OutputSlot, PostProcessNode,
    RenderContext, RenderGraph, RenderNode, RenderPipeline, RenderStage, RenderTarget,
    StageTiming, TargetLayout, TextureNode, fit_viewport,
};
pub use settings::{FrameSettings, PipelineConfig};
pub use transform::{TransformGuard, TransformStack};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec3};
