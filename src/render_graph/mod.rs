//! Dataflow render graph and the pipeline that executes it.
//!
//! A [`RenderGraph`] is a registry of named [`RenderNode`]s plus a table of
//! slot-to-slot connections. Creating a pipeline linearizes the graph
//! (topological order, ties broken by insertion order) and wraps every node
//! in a [`RenderStage`] that owns its offscreen [`RenderTarget`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │     Tex     │───▶│   Terrain   │───▶│     Mix     │───▶ Screen
//! │  (texture)  │    │ (1 input)   │    │ (2 inputs)  │
//! └─────────────┘    └─────────────┘    └─────────────┘
//!        │                                     ▲
//!        └─────────────────────────────────────┘ slot 1
//! ```
//!
//! Each frame every stage:
//!
//! - lazily creates its node and (re)allocates its targets at the render size
//! - binds upstream outputs at its input slots
//! - runs its passes; multi-pass nodes ping-pong color 0 with a swap image
//! - resolves multisampled targets so consumers always read single-sample images
//!
//! # Node Types
//!
//! - [`EffectNode`]: full-screen procedural shader, no inputs
//! - [`PostProcessNode`]: samples N inputs, optionally multi-pass or multisampled
//! - [`TextureNode`]: draws an uploaded image, typically a graph source
//!
//! Any type implementing [`RenderNode`] can join the graph; tests use nodes
//! written against [`HeadlessDevice`](crate::HeadlessDevice).
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new();
//! graph.add_node(TextureNode::new("Tex", tileset))?;
//! graph.add_node(PostProcessNode::new("Blur", blur_shader, 1).with_passes(4))?;
//! graph.connect("Tex", 0, "Blur", 0)?;
//!
//! let mut pipeline = graph.create_pipeline()?;
//!
//! // In render loop:
//! pipeline.update(&settings, dt);
//! pipeline.render(&mut device, &settings)?;
//! pipeline.render_to_screen(&mut device, &settings)?;
//! ```

mod effect_nodes;
mod graph;
mod pipeline;
mod post_process_nodes;
mod render_node;
mod render_target;
mod stage;
mod texture_node;

pub use effect_nodes::EffectNode;
pub use graph::{Connection, RenderGraph};
pub use pipeline::{RenderPipeline, StageTiming, fit_viewport};
pub use post_process_nodes::PostProcessNode;
pub use render_node::{CreateContext, OutputSlot, RenderContext, RenderNode};
pub use render_target::{RenderTarget, TargetLayout};
pub use stage::{InputBinding, RenderStage};
pub use texture_node::TextureNode;
