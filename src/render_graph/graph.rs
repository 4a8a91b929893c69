//! The render graph: named nodes plus slot-to-slot connections.

use indexmap::IndexMap;

use crate::device::{RenderDevice, SamplerFilters};
use crate::digraph::DirectedGraph;
use crate::error::{Error, Result};
use crate::render_graph::{InputBinding, OutputSlot, RenderNode, RenderPipeline, RenderStage};
use crate::settings::PipelineConfig;

/// One edge of the render graph, from an output slot to an input slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub from: String,
    pub from_slot: OutputSlot,
    pub to: String,
    pub to_slot: u32,
    pub filters: SamplerFilters,
}

/// Build-time registry of render nodes and the connections between them.
///
/// Nodes are validated as they are added and connections as they are made,
/// so by the time [`create_pipeline`](Self::create_pipeline) runs the only
/// failure left is a cycle.
///
/// # Example
///
/// ```ignore
/// let mut graph = RenderGraph::new();
/// graph.add_node(TextureNode::new("Tex", tileset))?;
/// graph.add_node(PostProcessNode::new("Terrain", terrain_shader, 1))?;
/// graph.add_node(PostProcessNode::new("Mix", mix_shader, 2))?;
///
/// graph.connect("Tex", 0, "Terrain", 0)?;
/// graph.connect("Terrain", 0, "Mix", 0)?;
/// graph.connect("Tex", 0, "Mix", 1)?;
///
/// let mut pipeline = graph.create_pipeline()?;
/// ```
pub struct RenderGraph<D: RenderDevice> {
    nodes: IndexMap<String, Box<dyn RenderNode<D>>>,
    connections: Vec<Connection>,
    graph: DirectedGraph<String>,
}

impl<D: RenderDevice> Default for RenderGraph<D> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
            connections: Vec::new(),
            graph: DirectedGraph::new(),
        }
    }
}

impl<D: RenderDevice> RenderGraph<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node under its [`name`](RenderNode::name).
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateNode`] if the name is taken
    /// - [`Error::InvalidConfiguration`] for zero color outputs, zero passes,
    ///   or multi-pass combined with multisampling
    pub fn add_node<N: RenderNode<D> + 'static>(&mut self, node: N) -> Result<()> {
        self.add_boxed(Box::new(node))
    }

    /// Registers an already boxed node.
    pub fn add_boxed(&mut self, node: Box<dyn RenderNode<D>>) -> Result<()> {
        let name = node.name().to_string();
        if self.nodes.contains_key(&name) {
            return Err(Error::DuplicateNode(name));
        }
        validate_capabilities(&name, node.as_ref())?;

        self.graph.add_node(name.clone());
        self.nodes.insert(name, node);
        Ok(())
    }

    /// Connects output `from_slot` of `from` to input `to_slot` of `to`.
    pub fn connect(
        &mut self,
        from: &str,
        from_slot: impl Into<OutputSlot>,
        to: &str,
        to_slot: u32,
    ) -> Result<()> {
        self.connect_with_filters(from, from_slot, to, to_slot, SamplerFilters::default())
    }

    /// Like [`connect`](Self::connect), overriding the sampler filters the
    /// consumer reads the input with.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownNode`] if either end is not registered
    /// - [`Error::InvalidConfiguration`] if `from_slot` is not an output of `from`
    /// - [`Error::DuplicateConnection`] if `to_slot` is already fed
    pub fn connect_with_filters(
        &mut self,
        from: &str,
        from_slot: impl Into<OutputSlot>,
        to: &str,
        to_slot: u32,
        filters: SamplerFilters,
    ) -> Result<()> {
        let from_slot = from_slot.into();
        let source = self
            .nodes
            .get(from)
            .ok_or_else(|| Error::UnknownNode(from.to_string()))?;
        if !self.nodes.contains_key(to) {
            return Err(Error::UnknownNode(to.to_string()));
        }
        if !source.output_slots().contains(&from_slot) {
            return Err(Error::InvalidConfiguration {
                node: from.to_string(),
                reason: format!("no output slot `{from_slot}`"),
            });
        }
        if self
            .connections
            .iter()
            .any(|c| c.to == to && c.to_slot == to_slot)
        {
            return Err(Error::DuplicateConnection {
                node: to.to_string(),
                slot: to_slot,
            });
        }

        log::trace!("RenderGraph: {from}.{from_slot} -> {to}.{to_slot}");
        self.graph.add_edge(from.to_string(), to.to_string());
        self.connections.push(Connection {
            from: from.to_string(),
            from_slot,
            to: to.to_string(),
            to_slot,
            filters,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Node names in execution order.
    pub fn order(&self) -> Result<Vec<String>> {
        self.graph.serialize().map_err(|e| Error::GraphCycle {
            unresolved: e.unresolved,
        })
    }

    /// Linearizes the graph into a pipeline with the default configuration.
    pub fn create_pipeline(self) -> Result<RenderPipeline<D>> {
        self.create_pipeline_with(PipelineConfig::default())
    }

    /// Linearizes the graph into a pipeline.
    ///
    /// Creates one stage per node in topological order and resolves every
    /// connection into an input binding on its consumer.
    pub fn create_pipeline_with(mut self, config: PipelineConfig) -> Result<RenderPipeline<D>> {
        let order = self.order()?;
        let position: IndexMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut stages = Vec::with_capacity(order.len());
        for name in &order {
            let node = self
                .nodes
                .shift_remove(name)
                .ok_or_else(|| Error::UnknownNode(name.clone()))?;
            let inputs = self
                .connections
                .iter()
                .filter(|c| &c.to == name)
                .map(|c| {
                    let source = position
                        .get(c.from.as_str())
                        .copied()
                        .ok_or_else(|| Error::UnknownNode(c.from.clone()))?;
                    Ok(InputBinding {
                        slot: c.to_slot,
                        source,
                        source_slot: c.from_slot,
                        filters: c.filters,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            stages.push(RenderStage::new(node, inputs));
        }

        log::info!("render pipeline: {}", order.join(" -> "));
        Ok(RenderPipeline::new(stages, config))
    }
}

fn validate_capabilities<D: RenderDevice>(name: &str, node: &dyn RenderNode<D>) -> Result<()> {
    let invalid = |reason: String| Error::InvalidConfiguration {
        node: name.to_string(),
        reason,
    };
    if node.color_output_count() == 0 {
        return Err(invalid("needs at least one color output".into()));
    }
    if node.pass_count() == 0 {
        return Err(invalid("needs at least one pass".into()));
    }
    if node.pass_count() > 1 && node.multi_sample_count() > 1 {
        return Err(invalid(format!(
            "{} passes cannot be combined with {}x multisampling",
            node.pass_count(),
            node.multi_sample_count()
        )));
    }
    Ok(())
}
