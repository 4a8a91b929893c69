use stagegraph::{
    AppConfig, EffectNode, PipelineConfig, PostProcessNode, RenderGraph, SamplerFilters,
    TextureNode, WgpuDevice,
};

fn build_graph(_device: &mut WgpuDevice) -> stagegraph::Result<RenderGraph<WgpuDevice>> {
    let mut graph = RenderGraph::new();

    graph.add_node(TextureNode::noise("Tex", 64, 7))?;
    graph.add_node(EffectNode::new("Sky", include_str!("shaders/sky.wgsl")))?;
    graph.add_node(PostProcessNode::new(
        "Terrain",
        include_str!("shaders/terrain.wgsl"),
        1,
    ))?;
    graph.add_node(
        PostProcessNode::new("Mix", include_str!("shaders/mix.wgsl"), 3).with_multisample(4),
    )?;
    graph.add_node(
        PostProcessNode::new("Blur", include_str!("shaders/blur.wgsl"), 1).with_passes(4),
    )?;

    graph.connect_with_filters("Tex", 0, "Terrain", 0, SamplerFilters::nearest())?;
    graph.connect("Terrain", 0, "Mix", 0)?;
    graph.connect_with_filters("Tex", 0, "Mix", 1, SamplerFilters::nearest())?;
    graph.connect("Sky", 0, "Mix", 2)?;
    graph.connect("Mix", 0, "Blur", 0)?;

    Ok(graph)
}

fn main() {
    let config = AppConfig::new()
        .title("Stagegraph Demo")
        .size(1280, 720)
        .render_scale(0.5)
        .log_filter("info,stagegraph=debug")
        .pipeline(PipelineConfig::new().clear_color([0.05, 0.05, 0.08, 1.0]));

    if let Err(err) = stagegraph::run(config, build_graph) {
        eprintln!("stagegraph-demo: {err}");
        std::process::exit(1);
    }
}
