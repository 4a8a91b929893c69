use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use stagegraph::device::Command;
use stagegraph::{
    CreateContext, Error, FrameSettings, HeadlessDevice, ImageId, LoadOp, NodeError, OutputSlot,
    PipelineConfig, RenderContext, RenderDevice, RenderGraph, RenderNode, RenderPipeline,
    SamplerFilters, Viewport,
};

#[derive(Debug, Clone)]
struct PassRecord {
    node: String,
    pass: u32,
    inputs: Vec<(u32, ImageId)>,
    input0_size: Option<(u32, u32)>,
    target0: ImageId,
}

#[derive(Debug, Default)]
struct Log {
    creates: Vec<String>,
    releases: Vec<String>,
    updates: Vec<(String, f32)>,
    passes: Vec<PassRecord>,
}

impl Log {
    fn passes_of(&self, node: &str) -> Vec<PassRecord> {
        self.passes
            .iter()
            .filter(|r| r.node == node)
            .cloned()
            .collect()
    }
}

type SharedLog = Rc<RefCell<Log>>;

struct TestNode {
    name: String,
    colors: u32,
    depth: bool,
    samples: u32,
    passes: u32,
    fail_render: bool,
    fail_create: bool,
    log: SharedLog,
}

impl TestNode {
    fn new(name: &str, log: &SharedLog) -> Self {
        Self {
            name: name.to_string(),
            colors: 1,
            depth: false,
            samples: 0,
            passes: 1,
            fail_render: false,
            fail_create: false,
            log: log.clone(),
        }
    }

    fn depth(mut self) -> Self {
        self.depth = true;
        self
    }

    fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    fn passes(mut self, passes: u32) -> Self {
        self.passes = passes;
        self
    }

    fn failing(mut self) -> Self {
        self.fail_render = true;
        self
    }

    fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }
}

impl RenderNode<HeadlessDevice> for TestNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn color_output_count(&self) -> u32 {
        self.colors
    }

    fn has_depth_output(&self) -> bool {
        self.depth
    }

    fn multi_sample_count(&self) -> u32 {
        self.samples
    }

    fn pass_count(&self) -> u32 {
        self.passes
    }

    fn create(&mut self, ctx: &mut CreateContext<'_, HeadlessDevice>) -> Result<(), NodeError> {
        if self.fail_create {
            return Err("shader failed to compile".into());
        }
        ctx.assets.acquire("shared-shader", || String::from("fullscreen.wgsl"))?;
        self.log.borrow_mut().creates.push(self.name.clone());
        Ok(())
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_, HeadlessDevice>,
        pass: u32,
    ) -> Result<(), NodeError> {
        let input0_size = ctx
            .input(0)
            .and_then(|image| ctx.device.image_desc(image))
            .map(|desc| desc.size());
        let record = PassRecord {
            node: self.name.clone(),
            pass,
            inputs: ctx.inputs().collect(),
            input0_size,
            target0: ctx.target().color(0).ok_or("target has no color 0")?,
        };
        self.log.borrow_mut().passes.push(record);

        if self.fail_render {
            return Err("boom".into());
        }
        ctx.device.draw(format!("{} pass {pass}", self.name))?;
        Ok(())
    }

    fn release(&mut self, assets: &mut stagegraph::AssetCache) {
        assets.release("shared-shader");
        self.log.borrow_mut().releases.push(self.name.clone());
    }

    fn update(&mut self, _settings: &FrameSettings, dt: f32) {
        self.log.borrow_mut().updates.push((self.name.clone(), dt));
    }
}

fn new_log() -> SharedLog {
    Rc::new(RefCell::new(Log::default()))
}

fn scenario_a(log: &SharedLog) -> RenderPipeline<HeadlessDevice> {
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Mix", log)).unwrap();
    graph.add_node(TestNode::new("Terrain", log)).unwrap();
    graph.add_node(TestNode::new("Tex", log)).unwrap();
    graph.connect("Tex", 0, "Terrain", 0).unwrap();
    graph.connect("Terrain", 0, "Mix", 0).unwrap();
    graph.connect("Tex", 0, "Mix", 1).unwrap();
    graph.create_pipeline().unwrap()
}

#[test]
fn scenario_a_executes_in_dependency_order() {
    let log = new_log();
    let mut pipeline = scenario_a(&log);
    let mut device = HeadlessDevice::new();

    let names: Vec<&str> = pipeline.stage_names().collect();
    assert_eq!(names, ["Tex", "Terrain", "Mix"]);

    pipeline
        .render(&mut device, &FrameSettings::new(64, 64))
        .unwrap();

    let order: Vec<String> = log.borrow().passes.iter().map(|r| r.node.clone()).collect();
    assert_eq!(order, ["Tex", "Terrain", "Mix"]);

    let tex = pipeline.output_image("Tex", 0).unwrap();
    let terrain = pipeline.output_image("Terrain", 0).unwrap();
    let mix = log.borrow().passes_of("Mix")[0].clone();
    assert_eq!(mix.inputs, vec![(0, terrain), (1, tex)]);

    assert_eq!(device.contents(tex), Some("Tex pass 0"));
    assert_eq!(device.contents(terrain), Some("Terrain pass 0"));
    assert!(matches!(device.commands().last(), Some(Command::Submit)));
}

#[test]
fn scenario_b_multisampled_output_is_resolved() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph
        .add_node(TestNode::new("Scene", &log).samples(4).depth())
        .unwrap();
    graph.add_node(TestNode::new("Post", &log)).unwrap();
    graph.connect("Scene", 0, "Post", 0).unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    pipeline
        .render(&mut device, &FrameSettings::new(256, 256))
        .unwrap();

    let resolved = pipeline.output_image("Scene", 0).unwrap();
    let desc = device.image_desc(resolved).unwrap();
    assert_eq!(desc.size(), (256, 256));
    assert_eq!(desc.sample_count, 1);
    assert_eq!(device.contents(resolved), Some("Scene pass 0"));

    let stage = pipeline.stage("Scene").unwrap();
    let msaa = stage.target().unwrap().color(0).unwrap();
    assert_eq!(device.image_desc(msaa).unwrap().sample_count, 4);
    assert_ne!(msaa, resolved);

    let depth = pipeline.output_image("Scene", OutputSlot::Depth).unwrap();
    assert_eq!(device.image_desc(depth).unwrap().sample_count, 1);

    // Consumers read the resolved image, never the multisampled one.
    let post = log.borrow().passes_of("Post")[0].clone();
    assert_eq!(post.inputs, vec![(0, resolved)]);

    let resolves = device
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Resolve { .. }))
        .count();
    assert_eq!(resolves, 2);
}

#[test]
fn scenario_c_resize_recreates_targets() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Tex", &log)).unwrap();
    graph.add_node(TestNode::new("Terrain", &log)).unwrap();
    graph.connect("Tex", 0, "Terrain", 0).unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    pipeline
        .render(&mut device, &FrameSettings::new(256, 256))
        .unwrap();
    let old = pipeline.output_image("Tex", 0).unwrap();
    let live = device.live_images();

    // Same size: nothing is reallocated.
    pipeline
        .render(&mut device, &FrameSettings::new(256, 256))
        .unwrap();
    assert_eq!(pipeline.output_image("Tex", 0).unwrap(), old);

    device.take_commands();
    pipeline
        .render(&mut device, &FrameSettings::new(512, 512))
        .unwrap();

    assert!(!device.is_live(old));
    let new = pipeline.output_image("Tex", 0).unwrap();
    assert_eq!(device.image_desc(new).unwrap().size(), (512, 512));
    assert_eq!(device.live_images(), live);

    // Tex was recreated before Terrain ran and Terrain saw the new size.
    let commands = device.commands();
    let released = commands
        .iter()
        .position(|c| *c == Command::ReleaseImage(old))
        .unwrap();
    let terrain_begin = commands
        .iter()
        .rposition(|c| matches!(c, Command::BeginTarget { .. }))
        .unwrap();
    assert!(released < terrain_begin);

    let terrain = log.borrow().passes_of("Terrain");
    assert_eq!(terrain.last().unwrap().input0_size, Some((512, 512)));
}

#[test]
fn scenario_d_multi_pass_ping_pongs() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Tex", &log)).unwrap();
    graph
        .add_node(TestNode::new("Blur", &log).passes(4))
        .unwrap();
    graph
        .connect_with_filters("Tex", 0, "Blur", 0, SamplerFilters::nearest())
        .unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    pipeline
        .render(&mut device, &FrameSettings::new(128, 128))
        .unwrap();

    let passes = log.borrow().passes_of("Blur");
    assert_eq!(passes.iter().map(|r| r.pass).collect::<Vec<_>>(), [0, 1, 2, 3]);

    let tex = pipeline.output_image("Tex", 0).unwrap();
    assert_eq!(passes[0].inputs, vec![(0, tex)]);
    for p in 1..4 {
        assert_eq!(
            passes[p].inputs,
            vec![(0, passes[p - 1].target0)],
            "pass {p} reads pass {}",
            p - 1
        );
        assert_ne!(passes[p].target0, passes[p - 1].target0);
    }

    let output = pipeline.output_image("Blur", 0).unwrap();
    assert_eq!(output, passes[3].target0);
    assert_eq!(device.contents(output), Some("Blur pass 3"));
    assert_eq!(device.contents(passes[2].target0), Some("Blur pass 2"));

    // Only the first pass clears; ping-pong inputs keep the connection's filters.
    let loads: Vec<LoadOp> = device
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::BeginTarget { colors, load, .. } if passes.iter().any(|r| r.target0 == colors[0]) => {
                Some(*load)
            }
            _ => None,
        })
        .collect();
    assert_eq!(loads.len(), 4);
    assert!(matches!(loads[0], LoadOp::Clear(_)));
    assert!(loads[1..].iter().all(|l| *l == LoadOp::Load));

    // Passes 1 and 3 both read the image pass 0 wrote.
    let swap_binds = device
        .commands()
        .iter()
        .filter(|c| {
            matches!(c, Command::BindInput { slot: 0, image, filters }
                if *image == passes[1].inputs[0].1 && *filters == SamplerFilters::nearest())
        })
        .count();
    assert_eq!(swap_binds, 2);
}

#[test]
fn output_before_first_render_is_not_ready() {
    let log = new_log();
    let pipeline = scenario_a(&log);

    assert!(matches!(
        pipeline.output_image("Tex", 0),
        Err(Error::TargetNotReady { node, slot: OutputSlot::Color(0) }) if node == "Tex"
    ));
    assert!(matches!(
        pipeline.output_image("Nope", 0),
        Err(Error::UnknownNode(name)) if name == "Nope"
    ));
    assert!(matches!(
        pipeline.output_image("Tex", OutputSlot::Depth),
        Err(Error::InvalidConfiguration { .. })
    ));
}

#[test]
fn render_failure_names_the_node_and_aborts_the_frame() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Tex", &log)).unwrap();
    graph
        .add_node(TestNode::new("Terrain", &log).failing())
        .unwrap();
    graph.add_node(TestNode::new("Mix", &log)).unwrap();
    graph.connect("Tex", 0, "Terrain", 0).unwrap();
    graph.connect("Terrain", 0, "Mix", 0).unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    let err = pipeline
        .render(&mut device, &FrameSettings::new(32, 32))
        .unwrap_err();
    match &err {
        Error::RenderNode { node, source } => {
            assert_eq!(node, "Terrain");
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(log.borrow().passes_of("Mix").is_empty());
    assert!(device.active_colors().is_none());
    assert_eq!(pipeline.timings().len(), 1);
}

#[test]
fn create_failure_is_wrapped() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph
        .add_node(TestNode::new("Tex", &log).failing_create())
        .unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    let err = pipeline
        .render(&mut device, &FrameSettings::new(32, 32))
        .unwrap_err();
    assert!(matches!(err, Error::CreateNode { node, .. } if node == "Tex"));
    assert!(!pipeline.stage("Tex").unwrap().is_created());
}

#[test]
fn nodes_are_created_once() {
    let log = new_log();
    let mut pipeline = scenario_a(&log);
    let mut device = HeadlessDevice::new();

    for size in [64, 64, 128] {
        pipeline
            .render(&mut device, &FrameSettings::new(size, size))
            .unwrap();
    }

    assert_eq!(log.borrow().creates, ["Tex", "Terrain", "Mix"]);
    assert_eq!(log.borrow().passes.len(), 9);
    assert_eq!(pipeline.assets().ref_count("shared-shader"), Some(3));
}

#[test]
fn update_and_release_lifecycle() {
    let log = new_log();
    let mut pipeline = scenario_a(&log);
    let mut device = HeadlessDevice::new();
    let settings = FrameSettings::new(64, 64);

    pipeline.update(&settings, 0.5);
    assert_eq!(
        log.borrow().updates,
        [
            ("Tex".to_string(), 0.5),
            ("Terrain".to_string(), 0.5),
            ("Mix".to_string(), 0.5)
        ]
    );

    pipeline.render(&mut device, &settings).unwrap();
    assert!(device.live_images() > 0);

    pipeline.release(&mut device);
    assert_eq!(log.borrow().releases, ["Tex", "Terrain", "Mix"]);
    assert_eq!(device.live_images(), 0);
    assert!(!pipeline.assets().contains("shared-shader"));
    assert!(matches!(
        pipeline.output_image("Tex", 0),
        Err(Error::TargetNotReady { .. })
    ));

    // Releasing twice does not call the nodes again.
    pipeline.release(&mut device);
    assert_eq!(log.borrow().releases.len(), 3);

    // The next frame starts from scratch.
    pipeline.render(&mut device, &settings).unwrap();
    assert_eq!(log.borrow().creates.len(), 6);
}

#[test]
fn render_to_screen_letterboxes_last_stage() {
    let log = new_log();
    let mut pipeline = scenario_a(&log);
    let mut device = HeadlessDevice::new();
    let settings = FrameSettings::new(256, 256).with_display_size(800, 400);

    pipeline.render(&mut device, &settings).unwrap();
    pipeline.render_to_screen(&mut device, &settings).unwrap();

    let mix = pipeline.output_image("Mix", 0).unwrap();
    assert_eq!(
        device.commands().last(),
        Some(&Command::Present {
            image: mix,
            viewport: Viewport {
                x: 200.0,
                y: 0.0,
                width: 400.0,
                height: 400.0,
            },
        })
    );
}

#[test]
fn render_to_screen_before_render_fails() {
    let log = new_log();
    let mut pipeline = scenario_a(&log);
    let mut device = HeadlessDevice::new();

    let err = pipeline
        .render_to_screen(&mut device, &FrameSettings::new(64, 64))
        .unwrap_err();
    assert!(matches!(err, Error::TargetNotReady { node, .. } if node == "Mix"));
}

#[test]
fn empty_pipeline_is_a_no_op() {
    let mut pipeline = RenderGraph::<HeadlessDevice>::new()
        .create_pipeline()
        .unwrap();
    let mut device = HeadlessDevice::new();
    let settings = FrameSettings::new(64, 64);

    pipeline.render(&mut device, &settings).unwrap();
    pipeline.render_to_screen(&mut device, &settings).unwrap();
    assert!(pipeline.is_empty());
    assert!(device.commands().is_empty());
}

#[test]
fn timings_follow_stage_order() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Tex", &log)).unwrap();
    graph.add_node(TestNode::new("Terrain", &log)).unwrap();
    graph.connect("Tex", 0, "Terrain", 0).unwrap();
    let config = PipelineConfig::new().frame_budget(Duration::ZERO);
    let mut pipeline = graph.create_pipeline_with(config).unwrap();
    let mut device = HeadlessDevice::new();

    pipeline
        .render(&mut device, &FrameSettings::new(16, 16))
        .unwrap();

    let names: Vec<&str> = pipeline.timings().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["Tex", "Terrain"]);
    assert_eq!(pipeline.config().frame_budget, Duration::ZERO);
}

#[test]
fn clear_color_comes_from_config() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Tex", &log)).unwrap();
    let config = PipelineConfig::new().clear_color([1.0, 0.0, 0.0, 1.0]);
    let mut pipeline = graph.create_pipeline_with(config).unwrap();
    let mut device = HeadlessDevice::new();

    pipeline
        .render(&mut device, &FrameSettings::new(16, 16))
        .unwrap();

    assert!(device.commands().iter().any(|c| matches!(
        c,
        Command::BeginTarget { load: LoadOp::Clear(color), .. } if *color == [1.0, 0.0, 0.0, 1.0]
    )));
}

#[test]
fn single_sample_node_renders_without_resolve() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph
        .add_node(TestNode::new("Scene", &log).samples(1))
        .unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    pipeline
        .render(&mut device, &FrameSettings::new(8, 8))
        .unwrap();

    let stage = pipeline.stage("Scene").unwrap();
    assert!(stage.resolve_target().is_none());
    assert_eq!(device.live_images(), 1);

    let output = pipeline.output_image("Scene", 0).unwrap();
    assert_eq!(stage.target().unwrap().color(0), Some(output));
    assert_eq!(device.image_desc(output).unwrap().sample_count, 1);
    assert_eq!(device.contents(output), Some("Scene pass 0"));
    assert!(
        !device
            .commands()
            .iter()
            .any(|c| matches!(c, Command::Resolve { .. }))
    );
}

#[test]
fn failed_frame_still_flushes_recorded_work() {
    let log = new_log();
    let mut graph = RenderGraph::new();
    graph.add_node(TestNode::new("Tex", &log)).unwrap();
    graph
        .add_node(TestNode::new("Terrain", &log).failing())
        .unwrap();
    graph.connect("Tex", 0, "Terrain", 0).unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    let mut device = HeadlessDevice::new();

    assert!(
        pipeline
            .render(&mut device, &FrameSettings::new(16, 16))
            .is_err()
    );
    assert_eq!(device.commands().last(), Some(&Command::Submit));

    // Creation failures flush too.
    let mut graph = RenderGraph::new();
    graph
        .add_node(TestNode::new("Tex", &log).failing_create())
        .unwrap();
    let mut pipeline = graph.create_pipeline().unwrap();
    device.take_commands();
    assert!(
        pipeline
            .render(&mut device, &FrameSettings::new(16, 16))
            .is_err()
    );
    assert_eq!(device.take_commands(), vec![Command::Submit]);
}
