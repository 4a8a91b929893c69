//! Windowed host for a render pipeline.
//!
//! [`run`] opens a winit window, hands a [`WgpuDevice`] to a graph-building
//! closure, and then drives the resulting pipeline once per redraw:
//! `update`, `render`, `render_to_screen`. Frame errors are logged and the
//! loop keeps going; build errors end the loop and are returned.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::device::WgpuDevice;
use crate::gpu::GpuContext;
use crate::render_graph::{RenderGraph, RenderPipeline};
use crate::settings::{FrameSettings, PipelineConfig};

/// Window and logging configuration for [`run`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Render resolution as a fraction of the window size.
    pub render_scale: f32,
    /// Default `env_logger` filter, used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Stagegraph".to_string(),
            width: 800,
            height: 600,
            render_scale: 1.0,
            log_filter: "info".to_string(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Frame settings for a window of `width` x `height`.
    pub fn frame_settings(&self, width: u32, height: u32) -> FrameSettings {
        let scale = |v: u32| ((v as f32 * self.render_scale).round() as u32).max(1);
        FrameSettings::new(width, height).with_render_size(scale(width), scale(height))
    }
}

/// Errors that end [`run`].
#[derive(Debug, Error)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("could not create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Pipeline(#[from] crate::Error),
}

enum AppState<B> {
    Pending {
        config: AppConfig,
        build: Option<B>,
    },
    Running {
        window: Arc<Window>,
        device: WgpuDevice,
        pipeline: RenderPipeline<WgpuDevice>,
        config: AppConfig,
        settings: FrameSettings,
        start_time: Instant,
        last_frame: Instant,
    },
    Finished,
}

struct StagegraphApp<B> {
    state: AppState<B>,
    failure: Option<AppError>,
}

/// Runs a render graph in a window until it is closed.
///
/// `build` receives the device once the window exists and returns the graph
/// to execute.
///
/// # Example
///
/// ```ignore
/// stagegraph::run(AppConfig::new().title("Terrain").render_scale(0.5), |_device| {
///     let mut graph = RenderGraph::new();
///     graph.add_node(TextureNode::noise("Tex", 64, 7))?;
///     Ok(graph)
/// })?;
/// ```
pub fn run<B>(config: AppConfig, build: B) -> Result<(), AppError>
where
    B: FnOnce(&mut WgpuDevice) -> crate::Result<RenderGraph<WgpuDevice>> + 'static,
{
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .try_init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = StagegraphApp {
        state: AppState::Pending {
            config,
            build: Some(build),
        },
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl<B> StagegraphApp<B>
where
    B: FnOnce(&mut WgpuDevice) -> crate::Result<RenderGraph<WgpuDevice>>,
{
    fn start(
        event_loop: &ActiveEventLoop,
        config: &AppConfig,
        build: B,
    ) -> Result<(Arc<Window>, WgpuDevice, RenderPipeline<WgpuDevice>), AppError> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContext::new(window.clone()).map_err(crate::Error::from)?;
        let mut device = WgpuDevice::new(gpu);
        let graph = build(&mut device)?;
        let pipeline = graph.create_pipeline_with(config.pipeline)?;
        Ok((window, device, pipeline))
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: AppError) {
        log::error!("{err}");
        self.failure = Some(err);
        self.state = AppState::Finished;
        event_loop.exit();
    }
}

impl<B> ApplicationHandler for StagegraphApp<B>
where
    B: FnOnce(&mut WgpuDevice) -> crate::Result<RenderGraph<WgpuDevice>>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Pending { config, build } = &mut self.state else {
            return;
        };
        let Some(build) = build.take() else {
            return;
        };
        let config = config.clone();

        match Self::start(event_loop, &config, build) {
            Ok((window, device, pipeline)) => {
                let size = window.inner_size();
                let settings = config.frame_settings(size.width, size.height);
                log::info!(
                    "{} stages, render {}x{}, display {}x{}",
                    pipeline.len(),
                    settings.render_width,
                    settings.render_height,
                    settings.display_width,
                    settings.display_height
                );
                self.state = AppState::Running {
                    window,
                    device,
                    pipeline,
                    config,
                    settings,
                    start_time: Instant::now(),
                    last_frame: Instant::now(),
                };
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let AppState::Running {
            window,
            device,
            pipeline,
            config,
            settings,
            start_time,
            last_frame,
        } = &mut self.state
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                pipeline.release(device);
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                device.resize(size.width, size.height);
                if size.width > 0 && size.height > 0 {
                    let time = settings.time;
                    *settings = config
                        .frame_settings(size.width, size.height)
                        .with_time(time);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(*last_frame).as_secs_f32();
                *last_frame = now;
                settings.time = start_time.elapsed().as_secs_f32();

                pipeline.update(settings, dt);
                let frame = pipeline
                    .render(device, settings)
                    .and_then(|()| pipeline.render_to_screen(device, settings));
                if let Err(err) = frame {
                    log::error!("frame failed: {err}");
                }

                window.request_redraw();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_scale_shrinks_render_size() {
        let config = AppConfig::new().size(1280, 720).render_scale(0.5);
        let settings = config.frame_settings(1280, 720);
        assert_eq!(settings.render_size(), (640, 360));
        assert_eq!(settings.display_size(), (1280, 720));
    }

    #[test]
    fn render_size_never_zero() {
        let settings = AppConfig::new().render_scale(0.001).frame_settings(100, 10);
        assert_eq!(settings.render_size(), (1, 1));
    }
}
