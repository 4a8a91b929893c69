//! Per-frame settings and pipeline configuration.

use std::time::Duration;

use glam::Mat4;

/// State shared with every node lifecycle call for one frame.
///
/// The application updates it once per frame before calling
/// [`RenderPipeline::render`](crate::RenderPipeline::render). The render size
/// drives offscreen target allocation; the display size only affects
/// [`RenderPipeline::render_to_screen`](crate::RenderPipeline::render_to_screen).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSettings {
    pub render_width: u32,
    pub render_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    /// Elapsed time in seconds since start-up.
    pub time: f32,
    /// Camera/projection transform.
    pub view_projection: Mat4,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            render_width: 800,
            render_height: 600,
            display_width: 800,
            display_height: 600,
            time: 0.0,
            view_projection: Mat4::IDENTITY,
        }
    }
}

impl FrameSettings {
    /// Settings with identical render and display resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            render_width: width,
            render_height: height,
            display_width: width,
            display_height: height,
            ..Self::default()
        }
    }

    pub fn with_render_size(mut self, width: u32, height: u32) -> Self {
        self.render_width = width;
        self.render_height = height;
        self
    }

    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_width = width;
        self.display_height = height;
        self
    }

    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    pub fn with_view_projection(mut self, view_projection: Mat4) -> Self {
        self.view_projection = view_projection;
        self
    }

    pub fn render_size(&self) -> (u32, u32) {
        (self.render_width, self.render_height)
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }
}

/// Pipeline-wide knobs fixed at pipeline creation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Stages slower than this are reported with `log::warn!`.
    pub frame_budget: Duration,
    /// Color every stage target is cleared to before its first pass.
    pub clear_color: [f64; 4],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_budget: Duration::from_secs_f64(1.0 / 60.0),
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = budget;
        self
    }

    pub fn clear_color(mut self, color: [f64; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_sizes() {
        let settings = FrameSettings::new(256, 256)
            .with_display_size(1920, 1080)
            .with_time(2.5);
        assert_eq!(settings.render_size(), (256, 256));
        assert_eq!(settings.display_size(), (1920, 1080));
        assert_eq!(settings.time, 2.5);
    }

    #[test]
    fn default_budget_is_sixty_fps() {
        let config = PipelineConfig::default();
        assert!((config.frame_budget.as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);
    }
}
