#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use winit::dpi::PhysicalSize;
use worldview::gpu::RecordingDriver;
use worldview::{
    BlankCard, CardRenderer, Compositor, CompositorConfig, FadeCallback, FadeOutcome,
    StaticDisplayHost,
};

pub fn surface() -> PhysicalSize<u32> {
    PhysicalSize::new(1280, 720)
}

/// 600x400 card, ticks driven by the test, linear fades.
pub fn manual_config() -> CompositorConfig {
    config_from(
        r#"
[card]
width = 600
height = 400

[display]
drive = "manual"

[fade]
easing = "linear"
"#,
    )
}

pub fn config_from(toml: &str) -> CompositorConfig {
    CompositorConfig::from_toml_str(toml).unwrap()
}

pub struct Harness {
    pub compositor: Compositor,
    pub driver: RecordingDriver,
    pub host: Arc<StaticDisplayHost>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            RecordingDriver::new(),
            StaticDisplayHost::new(surface()),
            Box::new(BlankCard),
            manual_config(),
        )
    }

    pub fn build(
        driver: RecordingDriver,
        host: StaticDisplayHost,
        card: Box<dyn CardRenderer>,
        config: CompositorConfig,
    ) -> Self {
        let host = Arc::new(host);
        let compositor =
            Compositor::new(Box::new(driver.clone()), host.clone(), card, config).unwrap();
        Self {
            compositor,
            driver,
            host,
        }
    }

    pub fn initialized() -> Self {
        let harness = Self::new();
        harness.compositor.initialize().unwrap();
        harness
    }

    /// Ticks at `frame / 60` seconds for every frame in `frames`.
    pub fn tick_frames(&self, frames: std::ops::Range<u32>) {
        for frame in frames {
            self.compositor.on_display_tick(f64::from(frame) / 60.0);
        }
    }
}

/// Observer that appends every outcome it receives to the returned list.
pub fn observer() -> (Arc<Mutex<Vec<FadeOutcome>>>, FadeCallback) {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    let callback: FadeCallback = Box::new(move |outcome| sink.lock().unwrap().push(outcome));
    (outcomes, callback)
}

pub fn outcomes(list: &Arc<Mutex<Vec<FadeOutcome>>>) -> Vec<FadeOutcome> {
    list.lock().unwrap().clone()
}
