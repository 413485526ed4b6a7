mod support;

use std::io;
use std::sync::{Arc, Mutex};

use worldview::gpu::RecordingDriver;
use worldview::{BlankCard, StaticDisplayHost};

use support::{manual_config, surface, Harness};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn degraded_modes_are_logged_on_the_diagnostics_target() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("worldview::diagnostics=warn"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut capabilities = RecordingDriver::default_capabilities();
        capabilities.video_memory = Some(64 << 20);
        let harness = Harness::build(
            RecordingDriver::new().with_capabilities(capabilities),
            StaticDisplayHost::new(surface()).with_color_profile(vec![0; 16]),
            Box::new(BlankCard),
            manual_config(),
        );
        harness.compositor.initialize().unwrap();
        assert_eq!(harness.compositor.notices().len(), 2);
    });

    let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2, "{output}");
    assert!(lines.iter().all(|line| line.contains("worldview::diagnostics")));
    assert!(lines.iter().all(|line| line.contains("degraded mode")));
    assert!(output.contains("rendering at direct quality"));
    assert!(output.contains("assuming sRGB"));
}
