use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use winit::dpi::PhysicalSize;
use winit::window::Window;

/// What the compositor needs from the window system.
pub trait DisplayHost: Send + Sync {
    fn surface_size(&self) -> PhysicalSize<u32>;

    /// Refresh interval of the display the surface is on, if known.
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }

    /// Raw ICC profile of the display, if the platform exposes one.
    fn color_profile(&self) -> Option<Vec<u8>> {
        None
    }

    fn set_cursor_visible(&self, visible: bool) {
        let _ = visible;
    }
}

/// Display host backed by a winit window.
///
/// winit does not expose display ICC profiles; the embedder can supply one
/// with [`WinitDisplayHost::set_color_profile`] and then call
/// `Compositor::display_reconfigured`.
pub struct WinitDisplayHost {
    window: Arc<Window>,
    profile: Mutex<Option<Vec<u8>>>,
}

impl WinitDisplayHost {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            profile: Mutex::new(None),
        }
    }

    pub fn with_color_profile(self, profile: Vec<u8>) -> Self {
        self.set_color_profile(Some(profile));
        self
    }

    pub fn set_color_profile(&self, profile: Option<Vec<u8>>) {
        *self.profile.lock().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl DisplayHost for WinitDisplayHost {
    fn surface_size(&self) -> PhysicalSize<u32> {
        self.window.inner_size()
    }

    fn refresh_interval(&self) -> Option<Duration> {
        let millihertz = self.window.current_monitor()?.refresh_rate_millihertz()?;
        (millihertz > 0).then(|| Duration::from_secs_f64(1000.0 / f64::from(millihertz)))
    }

    fn color_profile(&self) -> Option<Vec<u8>> {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cursor_visible(&self, visible: bool) {
        self.window.set_cursor_visible(visible);
    }
}

/// Fixed display description for headless rendering and tests.
#[derive(Debug)]
pub struct StaticDisplayHost {
    size: Mutex<PhysicalSize<u32>>,
    refresh: Mutex<Option<Duration>>,
    profile: Mutex<Option<Vec<u8>>>,
    cursor_changes: Mutex<Vec<bool>>,
}

impl StaticDisplayHost {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            size: Mutex::new(size),
            refresh: Mutex::new(None),
            profile: Mutex::new(None),
            cursor_changes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refresh_interval(self, interval: Duration) -> Self {
        self.set_refresh_interval(Some(interval));
        self
    }

    pub fn with_color_profile(self, profile: Vec<u8>) -> Self {
        self.set_color_profile(Some(profile));
        self
    }

    pub fn set_size(&self, size: PhysicalSize<u32>) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = size;
    }

    pub fn set_refresh_interval(&self, interval: Option<Duration>) {
        *self.refresh.lock().unwrap_or_else(PoisonError::into_inner) = interval;
    }

    pub fn set_color_profile(&self, profile: Option<Vec<u8>>) {
        *self.profile.lock().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    /// Every visibility value forwarded by the compositor, in order.
    pub fn cursor_changes(&self) -> Vec<bool> {
        self.cursor_changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DisplayHost for StaticDisplayHost {
    fn surface_size(&self) -> PhysicalSize<u32> {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_interval(&self) -> Option<Duration> {
        *self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn color_profile(&self) -> Option<Vec<u8>> {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cursor_visible(&self, visible: bool) {
        self.cursor_changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(visible);
    }
}
