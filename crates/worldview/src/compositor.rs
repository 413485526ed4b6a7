use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};
use winit::dpi::PhysicalSize;

use crate::chain::{ImageChain, StageKind};
use crate::color::ColorSelection;
use crate::config::CompositorConfig;
use crate::diagnostics::{Diagnostics, Notice};
use crate::display_link::{DisplayLink, DEFAULT_REFRESH_INTERVAL};
use crate::error::{CompositorError, DriverError};
use crate::fade::{validate_duration, FadeCallback, FadeSample, FadeState};
use crate::gpu::driver::{BoxedContext, BoxedDriver, GpuCapabilities, TargetId};
use crate::gpu::state_guard::{BindingCache, StateGuard};
use crate::host::DisplayHost;
use crate::loader::LoadHandle;
use crate::quality::{select_tier, QualityHints, QualityTier};
use crate::types::{CardSize, FadeOutcome, FadeStatus, FadeTarget, FrameDrive, Lifecycle, Rgba};

/// Draws the card into the offscreen target once per frame.
///
/// The card pass is open while this runs; every bind and draw goes through
/// the [`StateGuard`].
pub trait CardRenderer: Send {
    fn render_card(&mut self, guard: &mut StateGuard<'_>);
}

impl<F> CardRenderer for F
where
    F: FnMut(&mut StateGuard<'_>) + Send,
{
    fn render_card(&mut self, guard: &mut StateGuard<'_>) {
        self(guard)
    }
}

/// Card renderer that leaves the target at its clear color.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankCard;

impl CardRenderer for BlankCard {
    fn render_card(&mut self, _guard: &mut StateGuard<'_>) {}
}

/// Display-synchronised compositor for a fixed-size card.
///
/// ```text
///  display link ─tick─▶ fade state ─▶ card pass ─▶ image chain ─▶ present
///                          ▲              ▲
///  host ─begin_fade────────┘   loader ────┘ (load context, shared namespace)
/// ```
///
/// Every method takes `&self`; the compositor is shared with the display
/// link thread internally and may be wrapped in an `Arc` by the host.
pub struct Compositor {
    shared: Arc<Shared>,
}

struct Shared {
    config: CompositorConfig,
    host: Arc<dyn DisplayHost>,
    diagnostics: Diagnostics,
    loader: LoadHandle,
    epoch: Instant,
    control: Mutex<Control>,
    render: Mutex<RenderSide>,
    link: Mutex<Option<DisplayLink>>,
}

struct Control {
    lifecycle: Lifecycle,
    fade: FadeState,
    cursor_visible: bool,
}

struct RenderSide {
    driver: BoxedDriver,
    card: Box<dyn CardRenderer>,
    resources: Option<Resources>,
    stats: FrameStats,
}

struct Resources {
    context: BoxedContext,
    bindings: BindingCache,
    target: TargetId,
    chain: ImageChain,
    colors: ColorSelection,
    capabilities: GpuCapabilities,
    hints: QualityHints,
    tier: QualityTier,
    clear: Rgba,
}

#[derive(Default)]
struct FrameStats {
    window_start: Option<f64>,
    frames: u32,
    skipped: u32,
}

impl FrameStats {
    fn record(&mut self, timestamp: f64, presented: bool) {
        let start = *self.window_start.get_or_insert(timestamp);
        if presented {
            self.frames += 1;
        } else {
            self.skipped += 1;
        }
        let elapsed = timestamp - start;
        if elapsed >= 1.0 {
            debug!(
                fps = self.frames as f64 / elapsed,
                skipped = self.skipped,
                "render stats"
            );
            *self = FrameStats {
                window_start: Some(timestamp),
                ..FrameStats::default()
            };
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Compositor {
    /// Creates an uninitialised compositor. No GPU work happens until
    /// [`Compositor::initialize`].
    pub fn new(
        driver: BoxedDriver,
        host: Arc<dyn DisplayHost>,
        card: Box<dyn CardRenderer>,
        config: CompositorConfig,
    ) -> Result<Self, CompositorError> {
        config
            .validate()
            .map_err(|err| CompositorError::InvalidParameter(err.to_string()))?;
        let fade = FadeState::new(config.fade.easing);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                host,
                diagnostics: Diagnostics::default(),
                loader: LoadHandle::default(),
                epoch: Instant::now(),
                control: Mutex::new(Control {
                    lifecycle: Lifecycle::Uninitialized,
                    fade,
                    cursor_visible: true,
                }),
                render: Mutex::new(RenderSide {
                    driver,
                    card,
                    resources: None,
                    stats: FrameStats::default(),
                }),
                link: Mutex::new(None),
            }),
        })
    }

    /// Acquires the GPU contexts and builds the render path.
    ///
    /// On success the compositor is `Ready` and, unless the frame drive is
    /// manual, the display link is running.
    pub fn initialize(&self) -> Result<(), CompositorError> {
        self.shared.initialize()?;
        if self.shared.config.display.drive == FrameDrive::DisplayLink {
            if let Err(err) = Shared::start_link(&self.shared) {
                self.shared.abandon_initialize();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Renders one frame for the display refresh at `timestamp` seconds.
    ///
    /// Called by the display link; hosts using [`FrameDrive::Manual`] call it
    /// themselves. Timestamps must be non-decreasing.
    pub fn on_display_tick(&self, timestamp: f64) {
        self.shared.tick(timestamp);
    }

    /// Seconds since the compositor was created, on the display link's clock.
    pub fn now(&self) -> f64 {
        self.shared.epoch.elapsed().as_secs_f64()
    }

    /// Starts a fade, cancelling any fade already running.
    ///
    /// The previous fade's observer receives [`FadeOutcome::Cancelled`]
    /// before this returns; `observer` receives exactly one outcome later.
    pub fn begin_fade<F>(
        &self,
        target: FadeTarget,
        duration: f64,
        observer: F,
    ) -> Result<(), CompositorError>
    where
        F: FnOnce(FadeOutcome) + Send + 'static,
    {
        self.shared.begin_fade(target, duration, Box::new(observer))
    }

    /// Fades to `color` over the configured default duration.
    pub fn fade_to_color<F>(&self, color: Rgba, observer: F) -> Result<(), CompositorError>
    where
        F: FnOnce(FadeOutcome) + Send + 'static,
    {
        let duration = self.shared.config.fade.duration.as_secs_f64();
        self.begin_fade(FadeTarget::ToColor(color), duration, observer)
    }

    /// Fades from `color` back to the card over the configured default duration.
    pub fn fade_to_card<F>(&self, color: Rgba, observer: F) -> Result<(), CompositorError>
    where
        F: FnOnce(FadeOutcome) + Send + 'static,
    {
        let duration = self.shared.config.fade.duration.as_secs_f64();
        self.begin_fade(FadeTarget::ToCard(color), duration, observer)
    }

    /// Reconfigures the surface and the geometry stages for a new size.
    ///
    /// Zero-sized surfaces are ignored. Any running fade continues.
    pub fn resize(&self, size: PhysicalSize<u32>) -> Result<(), CompositorError> {
        self.shared.resize(size)
    }

    /// Re-reads the display profile and refresh rate after the surface moved
    /// to another display or the display settings changed.
    pub fn display_reconfigured(&self) {
        if self.shared.display_reconfigured() {
            if let Err(err) = Shared::start_link(&self.shared) {
                error!(?err, "failed to restart display link");
            }
        }
    }

    /// Re-selects the quality tier with new host preferences.
    pub fn set_quality_hints(&self, hints: QualityHints) -> Result<(), CompositorError> {
        self.shared.set_quality_hints(hints)
    }

    pub fn set_cursor_visible(&self, visible: bool) {
        self.shared.set_cursor_visible(visible);
    }

    /// Stops frame production and frees every GPU resource. Idempotent.
    pub fn teardown(&self) {
        self.shared.teardown();
    }

    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.shared.control).lifecycle
    }

    pub fn fade_status(&self) -> FadeStatus {
        lock(&self.shared.control).fade.status()
    }

    /// Current card visibility: 1.0 shows the card, 0.0 only the fade color.
    pub fn card_visibility(&self) -> f64 {
        lock(&self.shared.control).fade.visibility()
    }

    pub fn cursor_visible(&self) -> bool {
        lock(&self.shared.control).cursor_visible
    }

    pub fn loader(&self) -> LoadHandle {
        self.shared.loader.clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.shared.diagnostics.notices()
    }

    pub fn card_size(&self) -> CardSize {
        self.shared.config.card.size()
    }

    pub fn quality_tier(&self) -> Option<QualityTier> {
        lock(&self.shared.render)
            .resources
            .as_ref()
            .map(|resources| resources.tier)
    }

    pub fn color_selection(&self) -> Option<ColorSelection> {
        lock(&self.shared.render)
            .resources
            .as_ref()
            .map(|resources| resources.colors.clone())
    }

    pub fn capabilities(&self) -> Option<GpuCapabilities> {
        lock(&self.shared.render)
            .resources
            .as_ref()
            .map(|resources| resources.capabilities.clone())
    }

    /// Stage kinds of the current image chain, in application order.
    pub fn chain_stages(&self) -> Option<Vec<StageKind>> {
        lock(&self.shared.render)
            .resources
            .as_ref()
            .map(|resources| resources.chain.kinds())
    }

    /// Interval the display link is currently ticking at.
    pub fn refresh_interval(&self) -> Option<Duration> {
        lock(&self.shared.link).as_ref().map(DisplayLink::interval)
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl Shared {
    fn initialize(&self) -> Result<(), CompositorError> {
        let mut side = lock(&self.render);
        match lock(&self.control).lifecycle {
            Lifecycle::Uninitialized => {}
            Lifecycle::TornDown => return Err(CompositorError::TornDown),
            Lifecycle::Ready | Lifecycle::Rendering => {
                return Err(CompositorError::Initialization(
                    "compositor is already initialised".into(),
                ))
            }
        }

        let card = self.config.card.size();
        let surface = self.host.surface_size();
        if surface.width == 0 || surface.height == 0 {
            return Err(CompositorError::Initialization(format!(
                "surface is {}x{}; cannot render",
                surface.width, surface.height
            )));
        }

        let mut context = side
            .driver
            .create_render_context(surface)
            .map_err(|err| {
                CompositorError::Initialization(format!("no render context available: {err}"))
            })?;
        let capabilities = context.capabilities().clone();
        info!(
            adapter = %capabilities.adapter_name,
            backend = %capabilities.backend,
            api_version = ?capabilities.api_version,
            video_memory = ?capabilities.video_memory,
            is_software = capabilities.is_software,
            "created render context"
        );

        if let Err(reason) = self.config.quality.floor().check(&capabilities, card) {
            context.release();
            return Err(CompositorError::Initialization(reason));
        }

        let hints = self.config.quality.hints();
        let decision = select_tier(&capabilities, &hints);

        let mut load = match side.driver.create_load_context(context.id()) {
            Ok(load) => load,
            Err(err) => {
                context.release();
                return Err(CompositorError::Initialization(format!(
                    "no load context available: {err}"
                )));
            }
        };

        let target = match context.create_offscreen_target(card) {
            Ok(target) => target,
            Err(err) => {
                load.release();
                context.release();
                return Err(CompositorError::ResourceCreation(format!(
                    "offscreen card target: {err}"
                )));
            }
        };

        let colors = self.select_colors();
        let chain = match ImageChain::build(
            card,
            surface,
            self.config.display.scale_mode,
            &colors,
            decision.tier,
        ) {
            Ok(chain) => chain,
            Err(err) => {
                load.release();
                if let Err(delete) = context.delete_offscreen_target(target) {
                    warn!(?delete, "failed to delete offscreen target");
                }
                context.release();
                return Err(err);
            }
        };

        if let Some(reason) = decision.downgrade {
            self.diagnostics.record(Notice::QualityTierDowngrade {
                tier: decision.tier,
                reason,
            });
        }
        if let Some(reason) = &colors.degraded {
            self.diagnostics.record(Notice::ColorAccuracyFallback {
                fallback: colors.display.name().to_string(),
                reason: reason.clone(),
            });
        }

        info!(
            %card,
            surface_width = surface.width,
            surface_height = surface.height,
            tier = %decision.tier,
            working = %colors.working,
            display = %colors.display,
            "compositor initialised"
        );

        self.loader.install(load);
        side.resources = Some(Resources {
            context,
            bindings: BindingCache::default(),
            target,
            chain,
            colors,
            capabilities,
            hints,
            tier: decision.tier,
            clear: self.config.card.clear_color,
        });
        lock(&self.control).lifecycle = Lifecycle::Ready;
        Ok(())
    }

    /// Undoes a successful [`Shared::initialize`] so the caller may retry.
    fn abandon_initialize(&self) {
        let mut side = lock(&self.render);
        {
            let mut control = lock(&self.control);
            if control.lifecycle == Lifecycle::TornDown {
                return;
            }
            control.lifecycle = Lifecycle::Uninitialized;
        }
        self.loader.release();
        if let Some(resources) = side.resources.take() {
            resources.release();
        }
        warn!("compositor initialisation abandoned");
    }

    fn select_colors(&self) -> ColorSelection {
        let working = self.config.color.working.color_space();
        let fallback = self.config.color.fallback.color_space();
        let profile = if self.config.color.ignore_display_profile {
            None
        } else {
            self.host.color_profile()
        };
        ColorSelection::select(working, fallback, profile.as_deref())
    }

    fn desired_interval(&self) -> Duration {
        self.config
            .display
            .refresh_interval()
            .or_else(|| self.host.refresh_interval())
            .filter(|interval| !interval.is_zero())
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    fn start_link(this: &Arc<Self>) -> Result<(), CompositorError> {
        let interval = this.desired_interval();
        let weak: Weak<Shared> = Arc::downgrade(this);
        let link = DisplayLink::start(interval, this.epoch, move |timestamp| {
            if let Some(shared) = weak.upgrade() {
                shared.tick(timestamp);
            }
        })?;
        let previous = lock(&this.link).replace(link);
        if let Some(mut previous) = previous {
            previous.stop();
        }
        // Lost a race with teardown.
        if lock(&this.control).lifecycle == Lifecycle::TornDown {
            let orphan = lock(&this.link).take();
            if let Some(mut orphan) = orphan {
                orphan.stop();
            }
        }
        Ok(())
    }

    fn tick(&self, timestamp: f64) {
        let (sample, finished) = {
            let mut control = lock(&self.control);
            if control.lifecycle != Lifecycle::Ready {
                trace!(lifecycle = ?control.lifecycle, "skipping display tick");
                return;
            }
            control.lifecycle = Lifecycle::Rendering;
            control.fade.advance(timestamp)
        };

        if let Some(observer) = finished {
            debug!(timestamp, "fade finished");
            observer(FadeOutcome::Finished);
        }

        {
            let mut side = lock(&self.render);
            let RenderSide {
                card,
                resources,
                stats,
                ..
            } = &mut *side;
            if let Some(resources) = resources.as_mut() {
                let presented = match resources.render_frame(card.as_mut(), sample) {
                    Ok(()) => true,
                    Err(err) if err.is_transient() => {
                        debug!(?err, "frame skipped");
                        false
                    }
                    Err(DriverError::OutOfMemory) => {
                        error!("GPU out of memory; frame dropped");
                        false
                    }
                    Err(err) => {
                        warn!(?err, "failed to render frame");
                        false
                    }
                };
                stats.record(timestamp, presented);
            }
        }

        let mut control = lock(&self.control);
        if control.lifecycle == Lifecycle::Rendering {
            control.lifecycle = Lifecycle::Ready;
        }
    }

    fn begin_fade(
        &self,
        target: FadeTarget,
        duration: f64,
        observer: FadeCallback,
    ) -> Result<(), CompositorError> {
        validate_duration(duration)?;
        let replaced = {
            let mut control = lock(&self.control);
            if control.lifecycle == Lifecycle::TornDown {
                return Err(CompositorError::TornDown);
            }
            control.fade.begin(target, duration, observer)
        };
        debug!(?target, duration, "fade started");
        if let Some(previous) = replaced {
            debug!("previous fade cancelled");
            previous(FadeOutcome::Cancelled);
        }
        Ok(())
    }

    fn resize(&self, size: PhysicalSize<u32>) -> Result<(), CompositorError> {
        if size.width == 0 || size.height == 0 {
            debug!(width = size.width, height = size.height, "ignoring zero-sized resize");
            return Ok(());
        }
        let mut side = lock(&self.render);
        if lock(&self.control).lifecycle == Lifecycle::TornDown {
            return Err(CompositorError::TornDown);
        }
        let Some(resources) = side.resources.as_mut() else {
            return Ok(());
        };
        resources.resize(size)
    }

    /// Returns true when the display link must restart at a new interval.
    fn display_reconfigured(&self) -> bool {
        {
            let mut side = lock(&self.render);
            let Some(resources) = side.resources.as_mut() else {
                return false;
            };
            let selection = self.select_colors();
            match (&selection.degraded, resources.colors.is_degraded()) {
                (Some(reason), false) => self.diagnostics.record(Notice::ColorAccuracyFallback {
                    fallback: selection.display.name().to_string(),
                    reason: reason.clone(),
                }),
                (None, true) => info!(display = %selection.display, "display color profile restored"),
                _ => {}
            }
            resources.chain.set_colors(&selection);
            resources.colors = selection;
        }

        let desired = self.desired_interval();
        match lock(&self.link).as_ref() {
            Some(current) if current.interval() != desired => {
                info!(
                    from_ms = current.interval().as_secs_f64() * 1000.0,
                    to_ms = desired.as_secs_f64() * 1000.0,
                    "display refresh interval changed"
                );
                true
            }
            _ => false,
        }
    }

    fn set_quality_hints(&self, hints: QualityHints) -> Result<(), CompositorError> {
        let mut side = lock(&self.render);
        if lock(&self.control).lifecycle == Lifecycle::TornDown {
            return Err(CompositorError::TornDown);
        }
        let Some(resources) = side.resources.as_mut() else {
            return Ok(());
        };
        let decision = select_tier(&resources.capabilities, &hints);
        resources.hints = hints;
        if decision.tier == resources.tier {
            return Ok(());
        }
        info!(from = %resources.tier, to = %decision.tier, "quality tier changed");
        resources.chain.set_tier(decision.tier, &resources.colors);
        resources.tier = decision.tier;
        if let Some(reason) = decision.downgrade {
            self.diagnostics.record(Notice::QualityTierDowngrade {
                tier: decision.tier,
                reason,
            });
        }
        Ok(())
    }

    fn set_cursor_visible(&self, visible: bool) {
        {
            let mut control = lock(&self.control);
            if control.lifecycle == Lifecycle::TornDown || control.cursor_visible == visible {
                return;
            }
            control.cursor_visible = visible;
        }
        self.host.set_cursor_visible(visible);
    }

    fn teardown(&self) {
        let link = lock(&self.link).take();
        if let Some(mut link) = link {
            link.stop();
        }

        let cancelled = {
            let mut control = lock(&self.control);
            if control.lifecycle == Lifecycle::TornDown {
                return;
            }
            control.lifecycle = Lifecycle::TornDown;
            control.fade.cancel()
        };
        if let Some(observer) = cancelled {
            debug!("fade cancelled by teardown");
            observer(FadeOutcome::Cancelled);
        }

        self.loader.release();
        let resources = lock(&self.render).resources.take();
        if let Some(resources) = resources {
            resources.release();
        }
        if !lock(&self.control).cursor_visible {
            self.host.set_cursor_visible(true);
        }
        info!("compositor torn down");
    }
}

impl Resources {
    fn render_frame(
        &mut self,
        card: &mut dyn CardRenderer,
        sample: FadeSample,
    ) -> Result<(), DriverError> {
        self.context.begin_offscreen(self.target, self.clear)?;
        card.render_card(&mut StateGuard::new(self.context.as_mut(), &mut self.bindings));
        self.context.end_offscreen()?;

        self.chain.set_blend(sample.color, sample.visibility);
        let uniforms = self.chain.uniforms();
        let composited = self.context.composite(self.target, &uniforms);
        // The composite pass binds its own geometry.
        self.bindings.reset();
        composited?;
        self.context.present()
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<(), CompositorError> {
        if self.chain.surface() == size {
            return Ok(());
        }
        self.context
            .resize_surface(size)
            .map_err(|err| CompositorError::ResourceCreation(format!("surface resize: {err}")))?;
        self.chain.resize(size)?;
        debug!(width = size.width, height = size.height, "surface resized");
        Ok(())
    }

    /// Offscreen target, chain, then the render context itself.
    fn release(mut self) {
        if let Err(err) = self.context.delete_offscreen_target(self.target) {
            warn!(?err, "failed to delete offscreen target during teardown");
        }
        drop(self.chain);
        self.bindings.reset();
        self.context.release();
    }
}
