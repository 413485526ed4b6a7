use tracing::trace;

use crate::error::CompositorError;
use crate::interpolator::{Easing, Interpolator};
use crate::types::{FadeOutcome, FadeStatus, FadeTarget, Rgba};

/// Completion callback for a single fade. Invoked exactly once.
pub type FadeCallback = Box<dyn FnOnce(FadeOutcome) + Send>;

/// Blend parameters for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FadeSample {
    pub color: Rgba,
    /// Card visibility; `1.0` shows the card, `0.0` shows only `color`.
    pub visibility: f32,
}

struct ActiveFade {
    target: FadeTarget,
    duration: f64,
    easing: Easing,
    /// Bound to the timestamp of the first tick that observes the fade.
    start: Option<f64>,
    observer: FadeCallback,
}

impl ActiveFade {
    fn interpolator(&self, start: f64) -> Interpolator {
        let (from, to) = self.target.visibility_range();
        Interpolator::over(start, self.duration, from, to).with_easing(self.easing)
    }
}

/// Fade sub-state machine. Holds at most one active fade.
pub(crate) struct FadeState {
    active: Option<ActiveFade>,
    color: Rgba,
    visibility: f64,
    easing: Easing,
}

pub(crate) fn validate_duration(duration: f64) -> Result<(), CompositorError> {
    if duration.is_finite() && duration > 0.0 {
        Ok(())
    } else {
        Err(CompositorError::InvalidParameter(format!(
            "fade duration must be a positive number of seconds, got {duration}"
        )))
    }
}

impl FadeState {
    pub fn new(easing: Easing) -> Self {
        Self {
            active: None,
            color: Rgba::BLACK,
            visibility: 1.0,
            easing,
        }
    }

    pub fn status(&self) -> FadeStatus {
        self.active
            .as_ref()
            .map(|fade| fade.target.status())
            .unwrap_or(FadeStatus::NoFade)
    }

    pub fn visibility(&self) -> f64 {
        self.visibility
    }

    /// Installs a new fade and returns the observer of the fade it replaced.
    ///
    /// The duration must already have passed [`validate_duration`].
    pub fn begin(
        &mut self,
        target: FadeTarget,
        duration: f64,
        observer: FadeCallback,
    ) -> Option<FadeCallback> {
        self.color = target.color();
        let replaced = self.active.replace(ActiveFade {
            target,
            duration,
            easing: self.easing,
            start: None,
            observer,
        });
        replaced.map(|fade| fade.observer)
    }

    /// Drops the active fade without completing it.
    pub fn cancel(&mut self) -> Option<FadeCallback> {
        self.active.take().map(|fade| fade.observer)
    }

    /// Evaluates the fade at `now`.
    ///
    /// When the fade reaches its end the sub-state returns to `NoFade` and the
    /// observer is handed back so the caller can invoke it outside any lock.
    pub fn advance(&mut self, now: f64) -> (FadeSample, Option<FadeCallback>) {
        let mut finished = None;
        if let Some(fade) = self.active.as_mut() {
            let start = *fade.start.get_or_insert(now);
            let interpolator = fade.interpolator(start);
            self.visibility = interpolator.value_at(now);
            trace!(
                progress = interpolator.progress_at(now),
                visibility = self.visibility,
                "fade sample"
            );
            if interpolator.is_complete_at(now) {
                finished = self.active.take().map(|fade| fade.observer);
            }
        }
        (self.sample(), finished)
    }

    pub fn sample(&self) -> FadeSample {
        FadeSample {
            color: self.color,
            visibility: self.visibility as f32,
        }
    }
}
