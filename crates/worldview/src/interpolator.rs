use serde::{Deserialize, Serialize};

/// Shape applied to the normalized progress before it is mapped into the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    #[default]
    Linear,
    Smoothstep,
    EaseInOut,
}

impl Easing {
    /// Reshapes progress that is already clamped to `[0, 1]`.
    fn shape(self, progress: f64) -> f64 {
        match self {
            Easing::Linear => progress,
            Easing::Smoothstep => progress * progress * (3.0 - 2.0 * progress),
            Easing::EaseInOut if progress < 0.5 => 2.0 * progress * progress,
            Easing::EaseInOut => {
                let remaining = 1.0 - progress;
                1.0 - 2.0 * remaining * remaining
            }
        }
    }
}

/// Clamped mapping from a time domain onto a value range.
///
/// The interpolator owns no clock: callers pass the sample (usually a frame
/// timestamp in seconds) on every evaluation. Samples outside the domain
/// return the nearest range endpoint, so a late frame can never overshoot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolator {
    domain_start: f64,
    domain_end: f64,
    range_start: f64,
    range_end: f64,
    easing: Easing,
}

impl Interpolator {
    pub fn new(domain_start: f64, domain_end: f64, range_start: f64, range_end: f64) -> Self {
        Self {
            domain_start,
            domain_end,
            range_start,
            range_end,
            easing: Easing::Linear,
        }
    }

    /// Interpolator covering `[start, start + duration]`.
    pub fn over(start: f64, duration: f64, from: f64, to: f64) -> Self {
        Self::new(start, start + duration, from, to)
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.domain_start, self.domain_end)
    }

    pub fn range(&self) -> (f64, f64) {
        (self.range_start, self.range_end)
    }

    pub fn easing(&self) -> Easing {
        self.easing
    }

    /// Normalized position of `sample` inside the domain, clamped to `[0, 1]`.
    ///
    /// The endpoints are exact: `domain_start` yields `0.0` and
    /// `domain_end` yields `1.0`.
    pub fn progress_at(&self, sample: f64) -> f64 {
        if sample.is_nan() {
            return 0.0;
        }
        if sample >= self.domain_end {
            return 1.0;
        }
        if sample <= self.domain_start {
            return 0.0;
        }
        let span = self.domain_end - self.domain_start;
        ((sample - self.domain_start) / span).clamp(0.0, 1.0)
    }

    pub fn value_at(&self, sample: f64) -> f64 {
        let progress = self.progress_at(sample);
        if progress <= 0.0 {
            return self.range_start;
        }
        if progress >= 1.0 {
            return self.range_end;
        }
        self.range_start + (self.range_end - self.range_start) * self.easing.shape(progress)
    }

    pub fn is_complete_at(&self, sample: f64) -> bool {
        self.progress_at(sample) >= 1.0
    }
}
