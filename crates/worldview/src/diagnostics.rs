use std::fmt;
use std::sync::Mutex;

use tracing::warn;

use crate::quality::QualityTier;

/// A degraded-mode event the host may want to surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The display profile could not be used; colors assume `fallback`.
    ColorAccuracyFallback { fallback: String, reason: String },
    /// Hardware limits forced a lower quality tier than requested.
    QualityTierDowngrade { tier: QualityTier, reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ColorAccuracyFallback { fallback, reason } => {
                write!(f, "colors may be inaccurate, assuming {fallback}: {reason}")
            }
            Notice::QualityTierDowngrade { tier, reason } => {
                write!(f, "rendering at {tier} quality: {reason}")
            }
        }
    }
}

/// Collects notices and mirrors each to the `worldview::diagnostics` target.
#[derive(Debug, Default)]
pub struct Diagnostics {
    notices: Mutex<Vec<Notice>>,
}

impl Diagnostics {
    pub fn record(&self, notice: Notice) {
        warn!(target: "worldview::diagnostics", %notice, "degraded mode");
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice);
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_are_kept_in_order() {
        let diagnostics = Diagnostics::default();
        diagnostics.record(Notice::ColorAccuracyFallback {
            fallback: "sRGB".into(),
            reason: "no profile".into(),
        });
        diagnostics.record(Notice::QualityTierDowngrade {
            tier: QualityTier::Direct,
            reason: "software".into(),
        });
        let notices = diagnostics.notices();
        assert_eq!(notices.len(), 2);
        assert!(matches!(notices[0], Notice::ColorAccuracyFallback { .. }));
        assert!(notices[1].to_string().contains("direct"));
    }
}
