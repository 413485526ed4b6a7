use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gpu::driver::GpuCapabilities;
use crate::types::CardSize;

/// Rendering path chosen for the image chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityTier {
    /// Full chain including working-to-display color conversion.
    ColorManaged,
    /// Scale, crop and blend only; card pixels go straight to the display.
    Direct,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::ColorManaged => f.write_str("color-managed"),
            QualityTier::Direct => f.write_str("direct"),
        }
    }
}

/// Host preferences that feed tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityHints {
    pub prefer_color_management: bool,
    /// Minimum dedicated video memory for the color-managed tier, in bytes.
    pub min_color_managed_memory: u64,
    /// Allow the color-managed tier on software rasterizers.
    pub allow_software: bool,
}

impl Default for QualityHints {
    fn default() -> Self {
        Self {
            prefer_color_management: true,
            min_color_managed_memory: 256 << 20,
            allow_software: false,
        }
    }
}

/// Minimum capabilities a render context must offer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityFloor {
    pub min_api_version: Option<(u32, u32)>,
    pub required_extensions: Vec<String>,
}

impl CapabilityFloor {
    /// Returns a description of the first unmet requirement.
    pub fn check(&self, capabilities: &GpuCapabilities, card: CardSize) -> Result<(), String> {
        if let Some(required) = self.min_api_version {
            match capabilities.api_version {
                Some(actual) if actual >= required => {}
                Some(actual) => {
                    return Err(format!(
                        "{} reports API {}.{}, need at least {}.{}",
                        capabilities.adapter_name, actual.0, actual.1, required.0, required.1
                    ))
                }
                None => {
                    return Err(format!(
                        "{} does not report an API version, need at least {}.{}",
                        capabilities.adapter_name, required.0, required.1
                    ))
                }
            }
        }
        if let Some(missing) = self
            .required_extensions
            .iter()
            .find(|name| !capabilities.has_extension(name))
        {
            return Err(format!(
                "{} lacks required extension {missing}",
                capabilities.adapter_name
            ));
        }
        let needed = card.width.max(card.height);
        if capabilities.max_texture_dimension < needed {
            return Err(format!(
                "{} supports textures up to {}px, the {card} card needs {needed}px",
                capabilities.adapter_name, capabilities.max_texture_dimension
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierDecision {
    pub tier: QualityTier,
    /// Set when hardware limits forced a lower tier than requested.
    pub downgrade: Option<String>,
}

pub fn select_tier(capabilities: &GpuCapabilities, hints: &QualityHints) -> TierDecision {
    if !hints.prefer_color_management {
        return TierDecision {
            tier: QualityTier::Direct,
            downgrade: None,
        };
    }
    let reason = if capabilities.is_software && !hints.allow_software {
        Some(format!(
            "{} is a software rasterizer",
            capabilities.adapter_name
        ))
    } else {
        match capabilities.video_memory {
            Some(memory) if memory < hints.min_color_managed_memory => Some(format!(
                "{} has {} MiB of video memory, color management needs {} MiB",
                capabilities.adapter_name,
                memory >> 20,
                hints.min_color_managed_memory >> 20
            )),
            _ => None,
        }
    };
    match reason {
        Some(reason) => TierDecision {
            tier: QualityTier::Direct,
            downgrade: Some(reason),
        },
        None => TierDecision {
            tier: QualityTier::ColorManaged,
            downgrade: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> GpuCapabilities {
        GpuCapabilities {
            adapter_name: "Test GPU".into(),
            backend: "test".into(),
            api_version: Some((3, 3)),
            extensions: vec!["FLOAT32_FILTERABLE".into()],
            max_texture_dimension: 2048,
            video_memory: Some(1 << 30),
            is_software: false,
        }
    }

    #[test]
    fn floor_accepts_capable_adapter() {
        let floor = CapabilityFloor {
            min_api_version: Some((3, 2)),
            required_extensions: vec!["float32_filterable".into()],
        };
        assert!(floor.check(&capabilities(), CardSize::new(608, 392)).is_ok());
    }

    #[test]
    fn floor_rejects_old_api_missing_extension_and_small_textures() {
        let caps = capabilities();
        let old = CapabilityFloor {
            min_api_version: Some((4, 0)),
            ..CapabilityFloor::default()
        };
        assert!(old.check(&caps, CardSize::default()).is_err());

        let extension = CapabilityFloor {
            required_extensions: vec!["SHADER_F64".into()],
            ..CapabilityFloor::default()
        };
        let err = extension.check(&caps, CardSize::default()).unwrap_err();
        assert!(err.contains("SHADER_F64"));

        let oversized = CardSize::new(4096, 100);
        assert!(CapabilityFloor::default().check(&caps, oversized).is_err());
    }

    #[test]
    fn software_adapters_fall_back_to_direct() {
        let caps = GpuCapabilities {
            is_software: true,
            ..capabilities()
        };
        let decision = select_tier(&caps, &QualityHints::default());
        assert_eq!(decision.tier, QualityTier::Direct);
        assert!(decision.downgrade.is_some());

        let allowed = select_tier(
            &caps,
            &QualityHints {
                allow_software: true,
                ..QualityHints::default()
            },
        );
        assert_eq!(allowed.tier, QualityTier::ColorManaged);
    }

    #[test]
    fn low_memory_downgrades_but_unknown_memory_does_not() {
        let small = GpuCapabilities {
            video_memory: Some(64 << 20),
            ..capabilities()
        };
        assert_eq!(
            select_tier(&small, &QualityHints::default()).tier,
            QualityTier::Direct
        );
        let unknown = GpuCapabilities {
            video_memory: None,
            ..capabilities()
        };
        assert_eq!(
            select_tier(&unknown, &QualityHints::default()).tier,
            QualityTier::ColorManaged
        );
    }

    #[test]
    fn opting_out_is_not_a_downgrade() {
        let decision = select_tier(
            &capabilities(),
            &QualityHints {
                prefer_color_management: false,
                ..QualityHints::default()
            },
        );
        assert_eq!(decision.tier, QualityTier::Direct);
        assert_eq!(decision.downgrade, None);
    }
}
