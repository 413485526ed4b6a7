use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::color::NamedColorSpace;
use crate::interpolator::Easing;
use crate::quality::{CapabilityFloor, QualityHints};
use crate::types::{CardSize, FrameDrive, Rgba, ScaleMode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the compositor reads at construction time.
///
/// All sections are optional in TOML; missing keys take the defaults below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub card: CardConfig,
    pub display: DisplayConfig,
    pub color: ColorConfig,
    pub quality: QualityConfig,
    pub fade: FadeConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CardConfig {
    pub width: u32,
    pub height: u32,
    /// Color the offscreen target is cleared to before the card is drawn.
    pub clear_color: Rgba,
}

impl Default for CardConfig {
    fn default() -> Self {
        let size = CardSize::default();
        Self {
            width: size.width,
            height: size.height,
            clear_color: Rgba::BLACK,
        }
    }
}

impl CardConfig {
    pub fn size(&self) -> CardSize {
        CardSize::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Overrides the refresh rate reported by the display, in Hz.
    pub refresh_rate: Option<f64>,
    pub drive: FrameDrive,
    pub scale_mode: ScaleMode,
}

impl DisplayConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| Duration::from_secs_f64(1.0 / rate))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Space the card content is authored in.
    pub working: NamedColorSpace,
    /// Display space assumed when the display profile is unusable.
    pub fallback: NamedColorSpace,
    /// Never query the display profile; always use the fallback.
    pub ignore_display_profile: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QualityConfig {
    pub prefer_color_management: bool,
    /// Minimum video memory for the color-managed tier, in MiB.
    pub min_color_managed_vram_mib: u64,
    pub allow_software: bool,
    /// Minimum driver API version as `"major.minor"`.
    #[serde(
        deserialize_with = "deserialize_version_opt",
        serialize_with = "serialize_version_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_api_version: Option<(u32, u32)>,
    pub required_extensions: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        let hints = QualityHints::default();
        Self {
            prefer_color_management: hints.prefer_color_management,
            min_color_managed_vram_mib: hints.min_color_managed_memory >> 20,
            allow_software: hints.allow_software,
            min_api_version: None,
            required_extensions: Vec::new(),
        }
    }
}

impl QualityConfig {
    pub fn hints(&self) -> QualityHints {
        QualityHints {
            prefer_color_management: self.prefer_color_management,
            min_color_managed_memory: self.min_color_managed_vram_mib << 20,
            allow_software: self.allow_software,
        }
    }

    pub fn floor(&self) -> CapabilityFloor {
        CapabilityFloor {
            min_api_version: self.min_api_version,
            required_extensions: self.required_extensions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FadeConfig {
    /// Duration used by [`crate::Compositor::fade_to_color`] and
    /// [`crate::Compositor::fade_to_card`].
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub duration: Duration,
    pub easing: Easing,
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            duration: default_fade_duration(),
            easing: Easing::Linear,
        }
    }
}

fn default_fade_duration() -> Duration {
    Duration::from_millis(500)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn serialize_version_opt<S>(value: &Option<(u32, u32)>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some((major, minor)) => serializer.serialize_some(&format!("{major}.{minor}")),
        None => serializer.serialize_none(),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_version_opt<'de, D>(deserializer: D) -> Result<Option<(u32, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| parse_version_requirement(&value).map_err(de::Error::custom))
        .transpose()
}

fn parse_version_requirement(raw: &str) -> Result<(u32, u32), String> {
    let trimmed = raw.trim();
    let (major, minor) = trimmed.split_once('.').unwrap_or((trimmed, "0"));
    let major = major
        .parse()
        .map_err(|_| format!("invalid API version '{raw}'; expected 'major.minor'"))?;
    let minor = minor
        .parse()
        .map_err(|_| format!("invalid API version '{raw}'; expected 'major.minor'"))?;
    Ok((major, minor))
}

impl CompositorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CompositorConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.card.width == 0 || self.card.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "card size must be non-zero, got {}",
                self.card.size()
            )));
        }

        if !self.card.clear_color.is_normalized() {
            return Err(ConfigError::Invalid(
                "card.clear_color channels must lie in [0, 1]".into(),
            ));
        }

        if let Some(rate) = self.display.refresh_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "display.refresh_rate must be > 0, got {rate}"
                )));
            }
        }

        if self.fade.duration.is_zero() {
            return Err(ConfigError::Invalid(
                "fade.duration must be greater than zero".into(),
            ));
        }

        if let Some(extension) = self
            .quality
            .required_extensions
            .iter()
            .find(|name| name.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "quality.required_extensions contains an empty name ('{extension}')"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CompositorConfig::from_toml_str("").expect("defaults are valid");
        assert_eq!(config, CompositorConfig::default());
        assert_eq!(config.card.size(), CardSize::new(608, 392));
        assert_eq!(config.display.drive, FrameDrive::DisplayLink);
        assert_eq!(config.fade.duration, Duration::from_millis(500));
    }

    #[test]
    fn parses_full_document() {
        let config = CompositorConfig::from_toml_str(
            r#"
            [card]
            width = 640
            height = 480
            clear_color = [0.0, 0.0, 0.2, 1.0]

            [display]
            refresh_rate = 120.0
            drive = "manual"
            scale_mode = "fill"

            [color]
            working = "display-p3"
            fallback = "srgb"

            [quality]
            prefer_color_management = false
            min_color_managed_vram_mib = 512
            min_api_version = "3.2"
            required_extensions = ["TEXTURE_COMPRESSION_BC"]

            [fade]
            duration = "750ms"
            easing = "ease-in-out"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.card.size(), CardSize::new(640, 480));
        assert_eq!(config.card.clear_color, Rgba::new(0.0, 0.0, 0.2, 1.0));
        assert_eq!(config.display.drive, FrameDrive::Manual);
        assert_eq!(config.display.scale_mode, ScaleMode::Fill);
        let interval = config.display.refresh_interval().unwrap();
        assert!((interval.as_secs_f64() - 1.0 / 120.0).abs() < 1e-9);
        assert_eq!(config.color.working, NamedColorSpace::DisplayP3);
        assert_eq!(config.quality.min_api_version, Some((3, 2)));
        assert_eq!(config.quality.hints().min_color_managed_memory, 512 << 20);
        assert!(!config.quality.hints().prefer_color_management);
        assert_eq!(config.fade.duration, Duration::from_millis(750));
        assert_eq!(config.fade.easing, Easing::EaseInOut);
    }

    #[test]
    fn numeric_fade_duration_is_seconds() {
        let config = CompositorConfig::from_toml_str("[fade]\nduration = 1.5\n").unwrap();
        assert_eq!(config.fade.duration, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_zero_card_and_bad_refresh() {
        let err = CompositorConfig::from_toml_str("[card]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = CompositorConfig::from_toml_str("[display]\nrefresh_rate = -60.0\n").unwrap_err();
        assert!(err.to_string().contains("refresh_rate"));
    }

    #[test]
    fn rejects_malformed_version() {
        let err =
            CompositorConfig::from_toml_str("[quality]\nmin_api_version = \"four\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_fade() {
        let err = CompositorConfig::from_toml_str("[fade]\nduration = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("fade.duration"));
    }
}
