use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical resolution of the card image, in card pixels.
///
/// The card is always rendered at this size into the offscreen target,
/// independent of how large the visible surface is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardSize {
    pub width: u32,
    pub height: u32,
}

impl CardSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

impl Default for CardSize {
    /// The classic 608x392 card viewport.
    fn default() -> Self {
        Self::new(608, 392)
    }
}

impl fmt::Display for CardSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Straight-alpha RGBA color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// True when every channel is finite and inside `[0, 1]`.
    pub fn is_normalized(&self) -> bool {
        self.to_array()
            .iter()
            .all(|channel| channel.is_finite() && (0.0..=1.0).contains(channel))
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::BLACK
    }
}

impl From<[f32; 4]> for Rgba {
    fn from(value: [f32; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<Rgba> for [f32; 4] {
    fn from(value: Rgba) -> Self {
        value.to_array()
    }
}

/// Lifecycle of the compositor. `TornDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    /// A display tick is currently drawing and presenting a frame.
    Rendering,
    TornDown,
}

/// Fade sub-state, orthogonal to [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeStatus {
    NoFade,
    FadingToColor,
    FadingToCard,
}

/// Destination of a fade transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeTarget {
    /// Covers the card with the solid color (card visibility 1 -> 0).
    ToColor(Rgba),
    /// Reveals the card from behind the solid color (card visibility 0 -> 1).
    ToCard(Rgba),
}

impl FadeTarget {
    pub fn color(&self) -> Rgba {
        match *self {
            FadeTarget::ToColor(color) | FadeTarget::ToCard(color) => color,
        }
    }

    /// Card visibility at the start and end of the fade.
    pub fn visibility_range(&self) -> (f64, f64) {
        match self {
            FadeTarget::ToColor(_) => (1.0, 0.0),
            FadeTarget::ToCard(_) => (0.0, 1.0),
        }
    }

    pub fn status(&self) -> FadeStatus {
        match self {
            FadeTarget::ToColor(_) => FadeStatus::FadingToColor,
            FadeTarget::ToCard(_) => FadeStatus::FadingToCard,
        }
    }
}

/// Delivered to a fade observer exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    /// The fade ran for its full duration.
    Finished,
    /// The fade was superseded by another fade or by teardown.
    Cancelled,
}

impl FadeOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FadeOutcome::Cancelled)
    }
}

/// How the card is mapped onto a surface whose aspect ratio differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Show the whole card, letterboxing the remainder of the surface.
    #[default]
    Fit,
    /// Cover the whole surface, cropping the overflowing part of the card.
    Fill,
}

/// Where display ticks come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameDrive {
    /// A dedicated thread ticks at the display refresh interval.
    #[default]
    DisplayLink,
    /// The host calls `on_display_tick` itself.
    Manual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_targets_map_card_visibility() {
        assert_eq!(FadeTarget::ToColor(Rgba::BLACK).visibility_range(), (1.0, 0.0));
        assert_eq!(FadeTarget::ToCard(Rgba::BLACK).visibility_range(), (0.0, 1.0));
        assert_eq!(
            FadeTarget::ToCard(Rgba::WHITE).status(),
            FadeStatus::FadingToCard
        );
    }

    #[test]
    fn rgba_normalization_rejects_out_of_range_channels() {
        assert!(Rgba::new(0.2, 0.4, 1.0, 1.0).is_normalized());
        assert!(!Rgba::new(1.2, 0.0, 0.0, 1.0).is_normalized());
        assert!(!Rgba::new(f32::NAN, 0.0, 0.0, 1.0).is_normalized());
    }
}
