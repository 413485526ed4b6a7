//! Display-synchronised card compositor.
//!
//! A fixed-size card is rendered into an offscreen target once per display
//! refresh, then scaled, cropped, colour converted and blended against a fade
//! colour on its way to the window surface:
//!
//! ```text
//!   host (window, colour profile)
//!          │ CompositorConfig
//!          ▼
//!   Compositor::initialize ──▶ render + load contexts ──▶ ImageChain
//!          ▲                                                  │
//!   DisplayLink ─tick─▶ FadeState::advance ─▶ card pass ─▶ composite ─▶ present
//! ```
//!
//! Card assets are uploaded from any thread through a [`LoadHandle`], which
//! owns a second GPU context sharing the render context's namespace. All GPU
//! calls go through the [`gpu::GpuContext`] trait: [`gpu::WgpuDriver`] for a
//! real surface and [`gpu::RecordingDriver`] for headless use.

pub mod chain;
pub mod color;
pub mod compositor;
pub mod config;
pub mod diagnostics;
pub mod display_link;
pub mod error;
pub mod fade;
pub mod gpu;
pub mod host;
pub mod interpolator;
pub mod loader;
pub mod quality;
pub mod types;

pub use chain::{ImageChain, StageKind};
pub use color::{ColorConversion, ColorSelection, ColorSpace, NamedColorSpace, TransferFunction};
pub use compositor::{BlankCard, CardRenderer, Compositor};
pub use config::{CompositorConfig, ConfigError};
pub use diagnostics::Notice;
pub use error::{CompositorError, DriverError};
pub use fade::FadeCallback;
pub use host::{DisplayHost, StaticDisplayHost, WinitDisplayHost};
pub use interpolator::{Easing, Interpolator};
pub use loader::LoadHandle;
pub use quality::{CapabilityFloor, QualityHints, QualityTier};
pub use types::{
    CardSize, FadeOutcome, FadeStatus, FadeTarget, FrameDrive, Lifecycle, Rgba, ScaleMode,
};
