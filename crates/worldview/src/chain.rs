//! The post-processing chain applied to the card image every frame.
//!
//! ```text
//!  card target ─▶ Scale ─▶ Crop ─▶ ColorConvert ─▶ Blend ─▶ surface
//!                                  (color-managed tier only)
//! ```
//!
//! Stages are plain data. Building the chain does the geometry and matrix
//! math once; each frame only patches the blend stage and folds every stage
//! into a single [`CompositeUniforms`] block for the composite pass.

use winit::dpi::PhysicalSize;

use crate::color::{ColorConversion, ColorSelection};
use crate::error::CompositorError;
use crate::gpu::uniforms::CompositeUniforms;
use crate::quality::QualityTier;
use crate::types::{CardSize, Rgba, ScaleMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Scale,
    Crop,
    ColorConvert,
    Blend,
}

/// Maps the card onto the surface, centred.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleStage {
    pub factor: f32,
    /// Scaled card rectangle in surface pixels; may extend past the surface.
    pub placement: [f32; 4],
}

/// Clips the scaled card to the surface bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropStage {
    /// Visible rectangle in surface pixels.
    pub visible: [f32; 4],
    /// The same region in card texture coordinates.
    pub source: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorConvertStage {
    pub from: String,
    pub to: String,
    pub conversion: ColorConversion,
}

/// Mixes the card with a solid color; `visibility` 1.0 shows only the card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendStage {
    pub color: Rgba,
    pub visibility: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Scale(ScaleStage),
    Crop(CropStage),
    ColorConvert(ColorConvertStage),
    Blend(BlendStage),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Scale(_) => StageKind::Scale,
            Stage::Crop(_) => StageKind::Crop,
            Stage::ColorConvert(_) => StageKind::ColorConvert,
            Stage::Blend(_) => StageKind::Blend,
        }
    }

    fn apply(&self, uniforms: &mut CompositeUniforms) {
        match self {
            Stage::Scale(scale) => {
                uniforms.set_destination(scale.placement);
                uniforms.set_source([0.0, 0.0, 1.0, 1.0]);
            }
            Stage::Crop(crop) => {
                uniforms.set_destination(crop.visible);
                uniforms.set_source(crop.source);
            }
            Stage::ColorConvert(convert) => uniforms.set_color_conversion(
                convert.conversion.matrix_columns(),
                convert.conversion.transfer_codes(),
            ),
            Stage::Blend(blend) => uniforms.set_fade(blend.color.to_array(), blend.visibility),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageChain {
    card: CardSize,
    surface: PhysicalSize<u32>,
    mode: ScaleMode,
    stages: Vec<Stage>,
}

impl ImageChain {
    pub fn build(
        card: CardSize,
        surface: PhysicalSize<u32>,
        mode: ScaleMode,
        colors: &ColorSelection,
        tier: QualityTier,
    ) -> Result<Self, CompositorError> {
        if card.is_empty() {
            return Err(CompositorError::ResourceCreation(format!(
                "cannot build image chain for an empty {card} card"
            )));
        }
        let (scale, crop) = geometry(card, surface, mode)?;
        let mut stages = vec![Stage::Scale(scale), Stage::Crop(crop)];
        if tier == QualityTier::ColorManaged {
            stages.push(Stage::ColorConvert(color_stage(colors)));
        }
        stages.push(Stage::Blend(BlendStage {
            color: Rgba::BLACK,
            visibility: 1.0,
        }));
        Ok(Self {
            card,
            surface,
            mode,
            stages,
        })
    }

    pub fn card(&self) -> CardSize {
        self.card
    }

    pub fn surface(&self) -> PhysicalSize<u32> {
        self.surface
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    pub fn tier(&self) -> QualityTier {
        if self.color_convert().is_some() {
            QualityTier::ColorManaged
        } else {
            QualityTier::Direct
        }
    }

    pub fn scale(&self) -> Option<&ScaleStage> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Scale(scale) => Some(scale),
            _ => None,
        })
    }

    pub fn crop(&self) -> Option<&CropStage> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Crop(crop) => Some(crop),
            _ => None,
        })
    }

    pub fn color_convert(&self) -> Option<&ColorConvertStage> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::ColorConvert(convert) => Some(convert),
            _ => None,
        })
    }

    pub fn blend(&self) -> Option<&BlendStage> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Blend(blend) => Some(blend),
            _ => None,
        })
    }

    /// Recomputes only the scale and crop stages for a new surface size.
    pub fn resize(&mut self, surface: PhysicalSize<u32>) -> Result<(), CompositorError> {
        let (scale, crop) = geometry(self.card, surface, self.mode)?;
        for stage in &mut self.stages {
            match stage {
                Stage::Scale(existing) => *existing = scale,
                Stage::Crop(existing) => *existing = crop,
                _ => {}
            }
        }
        self.surface = surface;
        Ok(())
    }

    /// Swaps the color stage for a new working/display selection.
    pub fn set_colors(&mut self, colors: &ColorSelection) {
        for stage in &mut self.stages {
            if let Stage::ColorConvert(existing) = stage {
                *existing = color_stage(colors);
            }
        }
    }

    /// Adds or removes the color stage to match `tier`.
    pub fn set_tier(&mut self, tier: QualityTier, colors: &ColorSelection) {
        self.stages
            .retain(|stage| stage.kind() != StageKind::ColorConvert);
        if tier == QualityTier::ColorManaged {
            let at = self
                .stages
                .iter()
                .position(|stage| stage.kind() == StageKind::Blend)
                .unwrap_or(self.stages.len());
            self.stages
                .insert(at, Stage::ColorConvert(color_stage(colors)));
        }
    }

    pub fn set_blend(&mut self, color: Rgba, visibility: f32) {
        for stage in &mut self.stages {
            if let Stage::Blend(blend) = stage {
                blend.color = color;
                blend.visibility = visibility.clamp(0.0, 1.0);
            }
        }
    }

    pub fn uniforms(&self) -> CompositeUniforms {
        let mut uniforms = CompositeUniforms::new(self.surface.width, self.surface.height);
        for stage in &self.stages {
            stage.apply(&mut uniforms);
        }
        uniforms
    }
}

fn color_stage(colors: &ColorSelection) -> ColorConvertStage {
    ColorConvertStage {
        from: colors.working.name().to_string(),
        to: colors.display.name().to_string(),
        conversion: colors.conversion(),
    }
}

fn geometry(
    card: CardSize,
    surface: PhysicalSize<u32>,
    mode: ScaleMode,
) -> Result<(ScaleStage, CropStage), CompositorError> {
    if surface.width == 0 || surface.height == 0 {
        return Err(CompositorError::ResourceCreation(format!(
            "cannot scale onto a {}x{} surface",
            surface.width, surface.height
        )));
    }
    let (sw, sh) = (surface.width as f32, surface.height as f32);
    let (cw, ch) = (card.width as f32, card.height as f32);
    let factor = match mode {
        ScaleMode::Fit => (sw / cw).min(sh / ch),
        ScaleMode::Fill => (sw / cw).max(sh / ch),
    };
    let (w, h) = (cw * factor, ch * factor);
    let (x, y) = ((sw - w) * 0.5, (sh - h) * 0.5);
    let scale = ScaleStage {
        factor,
        placement: [x, y, w, h],
    };

    let (x0, y0) = (x.max(0.0), y.max(0.0));
    let (x1, y1) = ((x + w).min(sw), (y + h).min(sh));
    let crop = CropStage {
        visible: [x0, y0, x1 - x0, y1 - y0],
        source: [(x0 - x) / w, (y0 - y) / h, (x1 - x0) / w, (y1 - y0) / h],
    };
    Ok((scale, crop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorSpace;

    fn srgb_selection() -> ColorSelection {
        ColorSelection::select(ColorSpace::display_p3(), ColorSpace::srgb(), None)
    }

    fn approx(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-3)
    }

    #[test]
    fn fit_letterboxes_wide_surfaces() {
        let chain = ImageChain::build(
            CardSize::new(600, 400),
            PhysicalSize::new(1200, 400),
            ScaleMode::Fit,
            &srgb_selection(),
            QualityTier::ColorManaged,
        )
        .unwrap();
        let scale = chain.scale().unwrap();
        assert_eq!(scale.factor, 1.0);
        assert!(approx(scale.placement, [300.0, 0.0, 600.0, 400.0]));
        let crop = chain.crop().unwrap();
        assert!(approx(crop.source, [0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn fill_crops_overflow() {
        let chain = ImageChain::build(
            CardSize::new(600, 400),
            PhysicalSize::new(1200, 400),
            ScaleMode::Fill,
            &srgb_selection(),
            QualityTier::Direct,
        )
        .unwrap();
        assert_eq!(chain.scale().unwrap().factor, 2.0);
        let crop = chain.crop().unwrap();
        assert!(approx(crop.visible, [0.0, 0.0, 1200.0, 400.0]));
        assert!(approx(crop.source, [0.0, 0.25, 1.0, 0.5]));
    }

    #[test]
    fn direct_tier_skips_color_conversion() {
        let chain = ImageChain::build(
            CardSize::default(),
            PhysicalSize::new(800, 600),
            ScaleMode::Fit,
            &srgb_selection(),
            QualityTier::Direct,
        )
        .unwrap();
        assert_eq!(
            chain.kinds(),
            vec![StageKind::Scale, StageKind::Crop, StageKind::Blend]
        );
        assert!(!chain.uniforms().color_conversion_enabled());
    }

    #[test]
    fn resize_keeps_color_and_blend_stages() {
        let mut chain = ImageChain::build(
            CardSize::new(600, 400),
            PhysicalSize::new(600, 400),
            ScaleMode::Fit,
            &srgb_selection(),
            QualityTier::ColorManaged,
        )
        .unwrap();
        chain.set_blend(Rgba::WHITE, 0.25);
        let color_before = chain.color_convert().cloned();
        chain.resize(PhysicalSize::new(1200, 800)).unwrap();
        assert_eq!(chain.scale().unwrap().factor, 2.0);
        assert_eq!(chain.color_convert().cloned(), color_before);
        assert_eq!(chain.blend().unwrap().visibility, 0.25);
        assert!(chain.resize(PhysicalSize::new(0, 10)).is_err());
        assert_eq!(chain.surface(), PhysicalSize::new(1200, 800));
    }

    #[test]
    fn tier_switch_inserts_color_stage_before_blend() {
        let mut chain = ImageChain::build(
            CardSize::default(),
            PhysicalSize::new(800, 600),
            ScaleMode::Fit,
            &srgb_selection(),
            QualityTier::Direct,
        )
        .unwrap();
        chain.set_tier(QualityTier::ColorManaged, &srgb_selection());
        assert_eq!(
            chain.kinds(),
            vec![
                StageKind::Scale,
                StageKind::Crop,
                StageKind::ColorConvert,
                StageKind::Blend
            ]
        );
        assert_eq!(chain.tier(), QualityTier::ColorManaged);
    }

    #[test]
    fn uniforms_carry_blend_state() {
        let mut chain = ImageChain::build(
            CardSize::default(),
            PhysicalSize::new(800, 600),
            ScaleMode::Fit,
            &srgb_selection(),
            QualityTier::ColorManaged,
        )
        .unwrap();
        chain.set_blend(Rgba::new(1.0, 0.0, 0.0, 1.0), 0.4);
        let uniforms = chain.uniforms();
        assert_eq!(uniforms.fade_color, [1.0, 0.0, 0.0, 1.0]);
        assert!((uniforms.visibility() - 0.4).abs() < 1e-6);
        assert!(uniforms.color_conversion_enabled());
    }
}
