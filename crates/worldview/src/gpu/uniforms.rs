use bytemuck::{Pod, Zeroable};

/// Transfer curve codes understood by the composite shader.
pub(crate) const TRANSFER_LINEAR: f32 = 0.0;
pub(crate) const TRANSFER_SRGB: f32 = 1.0;
pub(crate) const TRANSFER_GAMMA: f32 = 2.0;

/// Uniform block consumed by the composite pass.
///
/// Every field is a `vec4<f32>` so the layout is identical under std140 and
/// the WGSL uniform rules.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CompositeUniforms {
    /// Surface width and height in pixels.
    pub surface: [f32; 4],
    /// Visible card rectangle on the surface: x, y, width, height.
    pub destination: [f32; 4],
    /// Matching rectangle in card texture coordinates: u, v, width, height.
    pub source: [f32; 4],
    /// Columns of the working-to-display RGB matrix.
    pub color_matrix: [[f32; 4]; 3],
    /// Decode kind, decode gamma, encode kind, encode gamma.
    pub transfer: [f32; 4],
    pub fade_color: [f32; 4],
    /// Card visibility, color conversion enabled flag, unused, unused.
    pub params: [f32; 4],
}

impl CompositeUniforms {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: [width as f32, height as f32, 0.0, 0.0],
            destination: [0.0, 0.0, width as f32, height as f32],
            source: [0.0, 0.0, 1.0, 1.0],
            color_matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            transfer: [TRANSFER_LINEAR, 1.0, TRANSFER_LINEAR, 1.0],
            fade_color: [0.0, 0.0, 0.0, 1.0],
            params: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn set_destination(&mut self, rect: [f32; 4]) {
        self.destination = rect;
    }

    pub fn set_source(&mut self, rect: [f32; 4]) {
        self.source = rect;
    }

    pub fn set_color_conversion(&mut self, columns: [[f32; 3]; 3], transfer: [f32; 4]) {
        for (slot, column) in self.color_matrix.iter_mut().zip(columns) {
            *slot = [column[0], column[1], column[2], 0.0];
        }
        self.transfer = transfer;
        self.params[1] = 1.0;
    }

    pub fn set_fade(&mut self, color: [f32; 4], visibility: f32) {
        self.fade_color = color;
        self.params[0] = visibility.clamp(0.0, 1.0);
    }

    pub fn visibility(&self) -> f32 {
        self.params[0]
    }

    pub fn color_conversion_enabled(&self) -> bool {
        self.params[1] > 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_is_vec4_aligned() {
        assert_eq!(std::mem::size_of::<CompositeUniforms>(), 9 * 16);
    }

    #[test]
    fn fade_visibility_is_clamped() {
        let mut uniforms = CompositeUniforms::new(800, 600);
        uniforms.set_fade([1.0, 0.0, 0.0, 1.0], 1.7);
        assert_eq!(uniforms.visibility(), 1.0);
        uniforms.set_fade([1.0, 0.0, 0.0, 1.0], -0.2);
        assert_eq!(uniforms.visibility(), 0.0);
    }

    #[test]
    fn color_conversion_starts_disabled() {
        let mut uniforms = CompositeUniforms::new(1, 1);
        assert!(!uniforms.color_conversion_enabled());
        uniforms.set_color_conversion(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [TRANSFER_SRGB, 2.4, TRANSFER_GAMMA, 2.2],
        );
        assert!(uniforms.color_conversion_enabled());
    }
}
