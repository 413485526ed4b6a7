//! Color spaces, display-profile parsing and working/display selection.
//!
//! Every space is described by its RGB-to-XYZ matrix relative to the D50
//! profile connection space plus a transfer curve. Converting card pixels
//! from the working space to the display space is then `display⁻¹ · working`
//! on linear light, bracketed by the two transfer curves.

use std::fmt;

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gpu::uniforms::{TRANSFER_GAMMA, TRANSFER_LINEAR, TRANSFER_SRGB};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferFunction {
    /// Piecewise sRGB curve.
    Srgb,
    /// Pure power law with the given exponent.
    Gamma(f32),
    Linear,
}

impl TransferFunction {
    fn shader_code(self) -> (f32, f32) {
        match self {
            TransferFunction::Srgb => (TRANSFER_SRGB, 2.4),
            TransferFunction::Gamma(gamma) => (TRANSFER_GAMMA, gamma),
            TransferFunction::Linear => (TRANSFER_LINEAR, 1.0),
        }
    }

    pub fn to_linear(self, encoded: f32) -> f32 {
        match self {
            TransferFunction::Srgb => {
                if encoded <= 0.04045 {
                    encoded / 12.92
                } else {
                    ((encoded + 0.055) / 1.055).powf(2.4)
                }
            }
            TransferFunction::Gamma(gamma) => encoded.max(0.0).powf(gamma),
            TransferFunction::Linear => encoded,
        }
    }

    pub fn from_linear(self, linear: f32) -> f32 {
        match self {
            TransferFunction::Srgb => {
                if linear <= 0.003_130_8 {
                    linear * 12.92
                } else {
                    1.055 * linear.powf(1.0 / 2.4) - 0.055
                }
            }
            TransferFunction::Gamma(gamma) => linear.max(0.0).powf(1.0 / gamma),
            TransferFunction::Linear => linear,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorSpace {
    name: String,
    rgb_to_xyz: Mat3,
    transfer: TransferFunction,
}

/// Color spaces that can be named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamedColorSpace {
    #[default]
    Srgb,
    DisplayP3,
}

impl NamedColorSpace {
    pub fn color_space(self) -> ColorSpace {
        match self {
            NamedColorSpace::Srgb => ColorSpace::srgb(),
            NamedColorSpace::DisplayP3 => ColorSpace::display_p3(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("missing 'acsp' profile signature")]
    BadSignature,
    #[error("profile data color space is not RGB")]
    NotRgb,
    #[error("tag '{0}' is missing")]
    MissingTag(String),
    #[error("tag '{tag}' is malformed: {reason}")]
    MalformedTag { tag: String, reason: String },
    #[error("colorant matrix is singular")]
    Singular,
}

impl ColorSpace {
    pub fn new(name: impl Into<String>, rgb_to_xyz: Mat3, transfer: TransferFunction) -> Self {
        Self {
            name: name.into(),
            rgb_to_xyz,
            transfer,
        }
    }

    /// sRGB IEC 61966-2.1, Bradford-adapted to D50.
    pub fn srgb() -> Self {
        Self::new(
            "sRGB",
            Mat3::from_cols(
                Vec3::new(0.4361, 0.2225, 0.0139),
                Vec3::new(0.3851, 0.7169, 0.0971),
                Vec3::new(0.1431, 0.0606, 0.7141),
            ),
            TransferFunction::Srgb,
        )
    }

    /// Display P3, Bradford-adapted to D50.
    pub fn display_p3() -> Self {
        Self::new(
            "Display P3",
            Mat3::from_cols(
                Vec3::new(0.5151, 0.2412, -0.0011),
                Vec3::new(0.2919, 0.6922, 0.0419),
                Vec3::new(0.1572, 0.0666, 0.7841),
            ),
            TransferFunction::Srgb,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rgb_to_xyz(&self) -> Mat3 {
        self.rgb_to_xyz
    }

    pub fn transfer(&self) -> TransferFunction {
        self.transfer
    }

    /// Parses the matrix/TRC part of an ICC v2/v4 RGB display profile.
    pub fn from_icc(bytes: &[u8]) -> Result<Self, ProfileError> {
        let profile = IccProfile::parse(bytes)?;
        let columns = [b"rXYZ", b"gXYZ", b"bXYZ"]
            .iter()
            .map(|tag| profile.xyz(tag))
            .collect::<Result<Vec<_>, _>>()?;
        let rgb_to_xyz = Mat3::from_cols(columns[0], columns[1], columns[2]);
        if !rgb_to_xyz.is_finite() || rgb_to_xyz.determinant().abs() < 1e-6 {
            return Err(ProfileError::Singular);
        }
        let transfer = profile.transfer(b"rTRC")?;
        let name = profile
            .description()
            .unwrap_or_else(|| "Display profile".to_string());
        Ok(Self::new(name, rgb_to_xyz, transfer))
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Linear-light conversion between two spaces plus the curves around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorConversion {
    pub matrix: Mat3,
    pub decode: TransferFunction,
    pub encode: TransferFunction,
}

impl ColorConversion {
    pub fn between(source: &ColorSpace, destination: &ColorSpace) -> Self {
        Self {
            matrix: destination.rgb_to_xyz.inverse() * source.rgb_to_xyz,
            decode: source.transfer,
            encode: destination.transfer,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.matrix.abs_diff_eq(Mat3::IDENTITY, 1e-4) && self.decode == self.encode
    }

    pub fn matrix_columns(&self) -> [[f32; 3]; 3] {
        self.matrix.to_cols_array_2d()
    }

    pub fn transfer_codes(&self) -> [f32; 4] {
        let (decode, decode_gamma) = self.decode.shader_code();
        let (encode, encode_gamma) = self.encode.shader_code();
        [decode, decode_gamma, encode, encode_gamma]
    }

    /// CPU reference of what the composite shader does to one pixel.
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let linear = Vec3::from_array(rgb.map(|channel| self.decode.to_linear(channel)));
        let converted = (self.matrix * linear).clamp(Vec3::ZERO, Vec3::ONE);
        converted.to_array().map(|channel| self.encode.from_linear(channel))
    }
}

/// Working and display spaces chosen for the current display.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSelection {
    pub working: ColorSpace,
    pub display: ColorSpace,
    /// Why the display profile could not be used, if it could not.
    pub degraded: Option<String>,
}

impl ColorSelection {
    /// Chooses the display space from the raw display profile.
    ///
    /// When the profile is absent or unusable the display falls back to
    /// `fallback` and the selection is marked degraded.
    pub fn select(working: ColorSpace, fallback: ColorSpace, profile: Option<&[u8]>) -> Self {
        let parsed = match profile {
            None => Err("display did not report a color profile".to_string()),
            Some(bytes) => ColorSpace::from_icc(bytes)
                .map_err(|err| format!("display color profile is unusable: {err}")),
        };
        match parsed {
            Ok(display) => Self {
                working,
                display,
                degraded: None,
            },
            Err(reason) => Self {
                working,
                display: fallback,
                degraded: Some(reason),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn conversion(&self) -> ColorConversion {
        ColorConversion::between(&self.working, &self.display)
    }
}

const HEADER_LEN: usize = 128;
const TAG_ENTRY_LEN: usize = 12;

struct IccProfile<'a> {
    bytes: &'a [u8],
    tags: Vec<([u8; 4], usize, usize)>,
}

impl<'a> IccProfile<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, ProfileError> {
        if bytes.len() < HEADER_LEN + 4 {
            return Err(ProfileError::Truncated(bytes.len()));
        }
        if &bytes[36..40] != b"acsp" {
            return Err(ProfileError::BadSignature);
        }
        if &bytes[16..20] != b"RGB " {
            return Err(ProfileError::NotRgb);
        }
        let count = read_u32(bytes, HEADER_LEN).ok_or(ProfileError::Truncated(bytes.len()))? as usize;
        let mut tags = Vec::with_capacity(count.min(64));
        for index in 0..count {
            let entry = HEADER_LEN + 4 + index * TAG_ENTRY_LEN;
            let signature = bytes
                .get(entry..entry + 4)
                .ok_or(ProfileError::Truncated(bytes.len()))?;
            let offset = read_u32(bytes, entry + 4).ok_or(ProfileError::Truncated(bytes.len()))?;
            let size = read_u32(bytes, entry + 8).ok_or(ProfileError::Truncated(bytes.len()))?;
            let mut sig = [0u8; 4];
            sig.copy_from_slice(signature);
            tags.push((sig, offset as usize, size as usize));
        }
        Ok(Self { bytes, tags })
    }

    fn tag(&self, signature: &[u8; 4]) -> Result<&'a [u8], ProfileError> {
        let name = String::from_utf8_lossy(signature).into_owned();
        let (_, offset, size) = self
            .tags
            .iter()
            .find(|(sig, _, _)| sig == signature)
            .ok_or_else(|| ProfileError::MissingTag(name.clone()))?;
        self.bytes
            .get(*offset..offset.saturating_add(*size))
            .ok_or(ProfileError::MalformedTag {
                tag: name,
                reason: "data lies outside the profile".into(),
            })
    }

    fn xyz(&self, signature: &[u8; 4]) -> Result<Vec3, ProfileError> {
        let data = self.tag(signature)?;
        let malformed = |reason: &str| ProfileError::MalformedTag {
            tag: String::from_utf8_lossy(signature).into_owned(),
            reason: reason.into(),
        };
        if data.len() < 20 || &data[0..4] != b"XYZ " {
            return Err(malformed("expected an XYZ number"));
        }
        let component = |at: usize| read_s15_fixed16(data, at).ok_or_else(|| malformed("truncated"));
        Ok(Vec3::new(component(8)?, component(12)?, component(16)?))
    }

    fn transfer(&self, signature: &[u8; 4]) -> Result<TransferFunction, ProfileError> {
        let data = self.tag(signature)?;
        let malformed = |reason: &str| ProfileError::MalformedTag {
            tag: String::from_utf8_lossy(signature).into_owned(),
            reason: reason.into(),
        };
        if data.len() < 12 {
            return Err(malformed("truncated curve"));
        }
        match &data[0..4] {
            b"curv" => {
                let entries = read_u32(data, 8).ok_or_else(|| malformed("truncated"))? as usize;
                match entries {
                    0 => Ok(TransferFunction::Linear),
                    1 => {
                        let raw = read_u16(data, 12).ok_or_else(|| malformed("truncated"))?;
                        let gamma = f32::from(raw) / 256.0;
                        if gamma < MIN_GAMMA {
                            return Err(malformed("non-positive exponent"));
                        }
                        Ok(classify_gamma(gamma))
                    }
                    _ => {
                        let mid = (entries - 1) / 2;
                        let raw = read_u16(data, 12 + mid * 2)
                            .ok_or_else(|| malformed("table shorter than its count"))?;
                        let x = mid as f32 / (entries - 1) as f32;
                        let y = f32::from(raw) / 65535.0;
                        if x <= 0.0 || y <= 0.0 || y >= 1.0 {
                            return Ok(TransferFunction::Linear);
                        }
                        let gamma = (y.ln() / x.ln()).clamp(1.0, 3.0);
                        Ok(classify_gamma(gamma))
                    }
                }
            }
            b"para" => {
                let gamma = read_s15_fixed16(data, 12).ok_or_else(|| malformed("truncated"))?;
                let function = read_u16(data, 8).ok_or_else(|| malformed("truncated"))?;
                // Type 3 with g = 2.4 is the sRGB curve.
                if function == 3 && (gamma - 2.4).abs() < 0.01 {
                    Ok(TransferFunction::Srgb)
                } else if gamma >= MIN_GAMMA {
                    Ok(classify_gamma(gamma))
                } else {
                    Err(malformed("non-positive exponent"))
                }
            }
            _ => Err(malformed("unsupported curve type")),
        }
    }

    fn description(&self) -> Option<String> {
        let data = self.tag(b"desc").ok()?;
        match &data[0..4.min(data.len())] {
            b"desc" => {
                let len = read_u32(data, 8)? as usize;
                let text = data.get(12..12 + len)?;
                let text = text.split(|byte| *byte == 0).next()?;
                Some(String::from_utf8_lossy(text).into_owned())
            }
            _ => None,
        }
    }
}

/// Smallest curve exponent the composite shader can invert.
const MIN_GAMMA: f32 = 0.1;

fn classify_gamma(gamma: f32) -> TransferFunction {
    if (gamma - 1.0).abs() < 0.01 {
        TransferFunction::Linear
    } else {
        TransferFunction::Gamma(gamma)
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let raw = bytes.get(at..at + 2)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_s15_fixed16(bytes: &[u8], at: usize) -> Option<f32> {
    let raw = read_u32(bytes, at)? as i32;
    Some(raw as f32 / 65536.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn s15(value: f32) -> [u8; 4] {
        ((value * 65536.0).round() as i32).to_be_bytes()
    }

    /// Minimal matrix/TRC RGB display profile.
    pub(crate) fn build_profile(space: &ColorSpace, gamma: f32) -> Vec<u8> {
        let columns = space.rgb_to_xyz().to_cols_array_2d();
        let mut tag_data: Vec<([u8; 4], Vec<u8>)> = Vec::new();
        for (sig, column) in [b"rXYZ", b"gXYZ", b"bXYZ"].into_iter().zip(columns) {
            let mut data = b"XYZ \0\0\0\0".to_vec();
            for value in column {
                data.extend_from_slice(&s15(value));
            }
            tag_data.push((*sig, data));
        }
        let mut curve = b"curv\0\0\0\0".to_vec();
        curve.extend_from_slice(&1u32.to_be_bytes());
        curve.extend_from_slice(&((gamma * 256.0).round() as u16).to_be_bytes());
        curve.extend_from_slice(&[0, 0]);
        tag_data.push((*b"rTRC", curve));

        let table_len = 4 + tag_data.len() * TAG_ENTRY_LEN;
        let mut offset = HEADER_LEN + table_len;
        let mut table = (tag_data.len() as u32).to_be_bytes().to_vec();
        let mut body = Vec::new();
        for (sig, data) in &tag_data {
            table.extend_from_slice(sig);
            table.extend_from_slice(&(offset as u32).to_be_bytes());
            table.extend_from_slice(&(data.len() as u32).to_be_bytes());
            body.extend_from_slice(data);
            offset += data.len();
        }

        let mut header = vec![0u8; HEADER_LEN];
        header[16..20].copy_from_slice(b"RGB ");
        header[20..24].copy_from_slice(b"XYZ ");
        header[36..40].copy_from_slice(b"acsp");
        let total = (HEADER_LEN + table.len() + body.len()) as u32;
        header[0..4].copy_from_slice(&total.to_be_bytes());

        let mut profile = header;
        profile.extend_from_slice(&table);
        profile.extend_from_slice(&body);
        profile
    }

    #[test]
    fn parses_matrix_and_gamma_from_profile() {
        let bytes = build_profile(&ColorSpace::display_p3(), 2.2);
        let parsed = ColorSpace::from_icc(&bytes).expect("valid profile");
        assert!(parsed
            .rgb_to_xyz()
            .abs_diff_eq(ColorSpace::display_p3().rgb_to_xyz(), 1e-4));
        match parsed.transfer() {
            TransferFunction::Gamma(gamma) => assert!((gamma - 2.2).abs() < 0.01),
            other => panic!("unexpected transfer {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage_profiles() {
        assert!(matches!(
            ColorSpace::from_icc(&[0u8; 16]),
            Err(ProfileError::Truncated(16))
        ));
        let mut bytes = build_profile(&ColorSpace::srgb(), 2.2);
        bytes[36] = b'x';
        assert_eq!(ColorSpace::from_icc(&bytes), Err(ProfileError::BadSignature));
    }

    #[test]
    fn zero_gamma_curve_is_malformed() {
        let bytes = build_profile(&ColorSpace::srgb(), 0.0);
        assert!(matches!(
            ColorSpace::from_icc(&bytes),
            Err(ProfileError::MalformedTag { ref tag, .. }) if tag == "rTRC"
        ));

        let selection =
            ColorSelection::select(ColorSpace::display_p3(), ColorSpace::srgb(), Some(&bytes));
        assert!(selection.is_degraded());
    }

    #[test]
    fn missing_colorant_is_reported() {
        let mut bytes = build_profile(&ColorSpace::srgb(), 2.2);
        // Rename gXYZ so the lookup fails.
        let entry = HEADER_LEN + 4 + TAG_ENTRY_LEN;
        bytes[entry..entry + 4].copy_from_slice(b"zzzz");
        assert_eq!(
            ColorSpace::from_icc(&bytes),
            Err(ProfileError::MissingTag("gXYZ".into()))
        );
    }

    #[test]
    fn identical_spaces_convert_as_identity() {
        let conversion = ColorConversion::between(&ColorSpace::srgb(), &ColorSpace::srgb());
        assert!(conversion.is_identity());
        let pixel = conversion.apply([0.25, 0.5, 0.75]);
        for (out, expected) in pixel.iter().zip([0.25, 0.5, 0.75]) {
            assert!((out - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn p3_red_is_desaturated_on_srgb() {
        let conversion =
            ColorConversion::between(&ColorSpace::display_p3(), &ColorSpace::srgb());
        assert!(!conversion.is_identity());
        let [_, g, _] = conversion.apply([0.5, 0.5, 0.5]);
        assert!((g - 0.5).abs() < 0.01, "grey stays grey");
        let [r, g, b] = ColorConversion::between(&ColorSpace::srgb(), &ColorSpace::display_p3())
            .apply([1.0, 0.0, 0.0]);
        assert!(r < 1.0 && g > 0.0 && b >= 0.0);
    }

    #[test]
    fn selection_falls_back_when_profile_is_missing_or_broken() {
        let missing = ColorSelection::select(ColorSpace::srgb(), ColorSpace::srgb(), None);
        assert!(missing.is_degraded());

        let broken = ColorSelection::select(
            ColorSpace::display_p3(),
            ColorSpace::srgb(),
            Some(&[1, 2, 3]),
        );
        assert!(broken.is_degraded());
        assert_eq!(broken.display.name(), "sRGB");

        let good_profile = build_profile(&ColorSpace::display_p3(), 2.2);
        let good = ColorSelection::select(
            ColorSpace::srgb(),
            ColorSpace::srgb(),
            Some(&good_profile),
        );
        assert!(!good.is_degraded());
    }
}
