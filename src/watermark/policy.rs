use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Gap between neighbouring tiles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spacing {
    /// Fixed number of pixels.
    Pixels(u32),
    /// Fraction of the tile's own width (horizontally) or height (vertically).
    Fraction(f32),
}

impl Spacing {
    /// Gap in pixels for a tile dimension.
    pub fn resolve(self, tile_extent: u32) -> u32 {
        match self {
            Spacing::Pixels(px) => px,
            Spacing::Fraction(f) => (tile_extent as f32 * f.max(0.0)).floor() as u32,
        }
    }
}

impl FromStr for Spacing {
    type Err = String;

    /// Parses `75` as pixels and `50%` as half the tile size.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let pct: f32 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid spacing percentage {s:?}"))?;
            if !(0.0..=1000.0).contains(&pct) {
                return Err(format!("spacing percentage out of range: {s:?}"));
            }
            Ok(Spacing::Fraction(pct / 100.0))
        } else {
            s.parse()
                .map(Spacing::Pixels)
                .map_err(|_| format!("invalid spacing {s:?}"))
        }
    }
}

impl fmt::Display for Spacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spacing::Pixels(px) => write!(f, "{px}"),
            Spacing::Fraction(fr) => write!(f, "{}%", fr * 100.0),
        }
    }
}

/// Tiling and encoding parameters for the watermark overlay.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatermarkPolicy {
    /// Logo width as a fraction of the source width.
    pub tile_scale: f32,
    /// Multiplier applied to the logo's alpha channel, `0.0..=1.0`.
    pub opacity: f32,
    /// Shift every odd row by half a horizontal step.
    pub brick_offset: bool,
    pub spacing: Spacing,
    /// JPEG quality, `1..=100`.
    pub quality: u8,
}

impl Default for WatermarkPolicy {
    fn default() -> Self {
        Self {
            tile_scale: 0.15,
            opacity: 0.3,
            brick_offset: true,
            spacing: Spacing::Fraction(0.5),
            quality: 80,
        }
    }
}

impl WatermarkPolicy {
    /// Clamps every field into its valid range.
    pub fn normalized(self) -> Self {
        Self {
            tile_scale: if self.tile_scale.is_finite() {
                self.tile_scale.clamp(0.0, 1.0)
            } else {
                0.0
            },
            opacity: if self.opacity.is_finite() {
                self.opacity.clamp(0.0, 1.0)
            } else {
                0.0
            },
            brick_offset: self.brick_offset,
            spacing: match self.spacing {
                Spacing::Fraction(f) if !f.is_finite() || f < 0.0 => Spacing::Fraction(0.0),
                other => other,
            },
            quality: self.quality.clamp(1, 100),
        }
    }

    /// Short, stable identifier of this policy.
    ///
    /// Derived files are stored under a directory named by the version, so
    /// changing any parameter never serves artifacts rendered with the old
    /// one.
    pub fn version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tile_scale.to_bits().to_le_bytes());
        hasher.update(self.opacity.to_bits().to_le_bytes());
        hasher.update([u8::from(self.brick_offset)]);
        match self.spacing {
            Spacing::Pixels(px) => {
                hasher.update([0]);
                hasher.update(px.to_le_bytes());
            }
            Spacing::Fraction(f) => {
                hasher.update([1]);
                hasher.update(f.to_bits().to_le_bytes());
            }
        }
        hasher.update([self.quality]);
        hex::encode(&hasher.finalize()[..6])
    }
}
