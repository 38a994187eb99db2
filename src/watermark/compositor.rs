use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageReader, Rgb, RgbImage, Rgba, RgbaImage};
use tracing::{debug, warn};

use super::policy::WatermarkPolicy;
use crate::error::{GalleryError, Result};

/// Output of a render: encoded JPEG bytes plus whether a logo was applied.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub jpeg: Vec<u8>,
    /// `false` when the logo asset was unavailable and the source was only
    /// flattened.
    pub watermarked: bool,
}

/// Renders tiled watermark previews from files on disk.
#[derive(Debug, Clone)]
pub struct Compositor {
    logo_path: PathBuf,
    policy: WatermarkPolicy,
}

impl Compositor {
    pub fn new(logo_path: impl Into<PathBuf>, policy: WatermarkPolicy) -> Self {
        Self {
            logo_path: logo_path.into(),
            policy: policy.normalized(),
        }
    }

    pub fn policy(&self) -> &WatermarkPolicy {
        &self.policy
    }

    /// Loads the logo asset as RGBA.
    pub fn load_logo(&self) -> Result<RgbaImage> {
        load_rgba(&self.logo_path).map_err(|_| GalleryError::WatermarkAssetMissing {
            path: self.logo_path.clone(),
        })
    }

    /// Watermarks the image at `source` and encodes it as JPEG.
    ///
    /// A missing or corrupt logo is not an error: the source is flattened
    /// and encoded as-is, and [`Rendered::watermarked`] is `false`.
    pub fn render_file(&self, source: &Path) -> Result<Rendered> {
        let base = load_rgba(source)?;

        let (rgb, watermarked) = match self.load_logo() {
            Ok(logo) => (composite(&base, &logo, &self.policy), true),
            Err(err) => {
                warn!(error = %err, "watermark logo unavailable, serving unmarked preview");
                (flatten(&base), false)
            }
        };

        let jpeg = encode_jpeg(&rgb, self.policy.quality)
            .map_err(|e| GalleryError::unreadable(source, e))?;
        debug!(
            width = rgb.width(),
            height = rgb.height(),
            bytes = jpeg.len(),
            watermarked,
            "rendered preview"
        );
        Ok(Rendered { jpeg, watermarked })
    }
}

/// Decodes any supported image file into RGBA.
pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| GalleryError::unreadable(path, e))?;
    let img = reader
        .decode()
        .map_err(|e| GalleryError::unreadable(path, e))?;
    Ok(img.to_rgba8())
}

/// Composites a tiled, semi-transparent logo over `source` and flattens to RGB.
pub fn composite(source: &RgbaImage, logo: &RgbaImage, policy: &WatermarkPolicy) -> RgbImage {
    let policy = policy.normalized();
    let Some(tile) = prepare_tile(logo, source.width(), &policy) else {
        return flatten(source);
    };

    let layer = tile_layer(source.width(), source.height(), &tile, &policy);

    let mut out = source.clone();
    for (dst, src) in out.pixels_mut().zip(layer.pixels()) {
        *dst = blend_over(*dst, *src);
    }
    flatten(&out)
}

/// Scales the logo to the tile size and applies the opacity multiplier.
///
/// Returns `None` when the tile would be empty.
pub fn prepare_tile(logo: &RgbaImage, source_width: u32, policy: &WatermarkPolicy) -> Option<RgbaImage> {
    let (tile_w, tile_h) = tile_size(logo.width(), logo.height(), source_width, policy.tile_scale)?;

    let mut tile = imageops::resize(logo, tile_w, tile_h, FilterType::Lanczos3);
    for px in tile.pixels_mut() {
        px[3] = (f32::from(px[3]) * policy.opacity) as u8;
    }
    Some(tile)
}

/// Tile dimensions for a logo on a source of the given width.
///
/// `tile_w = floor(source_width * scale)`; the height keeps the logo's
/// aspect ratio, rounded.
pub fn tile_size(logo_w: u32, logo_h: u32, source_width: u32, scale: f32) -> Option<(u32, u32)> {
    if logo_w == 0 || logo_h == 0 {
        return None;
    }
    let tile_w = (source_width as f32 * scale).floor() as u32;
    let tile_h = (f64::from(tile_w) * f64::from(logo_h) / f64::from(logo_w)).round() as u32;
    (tile_w > 0 && tile_h > 0).then_some((tile_w, tile_h))
}

/// Top-left corners of every tile placed on a `width`x`height` layer.
///
/// Rows advance by `tile_h + spacing`. With brick offset, odd rows start
/// half a horizontal step to the left of the layer, and every row keeps
/// placing tiles until one starts at or beyond the right edge, so partially
/// visible tiles cover both borders.
pub fn tile_origins(
    width: u32,
    height: u32,
    tile_w: u32,
    tile_h: u32,
    policy: &WatermarkPolicy,
) -> Vec<(i64, i64)> {
    let step_x = i64::from(tile_w) + i64::from(policy.spacing.resolve(tile_w));
    let step_y = i64::from(tile_h) + i64::from(policy.spacing.resolve(tile_h));
    let (width, height) = (i64::from(width), i64::from(height));

    let mut origins = Vec::new();
    let mut y = 0;
    while y < height {
        let row = y / step_y;
        let mut x = if policy.brick_offset && row % 2 == 1 {
            -(step_x / 2)
        } else {
            0
        };
        while x < width {
            origins.push((x, y));
            x += step_x;
        }
        y += step_y;
    }
    origins
}

/// Transparent layer of the source's size with the tile repeated across it.
///
/// Tiles crossing the layer bounds are clipped.
pub fn tile_layer(width: u32, height: u32, tile: &RgbaImage, policy: &WatermarkPolicy) -> RgbaImage {
    let mut layer = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for (x, y) in tile_origins(width, height, tile.width(), tile.height(), policy) {
        imageops::replace(&mut layer, tile, x, y);
    }
    layer
}

/// Straight-alpha source-over blend of `src` onto `dst`.
pub fn blend_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = u32::from(src[3]);
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }

    let dst_weight = div255(u32::from(dst[3]) * (255 - sa));
    let out_a = sa + dst_weight;
    if out_a == 0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let num = u32::from(src[i]) * sa + u32::from(dst[i]) * dst_weight;
        out[i] = ((num + out_a / 2) / out_a).min(255) as u8;
    }
    out[3] = out_a.min(255) as u8;
    Rgba(out)
}

fn div255(x: u32) -> u32 {
    (x + 127) / 255
}

/// Drops the alpha channel.
pub fn flatten(img: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([p[0], p[1], p[2]])
    })
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(img)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::policy::Spacing;
    use tempfile::TempDir;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]))
    }

    fn logo() -> RgbaImage {
        RgbaImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn save_png(img: &RgbaImage, path: &Path) {
        img.save_with_format(path, image::ImageFormat::Png).unwrap();
    }

    #[test]
    fn blend_transparent_src_is_noop() {
        let dst = Rgba([10, 20, 30, 255]);
        assert_eq!(blend_over(dst, Rgba([255, 255, 255, 0])), dst);
    }

    #[test]
    fn blend_opaque_src_replaces_dst() {
        let src = Rgba([1, 2, 3, 255]);
        assert_eq!(blend_over(Rgba([200, 200, 200, 255]), src), src);
    }

    #[test]
    fn blend_half_white_over_black() {
        let out = blend_over(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 128]));
        assert_eq!(out, Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn blend_onto_transparent_keeps_src_color() {
        let out = blend_over(Rgba([0, 0, 0, 0]), Rgba([100, 150, 200, 77]));
        assert_eq!(out, Rgba([100, 150, 200, 77]));
    }

    #[test]
    fn tile_size_follows_scale_and_aspect() {
        assert_eq!(tile_size(400, 100, 1000, 0.15), Some((150, 38)));
        assert_eq!(tile_size(400, 100, 3, 0.15), None);
        assert_eq!(tile_size(0, 100, 1000, 0.15), None);
    }

    #[test]
    fn odd_rows_are_brick_shifted() {
        let policy = WatermarkPolicy {
            spacing: Spacing::Pixels(10),
            ..WatermarkPolicy::default()
        };
        let origins = tile_origins(100, 70, 20, 10, &policy);
        // step_x = 30, step_y = 20
        assert!(origins.contains(&(0, 0)));
        assert!(origins.contains(&(90, 0)));
        assert!(origins.contains(&(-15, 20)));
        assert!(origins.contains(&(75, 20)));
        assert!(origins.contains(&(0, 40)));
        assert!(!origins.iter().any(|&(x, _)| x >= 100));
        assert!(origins.iter().all(|&(_, y)| y == 0 || y == 20 || y == 40 || y == 60));
    }

    #[test]
    fn oversized_spacing_leaves_a_single_tile() {
        let policy = WatermarkPolicy {
            spacing: Spacing::Pixels(u32::MAX),
            ..WatermarkPolicy::default()
        };
        assert_eq!(tile_origins(100, 70, 20, 10, &policy), vec![(0, 0)]);

        let marked = composite(&gradient(100, 70), &logo(), &policy);
        assert_eq!(marked.dimensions(), (100, 70));
    }

    #[test]
    fn no_brick_offset_keeps_columns_aligned() {
        let policy = WatermarkPolicy {
            brick_offset: false,
            spacing: Spacing::Pixels(10),
            ..WatermarkPolicy::default()
        };
        let origins = tile_origins(100, 70, 20, 10, &policy);
        assert!(origins.iter().all(|&(x, _)| x % 30 == 0 && x >= 0));
    }

    #[test]
    fn every_pixel_is_within_spacing_of_a_tile() {
        for (w, h, spacing) in [
            (97, 61, Spacing::Pixels(7)),
            (300, 200, Spacing::Fraction(0.5)),
            (64, 64, Spacing::Pixels(0)),
            (513, 129, Spacing::Pixels(75)),
        ] {
            let policy = WatermarkPolicy {
                spacing,
                ..WatermarkPolicy::default()
            };
            let (tw, th) = tile_size(40, 20, w, 0.25).unwrap();
            let (sx, sy) = (
                i64::from(spacing.resolve(tw)),
                i64::from(spacing.resolve(th)),
            );
            let origins = tile_origins(w, h, tw, th, &policy);
            let (tw, th) = (i64::from(tw), i64::from(th));

            for y in 0..i64::from(h) {
                for x in 0..i64::from(w) {
                    let covered = origins.iter().any(|&(ox, oy)| {
                        let dx = (ox - x).max(x - (ox + tw - 1)).max(0);
                        let dy = (oy - y).max(y - (oy + th - 1)).max(0);
                        dx <= sx && dy <= sy
                    });
                    assert!(covered, "pixel ({x},{y}) uncovered in {w}x{h} {spacing}");
                }
            }
        }
    }

    #[test]
    fn tiles_are_clipped_at_layer_bounds() {
        let tile = RgbaImage::from_pixel(20, 10, Rgba([255, 0, 0, 200]));
        let policy = WatermarkPolicy {
            spacing: Spacing::Pixels(10),
            ..WatermarkPolicy::default()
        };
        let layer = tile_layer(35, 25, &tile, &policy);
        assert_eq!(layer.dimensions(), (35, 25));
        // Odd row starts at x = -15, so its first visible column is painted.
        assert_eq!(layer.get_pixel(0, 20)[3], 200);
        assert_eq!(layer.get_pixel(4, 20)[3], 200);
        assert_eq!(layer.get_pixel(5, 20)[3], 0);
        assert_eq!(layer.get_pixel(25, 15)[3], 0);
    }

    #[test]
    fn opacity_scales_logo_alpha() {
        let policy = WatermarkPolicy {
            tile_scale: 0.5,
            opacity: 0.5,
            ..WatermarkPolicy::default()
        };
        let tile = prepare_tile(&RgbaImage::from_pixel(10, 10, Rgba([9, 9, 9, 200])), 40, &policy).unwrap();
        assert_eq!(tile.dimensions(), (20, 20));
        assert!(tile.pixels().all(|p| p[3] == 100));
    }

    #[test]
    fn composite_marks_the_image_and_is_deterministic() {
        let source = gradient(200, 120);
        let policy = WatermarkPolicy::default();

        let a = composite(&source, &logo(), &policy);
        let b = composite(&source, &logo(), &policy);
        assert_eq!(a.as_raw(), b.as_raw());
        assert_ne!(a.as_raw(), flatten(&source).as_raw());

        let ja = encode_jpeg(&a, policy.quality).unwrap();
        let jb = encode_jpeg(&b, policy.quality).unwrap();
        assert_eq!(ja, jb);
    }

    #[test]
    fn render_file_degrades_without_logo() {
        let tmp = TempDir::new().unwrap();
        let source_path = tmp.path().join("src.png");
        let source = gradient(50, 30);
        save_png(&source, &source_path);

        let compositor = Compositor::new(tmp.path().join("missing.png"), WatermarkPolicy::default());
        let rendered = compositor.render_file(&source_path).unwrap();
        assert!(!rendered.watermarked);
        assert_eq!(rendered.jpeg, encode_jpeg(&flatten(&source), 80).unwrap());
    }

    #[test]
    fn render_file_applies_logo() {
        let tmp = TempDir::new().unwrap();
        let source_path = tmp.path().join("src.png");
        let logo_path = tmp.path().join("logo.png");
        save_png(&gradient(80, 60), &source_path);
        save_png(&logo(), &logo_path);

        let rendered = Compositor::new(&logo_path, WatermarkPolicy::default())
            .render_file(&source_path)
            .unwrap();
        assert!(rendered.watermarked);
        let decoded = image::load_from_memory(&rendered.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (80, 60));
    }

    #[test]
    fn render_file_reports_unreadable_source() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.jpg");
        std::fs::write(&bogus, b"not an image").unwrap();
        let compositor = Compositor::new(tmp.path().join("logo.png"), WatermarkPolicy::default());

        assert!(matches!(
            compositor.render_file(&bogus),
            Err(GalleryError::SourceImageUnreadable { .. })
        ));
        assert!(matches!(
            compositor.render_file(&tmp.path().join("absent.jpg")),
            Err(GalleryError::SourceImageUnreadable { .. })
        ));
    }
}
