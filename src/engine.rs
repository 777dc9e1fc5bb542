//! Core watermark composition engine.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::debug;

use crate::blending;
use crate::config::{Offset, WatermarkConfig, WatermarkContent};
use crate::error::{Error, Result};
use crate::position;
use crate::text::{FontRasterizer, TextRasterizer};
use crate::transform;

/// The composition engine.
///
/// Create once and reuse for every preview and export. Composition never
/// modifies the background: each call returns a new bitmap.
pub struct Compositor {
    text: Box<dyn TextRasterizer>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    /// Create an engine that rasterizes text with [`FontRasterizer`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_rasterizer(FontRasterizer::new())
    }

    /// Create an engine with a custom text rasterizer.
    #[must_use]
    pub fn with_rasterizer(rasterizer: impl TextRasterizer + 'static) -> Self {
        Self {
            text: Box::new(rasterizer),
        }
    }

    /// The watermark's intrinsic bitmap: the rasterized glyph run for text,
    /// the decoded asset at native resolution for images.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Font`] if text cannot be rasterized or
    /// [`Error::Decode`] if the image asset cannot be read.
    pub fn intrinsic(&self, content: &WatermarkContent) -> Result<RgbaImage> {
        match content {
            WatermarkContent::Text(mark) => self.text.rasterize(mark),
            WatermarkContent::Image(mark) => image::open(&mark.source)
                .map(|img| img.to_rgba8())
                .map_err(|source| Error::Decode {
                    path: mark.source.clone(),
                    source,
                }),
        }
    }

    /// Render the watermark layer independently of any background:
    /// intrinsic bitmap, then scale, rotation and opacity, in that order.
    ///
    /// The result depends only on the configuration, so a batch renders it
    /// once and places it on every image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid configuration, or the
    /// errors of [`Compositor::intrinsic`].
    pub fn render_mark(&self, config: &WatermarkConfig) -> Result<RenderedMark> {
        config.validate()?;
        let intrinsic = self.intrinsic(&config.content)?;
        let scaled = transform::scale_by_percent(&intrinsic, config.scale_percent)?;
        let mut bitmap = transform::rotate_expand(&scaled, config.rotation_degrees);
        blending::apply_opacity(&mut bitmap, config.opacity);

        debug!(
            intrinsic = ?intrinsic.dimensions(),
            rendered = ?bitmap.dimensions(),
            "rendered watermark"
        );
        Ok(RenderedMark { bitmap })
    }

    /// Composite the watermark onto a copy of `background`.
    ///
    /// # Errors
    ///
    /// See [`Compositor::render_mark`].
    pub fn compose(&self, background: &RgbaImage, config: &WatermarkConfig) -> Result<RgbaImage> {
        Ok(self.render_mark(config)?.place(background, config))
    }

    /// Compose a reduced-size preview whose longest edge is at most `max_edge`.
    ///
    /// The background is downscaled by a factor `f` and the watermark's scale,
    /// offset and margin are multiplied by `f` as well, so the preview is a
    /// proportional view of the full-resolution export. Backgrounds already
    /// within `max_edge` are composed at full size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_edge` is zero, or the errors
    /// of [`Compositor::render_mark`].
    pub fn preview(
        &self,
        background: &RgbaImage,
        config: &WatermarkConfig,
        max_edge: u32,
    ) -> Result<Preview> {
        if max_edge == 0 {
            return Err(Error::InvalidConfig(
                "preview size must be positive".to_string(),
            ));
        }
        let (w, h) = background.dimensions();
        let longest = w.max(h);
        if longest <= max_edge {
            return Ok(Preview {
                image: self.compose(background, config)?,
                factor: 1.0,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let factor = max_edge as f32 / longest as f32;
        let (pw, ph) = transform::scaled_size((w, h), factor * 100.0);
        let small = imageops::resize(background, pw, ph, FilterType::Triangle);

        let mut view = config.clone();
        view.scale_percent = config.scale_percent * factor;
        view.offset = Offset::new(
            scale_i32(config.offset.dx, factor),
            scale_i32(config.offset.dy, factor),
        );
        view.margin = scale_u32(config.margin, factor);

        Ok(Preview {
            image: self.compose(&small, &view)?,
            factor,
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scale_i32(value: i32, factor: f32) -> i32 {
    (f64::from(value) * f64::from(factor)).round() as i32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_u32(value: u32, factor: f32) -> u32 {
    (f64::from(value) * f64::from(factor)).round() as u32
}

/// A watermark layer ready to be placed: scaled, rotated and
/// opacity-adjusted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMark {
    bitmap: RgbaImage,
}

impl RenderedMark {
    /// Size of the rotated bounding box, which is what gets positioned.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.bitmap.dimensions()
    }

    /// The rendered bitmap.
    #[must_use]
    pub fn bitmap(&self) -> &RgbaImage {
        &self.bitmap
    }

    /// Place this layer on a copy of `background` using the configuration's
    /// position, offset and margin.
    #[must_use]
    pub fn place(&self, background: &RgbaImage, config: &WatermarkConfig) -> RgbaImage {
        let (x, y) = position::resolve(
            background.dimensions(),
            self.size(),
            config.position,
            config.offset,
            config.margin,
        );
        let mut out = background.clone();
        blending::composite_over(&mut out, &self.bitmap, x, y);
        out
    }
}

/// A reduced-size composition for interactive display.
#[derive(Debug, Clone)]
pub struct Preview {
    /// The composed preview bitmap.
    pub image: RgbaImage,
    /// Preview pixels per full-resolution pixel, at most 1.
    pub factor: f32,
}

impl Preview {
    /// Convert a drag delta measured on the preview into full-resolution pixels.
    #[must_use]
    pub fn to_full_resolution(&self, dx: i32, dy: i32) -> Offset {
        let inverse = 1.0 / self.factor;
        Offset::new(scale_i32(dx, inverse), scale_i32(dy, inverse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::config::PositionPreset;
    use crate::text::tests::BlockRasterizer;
    use image::Rgba;

    fn engine() -> Compositor {
        Compositor::with_rasterizer(BlockRasterizer)
    }

    fn opaque_text() -> WatermarkConfig {
        let mut wm = WatermarkConfig::text("ABCD", 20, Color::rgb(255, 0, 0));
        wm.set_opacity(1.0).unwrap();
        wm
    }

    fn background(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 255, 255]))
    }

    /// Bounding box (x, y, w, h) of pixels that differ from `reference`.
    fn footprint(img: &RgbaImage, reference: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in img.enumerate_pixels() {
            if px != reference.get_pixel(x, y) {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
    }

    #[test]
    fn rendered_size_is_independent_of_background() {
        let engine = engine();
        let mut wm = opaque_text();
        wm.set_scale_percent(150.0).unwrap();

        let small_bg = background(200, 100);
        let large_bg = background(1600, 1200);
        let small = engine.compose(&small_bg, &wm).unwrap();
        let large = engine.compose(&large_bg, &wm).unwrap();

        let (_, _, sw, sh) = footprint(&small, &small_bg).unwrap();
        let (_, _, lw, lh) = footprint(&large, &large_bg).unwrap();
        assert_eq!((sw, sh), (lw, lh));
        // 4 glyphs * 10px * 1.5 by 20px * 1.5
        assert_eq!((sw, sh), (60, 30));
    }

    #[test]
    fn bottom_right_places_flush_with_corner() {
        let engine = engine();
        let bg = background(300, 200);
        let out = engine.compose(&bg, &opaque_text()).unwrap();
        assert_eq!(footprint(&out, &bg), Some((260, 180, 40, 20)));
    }

    #[test]
    fn drag_offset_moves_the_footprint() {
        let engine = engine();
        let bg = background(300, 200);
        let mut wm = opaque_text();
        wm.select_position(PositionPreset::TopLeft);
        wm.drag(10, 10);
        wm.drag(10, 10);
        let out = engine.compose(&bg, &wm).unwrap();
        assert_eq!(footprint(&out, &bg), Some((20, 20, 40, 20)));
    }

    #[test]
    fn zero_opacity_leaves_background_untouched() {
        let engine = engine();
        let bg = background(120, 80);
        let mut wm = opaque_text();
        wm.set_opacity(0.0).unwrap();
        wm.set_rotation(30.0).unwrap();
        assert_eq!(engine.compose(&bg, &wm).unwrap(), bg);
    }

    #[test]
    fn full_opacity_replaces_pixels_in_footprint() {
        let engine = engine();
        let bg = background(100, 50);
        let mut wm = opaque_text();
        wm.select_position(PositionPreset::TopLeft);
        let out = engine.compose(&bg, &wm).unwrap();
        for y in 0..20 {
            for x in 0..40 {
                assert_eq!(*out.get_pixel(x, y), Rgba([255, 0, 0, 255]));
            }
        }
        assert_eq!(*out.get_pixel(45, 5), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn full_turn_matches_unrotated() {
        let engine = engine();
        let bg = background(160, 90);
        let mut wm = opaque_text();
        let plain = engine.compose(&bg, &wm).unwrap();
        wm.set_rotation(360.0).unwrap();
        assert_eq!(engine.compose(&bg, &wm).unwrap(), plain);
    }

    #[test]
    fn rotation_positions_bounding_box() {
        let engine = engine();
        let mut wm = opaque_text();
        wm.set_rotation(90.0).unwrap();
        let mark = engine.render_mark(&wm).unwrap();
        assert_eq!(mark.size(), (20, 40));

        let bg = background(300, 200);
        let out = mark.place(&bg, &wm);
        assert_eq!(footprint(&out, &bg), Some((280, 160, 20, 40)));
    }

    #[test]
    fn watermark_outside_canvas_is_clipped_silently() {
        let engine = engine();
        let bg = background(50, 50);
        let mut wm = opaque_text();
        wm.drag(1000, 1000);
        assert_eq!(engine.compose(&bg, &wm).unwrap(), bg);
    }

    #[test]
    fn invalid_config_never_reaches_composition() {
        let engine = engine();
        let mut wm = opaque_text();
        wm.scale_percent = -10.0;
        assert!(matches!(
            engine.compose(&background(10, 10), &wm),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn image_watermark_uses_native_size_as_reference() {
        let dir = tempfile::tempdir().unwrap();
        let logo_path = dir.path().join("logo.png");
        RgbaImage::from_pixel(30, 10, Rgba([0, 255, 0, 255]))
            .save(&logo_path)
            .unwrap();

        let engine = engine();
        let mut wm = WatermarkConfig::image(&logo_path);
        wm.set_opacity(1.0).unwrap();
        wm.set_scale_percent(200.0).unwrap();
        assert_eq!(engine.render_mark(&wm).unwrap().size(), (60, 20));

        let missing = WatermarkConfig::image(dir.path().join("missing.png"));
        assert!(matches!(
            engine.render_mark(&missing),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn preview_is_proportional_to_export() {
        let engine = engine();
        let bg = background(1000, 500);
        let mut wm = opaque_text();
        wm.set_scale_percent(200.0).unwrap();
        wm.select_position(PositionPreset::TopLeft);
        wm.drag(100, 40);

        let full = engine.compose(&bg, &wm).unwrap();
        assert_eq!(footprint(&full, &bg), Some((100, 40, 80, 40)));

        let preview = engine.preview(&bg, &wm, 250).unwrap();
        assert!((preview.factor - 0.25).abs() < 1e-6);
        assert_eq!(preview.image.dimensions(), (250, 125));
        let small_bg = imageops::resize(&bg, 250, 125, FilterType::Triangle);
        assert_eq!(footprint(&preview.image, &small_bg), Some((25, 10, 20, 10)));

        assert_eq!(preview.to_full_resolution(5, -2), Offset::new(20, -8));
    }

    #[test]
    fn preview_of_small_image_is_full_composition() {
        let engine = engine();
        let bg = background(100, 60);
        let wm = opaque_text();
        let preview = engine.preview(&bg, &wm, 800).unwrap();
        assert_eq!(preview.factor, 1.0);
        assert_eq!(preview.image, engine.compose(&bg, &wm).unwrap());
        assert!(engine.preview(&bg, &wm, 0).is_err());
    }

    #[test]
    fn preview_scales_margins_beyond_i32() {
        assert_eq!(scale_u32(u32::MAX, 0.5), 2_147_483_648);

        let engine = engine();
        let bg = background(1000, 500);
        let mut wm = opaque_text();
        wm.select_position(PositionPreset::TopLeft);
        wm.margin = 3_000_000_000;
        let preview = engine.preview(&bg, &wm, 250).unwrap();
        let small_bg = imageops::resize(&bg, 250, 125, FilterType::Triangle);
        // The scaled margin pushes the mark off the canvas instead of wrapping to zero
        assert_eq!(footprint(&preview.image, &small_bg), None);
    }
}
