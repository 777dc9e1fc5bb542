//! Text rasterization for text watermarks.
//!
//! The composition engine only needs a tightly sized, alpha-masked bitmap of
//! the text; [`TextRasterizer`] is that seam. [`FontRasterizer`] implements it
//! with `ab_glyph` outlines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ab_glyph::{point, Font, FontVec, GlyphId, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::config::TextMark;
use crate::error::{Error, Result};

/// Fonts tried, in order, when a text watermark names no font file.
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Renders a string into an alpha-masked bitmap sized to the glyph run.
pub trait TextRasterizer: Send + Sync {
    /// Rasterize `mark.text` at `mark.font_size` in `mark.color`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Font`] when no usable font is available.
    fn rasterize(&self, mark: &TextMark) -> Result<RgbaImage>;
}

/// [`TextRasterizer`] backed by TrueType/OpenType files.
///
/// Parsed fonts are cached by path, so repeated previews do not re-read the
/// font file.
#[derive(Default)]
pub struct FontRasterizer {
    fonts: Mutex<HashMap<PathBuf, Arc<FontVec>>>,
}

impl FontRasterizer {
    /// Create a rasterizer with an empty font cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn font(&self, requested: Option<&Path>) -> Result<Arc<FontVec>> {
        let path = match requested {
            Some(p) => p.to_path_buf(),
            None => default_font_path().ok_or_else(|| {
                Error::Font("no font given and no system fallback font found".to_string())
            })?,
        };

        let mut fonts = self.fonts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(font) = fonts.get(&path) {
            return Ok(Arc::clone(font));
        }

        let data = std::fs::read(&path)
            .map_err(|e| Error::Font(format!("cannot read {}: {e}", path.display())))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| Error::Font(format!("cannot parse {}", path.display())))?;
        debug!(font = %path.display(), "loaded font");
        let font = Arc::new(font);
        fonts.insert(path, Arc::clone(&font));
        Ok(font)
    }
}

impl TextRasterizer for FontRasterizer {
    fn rasterize(&self, mark: &TextMark) -> Result<RgbaImage> {
        let font = self.font(mark.font.as_deref())?;
        #[allow(clippy::cast_precision_loss)]
        let size = mark.font_size as f32;
        Ok(render_line(font.as_ref(), size, &mark.text, mark.color.to_rgba()))
    }
}

/// First fallback font that exists on this machine.
#[must_use]
pub fn default_font_path() -> Option<PathBuf> {
    FALLBACK_FONTS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Lay out a single line and draw it into a tightly sized bitmap.
///
/// Width is the advance of the glyph run, height is ascent minus descent.
/// Color channels are constant; glyph coverage goes into alpha.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
fn render_line<F: Font>(font: &F, size: f32, text: &str, color: Rgba<u8>) -> RgbaImage {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);
    let ascent = scaled.ascent();

    let mut caret = 0.0f32;
    let mut previous: Option<GlyphId> = None;
    let mut glyphs = Vec::new();
    for ch in text.chars().filter(|c| !c.is_control()) {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        glyphs.push(id.with_scale_and_position(scale, point(caret, ascent)));
        caret += scaled.h_advance(id);
        previous = Some(id);
    }

    let width = caret.ceil().max(1.0) as u32;
    let height = (ascent - scaled.descent()).ceil().max(1.0) as u32;
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([color[0], color[1], color[2], 0]));

    for glyph in glyphs {
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i32 + gx as i32;
            let y = bounds.min.y as i32 + gy as i32;
            if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
                return;
            }
            let alpha = (coverage.clamp(0.0, 1.0) * f32::from(color[3])).round() as u8;
            let px = canvas.get_pixel_mut(x as u32, y as u32);
            // Overlapping glyph edges keep the stronger coverage
            px[3] = px[3].max(alpha);
        });
    }

    canvas
}
