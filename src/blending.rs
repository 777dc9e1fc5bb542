//! Alpha blending math for watermark composition.
//!
//! Watermarks are applied with the non-premultiplied "over" operator:
//!
//! ```text
//! out_a   = src_a + dst_a * (1 - src_a)
//! out_rgb = (src_rgb * src_a + dst_rgb * dst_a * (1 - src_a)) / out_a
//! ```
//!
//! Over an opaque background this reduces to
//! `out_rgb = src_rgb * src_a + dst_rgb * (1 - src_a)`.

use image::{Rgba, RgbaImage};

/// Multiply every alpha value by `opacity` (clamped to `[0, 1]`).
pub fn apply_opacity(image: &mut RgbaImage, opacity: f32) {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity >= 1.0 {
        return;
    }
    for px in image.pixels_mut() {
        px[3] = to_u8(f32::from(px[3]) * opacity);
    }
}

/// Composite `overlay` onto `base` with its top-left corner at `(x, y)`.
///
/// Coordinates may be negative or past the canvas; only the intersection with
/// `base` is drawn. Fully transparent overlay pixels leave `base` untouched.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn composite_over(base: &mut RgbaImage, overlay: &RgbaImage, x: i64, y: i64) {
    let base_w = i64::from(base.width());
    let base_h = i64::from(base.height());

    // Clip to base bounds
    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + i64::from(overlay.width())).min(base_w);
    let y2 = (y + i64::from(overlay.height())).min(base_h);

    if x1 >= x2 || y1 >= y2 {
        return;
    }

    for by in y1..y2 {
        for bx in x1..x2 {
            let src = overlay.get_pixel((bx - x) as u32, (by - y) as u32);
            if src[3] == 0 {
                continue;
            }
            let dst = base.get_pixel_mut(bx as u32, by as u32);
            *dst = over(*src, *dst);
        }
    }
}

/// Blend a single source pixel over a destination pixel.
#[must_use]
pub fn over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = f32::from(src[3]) / 255.0;
    let da = f32::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = Rgba([0, 0, 0, to_u8(out_a * 255.0)]);
    for ch in 0..3 {
        let s = f32::from(src[ch]);
        let d = f32::from(dst[ch]);
        out[ch] = to_u8((s * sa + d * da * (1.0 - sa)) / out_a);
    }
    out
}

/// Flatten alpha onto an opaque background color, producing an opaque image.
#[must_use]
pub fn flatten_onto(image: &RgbaImage, background: [u8; 3]) -> image::RgbImage {
    let backdrop = Rgba([background[0], background[1], background[2], 255]);
    image::RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let px = over(*image.get_pixel(x, y), backdrop);
        image::Rgb([px[0], px[1], px[2]])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
