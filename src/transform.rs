//! Geometric transforms applied to the watermark bitmap before placement.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use crate::error::{Error, Result};

/// Largest bitmap, in pixels, a resize may produce.
pub const MAX_PIXELS: u64 = 200_000_000;

/// Angles closer than this to a multiple of 90 degrees use exact pixel rotation.
const RIGHT_ANGLE_EPSILON: f32 = 1e-3;

/// Scale a bitmap by `percent` of its own width, preserving aspect ratio.
///
/// The result is never smaller than 1x1.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the result would exceed [`MAX_PIXELS`].
pub fn scale_by_percent(image: &RgbaImage, percent: f32) -> Result<RgbaImage> {
    let (w, h) = scaled_size(image.dimensions(), percent);
    if (w, h) == image.dimensions() {
        return Ok(image.clone());
    }
    check_dimensions(w, h)?;
    Ok(imageops::resize(image, w, h, FilterType::Lanczos3))
}

/// Reject sizes whose buffer would exceed [`MAX_PIXELS`].
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] naming the oversized dimensions.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(Error::InvalidConfig(format!(
            "resized bitmap {width}x{height} exceeds {MAX_PIXELS} pixels"
        )));
    }
    Ok(())
}

/// Dimensions of an intrinsic size scaled by `percent`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn scaled_size((width, height): (u32, u32), percent: f32) -> (u32, u32) {
    let factor = f64::from(percent) / 100.0;
    let w = (f64::from(width) * factor).round().max(1.0) as u32;
    let h = (f64::from(height) * factor).round().max(1.0) as u32;
    (w, h)
}

/// Rotate clockwise by `degrees` about the bitmap center.
///
/// The canvas grows to the rotated bounding box; uncovered corners are
/// transparent. Multiples of 90 degrees are rotated exactly.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn rotate_expand(image: &RgbaImage, degrees: f32) -> RgbaImage {
    let degrees = crate::config::normalize_rotation(degrees);
    let quarter = (degrees / 90.0).round();
    if (degrees - quarter * 90.0).abs() < RIGHT_ANGLE_EPSILON {
        return match quarter as i32 % 4 {
            1 => imageops::rotate90(image),
            2 => imageops::rotate180(image),
            3 => imageops::rotate270(image),
            _ => image.clone(),
        };
    }

    let (w, h) = image.dimensions();
    let (out_w, out_h) = rotated_bounds(w, h, degrees);
    #[allow(clippy::cast_precision_loss)]
    let projection = Projection::translate(out_w as f32 / 2.0, out_h as f32 / 2.0)
        * Projection::rotate(degrees.to_radians())
        * Projection::translate(-(w as f32) / 2.0, -(h as f32) / 2.0);

    let mut out = RgbaImage::new(out_w, out_h);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
        &mut out,
    );
    out
}

/// Size of the axis-aligned box enclosing a `w`x`h` rectangle rotated by `degrees`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rotated_bounds(w: u32, h: u32, degrees: f32) -> (u32, u32) {
    let theta = f64::from(degrees).to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let (w, h) = (f64::from(w), f64::from(h));
    // Shave float noise so exact fits do not gain a pixel
    let fit = |v: f64| (v - 1e-6).ceil().max(1.0) as u32;
    (fit(w * cos + h * sin), fit(w * sin + h * cos))
}
