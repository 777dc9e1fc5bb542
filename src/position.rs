//! Watermark placement on a canvas.
//!
//! A preset anchor is resolved against the canvas and the watermark's
//! rendered (post-rotation) size, then the drag offset is added unclamped:
//! the watermark may sit partly or entirely outside the canvas.

use crate::config::{Offset, PositionPreset};

/// Resolve the top-left corner of the watermark on the canvas.
///
/// `canvas` and `mark` are `(width, height)` in pixels; `mark` is the size of
/// the rotated bounding box. `margin` insets edge and corner anchors and does
/// not apply to centered axes or to [`PositionPreset::Custom`].
#[must_use]
pub fn resolve(
    canvas: (u32, u32),
    mark: (u32, u32),
    preset: PositionPreset,
    offset: Offset,
    margin: u32,
) -> (i64, i64) {
    let (x, y) = anchor(canvas, mark, preset, i64::from(margin));
    (x + i64::from(offset.dx), y + i64::from(offset.dy))
}

/// Which third of an axis an anchor sits in.
#[derive(Clone, Copy)]
enum Align {
    Start,
    Middle,
    End,
}

fn anchor(canvas: (u32, u32), mark: (u32, u32), preset: PositionPreset, margin: i64) -> (i64, i64) {
    let (h, v) = match preset {
        PositionPreset::TopLeft => (Align::Start, Align::Start),
        PositionPreset::TopCenter => (Align::Middle, Align::Start),
        PositionPreset::TopRight => (Align::End, Align::Start),
        PositionPreset::CenterLeft => (Align::Start, Align::Middle),
        PositionPreset::Center => (Align::Middle, Align::Middle),
        PositionPreset::CenterRight => (Align::End, Align::Middle),
        PositionPreset::BottomLeft => (Align::Start, Align::End),
        PositionPreset::BottomCenter => (Align::Middle, Align::End),
        PositionPreset::BottomRight => (Align::End, Align::End),
        PositionPreset::Custom => return (0, 0),
    };
    (
        along(h, canvas.0, mark.0, margin),
        along(v, canvas.1, mark.1, margin),
    )
}

fn along(align: Align, canvas: u32, mark: u32, margin: i64) -> i64 {
    let free = i64::from(canvas) - i64::from(mark);
    match align {
        Align::Start => margin,
        Align::Middle => free.div_euclid(2),
        Align::End => free - margin,
    }
}
