//! Capture-date extraction from EXIF metadata.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Read the date a photo was taken.
///
/// Tries `DateTimeOriginal`, then `DateTimeDigitized`.
///
/// # Errors
///
/// Returns [`Error::MissingMetadata`] if the file has no EXIF block or no
/// parseable capture date.
pub fn capture_date(path: &Path) -> Result<NaiveDate> {
    let exif = rexif::parse_file(path).map_err(|e| {
        trace!("no EXIF data in {}: {e}", path.display());
        Error::MissingMetadata(path.to_path_buf())
    })?;

    let fields = [
        rexif::ExifTag::DateTimeOriginal,
        rexif::ExifTag::DateTimeDigitized,
    ];
    for field in &fields {
        if let Some(entry) = exif.entries.iter().find(|e| e.tag == *field) {
            if let Some(date) = parse_exif_date(&entry.value_more_readable) {
                debug!("found capture date in {:?}: {}", field, date);
                return Ok(date);
            }
        }
    }
    Err(Error::MissingMetadata(path.to_path_buf()))
}

/// Parse an EXIF timestamp such as `"2005:07:30 07:22:46"`.
#[must_use]
pub fn parse_exif_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim().trim_end_matches('\0');
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y:%m:%d %H:%M:%S") {
        return Some(dt.date());
    }
    // Some writers omit the time or use other separators
    let date_part = value.split_whitespace().next()?;
    ["%Y:%m:%d", "%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Watermark text for a capture date: `YYYY-MM-DD`.
#[must_use]
pub fn date_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
