//! Source image discovery.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Extensions accepted as source images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

/// Expand files and directories into a list of supported images.
///
/// Directories are walked recursively in file-name order. Duplicates are
/// dropped, keeping the first occurrence, so the result order follows the
/// input order.
#[must_use]
pub fn collect_images<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    let mut push = |path: PathBuf| {
        if seen.insert(path.clone()) {
            images.push(path);
        }
    };

    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() && is_supported_image(entry.path()) => {
                        push(entry.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("skipping unreadable entry under {}: {e}", input.display()),
                }
            }
        } else if is_supported_image(input) {
            push(input.to_path_buf());
        }
    }
    images
}
