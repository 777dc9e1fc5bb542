//! Error types for the photomark crate.

use std::path::PathBuf;

/// Errors that can occur while composing, exporting or persisting watermarks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A source image (or image watermark asset) could not be decoded.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// File that failed to decode.
        path: PathBuf,
        /// Underlying codec error.
        source: image::ImageError,
    },

    /// The composited image could not be encoded in the requested format.
    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        /// Destination file.
        path: PathBuf,
        /// Underlying codec error.
        source: image::ImageError,
    },

    /// The export directory is the same as the directory of a source image.
    #[error("refusing to export into source directory {}", dir.display())]
    OverwriteProtection {
        /// The colliding directory, canonicalized.
        dir: PathBuf,
    },

    /// The export directory could not be created or written to.
    #[error("output directory {} is not writable: {source}", path.display())]
    OutputDirectory {
        /// Output directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// No template with the given name exists.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The image carries no capture-date metadata.
    #[error("no capture date in {}", .0.display())]
    MissingMetadata(PathBuf),

    /// A configuration value was rejected at the edit boundary.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No usable font could be loaded for a text watermark.
    #[error("font error: {0}")]
    Font(String),

    /// A template or session file could not be (de)serialized.
    #[error("failed to read settings file {}: {source}", path.display())]
    Persistence {
        /// Settings file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The operation was cancelled before it produced output.
    #[error("cancelled")]
    Cancelled,

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image processing.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
