//! Batch photo watermarking with predictable placement, scale and opacity.
//!
//! A watermark (rasterized text or a bitmap asset) is scaled relative to its
//! own intrinsic width, rotated about its center, faded by an opacity factor
//! and alpha-blended onto each photo at a preset anchor plus a drag offset.
//! Because the scale never refers to the photo, the watermark keeps the same
//! pixel size on a 640px preview and on a 6000px original.
//!
//! # Quick Start
//!
//! ```no_run
//! use photomark::{Color, Compositor, WatermarkConfig};
//!
//! let engine = Compositor::new();
//! let photo = image::open("photo.jpg").unwrap().to_rgba8();
//! let wm = WatermarkConfig::text("(c) Jane Doe", 48, Color::WHITE);
//! let out = engine.compose(&photo, &wm).unwrap();
//! out.save("photo_marked.png").unwrap();
//! ```
//!
//! # Batch export
//!
//! [`Exporter::export_batch`] composes every image at full resolution,
//! applies the export naming, format and resize rules, and never writes into
//! a source image's own directory.
//!
//! ```no_run
//! use std::path::PathBuf;
//! use photomark::{Compositor, ExportConfig, Exporter, WatermarkConfig};
//!
//! let engine = Compositor::new();
//! let images = vec![PathBuf::from("in/a.jpg"), PathBuf::from("in/b.jpg")];
//! let export = ExportConfig {
//!     output_dir: PathBuf::from("out"),
//!     ..ExportConfig::default()
//! };
//! let outcomes = Exporter::new(&engine)
//!     .export_batch(&images, &WatermarkConfig::default(), &export)
//!     .unwrap();
//! for outcome in &outcomes {
//!     println!("{}: {}", outcome.source.display(), outcome.is_success());
//! }
//! ```

#![deny(missing_docs)]

pub mod blending;
pub mod color;
pub mod config;
pub mod debounce;
mod engine;
pub mod error;
pub mod export;
pub mod input;
pub mod metadata;
pub mod paths;
pub mod position;
pub mod templates;
pub mod text;
pub mod transform;

pub use color::Color;
pub use config::{
    ExportConfig, ImageMark, NamingRule, Offset, OutputFormat, PositionPreset, Resize, Settings,
    TextMark, WatermarkConfig, WatermarkContent,
};
pub use engine::{Compositor, Preview, RenderedMark};
pub use error::{Error, Result};
pub use export::{save_image, CancelToken, ExportOutcome, ExportStatus, Exporter};
pub use input::{collect_images, is_supported_image};
pub use templates::{SessionState, TemplateStore};
pub use text::{FontRasterizer, TextRasterizer};
