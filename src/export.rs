//! Batch export: compose every selected image at full resolution and write
//! the results under the configured naming and format rules.
//!
//! Directory-level problems (invalid configuration, an output directory that
//! coincides with a source directory, an unwritable output directory) reject
//! the whole batch before anything is written. After that, each image
//! succeeds or fails on its own and the batch always reports one outcome per
//! input, in input order.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageFormat, ImageResult, RgbaImage};
use tracing::{debug, info, warn};

use crate::blending;
use crate::config::{ExportConfig, NamingRule, OutputFormat, Resize, WatermarkConfig};
use crate::engine::{Compositor, RenderedMark};
use crate::error::{Error, Result};
use crate::transform;

/// Backdrop color JPEG output is flattened onto.
const JPEG_BACKDROP: [u8; 3] = [255, 255, 255];

/// JPEG quality used by [`save_image`].
const SAVE_JPEG_QUALITY: u8 = 95;

/// Shared flag to stop a running batch.
///
/// Cancelling stops new images from being started; images already past
/// their last checkpoint finish writing. Output files are never left
/// half-written.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one source image.
#[derive(Debug)]
pub enum ExportStatus {
    /// Output was written to this path.
    Written(PathBuf),
    /// The image failed; the rest of the batch continued.
    Failed(Error),
    /// The batch was cancelled before this image was written.
    Cancelled,
}

/// Result of exporting a single source image.
#[derive(Debug)]
pub struct ExportOutcome {
    /// The source image.
    pub source: PathBuf,
    /// What happened to it.
    pub status: ExportStatus,
}

impl ExportOutcome {
    /// Whether an output file was written.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExportStatus::Written(_))
    }

    /// The written output file, if any.
    #[must_use]
    pub fn output(&self) -> Option<&Path> {
        match &self.status {
            ExportStatus::Written(path) => Some(path),
            _ => None,
        }
    }
}

type ProgressFn<'a> = dyn Fn(usize, &ExportOutcome) + Send + Sync + 'a;

/// Drives the composition engine over a batch of images.
pub struct Exporter<'a> {
    engine: &'a Compositor,
    cancel: CancelToken,
    progress: Option<Box<ProgressFn<'a>>>,
}

impl<'a> Exporter<'a> {
    /// Create an exporter using `engine` for composition.
    #[must_use]
    pub fn new(engine: &'a Compositor) -> Self {
        Self {
            engine,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Use `token` to cancel the batch from another thread.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Call `callback` with the input index and outcome as each image finishes.
    ///
    /// With the `parallel` feature callbacks may arrive out of order; the
    /// returned outcomes are always in input order.
    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(usize, &ExportOutcome) + Send + Sync + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Export every image in `images`.
    ///
    /// Returns one [`ExportOutcome`] per input, in input order.
    ///
    /// # Errors
    ///
    /// Fails the whole batch, before any file is written, with
    /// [`Error::InvalidConfig`], [`Error::OverwriteProtection`],
    /// [`Error::OutputDirectory`], or an error rendering the watermark.
    pub fn export_batch(
        &self,
        images: &[PathBuf],
        watermark: &WatermarkConfig,
        export: &ExportConfig,
    ) -> Result<Vec<ExportOutcome>> {
        watermark.validate()?;
        export.validate()?;
        let output_dir = check_output_dir(images, &export.output_dir)?;
        let mark = self.engine.render_mark(watermark)?;
        info!(
            images = images.len(),
            output = %output_dir.display(),
            "starting export"
        );

        let targets = plan_output_names(images, export);
        let jobs: Vec<(usize, &PathBuf, PathBuf)> = images
            .iter()
            .zip(targets)
            .enumerate()
            .map(|(i, (source, target))| (i, source, target))
            .collect();

        let run = |(index, source, target): &(usize, &PathBuf, PathBuf)| {
            let outcome = self.export_one(source, target, &mark, watermark, export);
            if let Some(progress) = &self.progress {
                progress(*index, &outcome);
            }
            outcome
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<ExportOutcome> = {
            use rayon::prelude::*;
            jobs.par_iter().map(run).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<ExportOutcome> = jobs.iter().map(run).collect();

        let written = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            written,
            failed = outcomes
                .iter()
                .filter(|o| matches!(o.status, ExportStatus::Failed(_)))
                .count(),
            cancelled = self.cancel.is_cancelled(),
            "export finished"
        );
        Ok(outcomes)
    }

    fn export_one(
        &self,
        source: &Path,
        target: &Path,
        mark: &RenderedMark,
        watermark: &WatermarkConfig,
        export: &ExportConfig,
    ) -> ExportOutcome {
        let status = match self.compose_and_write(source, target, mark, watermark, export) {
            Ok(()) => {
                debug!(source = %source.display(), output = %target.display(), "exported");
                ExportStatus::Written(target.to_path_buf())
            }
            Err(Error::Cancelled) => ExportStatus::Cancelled,
            Err(e) => {
                warn!(source = %source.display(), "export failed: {e}");
                ExportStatus::Failed(e)
            }
        };
        ExportOutcome {
            source: source.to_path_buf(),
            status,
        }
    }

    fn compose_and_write(
        &self,
        source: &Path,
        target: &Path,
        mark: &RenderedMark,
        watermark: &WatermarkConfig,
        export: &ExportConfig,
    ) -> Result<()> {
        self.checkpoint()?;
        let background = image::open(source)
            .map_err(|e| Error::Decode {
                path: source.to_path_buf(),
                source: e,
            })?
            .to_rgba8();

        let composed = mark.place(&background, watermark);
        let output = apply_resize(composed, export.resize)?;

        // Last chance to stop; past this point the write runs to completion
        self.checkpoint()?;
        let (format, quality) = match export.format {
            OutputFormat::Png => (ImageFormat::Png, 0),
            OutputFormat::Jpeg { quality } => (ImageFormat::Jpeg, quality),
        };
        write_atomic(&output, target, format, quality)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Enforce overwrite protection and make sure the output directory is usable.
///
/// Returns the canonical output directory.
///
/// # Errors
///
/// Returns [`Error::OverwriteProtection`] if the output directory resolves to
/// the directory of any source image, or [`Error::OutputDirectory`] if it
/// cannot be created or written to. Nothing is created when protection fails.
pub fn check_output_dir(images: &[PathBuf], output_dir: &Path) -> Result<PathBuf> {
    let dir_error = |source: io::Error| Error::OutputDirectory {
        path: output_dir.to_path_buf(),
        source,
    };
    let target = canonicalize_lenient(output_dir).map_err(dir_error)?;

    for image in images {
        let parent = match image.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // Sources that cannot be resolved fail later, per image
        if let Ok(dir) = fs::canonicalize(parent) {
            if dir == target {
                return Err(Error::OverwriteProtection { dir });
            }
        }
    }

    fs::create_dir_all(output_dir).map_err(dir_error)?;
    let probe = output_dir.join(format!(".photomark-probe-{}", std::process::id()));
    fs::write(&probe, b"").map_err(dir_error)?;
    fs::remove_file(&probe).map_err(dir_error)?;
    Ok(target)
}

/// Canonicalize a path whose trailing components may not exist yet.
///
/// `..` steps up from the real location of what exists so far, and
/// lexically through components that do not exist.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if let Ok(real) = fs::canonicalize(&resolved) {
                    resolved = real;
                }
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }

    let mut existing = resolved.as_path();
    let mut missing = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(base) => {
                return Ok(missing.iter().rev().fold(base, |acc, name| acc.join(name)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Output file name for `source` under a naming rule, before disambiguation.
///
/// `Prefix("wm_")` turns `photo.jpg` into `wm_photo.png` for PNG output.
#[must_use]
pub fn output_file_name(source: &Path, naming: &NamingRule, format: OutputFormat) -> String {
    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    let stem = match naming {
        NamingRule::Original => stem.into_owned(),
        NamingRule::Prefix(prefix) => format!("{prefix}{stem}"),
        NamingRule::Suffix(suffix) => format!("{stem}{suffix}"),
    };
    format!("{stem}.{}", format.extension())
}

/// Assign every source a distinct output path.
///
/// A name already claimed earlier in the batch, or already present in the
/// output directory, gets a numeric suffix: `photo_1.png`, `photo_2.png`, ...
#[must_use]
pub fn plan_output_names(images: &[PathBuf], export: &ExportConfig) -> Vec<PathBuf> {
    let mut claimed = HashSet::new();
    let ext = export.format.extension();
    images
        .iter()
        .map(|source| {
            let name = output_file_name(source, &export.naming, export.format);
            let stem = name.strip_suffix(&format!(".{ext}")).unwrap_or(&name).to_string();
            let mut candidate = name;
            let mut n = 1u32;
            loop {
                let path = export.output_dir.join(&candidate);
                // Compare case-insensitively so case-folding filesystems do not collide
                if !claimed.contains(&candidate.to_lowercase()) && !path.exists() {
                    claimed.insert(candidate.to_lowercase());
                    return path;
                }
                candidate = format!("{stem}_{n}.{ext}");
                n += 1;
            }
        })
        .collect()
}

/// Resize the composited output; aspect ratio is kept when one dimension is given.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the target size exceeds
/// [`transform::MAX_PIXELS`].
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn apply_resize(image: RgbaImage, resize: Resize) -> Result<RgbaImage> {
    let (w, h) = (f64::from(image.width()), f64::from(image.height()));
    let (new_w, new_h) = match resize {
        Resize::None => return Ok(image),
        Resize::Width(target) => (f64::from(target), h * f64::from(target) / w),
        Resize::Height(target) => (w * f64::from(target) / h, f64::from(target)),
        Resize::Percent(p) => (w * f64::from(p) / 100.0, h * f64::from(p) / 100.0),
    };
    let new_w = new_w.round().max(1.0) as u32;
    let new_h = new_h.round().max(1.0) as u32;
    if (new_w, new_h) == image.dimensions() {
        return Ok(image);
    }
    transform::check_dimensions(new_w, new_h)?;
    Ok(imageops::resize(&image, new_w, new_h, FilterType::Lanczos3))
}

/// Save an RGBA image, choosing the format from the file extension.
///
/// JPEG output is flattened onto white; PNG, BMP and TIFF keep alpha.
/// The file is written to a temporary sibling and renamed into place.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff => {
            write_atomic(img, path, format, SAVE_JPEG_QUALITY)
        }
        _ => Err(Error::UnsupportedFormat(format!("{format:?}"))),
    }
}

/// Encode into `<dir>/.<name>.partial`, then rename over `target`.
fn write_atomic(image: &RgbaImage, target: &Path, format: ImageFormat, quality: u8) -> Result<()> {
    let file_name = target.file_name().unwrap_or_default().to_string_lossy();
    let partial = target.with_file_name(format!(".{file_name}.partial"));

    let result = write_file(image, &partial, target, format, quality)
        .and_then(|()| fs::rename(&partial, target).map_err(Error::from));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_file(
    image: &RgbaImage,
    partial: &Path,
    target: &Path,
    format: ImageFormat,
    quality: u8,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(partial)?);
    encode(image, format, quality, &mut writer).map_err(|source| Error::Encode {
        path: target.to_path_buf(),
        source,
    })?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn encode<W: Write + Seek>(
    image: &RgbaImage,
    format: ImageFormat,
    quality: u8,
    writer: &mut W,
) -> ImageResult<()> {
    match format {
        ImageFormat::Jpeg => {
            let flat = blending::flatten_onto(image, JPEG_BACKDROP);
            JpegEncoder::new_with_quality(writer, quality).encode_image(&flat)
        }
        other => image.write_to(writer, other),
    }
}
