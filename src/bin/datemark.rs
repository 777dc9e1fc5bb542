use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use photomark::metadata::{capture_date, date_label};
use photomark::{
    is_supported_image, save_image, Color, Compositor, Error, PositionPreset, WatermarkConfig,
};

/// Margin used when the font size is given explicitly.
const FIXED_MARGIN: u32 = 10;

#[derive(Parser)]
#[command(
    name = "datemark",
    about = "Stamp photos with the date they were taken",
    version,
    after_help = "Results are written to a sibling directory named <dir>_watermark.\n\
                  Photos without a capture date in their EXIF data are skipped."
)]
struct Cli {
    /// Input image file or directory
    path: PathBuf,

    /// Font size in pixels (default: 5% of the shorter image side)
    #[arg(long)]
    font_size: Option<u32>,

    /// Text color, a name or #RRGGBB[AA]
    #[arg(long, default_value = "white")]
    color: Color,

    /// Anchor position
    #[arg(long, default_value = "bottom-right")]
    position: PositionPreset,

    /// Font file
    #[arg(long)]
    font: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

enum Stamped {
    Written(PathBuf),
    Skipped,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if cli.font_size == Some(0) {
        eprintln!("Error: Font size must be positive");
        process::exit(1);
    }

    let (images, base_dir) = if cli.path.is_file() {
        let parent = cli
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        (vec![cli.path.clone()], parent.to_path_buf())
    } else if cli.path.is_dir() {
        match list_images(&cli.path) {
            Ok(images) => (images, cli.path.clone()),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    } else {
        eprintln!(
            "Error: The path '{}' is not a valid file or directory",
            cli.path.display()
        );
        process::exit(1);
    };

    if images.is_empty() {
        eprintln!("Error: No supported images found");
        process::exit(1);
    }

    let output_dir = output_dir_for(&base_dir);
    if let Err(source) = fs::create_dir_all(&output_dir) {
        eprintln!(
            "Error: {}",
            Error::OutputDirectory {
                path: output_dir,
                source
            }
        );
        process::exit(1);
    }

    let engine = Compositor::new();
    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for image in &images {
        let filename = image.file_name().map_or_else(
            || image.display().to_string(),
            |f| f.to_string_lossy().to_string(),
        );
        match stamp(&engine, image, &output_dir, &cli) {
            Ok(Stamped::Written(path)) => {
                success_count += 1;
                if !cli.quiet {
                    eprintln!("[OK] {filename} -> {}", path.display());
                }
            }
            Ok(Stamped::Skipped) => {
                skip_count += 1;
                if !cli.quiet {
                    eprintln!("[SKIP] {filename}: no capture date");
                }
            }
            Err(e) => {
                fail_count += 1;
                eprintln!("[FAIL] {filename}: {e}");
            }
        }
    }

    if images.len() > 1 && !cli.quiet {
        eprintln!();
        eprint!("[Summary] Stamped: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", images.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "photomark=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Supported images directly inside `dir`, sorted by name.
fn list_images(dir: &Path) -> photomark::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_supported_image(p))
        .collect();
    images.sort();
    Ok(images)
}

/// Sibling of `base` named `<base>_watermark`.
fn output_dir_for(base: &Path) -> PathBuf {
    let base = fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
    let name = base
        .file_name()
        .map_or_else(|| "photos".into(), |n| n.to_string_lossy().to_string());
    base.with_file_name(format!("{name}_watermark"))
}

/// Font size and margin for an image whose shorter side is `min_side`.
fn dynamic_sizing(min_side: u32) -> (u32, u32) {
    let min_side = f64::from(min_side);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (font, margin) = (
        (min_side * 0.05).round() as u32,
        (min_side * 0.02).round() as u32,
    );
    (font.max(1), margin)
}

fn stamp(
    engine: &Compositor,
    image: &Path,
    output_dir: &Path,
    cli: &Cli,
) -> photomark::Result<Stamped> {
    let date = match capture_date(image) {
        Ok(date) => date,
        Err(Error::MissingMetadata(_)) => return Ok(Stamped::Skipped),
        Err(e) => return Err(e),
    };

    let background = image::open(image)
        .map_err(|source| Error::Decode {
            path: image.to_path_buf(),
            source,
        })?
        .to_rgba8();

    let (font_size, margin) = match cli.font_size {
        Some(size) => (size, FIXED_MARGIN),
        None => dynamic_sizing(background.width().min(background.height())),
    };
    debug!(
        "{}: date {date}, font size {font_size}, margin {margin}",
        image.display()
    );

    let mut config = WatermarkConfig::text(date_label(date), font_size, cli.color);
    if let photomark::WatermarkContent::Text(mark) = &mut config.content {
        mark.font.clone_from(&cli.font);
    }
    config.opacity = 1.0;
    config.margin = margin;
    config.select_position(cli.position);

    let composed = engine.compose(&background, &config)?;
    let output = output_dir.join(image.file_name().unwrap_or(image.as_os_str()));
    save_image(&composed, &output)?;
    Ok(Stamped::Written(output))
}
