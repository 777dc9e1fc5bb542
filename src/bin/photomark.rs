use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use photomark::{
    collect_images, paths, save_image, Color, Compositor, ExportOutcome, ExportStatus, Exporter,
    ImageMark, NamingRule, OutputFormat, PositionPreset, Resize, SessionState, Settings,
    TemplateStore, TextMark, WatermarkContent,
};

#[derive(Parser)]
#[command(
    name = "photomark",
    about = "Apply text or image watermarks to batches of photos",
    version,
    after_help = "Settings edited with `photomark set` are remembered between runs.\n\
                  Save them under a name with `photomark template save <name>`."
)]
struct Cli {
    /// Directory holding templates.json and last_session.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Edit the current watermark and export settings
    Set(SetArgs),
    /// Print the current settings as JSON
    Show,
    /// Render a reduced-size preview of one image
    Preview {
        /// Image to preview
        input: PathBuf,
        /// Where to write the preview
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
        /// Longest edge of the preview in pixels
        #[arg(long, default_value = "800")]
        max_edge: u32,
    },
    /// Watermark and export images or directories
    Export {
        /// Input images or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Use a saved template instead of the current settings
        #[arg(short, long)]
        template: Option<String>,
        /// Override the output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage saved templates
    #[command(subcommand)]
    Template(TemplateCommand),
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Save the current settings under a name
    Save {
        /// Template name
        name: String,
    },
    /// List saved templates
    List,
    /// Make a template's settings current
    Apply {
        /// Template name
        name: String,
    },
    /// Delete a saved template
    Delete {
        /// Template name
        name: String,
    },
}

#[derive(Args)]
struct SetArgs {
    /// Use a text watermark with this text
    #[arg(long, conflicts_with = "image")]
    text: Option<String>,
    /// Use an image watermark from this file
    #[arg(long)]
    image: Option<PathBuf>,
    /// Font size in pixels (text watermarks)
    #[arg(long)]
    font_size: Option<u32>,
    /// Font file (text watermarks)
    #[arg(long)]
    font: Option<PathBuf>,
    /// Text color, a name or #RRGGBB[AA]
    #[arg(long)]
    color: Option<Color>,
    /// Opacity, 0.0-1.0
    #[arg(long)]
    opacity: Option<f32>,
    /// Clockwise rotation in degrees
    #[arg(long, allow_hyphen_values = true)]
    rotation: Option<f32>,
    /// Scale as a percentage of the watermark's own width
    #[arg(long)]
    scale: Option<f32>,
    /// Anchor position, e.g. bottom-right; resets the drag offset
    #[arg(long)]
    position: Option<PositionPreset>,
    /// Move the watermark by DX,DY pixels; repeated drags accumulate
    #[arg(long, value_parser = parse_drag, allow_hyphen_values = true)]
    drag: Vec<(i32, i32)>,
    /// Margin for edge anchors in pixels
    #[arg(long)]
    margin: Option<u32>,
    /// Output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Naming rule: original, prefix:<text> or suffix:<text>
    #[arg(long)]
    naming: Option<NamingRule>,
    /// Output format: png, jpeg or jpeg:<quality>
    #[arg(long)]
    format: Option<OutputFormat>,
    /// Output resize: none, width:<px>, height:<px> or percent:<p>
    #[arg(long)]
    resize: Option<Resize>,
}

fn parse_drag(s: &str) -> Result<(i32, i32), String> {
    let (dx, dy) = s
        .split_once(',')
        .ok_or_else(|| format!("expected DX,DY, got {s}"))?;
    let parse = |v: &str| v.trim().parse::<i32>().map_err(|e| format!("{v}: {e}"));
    Ok((parse(dx)?, parse(dy)?))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config_dir = match cli.config_dir.clone().or_else(paths::config_dir) {
        Some(dir) => dir,
        None => {
            eprintln!("Error: No config directory available; pass --config-dir");
            process::exit(1);
        }
    };

    let mut session = SessionState::load(paths::session_file(&config_dir));
    let code = match run(&cli, &config_dir, &mut session) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    if let Err(e) = session.shutdown() {
        error!("failed to save session: {e}");
    }
    process::exit(code);
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

fn run(cli: &Cli, config_dir: &Path, session: &mut SessionState) -> photomark::Result<i32> {
    match &cli.command {
        Command::Set(args) => {
            apply_edits(session.settings_mut(), args)?;
            Ok(0)
        }
        Command::Show => {
            let json = serde_json::to_string_pretty(session.settings())
                .map_err(|e| photomark::Error::InvalidConfig(e.to_string()))?;
            println!("{json}");
            Ok(0)
        }
        Command::Preview {
            input,
            output,
            max_edge,
        } => {
            let background = image::open(input)
                .map_err(|source| photomark::Error::Decode {
                    path: input.clone(),
                    source,
                })?
                .to_rgba8();
            let preview =
                Compositor::new().preview(&background, &session.settings().watermark, *max_edge)?;
            save_image(&preview.image, output)?;
            if !cli.quiet {
                eprintln!(
                    "Preview written to {} ({:.0}% scale)",
                    output.display(),
                    preview.factor * 100.0
                );
            }
            Ok(0)
        }
        Command::Export {
            inputs,
            template,
            output,
        } => {
            let mut settings = match template {
                Some(name) => open_templates(config_dir)?.apply(name)?,
                None => session.settings().clone(),
            };
            if let Some(dir) = output {
                settings.export.output_dir.clone_from(dir);
            }
            Ok(export(&settings, inputs, cli))
        }
        Command::Template(command) => {
            let store = open_templates(config_dir)?;
            match command {
                TemplateCommand::Save { name } => {
                    let current = session.settings();
                    store.save(name, &current.watermark, &current.export)?;
                    if !cli.quiet {
                        eprintln!("Saved template {name}");
                    }
                }
                TemplateCommand::List => {
                    for name in store.list() {
                        println!("{name}");
                    }
                }
                TemplateCommand::Apply { name } => {
                    *session.settings_mut() = store.apply(name)?;
                    if !cli.quiet {
                        eprintln!("Applied template {name}");
                    }
                }
                TemplateCommand::Delete { name } => {
                    store.delete(name)?;
                    if !cli.quiet {
                        eprintln!("Deleted template {name}");
                    }
                }
            }
            Ok(0)
        }
    }
}

fn open_templates(config_dir: &Path) -> photomark::Result<TemplateStore> {
    TemplateStore::open(paths::templates_file(config_dir))
}

/// Apply edits to a scratch copy so a rejected value leaves the session untouched.
fn apply_edits(settings: &mut Settings, args: &SetArgs) -> photomark::Result<()> {
    let mut edited = settings.clone();
    let wm = &mut edited.watermark;

    if let Some(text) = &args.text {
        let previous = match &wm.content {
            WatermarkContent::Text(mark) => mark.clone(),
            WatermarkContent::Image(_) => TextMark {
                text: String::new(),
                font_size: 32,
                color: Color::WHITE,
                font: None,
            },
        };
        wm.content = WatermarkContent::Text(TextMark {
            text: text.clone(),
            ..previous
        });
    }
    if let Some(source) = &args.image {
        wm.content = WatermarkContent::Image(ImageMark {
            source: source.clone(),
        });
    }
    if let Some(size) = args.font_size {
        wm.set_font_size(size)?;
    }
    if args.font.is_some() || args.color.is_some() {
        let WatermarkContent::Text(mark) = &mut wm.content else {
            return Err(photomark::Error::InvalidConfig(
                "font and color only apply to text watermarks".to_string(),
            ));
        };
        if let Some(font) = &args.font {
            mark.font = Some(font.clone());
        }
        if let Some(color) = args.color {
            mark.color = color;
        }
    }
    if let Some(opacity) = args.opacity {
        wm.set_opacity(opacity)?;
    }
    if let Some(rotation) = args.rotation {
        wm.set_rotation(rotation)?;
    }
    if let Some(scale) = args.scale {
        wm.set_scale_percent(scale)?;
    }
    if let Some(position) = args.position {
        wm.select_position(position);
    }
    for &(dx, dy) in &args.drag {
        wm.drag(dx, dy);
    }
    if let Some(margin) = args.margin {
        wm.margin = margin;
    }

    let export = &mut edited.export;
    if let Some(dir) = &args.output_dir {
        export.output_dir.clone_from(dir);
    }
    if let Some(naming) = &args.naming {
        export.naming = naming.clone();
    }
    if let Some(format) = args.format {
        export.format = format;
    }
    if let Some(resize) = args.resize {
        export.resize = resize;
    }

    edited.validate()?;
    *settings = edited;
    Ok(())
}

fn export(settings: &Settings, inputs: &[PathBuf], cli: &Cli) -> i32 {
    let images = collect_images(inputs);
    if images.is_empty() {
        eprintln!("Error: No supported images found");
        return 1;
    }

    let engine = Compositor::new();
    let outcomes = match Exporter::new(&engine).export_batch(
        &images,
        &settings.watermark,
        &settings.export,
    ) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let mut success_count = 0u32;
    let mut cancel_count = 0u32;
    let mut fail_count = 0u32;

    for outcome in &outcomes {
        print_outcome(outcome, cli);
        match outcome.status {
            ExportStatus::Written(_) => success_count += 1,
            ExportStatus::Cancelled => cancel_count += 1,
            ExportStatus::Failed(_) => fail_count += 1,
        }
    }

    if outcomes.len() > 1 && !cli.quiet {
        eprintln!();
        eprint!("[Summary] Exported: {success_count}");
        if cancel_count > 0 {
            eprint!(", Cancelled: {cancel_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", outcomes.len());
    }

    i32::from(fail_count > 0)
}

fn print_outcome(outcome: &ExportOutcome, cli: &Cli) {
    let filename = outcome.source.file_name().map_or_else(
        || outcome.source.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    match &outcome.status {
        ExportStatus::Written(path) => {
            if !cli.quiet {
                if cli.verbose {
                    eprintln!("[OK] {filename} -> {}", path.display());
                } else {
                    eprintln!("[OK] {filename}");
                }
            }
        }
        ExportStatus::Cancelled => {
            if !cli.quiet {
                eprintln!("[SKIP] {filename}: cancelled");
            }
        }
        ExportStatus::Failed(e) => eprintln!("[FAIL] {filename}: {e}"),
    }
}
