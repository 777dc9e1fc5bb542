use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{ColorType, DynamicImage, Rgba, RgbaImage};

use photomark::{
    CancelToken, Color, Compositor, Error, ExportConfig, ExportStatus, Exporter, NamingRule,
    OutputFormat, PositionPreset, Resize, Settings, TemplateStore, TextMark, TextRasterizer,
    WatermarkConfig,
};

const LOGO_RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// One opaque cell per character; no font files needed.
struct CellRasterizer;

impl TextRasterizer for CellRasterizer {
    fn rasterize(&self, mark: &TextMark) -> photomark::Result<RgbaImage> {
        let chars = u32::try_from(mark.text.chars().count()).unwrap_or(1).max(1);
        Ok(RgbaImage::from_pixel(
            chars * mark.font_size / 2,
            mark.font_size,
            mark.color.to_rgba(),
        ))
    }
}

fn write_photo(path: &Path, w: u32, h: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let photo = DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255])
    }));
    // JPEG has no alpha channel
    let is_png = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("png"));
    if is_png {
        photo.save(path).unwrap();
    } else {
        photo.to_rgb8().save(path).unwrap();
    }
}

fn partial_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".partial")
        })
        .count()
}

fn write_logo(dir: &Path) -> PathBuf {
    let path = dir.join("logo.png");
    RgbaImage::from_pixel(40, 20, LOGO_RED).save(&path).unwrap();
    path
}

fn image_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

fn export_to(dir: &Path) -> ExportConfig {
    ExportConfig {
        output_dir: dir.to_path_buf(),
        ..ExportConfig::default()
    }
}

/// Bounding box `(x0, y0, x1, y1)` of pixels equal to `color`.
fn footprint(img: &RgbaImage, color: Rgba<u8>) -> Option<(u32, u32, u32, u32)> {
    img.enumerate_pixels()
        .filter(|(_, _, p)| **p == color)
        .fold(None, |acc, (x, y, _)| match acc {
            None => Some((x, y, x, y)),
            Some((x0, y0, x1, y1)) => Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y))),
        })
}

#[test]
fn corrupt_image_fails_alone_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let mut images = Vec::new();
    for i in 1..=5 {
        let path = src.join(format!("img{i}.png"));
        if i == 3 {
            fs::create_dir_all(&src).unwrap();
            fs::write(&path, b"definitely not a png").unwrap();
        } else {
            write_photo(&path, 64, 48);
        }
        images.push(path);
    }
    let logo = write_logo(dir.path());
    let out = dir.path().join("out");

    let engine = Compositor::new();
    let outcomes = Exporter::new(&engine)
        .export_batch(&images, &WatermarkConfig::image(&logo), &export_to(&out))
        .unwrap();

    assert_eq!(outcomes.len(), 5);
    for (outcome, source) in outcomes.iter().zip(&images) {
        assert_eq!(&outcome.source, source);
    }
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, images[2]);
    assert!(matches!(
        failed[0].status,
        ExportStatus::Failed(Error::Decode { .. })
    ));
    assert_eq!(image_files(&out).len(), 4);
}

#[test]
fn exporting_into_source_directory_is_rejected_without_writes() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("photos");
    let a = src.join("a.png");
    let b = src.join("b.png");
    write_photo(&a, 32, 32);
    write_photo(&b, 32, 32);
    let logo = write_logo(dir.path());
    let before = image_files(&src);

    let engine = Compositor::new();
    let result = Exporter::new(&engine).export_batch(
        &[a, b],
        &WatermarkConfig::image(&logo),
        &export_to(&src),
    );

    assert!(matches!(result, Err(Error::OverwriteProtection { .. })));
    assert_eq!(image_files(&src), before);
}

#[test]
fn relative_spelling_of_source_directory_is_still_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("photos");
    let a = src.join("a.png");
    write_photo(&a, 16, 16);
    fs::create_dir_all(src.join("sub")).unwrap();

    let engine = Compositor::new();
    let wm = WatermarkConfig::text("x", 8, Color::WHITE);
    let through_existing = src.join("sub").join("..");
    let through_missing = src.join("not_yet").join("..");
    for output_dir in [through_existing, through_missing] {
        let result = Exporter::new(&engine).export_batch(
            std::slice::from_ref(&a),
            &wm,
            &export_to(&output_dir),
        );
        assert!(
            matches!(result, Err(Error::OverwriteProtection { .. })),
            "{}",
            output_dir.display()
        );
    }
    assert!(!src.join("not_yet").exists());
    assert_eq!(image_files(&src), ["a.png", "sub"]);
}

#[test]
fn prefix_naming_and_same_named_inputs_are_disambiguated() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("day1").join("photo.jpg");
    let second = dir.path().join("day2").join("photo.jpg");
    write_photo(&first, 40, 30);
    write_photo(&second, 40, 30);
    let out = dir.path().join("out");

    let export = ExportConfig {
        naming: NamingRule::Prefix("wm_".to_string()),
        format: OutputFormat::Png,
        ..export_to(&out)
    };
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let outcomes = Exporter::new(&engine)
        .export_batch(
            &[first, second],
            &WatermarkConfig::text("2024", 8, Color::WHITE),
            &export,
        )
        .unwrap();

    assert!(outcomes.iter().all(photomark::ExportOutcome::is_success));
    assert_eq!(image_files(&out), ["wm_photo.png", "wm_photo_1.png"]);
}

#[test]
fn existing_output_files_are_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src").join("photo.png");
    write_photo(&src, 20, 20);
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("photo.png"), b"keep me").unwrap();

    let export = ExportConfig {
        naming: NamingRule::Original,
        ..export_to(&out)
    };
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let outcomes = Exporter::new(&engine)
        .export_batch(&[src], &WatermarkConfig::text("a", 4, Color::BLACK), &export)
        .unwrap();

    assert_eq!(outcomes[0].output(), Some(out.join("photo_1.png").as_path()));
    assert_eq!(fs::read(out.join("photo.png")).unwrap(), b"keep me");
}

#[test]
fn jpeg_export_is_opaque_and_resized() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src").join("shot.png");
    write_photo(&src, 200, 100);
    let logo = write_logo(dir.path());
    let out = dir.path().join("out");

    let export = ExportConfig {
        naming: NamingRule::Original,
        format: OutputFormat::Jpeg { quality: 85 },
        resize: Resize::Width(100),
        ..export_to(&out)
    };
    let engine = Compositor::new();
    let outcomes = Exporter::new(&engine)
        .export_batch(&[src], &WatermarkConfig::image(&logo), &export)
        .unwrap();

    let written = outcomes[0].output().unwrap();
    assert_eq!(written, out.join("shot.jpg"));
    let decoded = image::open(written).unwrap();
    assert_eq!(decoded.color(), ColorType::Rgb8);
    assert_eq!((decoded.width(), decoded.height()), (100, 50));
}

#[test]
fn watermark_size_does_not_depend_on_background() {
    let dir = tempfile::tempdir().unwrap();
    let logo = write_logo(dir.path());
    let mut config = WatermarkConfig::image(&logo);
    config.set_opacity(1.0).unwrap();
    config.set_scale_percent(50.0).unwrap();
    config.select_position(PositionPreset::Center);

    let engine = Compositor::new();
    let mut sizes = Vec::new();
    for (w, h) in [(100, 80), (640, 480), (1200, 300)] {
        let bg = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]));
        let out = engine.compose(&bg, &config).unwrap();
        let (x0, y0, x1, y1) = footprint(&out, LOGO_RED).unwrap();
        sizes.push((x1 - x0 + 1, y1 - y0 + 1));
    }
    assert!(sizes.iter().all(|s| *s == (20, 10)), "{sizes:?}");
}

#[test]
fn drags_accumulate_from_preset_anchor() {
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let mut config = WatermarkConfig::text("ab", 10, Color::WHITE);
    config.set_opacity(1.0).unwrap();
    config.select_position(PositionPreset::TopLeft);
    config.drag(10, 10);
    config.drag(10, 10);
    assert_eq!(config.offset, photomark::Offset::new(20, 20));

    let bg = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
    let out = engine.compose(&bg, &config).unwrap();
    assert_eq!(
        footprint(&out, Rgba([255, 255, 255, 255])),
        Some((20, 20, 29, 29))
    );

    config.select_position(PositionPreset::BottomRight);
    assert_eq!(config.offset, photomark::Offset::ZERO);
}

#[test]
fn zero_opacity_leaves_background_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let bg_path = dir.path().join("bg.png");
    write_photo(&bg_path, 64, 64);
    let bg = image::open(&bg_path).unwrap().to_rgba8();

    let engine = Compositor::with_rasterizer(CellRasterizer);
    let mut config = WatermarkConfig::text("hidden", 16, Color::WHITE);
    config.set_opacity(0.0).unwrap();
    config.set_rotation(33.0).unwrap();
    assert_eq!(engine.compose(&bg, &config).unwrap(), bg);
}

#[test]
fn template_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("templates.json");

    let mut watermark = WatermarkConfig::text("(c) Studio", 28, Color::rgb(10, 20, 30));
    watermark.set_rotation(-45.0).unwrap();
    watermark.set_scale_percent(75.0).unwrap();
    watermark.select_position(PositionPreset::TopRight);
    watermark.drag(-5, 12);
    let export = ExportConfig {
        output_dir: PathBuf::from("/tmp/exports"),
        naming: NamingRule::Suffix("_web".to_string()),
        format: OutputFormat::Jpeg { quality: 70 },
        resize: Resize::Percent(50.0),
    };

    TemplateStore::open(&path)
        .unwrap()
        .save("web", &watermark, &export)
        .unwrap();

    let reopened = TemplateStore::open(&path).unwrap();
    assert_eq!(reopened.list(), ["web"]);
    assert_eq!(
        reopened.apply("web").unwrap(),
        Settings { watermark, export }
    );
    assert!(matches!(
        reopened.apply("print"),
        Err(Error::TemplateNotFound(name)) if name == "print"
    ));
}

#[test]
fn cancelled_batch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..3)
        .map(|i| {
            let p = dir.path().join("src").join(format!("{i}.png"));
            write_photo(&p, 16, 16);
            p
        })
        .collect();
    let out = dir.path().join("out");

    let token = CancelToken::new();
    token.cancel();
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let outcomes = Exporter::new(&engine)
        .with_cancel_token(token)
        .export_batch(
            &images,
            &WatermarkConfig::text("x", 4, Color::WHITE),
            &export_to(&out),
        )
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o.status, ExportStatus::Cancelled)));
    assert!(image_files(&out).is_empty());
}

#[test]
fn cancelling_mid_batch_keeps_finished_files_only() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..12)
        .map(|i| {
            let p = dir.path().join("src").join(format!("{i:02}.png"));
            write_photo(&p, 64, 64);
            p
        })
        .collect();
    let out = dir.path().join("out");

    let token = CancelToken::new();
    let trigger = token.clone();
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let outcomes = Exporter::new(&engine)
        .with_cancel_token(token)
        .on_progress(move |_, _| trigger.cancel())
        .export_batch(
            &images,
            &WatermarkConfig::text("x", 4, Color::WHITE),
            &export_to(&out),
        )
        .unwrap();

    assert_eq!(outcomes.len(), images.len());
    let mut written = 0;
    for (outcome, source) in outcomes.iter().zip(&images) {
        assert_eq!(&outcome.source, source);
        match &outcome.status {
            ExportStatus::Written(path) => {
                written += 1;
                assert!(path.is_file(), "{}", path.display());
                assert!(image::open(path).is_ok());
            }
            ExportStatus::Cancelled => {}
            ExportStatus::Failed(e) => panic!("{}: {e}", source.display()),
        }
    }
    assert!(written >= 1);
    assert_eq!(image_files(&out).len(), written);
    assert_eq!(partial_files(&out), 0);
}

#[test]
fn progress_is_reported_once_per_image() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..4)
        .map(|i| {
            let p = dir.path().join("src").join(format!("{i}.png"));
            write_photo(&p, 16, 16);
            p
        })
        .collect();
    let out = dir.path().join("out");

    let calls = AtomicUsize::new(0);
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let outcomes = Exporter::new(&engine)
        .on_progress(|_, outcome| {
            assert!(outcome.is_success());
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .export_batch(
            &images,
            &WatermarkConfig::text("x", 4, Color::WHITE),
            &export_to(&out),
        )
        .unwrap();

    assert_eq!(outcomes.len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn invalid_settings_never_reach_export() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src").join("a.png");
    write_photo(&src, 8, 8);
    let out = dir.path().join("out");

    let mut config = WatermarkConfig::text("x", 4, Color::WHITE);
    config.scale_percent = 0.0;
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let result = Exporter::new(&engine).export_batch(&[src], &config, &export_to(&out));

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert!(!out.exists());
}

#[test]
fn oversized_output_fails_per_image_instead_of_aborting() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src").join("a.png");
    write_photo(&src, 64, 32);
    let out = dir.path().join("out");

    let export = ExportConfig {
        resize: Resize::Percent(1.0e7),
        ..export_to(&out)
    };
    let engine = Compositor::with_rasterizer(CellRasterizer);
    let wm = WatermarkConfig::text("x", 4, Color::WHITE);
    let outcomes = Exporter::new(&engine)
        .export_batch(std::slice::from_ref(&src), &wm, &export)
        .unwrap();
    assert!(matches!(
        outcomes[0].status,
        ExportStatus::Failed(Error::InvalidConfig(_))
    ));
    assert!(image_files(&out).is_empty());

    let mut huge = wm;
    huge.set_scale_percent(1.0e9).unwrap();
    let result = Exporter::new(&engine).export_batch(&[src], &huge, &export_to(&out));
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
