//! Watermark and export configuration.
//!
//! These types are the single source of truth shared by the preview, the
//! export pipeline and the template store. Values are validated at the edit
//! boundary: the `set_*` methods reject out-of-range input before it can
//! reach composition, and [`WatermarkConfig::validate`] /
//! [`ExportConfig::validate`] re-check configurations loaded from disk.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::{Error, Result};

/// Normalize an angle in degrees into `[0, 360)`.
#[must_use]
pub fn normalize_rotation(degrees: f32) -> f32 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Anchor used to place the watermark on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionPreset {
    /// Top-left corner.
    TopLeft,
    /// Middle of the top edge.
    TopCenter,
    /// Top-right corner.
    TopRight,
    /// Middle of the left edge.
    CenterLeft,
    /// Canvas center.
    Center,
    /// Middle of the right edge.
    CenterRight,
    /// Bottom-left corner.
    BottomLeft,
    /// Middle of the bottom edge.
    BottomCenter,
    /// Bottom-right corner.
    #[default]
    BottomRight,
    /// No anchor: the offset is measured from the canvas origin.
    Custom,
}

impl PositionPreset {
    /// The nine grid anchors, row by row.
    pub const GRID: [PositionPreset; 9] = [
        Self::TopLeft,
        Self::TopCenter,
        Self::TopRight,
        Self::CenterLeft,
        Self::Center,
        Self::CenterRight,
        Self::BottomLeft,
        Self::BottomCenter,
        Self::BottomRight,
    ];

    /// Kebab-case name used on the command line and in settings files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopCenter => "top-center",
            Self::TopRight => "top-right",
            Self::CenterLeft => "center-left",
            Self::Center => "center",
            Self::CenterRight => "center-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomCenter => "bottom-center",
            Self::BottomRight => "bottom-right",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for PositionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::GRID
            .into_iter()
            .chain(std::iter::once(Self::Custom))
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown position: {s}")))
    }
}

/// Additive pixel delta applied after anchor resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Offset {
    /// Horizontal delta, positive to the right.
    pub dx: i32,
    /// Vertical delta, positive downwards.
    pub dy: i32,
}

impl Offset {
    /// The zero offset.
    pub const ZERO: Offset = Offset { dx: 0, dy: 0 };

    /// Create an offset.
    #[must_use]
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }
}

/// A text watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMark {
    /// Text to render.
    pub text: String,
    /// Font size in pixels.
    pub font_size: u32,
    /// Fill color.
    pub color: Color,
    /// TrueType/OpenType font file; `None` picks a system default.
    #[serde(default)]
    pub font: Option<PathBuf>,
}

/// An image watermark, typically a PNG logo with transparency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMark {
    /// Path of the watermark asset.
    pub source: PathBuf,
}

/// What the watermark draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatermarkContent {
    /// Rasterized text.
    Text(TextMark),
    /// A bitmap asset.
    Image(ImageMark),
}

/// Full description of a watermark layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Text or image content.
    pub content: WatermarkContent,
    /// Layer opacity in `[0, 1]`.
    pub opacity: f32,
    /// Clockwise rotation in degrees, normalized to `[0, 360)`.
    pub rotation_degrees: f32,
    /// Size as a percentage of the watermark's own intrinsic width.
    pub scale_percent: f32,
    /// Anchor on the canvas.
    pub position: PositionPreset,
    /// Accumulated drag delta on top of the anchor.
    #[serde(default)]
    pub offset: Offset,
    /// Inset of edge and corner anchors, in pixels.
    #[serde(default)]
    pub margin: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            content: WatermarkContent::Text(TextMark {
                text: "Watermark".to_string(),
                font_size: 32,
                color: Color::WHITE,
                font: None,
            }),
            opacity: 0.5,
            rotation_degrees: 0.0,
            scale_percent: 100.0,
            position: PositionPreset::BottomRight,
            offset: Offset::ZERO,
            margin: 0,
        }
    }
}

impl WatermarkConfig {
    /// Text watermark with default layer settings.
    #[must_use]
    pub fn text(text: impl Into<String>, font_size: u32, color: Color) -> Self {
        Self {
            content: WatermarkContent::Text(TextMark {
                text: text.into(),
                font_size,
                color,
                font: None,
            }),
            ..Self::default()
        }
    }

    /// Image watermark with default layer settings.
    #[must_use]
    pub fn image(source: impl Into<PathBuf>) -> Self {
        Self {
            content: WatermarkContent::Image(ImageMark {
                source: source.into(),
            }),
            ..Self::default()
        }
    }

    /// Check every invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        check_opacity(self.opacity)?;
        check_scale(self.scale_percent)?;
        if !self.rotation_degrees.is_finite() || !(0.0..360.0).contains(&self.rotation_degrees)
        {
            return Err(Error::InvalidConfig(format!(
                "rotation {} is not normalized to [0, 360)",
                self.rotation_degrees
            )));
        }
        if let WatermarkContent::Text(mark) = &self.content {
            check_font_size(mark.font_size)?;
        }
        Ok(())
    }

    /// Set the opacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] unless `opacity` is in `[0, 1]`.
    pub fn set_opacity(&mut self, opacity: f32) -> Result<()> {
        check_opacity(opacity)?;
        self.opacity = opacity;
        Ok(())
    }

    /// Set the rotation; any finite angle is accepted and normalized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for NaN or infinite angles.
    pub fn set_rotation(&mut self, degrees: f32) -> Result<()> {
        if !degrees.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "rotation must be finite, got {degrees}"
            )));
        }
        self.rotation_degrees = normalize_rotation(degrees);
        Ok(())
    }

    /// Set the scale relative to the watermark's intrinsic width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] unless `percent` is finite and positive.
    pub fn set_scale_percent(&mut self, percent: f32) -> Result<()> {
        check_scale(percent)?;
        self.scale_percent = percent;
        Ok(())
    }

    /// Set the font size of a text watermark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero size or an image watermark.
    pub fn set_font_size(&mut self, size: u32) -> Result<()> {
        check_font_size(size)?;
        match &mut self.content {
            WatermarkContent::Text(mark) => {
                mark.font_size = size;
                Ok(())
            }
            WatermarkContent::Image(_) => Err(Error::InvalidConfig(
                "font size only applies to text watermarks".to_string(),
            )),
        }
    }

    /// Select an anchor. Any accumulated drag offset is discarded.
    pub fn select_position(&mut self, position: PositionPreset) {
        self.position = position;
        self.offset = Offset::ZERO;
    }

    /// Accumulate one drag gesture into the offset.
    pub fn drag(&mut self, dx: i32, dy: i32) {
        self.offset.dx = self.offset.dx.saturating_add(dx);
        self.offset.dy = self.offset.dy.saturating_add(dy);
    }
}

fn check_opacity(opacity: f32) -> Result<()> {
    if (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "opacity must be between 0 and 1, got {opacity}"
        )))
    }
}

fn check_scale(percent: f32) -> Result<()> {
    if percent.is_finite() && percent > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "scale must be a positive percentage, got {percent}"
        )))
    }
}

fn check_font_size(size: u32) -> Result<()> {
    if size == 0 {
        Err(Error::InvalidConfig("font size must be positive".to_string()))
    } else {
        Ok(())
    }
}

/// How output files are named.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "lowercase")]
pub enum NamingRule {
    /// Keep the source file stem.
    #[default]
    Original,
    /// Prepend a string to the stem.
    Prefix(String),
    /// Append a string to the stem.
    Suffix(String),
}

impl FromStr for NamingRule {
    type Err = Error;

    /// Parses `original`, `prefix:<text>` or `suffix:<text>`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("original") => Ok(Self::Original),
            Some((rule, value)) if rule.eq_ignore_ascii_case("prefix") => {
                Ok(Self::Prefix(value.to_string()))
            }
            Some((rule, value)) if rule.eq_ignore_ascii_case("suffix") => {
                Ok(Self::Suffix(value.to_string()))
            }
            _ => Err(Error::InvalidConfig(format!("unknown naming rule: {s}"))),
        }
    }
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG with alpha.
    #[default]
    Png,
    /// Lossy JPEG; alpha is flattened onto white.
    Jpeg {
        /// Encoder quality, 1-100.
        quality: u8,
    },
}

impl OutputFormat {
    /// File extension written for this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg { .. } => "jpg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    /// Parses `png`, `jpeg` or `jpeg:<quality>`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, quality) = match s.split_once(':') {
            Some((name, q)) => (name, Some(q)),
            None => (s, None),
        };
        match (name.to_ascii_lowercase().as_str(), quality) {
            ("png", None) => Ok(Self::Png),
            ("jpeg" | "jpg", None) => Ok(Self::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            }),
            ("jpeg" | "jpg", Some(q)) => {
                let quality = q
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid JPEG quality: {q}")))?;
                Ok(Self::Jpeg { quality })
            }
            _ => Err(Error::InvalidConfig(format!("unknown output format: {s}"))),
        }
    }
}

/// JPEG quality used when none is given.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Optional resize of the composited output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum Resize {
    /// Keep the source resolution.
    #[default]
    None,
    /// Fit to this width, preserving aspect ratio.
    Width(u32),
    /// Fit to this height, preserving aspect ratio.
    Height(u32),
    /// Scale both dimensions by this percentage.
    Percent(f32),
}

impl FromStr for Resize {
    type Err = Error;

    /// Parses `none`, `width:<px>`, `height:<px>` or `percent:<p>`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("invalid resize: {s}"));
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::None);
        }
        let (mode, value) = s.split_once(':').ok_or_else(invalid)?;
        match mode.to_ascii_lowercase().as_str() {
            "width" => value.parse().map(Self::Width).map_err(|_| invalid()),
            "height" => value.parse().map(Self::Height).map_err(|_| invalid()),
            "percent" => value.parse().map(Self::Percent).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Where and how a batch is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Destination directory; must differ from every source directory.
    pub output_dir: PathBuf,
    /// File naming rule.
    pub naming: NamingRule,
    /// Output encoding.
    pub format: OutputFormat,
    /// Optional output resize.
    #[serde(default)]
    pub resize: Resize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("watermarked"),
            naming: NamingRule::Suffix("_watermarked".to_string()),
            format: OutputFormat::Png,
            resize: Resize::None,
        }
    }
}

impl ExportConfig {
    /// Check every invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("output directory is empty".to_string()));
        }
        if let OutputFormat::Jpeg { quality } = self.format {
            if !(1..=100).contains(&quality) {
                return Err(Error::InvalidConfig(format!(
                    "JPEG quality must be 1-100, got {quality}"
                )));
            }
        }
        match self.resize {
            Resize::Width(0) | Resize::Height(0) => Err(Error::InvalidConfig(
                "resize dimension must be positive".to_string(),
            )),
            Resize::Percent(p) if !(p.is_finite() && p > 0.0) => Err(Error::InvalidConfig(
                format!("resize percentage must be positive, got {p}"),
            )),
            _ => Ok(()),
        }
    }
}

/// A watermark paired with export settings: the payload of a template and of
/// the last-session record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Watermark layer.
    pub watermark: WatermarkConfig,
    /// Export rules.
    pub export: ExportConfig,
}

impl Settings {
    /// Validate both halves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        self.watermark.validate()?;
        self.export.validate()
    }
}
