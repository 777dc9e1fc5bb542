//! Platform-appropriate locations for settings files.
//!
//! - Linux: `~/.config/photomark/`
//! - macOS: `~/Library/Application Support/photomark/`
//! - Windows: `%APPDATA%\photomark\`

use std::path::{Path, PathBuf};

/// Template file name inside the config directory.
pub const TEMPLATES_FILE: &str = "templates.json";

/// Last-session file name inside the config directory.
pub const SESSION_FILE: &str = "last_session.json";

/// Default config directory, if the platform has one.
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("photomark"))
}

/// Template file inside `dir`.
#[must_use]
pub fn templates_file(dir: &Path) -> PathBuf {
    dir.join(TEMPLATES_FILE)
}

/// Last-session file inside `dir`.
#[must_use]
pub fn session_file(dir: &Path) -> PathBuf {
    dir.join(SESSION_FILE)
}
