//! Named templates and the last-session record.
//!
//! Both are JSON files read and rewritten wholesale. Writes go to a
//! temporary sibling first and are renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ExportConfig, Settings, WatermarkConfig};
use crate::error::{Error, Result};

/// On-disk layout of the template file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: BTreeMap<String, Settings>,
}

/// Persistent store of named [`Settings`].
///
/// All mutations are serialized through an internal lock and rewrite the
/// whole file. Saving under an existing name replaces it.
pub struct TemplateStore {
    path: PathBuf,
    templates: Mutex<BTreeMap<String, Settings>>,
}

impl TemplateStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file exists but cannot be read, or
    /// [`Error::Persistence`] if it is not a valid template file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let templates = match fs::read_to_string(&path) {
            Ok(json) => {
                let file: TemplateFile =
                    serde_json::from_str(&json).map_err(|source| Error::Persistence {
                        path: path.clone(),
                        source,
                    })?;
                info!(count = file.templates.len(), path = %path.display(), "loaded templates");
                file.templates
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            templates: Mutex::new(templates),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a template, replacing any existing one with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty name or invalid settings,
    /// or an I/O error if the file cannot be written. On error the store is
    /// left unchanged.
    pub fn save(&self, name: &str, watermark: &WatermarkConfig, export: &ExportConfig) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidConfig("template name is empty".to_string()));
        }
        let settings = Settings {
            watermark: watermark.clone(),
            export: export.clone(),
        };
        settings.validate()?;

        let mut templates = self.lock();
        let previous = templates.insert(name.to_string(), settings);
        if let Err(e) = self.persist(&templates) {
            match previous {
                Some(old) => templates.insert(name.to_string(), old),
                None => templates.remove(name),
            };
            return Err(e);
        }
        info!(name, "saved template");
        Ok(())
    }

    /// Template names in sorted order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Load a template's settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateNotFound`] for an unknown name.
    pub fn apply(&self, name: &str) -> Result<Settings> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }

    /// Remove a template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateNotFound`] for an unknown name, or an I/O
    /// error if the file cannot be written.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut templates = self.lock();
        let removed = templates
            .remove(name)
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))?;
        if let Err(e) = self.persist(&templates) {
            templates.insert(name.to_string(), removed);
            return Err(e);
        }
        info!(name, "deleted template");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Settings>> {
        self.templates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, templates: &BTreeMap<String, Settings>) -> Result<()> {
        let file = TemplateFile {
            templates: templates.clone(),
        };
        write_json(&self.path, &file)
    }
}

/// The last-used settings, with a load-edit-persist lifecycle.
///
/// Loaded once at start-up (falling back to defaults when the file is absent
/// or unreadable), edited in place, and written exactly once by
/// [`SessionState::shutdown`].
#[derive(Debug)]
pub struct SessionState {
    path: PathBuf,
    settings: Settings,
}

impl SessionState {
    /// Load the last session from `path`, or defaults.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<Settings>(&json) {
                Ok(settings) => match settings.validate() {
                    Ok(()) => {
                        info!(path = %path.display(), "restored last session");
                        settings
                    }
                    Err(e) => {
                        warn!("ignoring last session {}: {e}", path.display());
                        Settings::default()
                    }
                },
                Err(e) => {
                    warn!("last session file {} is corrupted: {e}", path.display());
                    Settings::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!("could not read last session {}: {e}", path.display());
                Settings::default()
            }
        };
        Self { path, settings }
    }

    /// Start a session with explicit settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current settings, for in-place edits.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Persist the settings and end the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn shutdown(self) -> Result<()> {
        write_json(&self.path, &self.settings)?;
        info!(path = %self.path.display(), "saved session");
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|source| Error::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let partial = path.with_file_name(format!(".{file_name}.partial"));
    fs::write(&partial, json)?;
    if let Err(e) = fs::rename(&partial, path) {
        let _ = fs::remove_file(&partial);
        return Err(e.into());
    }
    Ok(())
}
