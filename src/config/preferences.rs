use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Dashboard display preferences. Changes via the settings view take effect
/// for the next notification without restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayPreferences {
    pub sound_enabled: bool,
    /// Auto-dismiss delay for live-stack entries; 0 keeps them until dismissed
    pub notification_duration_secs: u64,
    /// Alert tone volume, 0.0..=1.0
    pub alert_volume: f32,
    pub show_history: bool,
    pub show_stop_labels: bool,
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            notification_duration_secs: 0,
            alert_volume: 0.4,
            show_history: true,
            show_stop_labels: true,
        }
    }
}

impl DisplayPreferences {
    /// `None` when entries stay until manually dismissed
    pub fn auto_dismiss(&self) -> Option<Duration> {
        match self.notification_duration_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Volume clamped to the valid range (NaN becomes silence)
    pub fn volume(&self) -> f32 {
        if self.alert_volume.is_nan() {
            return 0.0;
        }
        self.alert_volume.clamp(0.0, 1.0)
    }
}

pub type SharedPreferences = Arc<RwLock<DisplayPreferences>>;

pub fn new_shared_preferences(prefs: DisplayPreferences) -> SharedPreferences {
    Arc::new(RwLock::new(prefs))
}

/// Single JSON document holding the display preferences.
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read preferences. A missing file yields defaults; a malformed one is
    /// logged and also yields defaults.
    pub fn load(&self) -> DisplayPreferences {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved preferences, using defaults");
                return DisplayPreferences::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read preferences");
                return DisplayPreferences::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed preferences, using defaults");
                DisplayPreferences::default()
            }
        }
    }

    /// Write preferences (temp file + rename so a crash never leaves a
    /// half-written document).
    pub fn save(&self, prefs: &DisplayPreferences) -> Result<()> {
        let json = serde_json::to_string_pretty(prefs).context("Failed to encode preferences")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        info!(path = %self.path.display(), "Preferences saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs.json"));
        assert_eq!(store.load(), DisplayPreferences::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs.json"));

        let prefs = DisplayPreferences {
            sound_enabled: false,
            notification_duration_secs: 30,
            ..DisplayPreferences::default()
        };
        store.save(&prefs).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, prefs);
        assert_eq!(loaded.auto_dismiss(), Some(Duration::from_secs(30)));
        assert!(!dir.path().join("prefs.json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{ sound_enabled: nope").unwrap();

        let store = PreferenceStore::new(&path);
        assert_eq!(store.load(), DisplayPreferences::default());
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, r#"{"sound_enabled": false}"#).unwrap();

        let prefs = PreferenceStore::new(&path).load();
        assert!(!prefs.sound_enabled);
        assert_eq!(prefs.auto_dismiss(), None);
        assert!(prefs.show_history);
    }

    #[test]
    fn test_volume_is_clamped() {
        let loud = DisplayPreferences {
            alert_volume: 3.0,
            ..DisplayPreferences::default()
        };
        assert_eq!(loud.volume(), 1.0);

        let broken = DisplayPreferences {
            alert_volume: f32::NAN,
            ..DisplayPreferences::default()
        };
        assert_eq!(broken.volume(), 0.0);
    }
}
