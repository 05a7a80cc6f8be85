use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deus_shared::theme::Theme;
use serde::{Deserialize, Serialize};

/// Per-machine settings that survive restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub theme: Theme,
    pub autosave_enabled: bool,
    /// Page to reopen on the next start.
    pub last_slug: Option<String>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            autosave_enabled: true,
            last_slug: None,
        }
    }
}

impl UserPreferences {
    fn prefs_path() -> Result<PathBuf> {
        Ok(super::config_dir()?.join("preferences.json"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::prefs_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::prefs_path()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).context("Could not read preferences file")?;
        serde_json::from_str(&contents).context("Could not parse preferences file")
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).context("Could not serialize preferences")?;
        fs::write(path, contents).context("Could not write preferences file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = UserPreferences::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(prefs, UserPreferences::default());
        assert!(prefs.autosave_enabled);
        assert_eq!(prefs.theme, Theme::Dark);
    }

    #[test]
    fn saved_preferences_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let prefs = UserPreferences {
            theme: Theme::Light,
            autosave_enabled: false,
            last_slug: Some("onboarding".to_string()),
        };
        prefs.save_to(&path).unwrap();
        assert_eq!(UserPreferences::load_from(&path).unwrap(), prefs);
    }

    #[test]
    fn older_files_fill_in_new_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, r#"{"theme":"light"}"#).unwrap();
        let prefs = UserPreferences::load_from(&path).unwrap();
        assert_eq!(prefs.theme, Theme::Light);
        assert!(prefs.autosave_enabled);
    }
}
