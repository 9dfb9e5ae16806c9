//! Keystore settings
//!
//! Non-sensitive configuration in a plain JSON file: how expensive a
//! passphrase envelope may be to open and how long generated passphrases
//! should be.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::envelope::passphrase::{DEFAULT_MAX_WORK_FACTOR, WORK_FACTOR_CEILING};
use crate::error::{KeystoreError, Result};
use crate::passphrase::DEFAULT_GENERATED_WORDS;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_WALLET_FILE: &str = "wallet.json";

/// Keystore settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settings file version
    pub version: u32,
    /// Highest scrypt work factor (log2 N) accepted when opening
    pub max_work_factor: u8,
    /// Number of words in an auto-generated passphrase
    pub generated_passphrase_words: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            max_work_factor: DEFAULT_MAX_WORK_FACTOR,
            generated_passphrase_words: DEFAULT_GENERATED_WORDS,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=WORK_FACTOR_CEILING).contains(&self.max_work_factor) {
            return Err(KeystoreError::parse(format!(
                "maxWorkFactor must be between 1 and {}",
                WORK_FACTOR_CEILING
            )));
        }
        Ok(())
    }
}

/// Per-user data directory, e.g. `~/.local/share/sealed-keystore`
pub fn default_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("org", "sealed-keystore", "sealed-keystore")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            KeystoreError::NotFound("could not determine a data directory".to_string())
        })
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Load `settings.json` from `dir`, falling back to defaults when absent
    pub fn load(dir: &Path) -> Result<Self> {
        let settings_file = dir.join(SETTINGS_FILE);
        let settings = Self::load_from_file(&settings_file)?;

        Ok(Self {
            settings_file,
            settings,
        })
    }

    fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| KeystoreError::parse(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;

        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| KeystoreError::parse(e.to_string()))?;

        if let Some(dir) = self.settings_file.parent() {
            std::fs::create_dir_all(dir)?;
        }

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        std::fs::write(&temp_path, &contents)?;
        std::fs::rename(&temp_path, &self.settings_file)?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_file
    }
}
