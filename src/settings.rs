use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::CharacterProfile;
use crate::error::Result;

const SETTINGS_FILE: &str = "settings.json";
const PRESETS_FILE: &str = "presets.json";
const LEGACY_PROFILES_FILE: &str = "character_profiles.json";
const USER_PROFILE_FILE: &str = "user_profile.json";

/// The single active API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
}

impl ApiSettings {
    pub fn is_complete(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty() && !self.model_id.is_empty()
    }
}

/// A named, reusable bundle of API connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiPreset {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
}

/// How the user wants the characters to see them. Folded into the
/// synthesized system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub name: String,
    pub personality_tags: Vec<String>,
}

/// Key-value preference store, one JSON file per concern under a data
/// directory. Every read is tolerant: absent or corrupt files decode to
/// defaults so a bad blob can never take the app down.
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store in the platform data directory (`…/confidant`).
    pub fn open_default() -> Result<Self> {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("confidant"))
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read_or_default<T: Default + for<'de> Deserialize<'de>>(&self, file: &str) -> T {
        read_json_or_default(&self.path(file))
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        fs::write(self.path(file), content)?;
        Ok(())
    }

    // ============================================
    // API settings
    // ============================================

    pub fn api_settings(&self) -> ApiSettings {
        self.read_or_default(SETTINGS_FILE)
    }

    pub fn save_api_settings(&self, settings: &ApiSettings) -> Result<()> {
        self.write_json(SETTINGS_FILE, settings)
    }

    // ============================================
    // Presets
    // ============================================

    pub fn presets(&self) -> Vec<ApiPreset> {
        self.read_or_default(PRESETS_FILE)
    }

    /// Upsert by preset name.
    pub fn save_preset(&self, preset: &ApiPreset) -> Result<()> {
        let mut presets = self.presets();
        match presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset.clone(),
            None => presets.push(preset.clone()),
        }
        self.write_json(PRESETS_FILE, &presets)
    }

    pub fn delete_preset(&self, name: &str) -> Result<()> {
        let mut presets = self.presets();
        presets.retain(|p| p.name != name);
        self.write_json(PRESETS_FILE, &presets)
    }

    /// Copy a preset into the active settings. Unknown names are a no-op.
    pub fn load_preset(&self, name: &str) -> Result<()> {
        if let Some(preset) = self.presets().into_iter().find(|p| p.name == name) {
            self.save_api_settings(&ApiSettings {
                api_url: preset.api_url,
                api_key: preset.api_key,
                model_id: preset.model_id,
            })?;
        }
        Ok(())
    }

    // ============================================
    // Legacy character profiles (pre-relational blob)
    // ============================================

    /// Profiles from the era when the whole list lived in one preference
    /// blob. Read-only in normal operation; the migration layer drains it.
    pub fn legacy_characters(&self) -> Vec<CharacterProfile> {
        self.read_or_default(LEGACY_PROFILES_FILE)
    }

    /// Kept for the transitional dual-write and for staging migration tests.
    pub fn save_legacy_characters(&self, profiles: &[CharacterProfile]) -> Result<()> {
        self.write_json(LEGACY_PROFILES_FILE, &profiles)
    }

    // ============================================
    // User profile
    // ============================================

    pub fn user_profile(&self) -> UserProfile {
        self.read_or_default(USER_PROFILE_FILE)
    }

    pub fn save_user_profile(&self, profile: &UserProfile) -> Result<()> {
        self.write_json(USER_PROFILE_FILE, profile)
    }

    // ============================================
    // Clear operations
    // ============================================

    pub fn clear_api_data(&self) -> Result<()> {
        remove_if_present(&self.path(PRESETS_FILE))
    }

    pub fn clear_characters(&self) -> Result<()> {
        remove_if_present(&self.path(LEGACY_PROFILES_FILE))
    }

    pub fn clear_everything(&self) -> Result<()> {
        for file in [
            SETTINGS_FILE,
            PRESETS_FILE,
            LEGACY_PROFILES_FILE,
            USER_PROFILE_FILE,
        ] {
            remove_if_present(&self.path(file))?;
        }
        Ok(())
    }
}

fn read_json_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("ignoring corrupt preference file {}: {err}", path.display());
            T::default()
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn api_settings_default_until_saved() {
        let (_dir, store) = store();
        assert_eq!(store.api_settings(), ApiSettings::default());
        assert!(!store.api_settings().is_complete());

        let settings = ApiSettings {
            api_url: "https://api.openai.com/v1".into(),
            api_key: "sk-test".into(),
            model_id: "gpt-4o-mini".into(),
        };
        store.save_api_settings(&settings).unwrap();
        assert_eq!(store.api_settings(), settings);
        assert!(store.api_settings().is_complete());
    }

    #[test]
    fn preset_upsert_and_load() {
        let (_dir, store) = store();
        let preset = ApiPreset {
            name: "work".into(),
            api_url: "https://example.test/v1".into(),
            api_key: "key-1".into(),
            model_id: "model-a".into(),
        };
        store.save_preset(&preset).unwrap();

        // Same name replaces rather than duplicates.
        let updated = ApiPreset {
            api_key: "key-2".into(),
            ..preset.clone()
        };
        store.save_preset(&updated).unwrap();
        assert_eq!(store.presets().len(), 1);
        assert_eq!(store.presets()[0].api_key, "key-2");

        store.load_preset("work").unwrap();
        assert_eq!(store.api_settings().api_key, "key-2");

        store.delete_preset("work").unwrap();
        assert!(store.presets().is_empty());
    }

    #[test]
    fn corrupt_blob_decodes_to_default() {
        let (dir, store) = store();
        std::fs::write(dir.path().join(LEGACY_PROFILES_FILE), "{not json!").unwrap();
        assert!(store.legacy_characters().is_empty());
    }

    #[test]
    fn legacy_blob_tolerates_missing_fields() {
        let (dir, store) = store();
        // Only a subset of fields, as an old build would have written.
        std::fs::write(
            dir.path().join(LEGACY_PROFILES_FILE),
            r#"[{"id": 7, "name": "Old Friend", "systemPrompt": "You are an old friend."}]"#,
        )
        .unwrap();

        let profiles = store.legacy_characters();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, 7);
        assert_eq!(profiles[0].affection_level, 50.0);
        assert_eq!(profiles[0].mood, "Neutral");
    }

    #[test]
    fn clear_everything_removes_all_files() {
        let (_dir, store) = store();
        store.save_api_settings(&ApiSettings::default()).unwrap();
        store
            .save_user_profile(&UserProfile {
                name: "Sam".into(),
                personality_tags: vec![],
            })
            .unwrap();
        store.clear_everything().unwrap();
        assert_eq!(store.user_profile(), UserProfile::default());
        assert_eq!(store.api_settings(), ApiSettings::default());
        // Clearing twice is fine.
        store.clear_everything().unwrap();
    }
}
