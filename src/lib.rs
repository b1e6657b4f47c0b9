//! Companion-chat core: character profiles with a live affection state, a
//! relational message store, legacy-blob migration and an OpenAI-compatible
//! chat pipeline. The UI layer sits on top of [`Services`].

pub mod affection;
pub mod chat;
pub mod db;
pub mod error;
pub mod migration;
pub mod providers;
pub mod settings;

pub use chat::{synthesize_system_prompt, ChatEngine};
pub use db::{
    CharacterProfile, ChatMessage, Database, DeleteType, MessageStatus, RecentChat, ReplyConfig,
    RelationshipContext,
};
pub use error::{Error, Result};
pub use providers::{ProviderConfig, StreamEvent, WireMessage};
pub use settings::{ApiPreset, ApiSettings, SettingsStore, UserProfile};

use std::path::Path;
use std::sync::Arc;

/// Wired-up application services. Construction runs the schema and legacy
/// migrations and seeds a default profile on first run, so a `Services` in
/// hand means storage is ready to use.
pub struct Services {
    pub db: Arc<Database>,
    pub settings: Arc<SettingsStore>,
    pub chat: ChatEngine,
}

impl Services {
    /// Open everything under one data directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Arc::new(Database::new(&data_dir.join("confidant.db"))?);
        let settings = Arc::new(SettingsStore::new(data_dir)?);
        migration::migrate_legacy_profiles(&settings, &db)?;

        // First run with nothing to migrate: seed the same default profile
        // the legacy store used to create, id 0 and current.
        if db.list_characters()?.is_empty() {
            let default = CharacterProfile {
                name: "Default".to_string(),
                is_current: true,
                ..Default::default()
            };
            db.insert_character_as_is(&default)?;
        }

        let chat = ChatEngine::new(db.clone(), settings.clone());
        Ok(Self { db, settings, chat })
    }

    /// Open in the platform data directory.
    pub fn open_default() -> Result<Self> {
        let base = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        Self::open(&base.join("confidant"))
    }
}
