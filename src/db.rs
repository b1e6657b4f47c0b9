use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};

// ============================================
// Database Models
// ============================================

/// Timing knobs for simulated character replies. Stored as a JSON column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplyConfig {
    /// Base reply delay in milliseconds.
    pub base_delay: i64,
    /// Hour-of-day window (start, end) during which the character is online.
    pub online_hours: (u8, u8),
    /// Fractional randomness applied to the base delay.
    pub variance: f64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            base_delay: 30_000,
            online_hours: (9, 21),
            variance: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipContext {
    #[default]
    Strangers,
    Friends,
    BestFriends,
    Family,
    Coworkers,
    Enemies,
    Rivals,
    LoveInterest,
    Partner,
    Ex,
}

impl RelationshipContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipContext::Strangers => "STRANGERS",
            RelationshipContext::Friends => "FRIENDS",
            RelationshipContext::BestFriends => "BEST_FRIENDS",
            RelationshipContext::Family => "FAMILY",
            RelationshipContext::Coworkers => "COWORKERS",
            RelationshipContext::Enemies => "ENEMIES",
            RelationshipContext::Rivals => "RIVALS",
            RelationshipContext::LoveInterest => "LOVE_INTEREST",
            RelationshipContext::Partner => "PARTNER",
            RelationshipContext::Ex => "EX",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "FRIENDS" => RelationshipContext::Friends,
            "BEST_FRIENDS" => RelationshipContext::BestFriends,
            "FAMILY" => RelationshipContext::Family,
            "COWORKERS" => RelationshipContext::Coworkers,
            "ENEMIES" => RelationshipContext::Enemies,
            "RIVALS" => RelationshipContext::Rivals,
            "LOVE_INTEREST" => RelationshipContext::LoveInterest,
            "PARTNER" => RelationshipContext::Partner,
            "EX" => RelationshipContext::Ex,
            _ => RelationshipContext::Strangers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Received,
    Read,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Received => "RECEIVED",
            MessageStatus::Read => "READ",
            MessageStatus::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "SENDING" => MessageStatus::Sending,
            "DELIVERED" => MessageStatus::Delivered,
            "RECEIVED" => MessageStatus::Received,
            "READ" => MessageStatus::Read,
            "ERROR" => MessageStatus::Error,
            _ => MessageStatus::Sent,
        }
    }
}

/// Soft-delete marker. Messages are never physically removed on delete;
/// visibility is derived from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteType {
    #[default]
    None,
    UserOnly,
    ForEveryone,
    CharacterDeleted,
    Undone,
}

impl DeleteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteType::None => "NONE",
            DeleteType::UserOnly => "USER_ONLY",
            DeleteType::ForEveryone => "FOR_EVERYONE",
            DeleteType::CharacterDeleted => "CHARACTER_DELETED",
            DeleteType::Undone => "UNDONE",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "USER_ONLY" => DeleteType::UserOnly,
            "FOR_EVERYONE" => DeleteType::ForEveryone,
            "CHARACTER_DELETED" => DeleteType::CharacterDeleted,
            "UNDONE" => DeleteType::Undone,
            _ => DeleteType::None,
        }
    }

    /// Whether a message carrying this tag still shows up in conversation
    /// queries. `Undone` restores visibility.
    pub fn is_visible(&self) -> bool {
        matches!(self, DeleteType::None | DeleteType::Undone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterProfile {
    /// Stable identity. `0` means "not yet assigned"; insert picks a
    /// creation-time id.
    pub id: i64,
    pub name: String,
    pub phone_number: String,
    pub system_prompt: String,
    pub personality_tags: Vec<String>,
    pub interest_tags: Vec<String>,
    pub dealbreaker_tags: Vec<String>,
    pub affection_level: f64,
    pub mood: String,
    pub reply_config: ReplyConfig,
    pub avatar_uri: Option<String>,
    pub is_current: bool,
    pub is_online: bool,
    pub relationship_context: RelationshipContext,
    pub relationship_history: String,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            phone_number: String::new(),
            system_prompt: String::new(),
            personality_tags: Vec::new(),
            interest_tags: Vec::new(),
            dealbreaker_tags: Vec::new(),
            affection_level: 50.0,
            mood: "Neutral".to_string(),
            reply_config: ReplyConfig::default(),
            avatar_uri: None,
            is_current: false,
            is_online: false,
            relationship_context: RelationshipContext::Strangers,
            relationship_history: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub character_id: i64,
    pub timestamp: i64,
    pub text: String,
    pub is_from_user: bool,
    pub status: MessageStatus,
    pub error_message: Option<String>,
    pub edited: bool,
    pub edit_timestamp: Option<i64>,
    pub delete_type: DeleteType,
    pub delete_timestamp: Option<i64>,
}

impl ChatMessage {
    /// A fresh outgoing or incoming message with no id assigned yet.
    pub fn new(character_id: i64, text: impl Into<String>, is_from_user: bool) -> Self {
        Self {
            id: 0,
            character_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            text: text.into(),
            is_from_user,
            status: MessageStatus::Sent,
            error_message: None,
            edited: false,
            edit_timestamp: None,
            delete_type: DeleteType::None,
            delete_timestamp: None,
        }
    }
}

/// Latest message of a conversation together with the character's display
/// fields, for the recent-chats view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChat {
    pub message: ChatMessage,
    pub character_name: String,
    pub character_avatar: Option<String>,
}

// ============================================
// Column codecs
// ============================================

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn decode_tags(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn encode_reply_config(config: &ReplyConfig) -> String {
    serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string())
}

fn decode_reply_config(json: &str) -> ReplyConfig {
    serde_json::from_str(json).unwrap_or_default()
}

// ============================================
// Database Manager
// ============================================

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS character_profiles (
                id                   INTEGER PRIMARY KEY,
                name                 TEXT NOT NULL,
                phoneNumber          TEXT NOT NULL DEFAULT '',
                systemPrompt         TEXT NOT NULL DEFAULT '',
                personalityTags      TEXT NOT NULL DEFAULT '[]',
                interestTags         TEXT NOT NULL DEFAULT '[]',
                dealbreakerTags      TEXT NOT NULL DEFAULT '[]',
                affectionLevel       REAL NOT NULL DEFAULT 50.0,
                mood                 TEXT NOT NULL DEFAULT 'Neutral',
                replyConfig          TEXT NOT NULL DEFAULT '{}',
                avatarUri            TEXT,
                isCurrent            INTEGER NOT NULL DEFAULT 0,
                isOnline             INTEGER NOT NULL DEFAULT 0,
                relationshipContext  TEXT NOT NULL DEFAULT 'STRANGERS',
                relationshipHistory  TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                characterId     INTEGER NOT NULL REFERENCES character_profiles(id) ON DELETE CASCADE,
                timestamp       INTEGER NOT NULL,
                text            TEXT NOT NULL,
                isFromUser      INTEGER NOT NULL,
                status          TEXT NOT NULL DEFAULT 'SENT',
                errorMessage    TEXT,
                edited          INTEGER NOT NULL DEFAULT 0,
                editTimestamp   INTEGER,
                deleteType      TEXT NOT NULL DEFAULT 'NONE',
                deleteTimestamp INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_character_id
                ON chat_messages(characterId, timestamp);

            CREATE INDEX IF NOT EXISTS idx_character_profiles_name
                ON character_profiles(name);
        ",
        )?;

        // --- Column migrations for databases created before the richer
        // message shape (edit + soft-delete metadata) ---
        let has_delete_type: bool = conn
            .prepare("SELECT deleteType FROM chat_messages LIMIT 0")
            .is_ok();
        if !has_delete_type {
            conn.execute_batch(
                "ALTER TABLE chat_messages ADD COLUMN edited INTEGER NOT NULL DEFAULT 0;
                 ALTER TABLE chat_messages ADD COLUMN editTimestamp INTEGER;
                 ALTER TABLE chat_messages ADD COLUMN deleteType TEXT NOT NULL DEFAULT 'NONE';
                 ALTER TABLE chat_messages ADD COLUMN deleteTimestamp INTEGER;",
            )?;
        }

        let has_relationship: bool = conn
            .prepare("SELECT relationshipContext FROM character_profiles LIMIT 0")
            .is_ok();
        if !has_relationship {
            conn.execute_batch(
                "ALTER TABLE character_profiles ADD COLUMN relationshipContext TEXT NOT NULL DEFAULT 'STRANGERS';
                 ALTER TABLE character_profiles ADD COLUMN relationshipHistory TEXT NOT NULL DEFAULT '';",
            )?;
        }

        Ok(())
    }

    // ============================================
    // Character Profile CRUD
    // ============================================

    /// Insert a profile and return its assigned id. A zero id is replaced
    /// with a creation-time id, matching the legacy convention.
    pub fn insert_character(&self, profile: &CharacterProfile) -> Result<i64> {
        let id = if profile.id != 0 {
            profile.id
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        self.insert_character_row(id, profile)
    }

    /// Insert under the exact id the profile carries, zero included. The
    /// legacy blob used 0 as the real identity of its seeded default
    /// profile, and migration must keep that id for its presence check.
    pub fn insert_character_as_is(&self, profile: &CharacterProfile) -> Result<i64> {
        self.insert_character_row(profile.id, profile)
    }

    fn insert_character_row(&self, id: i64, profile: &CharacterProfile) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO character_profiles (id, name, phoneNumber, systemPrompt, personalityTags, interestTags, dealbreakerTags, affectionLevel, mood, replyConfig, avatarUri, isCurrent, isOnline, relationshipContext, relationshipHistory)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                id,
                profile.name,
                profile.phone_number,
                profile.system_prompt,
                encode_tags(&profile.personality_tags),
                encode_tags(&profile.interest_tags),
                encode_tags(&profile.dealbreaker_tags),
                profile.affection_level,
                profile.mood,
                encode_reply_config(&profile.reply_config),
                profile.avatar_uri,
                profile.is_current as i64,
                profile.is_online as i64,
                profile.relationship_context.as_str(),
                profile.relationship_history,
            ],
        )?;
        Ok(id)
    }

    /// Full-record replace. Fails with `NotFound` when the id does not exist.
    pub fn update_character(&self, profile: &CharacterProfile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE character_profiles
             SET name = ?2, phoneNumber = ?3, systemPrompt = ?4, personalityTags = ?5, interestTags = ?6, dealbreakerTags = ?7, affectionLevel = ?8, mood = ?9, replyConfig = ?10, avatarUri = ?11, isCurrent = ?12, isOnline = ?13, relationshipContext = ?14, relationshipHistory = ?15
             WHERE id = ?1",
            params![
                profile.id,
                profile.name,
                profile.phone_number,
                profile.system_prompt,
                encode_tags(&profile.personality_tags),
                encode_tags(&profile.interest_tags),
                encode_tags(&profile.dealbreaker_tags),
                profile.affection_level,
                profile.mood,
                encode_reply_config(&profile.reply_config),
                profile.avatar_uri,
                profile.is_current as i64,
                profile.is_online as i64,
                profile.relationship_context.as_str(),
                profile.relationship_history,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound("character"));
        }
        Ok(())
    }

    /// Delete a profile. Its messages go with it via the cascade FK.
    pub fn delete_character(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM character_profiles WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_character(&self, id: i64) -> Result<Option<CharacterProfile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM character_profiles WHERE id = ?1",
            PROFILE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], map_profile_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_characters(&self) -> Result<Vec<CharacterProfile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM character_profiles ORDER BY name ASC",
            PROFILE_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_profile_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Flip the single current-character flag to `id`. Clear-then-set runs
    /// inside one transaction so no observer ever sees two current profiles.
    pub fn set_current_character(&self, id: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE character_profiles SET isCurrent = 0 WHERE isCurrent = 1",
            [],
        )?;
        let changed = tx.execute(
            "UPDATE character_profiles SET isCurrent = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            // Dropping the uncommitted transaction rolls the clear back, so
            // an unknown id leaves the flags untouched.
            return Err(Error::NotFound("character"));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_current_character(&self) -> Result<Option<CharacterProfile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM character_profiles WHERE isCurrent = 1 LIMIT 1",
            PROFILE_COLUMNS
        ))?;
        let mut rows = stmt.query_map([], map_profile_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ============================================
    // Chat Message CRUD
    // ============================================

    /// Insert a message and return the auto-assigned id.
    pub fn insert_message(&self, message: &ChatMessage) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_messages (characterId, timestamp, text, isFromUser, status, errorMessage, edited, editTimestamp, deleteType, deleteTimestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.character_id,
                message.timestamp,
                message.text,
                message.is_from_user as i64,
                message.status.as_str(),
                message.error_message,
                message.edited as i64,
                message.edit_timestamp,
                message.delete_type.as_str(),
                message.delete_timestamp,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Full-record replace. Fails with `NotFound` when the id does not exist.
    pub fn update_message(&self, message: &ChatMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE chat_messages
             SET characterId = ?2, timestamp = ?3, text = ?4, isFromUser = ?5, status = ?6, errorMessage = ?7, edited = ?8, editTimestamp = ?9, deleteType = ?10, deleteTimestamp = ?11
             WHERE id = ?1",
            params![
                message.id,
                message.character_id,
                message.timestamp,
                message.text,
                message.is_from_user as i64,
                message.status.as_str(),
                message.error_message,
                message.edited as i64,
                message.edit_timestamp,
                message.delete_type.as_str(),
                message.delete_timestamp,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound("message"));
        }
        Ok(())
    }

    pub fn get_message(&self, id: i64) -> Result<Option<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_messages WHERE id = ?1",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], map_message_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Every message of a conversation in chronological order, soft-deleted
    /// rows included. Use `visible_messages_for_character` for display.
    pub fn messages_for_character(&self, character_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_messages WHERE characterId = ?1 ORDER BY timestamp ASC, id ASC",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![character_id], map_message_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Conversation as the user sees it: soft-deleted messages filtered out,
    /// rows still retrievable by id.
    pub fn visible_messages_for_character(&self, character_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_messages
             WHERE characterId = ?1 AND deleteType IN ('NONE', 'UNDONE')
             ORDER BY timestamp ASC, id ASC",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![character_id], map_message_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Latest message per character, newest conversation first.
    pub fn recent_chats(&self) -> Result<Vec<RecentChat>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, cp.name, cp.avatarUri
             FROM chat_messages cm
             INNER JOIN character_profiles cp ON cm.characterId = cp.id
             WHERE cm.id IN (
                 SELECT MAX(id) FROM chat_messages GROUP BY characterId
             )
             ORDER BY cm.timestamp DESC",
            MESSAGE_COLUMNS_QUALIFIED
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(RecentChat {
                message: map_message_row(row)?,
                character_name: row.get(11)?,
                character_avatar: row.get(12)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Character messages the user has not read yet.
    pub fn unread_count(&self, character_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM chat_messages
             WHERE characterId = ?1 AND isFromUser = 0 AND status != 'READ'",
            params![character_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn mark_all_read(&self, character_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chat_messages SET status = 'READ' WHERE characterId = ?1 AND isFromUser = 0",
            params![character_id],
        )?;
        Ok(())
    }

    /// User messages stuck in ERROR, candidates for the resend action.
    pub fn failed_messages(&self) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_messages WHERE status = 'ERROR' AND isFromUser = 1 ORDER BY timestamp ASC",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_message_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Physically remove one message row. Conversations use soft-delete;
    /// this is for maintenance surfaces that really mean it.
    pub fn delete_message_row(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM chat_messages WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(Error::NotFound("message"));
        }
        Ok(())
    }

    /// Bulk clear for one conversation. This is a hard delete.
    pub fn delete_messages_for_character(&self, character_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM chat_messages WHERE characterId = ?1",
            params![character_id],
        )?;
        Ok(())
    }

    /// Global bulk clear. This is a hard delete.
    pub fn delete_all_messages(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM chat_messages", [])?;
        Ok(())
    }
}

const PROFILE_COLUMNS: &str = "id, name, phoneNumber, systemPrompt, personalityTags, interestTags, dealbreakerTags, affectionLevel, mood, replyConfig, avatarUri, isCurrent, isOnline, relationshipContext, relationshipHistory";

const MESSAGE_COLUMNS: &str = "id, characterId, timestamp, text, isFromUser, status, errorMessage, edited, editTimestamp, deleteType, deleteTimestamp";

const MESSAGE_COLUMNS_QUALIFIED: &str = "cm.id, cm.characterId, cm.timestamp, cm.text, cm.isFromUser, cm.status, cm.errorMessage, cm.edited, cm.editTimestamp, cm.deleteType, cm.deleteTimestamp";

fn map_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CharacterProfile> {
    let personality: String = row.get(4)?;
    let interests: String = row.get(5)?;
    let dealbreakers: String = row.get(6)?;
    let reply_config: String = row.get(9)?;
    let context: String = row.get(13)?;
    Ok(CharacterProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        system_prompt: row.get(3)?,
        personality_tags: decode_tags(&personality),
        interest_tags: decode_tags(&interests),
        dealbreaker_tags: decode_tags(&dealbreakers),
        affection_level: row.get(7)?,
        mood: row.get(8)?,
        reply_config: decode_reply_config(&reply_config),
        avatar_uri: row.get(10)?,
        is_current: row.get::<_, i64>(11)? != 0,
        is_online: row.get::<_, i64>(12)? != 0,
        relationship_context: RelationshipContext::parse(&context),
        relationship_history: row.get(14)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let status: String = row.get(5)?;
    let delete_type: String = row.get(9)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        character_id: row.get(1)?,
        timestamp: row.get(2)?,
        text: row.get(3)?,
        is_from_user: row.get::<_, i64>(4)? != 0,
        status: MessageStatus::parse(&status),
        error_message: row.get(6)?,
        edited: row.get::<_, i64>(7)? != 0,
        edit_timestamp: row.get(8)?,
        delete_type: DeleteType::parse(&delete_type),
        delete_timestamp: row.get(10)?,
    })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> CharacterProfile {
        CharacterProfile {
            name: name.to_string(),
            system_prompt: format!("You are {name}."),
            ..Default::default()
        }
    }

    fn message(character_id: i64, text: &str, from_user: bool) -> ChatMessage {
        ChatMessage::new(character_id, text, from_user)
    }

    #[test]
    fn insert_assigns_and_returns_id() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_character(&profile("Mara")).unwrap();
        assert!(id > 0);
        let fetched = db.get_character(id).unwrap().unwrap();
        assert_eq!(fetched.name, "Mara");
        assert_eq!(fetched.affection_level, 50.0);
        assert_eq!(fetched.mood, "Neutral");
        assert_eq!(fetched.reply_config, ReplyConfig::default());
    }

    #[test]
    fn lookup_miss_is_none_not_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_character(12345).unwrap().is_none());
        assert!(db.get_message(12345).unwrap().is_none());
    }

    #[test]
    fn update_unknown_character_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let mut p = profile("Ghost");
        p.id = 99;
        assert!(matches!(db.update_character(&p), Err(Error::NotFound(_))));
    }

    #[test]
    fn tags_and_reply_config_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut p = profile("Iris");
        p.personality_tags = vec!["warm".into(), "sarcastic".into()];
        p.dealbreaker_tags = vec!["rudeness".into()];
        p.reply_config = ReplyConfig {
            base_delay: 5_000,
            online_hours: (8, 23),
            variance: 0.5,
        };
        let id = db.insert_character(&p).unwrap();
        let fetched = db.get_character(id).unwrap().unwrap();
        assert_eq!(fetched.personality_tags, p.personality_tags);
        assert_eq!(fetched.dealbreaker_tags, p.dealbreaker_tags);
        assert_eq!(fetched.reply_config, p.reply_config);
    }

    #[test]
    fn exactly_one_current_character() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_character(&profile("A")).unwrap();
        let mut second = profile("B");
        second.id = a + 1;
        let b = db.insert_character(&second).unwrap();

        db.set_current_character(a).unwrap();
        db.set_current_character(b).unwrap();

        let current: Vec<_> = db
            .list_characters()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_current)
            .collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, b);
        assert_eq!(db.get_current_character().unwrap().unwrap().id, b);
    }

    #[test]
    fn set_current_unknown_id_leaves_flags_untouched() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_character(&profile("A")).unwrap();
        db.set_current_character(a).unwrap();
        assert!(matches!(
            db.set_current_character(a + 777),
            Err(Error::NotFound(_))
        ));
        assert_eq!(db.get_current_character().unwrap().unwrap().id, a);
    }

    #[test]
    fn characters_list_ordered_by_name() {
        let db = Database::open_in_memory().unwrap();
        for (i, name) in ["Zoe", "Ash", "Mira"].iter().enumerate() {
            let mut p = profile(name);
            p.id = (i + 1) as i64;
            db.insert_character(&p).unwrap();
        }
        let names: Vec<_> = db
            .list_characters()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Ash", "Mira", "Zoe"]);
    }

    #[test]
    fn cascade_delete_leaves_no_orphans() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_character(&profile("Cass")).unwrap();
        db.insert_message(&message(id, "hi", true)).unwrap();
        db.insert_message(&message(id, "hello!", false)).unwrap();

        db.delete_character(id).unwrap();
        assert!(db.get_character(id).unwrap().is_none());
        assert!(db.messages_for_character(id).unwrap().is_empty());
        assert!(db.recent_chats().unwrap().is_empty());
    }

    #[test]
    fn soft_delete_hides_but_keeps_row() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_character(&profile("Nia")).unwrap();
        let kept = db.insert_message(&message(id, "keep me", true)).unwrap();
        let gone = db.insert_message(&message(id, "delete me", true)).unwrap();

        let mut m = db.get_message(gone).unwrap().unwrap();
        m.delete_type = DeleteType::ForEveryone;
        m.delete_timestamp = Some(m.timestamp + 1);
        db.update_message(&m).unwrap();

        let visible = db.visible_messages_for_character(id).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, kept);

        // Still retrievable by id and by the unfiltered query.
        assert!(db.get_message(gone).unwrap().is_some());
        assert_eq!(db.messages_for_character(id).unwrap().len(), 2);
    }

    #[test]
    fn undone_delete_restores_visibility() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_character(&profile("Rey")).unwrap();
        let mid = db.insert_message(&message(id, "oops", true)).unwrap();

        let mut m = db.get_message(mid).unwrap().unwrap();
        m.delete_type = DeleteType::ForEveryone;
        db.update_message(&m).unwrap();
        assert!(db.visible_messages_for_character(id).unwrap().is_empty());

        m.delete_type = DeleteType::Undone;
        db.update_message(&m).unwrap();
        assert_eq!(db.visible_messages_for_character(id).unwrap().len(), 1);
    }

    #[test]
    fn unread_counts_character_messages_only() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_character(&profile("Lio")).unwrap();
        db.insert_message(&message(id, "from user", true)).unwrap();
        let mut incoming = message(id, "from character", false);
        incoming.status = MessageStatus::Received;
        db.insert_message(&incoming).unwrap();
        let mut read = message(id, "old one", false);
        read.status = MessageStatus::Read;
        db.insert_message(&read).unwrap();

        assert_eq!(db.unread_count(id).unwrap(), 1);
        db.mark_all_read(id).unwrap();
        assert_eq!(db.unread_count(id).unwrap(), 0);
    }

    #[test]
    fn recent_chats_returns_latest_per_character() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_character(&profile("A")).unwrap();
        let mut second = profile("B");
        second.id = a + 1;
        let b = db.insert_character(&second).unwrap();

        let mut m1 = message(a, "first", true);
        m1.timestamp = 100;
        db.insert_message(&m1).unwrap();
        let mut m2 = message(a, "second", false);
        m2.timestamp = 200;
        db.insert_message(&m2).unwrap();
        let mut m3 = message(b, "solo", true);
        m3.timestamp = 300;
        db.insert_message(&m3).unwrap();

        let recent = db.recent_chats().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message.text, "solo");
        assert_eq!(recent[1].message.text, "second");
        assert_eq!(recent[1].character_name, "A");
    }

    #[test]
    fn bulk_clears_are_hard_deletes() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_character(&profile("A")).unwrap();
        let mut second = profile("B");
        second.id = a + 1;
        let b = db.insert_character(&second).unwrap();
        db.insert_message(&message(a, "one", true)).unwrap();
        db.insert_message(&message(b, "two", false)).unwrap();

        db.delete_messages_for_character(a).unwrap();
        assert!(db.messages_for_character(a).unwrap().is_empty());
        assert_eq!(db.messages_for_character(b).unwrap().len(), 1);

        let solo = db.messages_for_character(b).unwrap()[0].id;
        db.delete_message_row(solo).unwrap();
        assert!(db.get_message(solo).unwrap().is_none());
        assert!(matches!(
            db.delete_message_row(solo),
            Err(Error::NotFound(_))
        ));

        db.insert_message(&message(b, "two again", false)).unwrap();

        db.delete_all_messages().unwrap();
        assert!(db.messages_for_character(b).unwrap().is_empty());
        // Profiles survive a message clear.
        assert_eq!(db.list_characters().unwrap().len(), 2);
    }

    #[test]
    fn failed_messages_lists_user_errors() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_character(&profile("Err")).unwrap();
        let mut failed = message(id, "never sent", true);
        failed.status = MessageStatus::Error;
        failed.error_message = Some("network down".into());
        db.insert_message(&failed).unwrap();
        db.insert_message(&message(id, "fine", true)).unwrap();

        let errors = db.failed_messages().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text, "never sent");
    }
}
