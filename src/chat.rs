use log::{debug, error, info};
use std::sync::Arc;

use crate::affection::adjust_affection;
use crate::db::{CharacterProfile, ChatMessage, Database, DeleteType, MessageStatus};
use crate::error::{Error, Result};
use crate::providers::{self, ProviderConfig, StreamEvent, WireMessage};
use crate::settings::{SettingsStore, UserProfile};

// ============================================
// Chat Engine
// ============================================

/// Drives a full conversation turn: persist the outgoing message, run the
/// affection engine, synthesize the prompt, call the provider, persist the
/// reply. All state lives in the injected stores.
pub struct ChatEngine {
    db: Arc<Database>,
    settings: Arc<SettingsStore>,
}

impl ChatEngine {
    pub fn new(db: Arc<Database>, settings: Arc<SettingsStore>) -> Self {
        Self { db, settings }
    }

    /// Send a user message and return the character's persisted reply.
    ///
    /// The character is resolved first (the message FK demands it), then the
    /// outgoing message is written in SENDING state before anything else can
    /// fail, so the conversation always shows it. Any failure after that
    /// point marks the row ERROR with a human-readable reason and surfaces
    /// the same error to the caller.
    pub async fn send_message(&self, character_id: i64, text: &str) -> Result<ChatMessage> {
        let character = self.resolve_character(character_id)?;

        let mut outgoing = ChatMessage::new(character_id, text, true);
        outgoing.status = MessageStatus::Sending;
        outgoing.id = self.db.insert_message(&outgoing)?;
        debug!("message {} queued for character {character_id}", outgoing.id);

        self.run_dispatch(character, outgoing).await
    }

    /// Retry a failed message with its original text. Only user messages in
    /// ERROR are resendable; the row flips back to SENDING and the error is
    /// cleared before the new attempt.
    pub async fn resend_message(&self, message_id: i64) -> Result<ChatMessage> {
        let mut message = self
            .db
            .get_message(message_id)?
            .ok_or(Error::NotFound("message"))?;
        if !message.is_from_user || message.status != MessageStatus::Error {
            return Err(Error::NotFound("failed message"));
        }
        let character = self.resolve_character(message.character_id)?;
        message.status = MessageStatus::Sending;
        message.error_message = None;
        self.db.update_message(&message)?;

        self.run_dispatch(character, message).await
    }

    /// Run the dispatch under a cancellation guard. If the owning future is
    /// dropped mid-send, the guard's `Drop` still moves the row to a
    /// terminal ERROR state; ordinary exits disarm it and record the real
    /// outcome instead.
    async fn run_dispatch(
        &self,
        character: CharacterProfile,
        mut outgoing: ChatMessage,
    ) -> Result<ChatMessage> {
        let mut guard = CancelGuard::new(self.db.clone(), outgoing.id);
        let result = self.dispatch(character, &mut outgoing).await;
        guard.disarm();

        match result {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.mark_failed(&mut outgoing, &err);
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        mut character: CharacterProfile,
        outgoing: &mut ChatMessage,
    ) -> Result<ChatMessage> {
        let config = ProviderConfig::from_settings(&self.settings.api_settings())?;

        outgoing.status = MessageStatus::Sent;
        self.db.update_message(outgoing)?;

        // The user's words move the relationship before the reply exists.
        let update = adjust_affection(&character, &outgoing.text, true);
        character.affection_level = update.affection_level;
        character.mood = update.mood;
        self.db.update_character(&character)?;

        let wire = self.wire_history(&character)?;
        let reply_text = self.request_completion(&config, &wire).await?;
        if reply_text.trim().is_empty() {
            return Err(Error::Api {
                status: 200,
                body: "empty completion".to_string(),
            });
        }

        self.commit_reply(character.id, &reply_text)
    }

    /// Persist a completed character reply and run the affection engine over
    /// it at character weight. Split out from the send path so a reply can be
    /// committed regardless of how its text arrived.
    pub fn commit_reply(&self, character_id: i64, text: &str) -> Result<ChatMessage> {
        let mut character = self
            .db
            .get_character(character_id)?
            .ok_or(Error::NotFound("character"))?;

        let mut reply = ChatMessage::new(character_id, text, false);
        reply.status = MessageStatus::Received;
        reply.id = self.db.insert_message(&reply)?;

        let update = adjust_affection(&character, text, false);
        character.affection_level = update.affection_level;
        character.mood = update.mood;
        self.db.update_character(&character)?;

        Ok(reply)
    }

    /// The relational store wins; the legacy preference blob is only
    /// consulted for profiles that never made it through migration, and a
    /// hit is promoted into the store on the spot.
    fn resolve_character(&self, character_id: i64) -> Result<CharacterProfile> {
        if let Some(character) = self.db.get_character(character_id)? {
            return Ok(character);
        }
        if let Some(legacy) = self
            .settings
            .legacy_characters()
            .into_iter()
            .find(|p| p.id == character_id)
        {
            info!("promoting legacy profile '{}' into the store", legacy.name);
            self.db.insert_character(&legacy)?;
            return Ok(legacy);
        }
        Err(Error::NotFound("character"))
    }

    fn wire_history(&self, character: &CharacterProfile) -> Result<Vec<WireMessage>> {
        let system = synthesize_system_prompt(character, &self.settings.user_profile());
        let mut wire = vec![WireMessage::system(system)];

        for message in self.db.messages_for_character(character.id)? {
            // Failed sends and deleted messages never reach the model.
            if message.status == MessageStatus::Error || !message.delete_type.is_visible() {
                continue;
            }
            if message.text.trim().is_empty() {
                continue;
            }
            wire.push(if message.is_from_user {
                WireMessage::user(message.text, message.timestamp)
            } else {
                WireMessage::assistant(message.text, message.timestamp)
            });
        }
        Ok(wire)
    }

    async fn request_completion(
        &self,
        config: &ProviderConfig,
        wire: &[WireMessage],
    ) -> Result<String> {
        if !config.supports_streaming() {
            return providers::send_chat_request(config, wire).await;
        }

        let mut accumulated = String::new();
        let mut stream_error: Option<String> = None;
        providers::stream_chat(config, wire, |event| match event {
            StreamEvent::Delta { content } => accumulated.push_str(&content),
            StreamEvent::Error { message } => stream_error = Some(message),
            StreamEvent::Started { .. } | StreamEvent::Done => {}
        })
        .await?;

        match stream_error {
            Some(message) => Err(Error::Network(message)),
            None => Ok(accumulated),
        }
    }

    fn mark_failed(&self, message: &mut ChatMessage, err: &Error) {
        message.status = MessageStatus::Error;
        let reason = err.to_string();
        message.error_message = Some(if reason.is_empty() {
            "send failed".to_string()
        } else {
            reason
        });
        // Best effort: the original error is what the caller needs to see.
        if let Err(db_err) = self.db.update_message(message) {
            error!(
                "could not record failure on message {}: {db_err}",
                message.id
            );
        }
    }

    // ============================================
    // Message maintenance
    // ============================================

    /// Rewrite a message's text, stamping it as edited. Affection state is
    /// untouched; only live conversation moves the relationship.
    pub fn edit_message(&self, message_id: i64, new_text: &str) -> Result<ChatMessage> {
        let mut message = self
            .db
            .get_message(message_id)?
            .ok_or(Error::NotFound("message"))?;
        message.text = new_text.to_string();
        message.edited = true;
        message.edit_timestamp = Some(chrono::Utc::now().timestamp_millis());
        self.db.update_message(&message)?;
        Ok(message)
    }

    /// Hide a message from this user's view only.
    pub fn delete_for_user(&self, message_id: i64) -> Result<ChatMessage> {
        self.set_delete_state(message_id, DeleteType::UserOnly)
    }

    /// Hide a message from the whole conversation.
    pub fn delete_for_everyone(&self, message_id: i64) -> Result<ChatMessage> {
        self.set_delete_state(message_id, DeleteType::ForEveryone)
    }

    /// Restore a soft-deleted message.
    pub fn undo_delete(&self, message_id: i64) -> Result<ChatMessage> {
        self.set_delete_state(message_id, DeleteType::Undone)
    }

    fn set_delete_state(&self, message_id: i64, delete_type: DeleteType) -> Result<ChatMessage> {
        let mut message = self
            .db
            .get_message(message_id)?
            .ok_or(Error::NotFound("message"))?;
        message.delete_type = delete_type;
        message.delete_timestamp = match delete_type {
            DeleteType::Undone | DeleteType::None => None,
            _ => Some(chrono::Utc::now().timestamp_millis()),
        };
        self.db.update_message(&message)?;
        Ok(message)
    }

    /// Mark every character message in a conversation as read.
    pub fn mark_conversation_read(&self, character_id: i64) -> Result<()> {
        self.db.mark_all_read(character_id)
    }

    /// Model ids available behind the configured endpoint.
    pub async fn available_models(&self) -> Result<Vec<String>> {
        let config = ProviderConfig::from_settings(&self.settings.api_settings())?;
        providers::list_models(&config).await
    }
}

/// Last line of defense for a send future that is aborted at an await
/// point: no message may stay parked in SENDING or SENT forever.
struct CancelGuard {
    db: Arc<Database>,
    message_id: i64,
    armed: bool,
}

impl CancelGuard {
    fn new(db: Arc<Database>, message_id: i64) -> Self {
        Self {
            db,
            message_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let marked = self.db.get_message(self.message_id).and_then(|found| {
            match found {
                Some(mut message)
                    if matches!(
                        message.status,
                        MessageStatus::Sending | MessageStatus::Sent
                    ) =>
                {
                    message.status = MessageStatus::Error;
                    message.error_message = Some("send cancelled".to_string());
                    self.db.update_message(&message)
                }
                _ => Ok(()),
            }
        });
        if let Err(err) = marked {
            error!(
                "could not mark cancelled message {}: {err}",
                self.message_id
            );
        }
    }
}

// ============================================
// System Prompt Synthesis
// ============================================

/// Fold the character sheet, the live relationship state and the user's own
/// profile into one system prompt. Empty fields produce no line at all.
pub fn synthesize_system_prompt(character: &CharacterProfile, user: &UserProfile) -> String {
    let mut prompt = String::new();

    if character.name.is_empty() {
        prompt.push_str("You are a chat companion.");
    } else {
        prompt.push_str(&format!("You are {}.", character.name));
    }
    if !character.system_prompt.is_empty() {
        prompt.push(' ');
        prompt.push_str(&character.system_prompt);
    }
    prompt.push('\n');

    if !character.personality_tags.is_empty() {
        prompt.push_str(&format!(
            "\nPersonality traits: {}.",
            character.personality_tags.join(", ")
        ));
    }
    if !character.interest_tags.is_empty() {
        prompt.push_str(&format!(
            "\nInterests: {}.",
            character.interest_tags.join(", ")
        ));
    }
    if !character.dealbreaker_tags.is_empty() {
        prompt.push_str(&format!(
            "\nDislikes: {}.",
            character.dealbreaker_tags.join(", ")
        ));
    }

    prompt.push_str(&format!("\nCurrent mood: {}.", character.mood));
    prompt.push_str(&format!(
        "\nRelationship to the user: {}.",
        character.relationship_context.as_str()
    ));
    if !character.relationship_history.is_empty() {
        prompt.push_str(&format!(
            "\nRelationship history: {}",
            character.relationship_history
        ));
    }

    if !user.name.is_empty() {
        prompt.push_str(&format!("\n\nYou are talking to {}.", user.name));
        if !user.personality_tags.is_empty() {
            prompt.push_str(&format!(" They are {}.", user.personality_tags.join(", ")));
        }
    }

    prompt.push_str("\n\nStay in character. Reply as a text message, short and natural.");
    prompt
}

// ============================================
// Tests
// ============================================
