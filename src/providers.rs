use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::settings::ApiSettings;

// ============================================
// Wire Types
// ============================================

/// One turn of an OpenAI-compatible conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            timestamp: Some(timestamp),
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    #[serde(rename = "started")]
    Started { message_id: String },
    #[serde(rename = "delta")]
    Delta { content: String },
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error { message: String },
}

// ============================================
// Provider Configuration
// ============================================

/// Connection settings for one chat-completion call.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    /// Build from the active settings; incomplete settings are rejected
    /// before any I/O happens.
    pub fn from_settings(settings: &ApiSettings) -> Result<Self> {
        if settings.api_url.is_empty() {
            return Err(Error::ConfigurationMissing("API URL"));
        }
        if settings.api_key.is_empty() {
            return Err(Error::ConfigurationMissing("API key"));
        }
        if settings.model_id.is_empty() {
            return Err(Error::ConfigurationMissing("model id"));
        }
        Ok(Self {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model_id.clone(),
        })
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_endpoint(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// Heuristic from the legacy client: stream when the endpoint is known
    /// to support SSE.
    pub fn supports_streaming(&self) -> bool {
        let url = self.base_url.to_lowercase();
        url.contains("openai") || url.contains("stream")
    }
}

// ============================================
// Request / Response Types
// ============================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

// Non-streaming responses carry `message`; stream chunks carry `delta`.
#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceContent>,
    delta: Option<ChoiceContent>,
}

#[derive(Deserialize)]
struct ChoiceContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

// ============================================
// Non-streaming Chat Completion
// ============================================

/// Single request, single completed response.
pub async fn send_chat_request(
    config: &ProviderConfig,
    messages: &[WireMessage],
) -> Result<String> {
    let client = reqwest::Client::new();
    let body = ChatRequest {
        model: &config.model,
        messages,
        stream: false,
    };

    let response = client
        .post(config.chat_endpoint())
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", config.api_key))
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Api { status, body });
    }

    let resp: ChatResponse = serde_json::from_str(&response.text().await?)?;
    let text = resp
        .choices
        .first()
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.content.clone())
        .unwrap_or_default();
    Ok(text)
}

// ============================================
// Streaming Chat Completion
// ============================================

/// Stream a completion over SSE, reporting deltas through `on_event`.
///
/// Transport and mid-stream failures surface as a `StreamEvent::Error` and a
/// clean return, mirroring the non-fatal semantics of a dropped stream: the
/// caller decides what to persist. `[DONE]` terminates the stream;
/// undecodable interim chunks are skipped.
pub async fn stream_chat(
    config: &ProviderConfig,
    messages: &[WireMessage],
    mut on_event: impl FnMut(StreamEvent),
) -> Result<()> {
    let message_id = uuid::Uuid::new_v4().to_string();
    on_event(StreamEvent::Started { message_id });

    let client = reqwest::Client::new();
    let body = ChatRequest {
        model: &config.model,
        messages,
        stream: true,
    };

    let builder = client
        .post(config.chat_endpoint())
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", config.api_key))
        .json(&body);

    let mut es = EventSource::new(builder).map_err(|e| Error::Network(e.to_string()))?;

    while let Some(event_result) = es.next().await {
        match event_result {
            Ok(Event::Open) => {}
            Ok(Event::Message(msg)) => {
                if msg.data == "[DONE]" {
                    break;
                }

                if let Ok(chunk) = serde_json::from_str::<ChatResponse>(&msg.data) {
                    for choice in &chunk.choices {
                        let delta = choice
                            .delta
                            .as_ref()
                            .or(choice.message.as_ref())
                            .and_then(|c| c.content.as_deref())
                            .unwrap_or_default();
                        if !delta.is_empty() {
                            on_event(StreamEvent::Delta {
                                content: delta.to_string(),
                            });
                        }
                    }
                }
            }
            Err(err) => {
                on_event(StreamEvent::Error {
                    message: format!("Stream error: {}", err),
                });
                es.close();
                return Ok(());
            }
        }
    }

    on_event(StreamEvent::Done);
    Ok(())
}

// ============================================
// Model Listing
// ============================================

/// Fetch the ids of the models available behind the configured endpoint.
/// No fallbacks — if the API call fails, the error is returned directly.
pub async fn list_models(config: &ProviderConfig) -> Result<Vec<String>> {
    let client = reqwest::Client::new();

    let response = client
        .get(config.models_endpoint())
        .header("Authorization", format!("Bearer {}", config.api_key))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Api { status, body });
    }

    let resp: ModelsResponse = serde_json::from_str(&response.text().await?)?;
    let mut models: Vec<String> = resp.data.into_iter().map(|m| m.id).collect();
    models.sort();
    Ok(models)
}

// ============================================
// Tests
// ============================================
