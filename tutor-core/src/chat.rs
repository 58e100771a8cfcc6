//! Chat with the remote tutor and the session that records it
//!
//! The remote side is a single opaque call taking the full history and the learner
//! level and returning the reply text. [`ChatSession`] drives one conversation: it
//! validates attachments, substitutes a fallback reply when the call fails,
//! persists every exchange and optionally speaks the reply.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::attachments::validate_image;
use crate::config::TutorConfig;
use crate::conversations::ConversationStore;
use crate::error::{Error, Result};
use crate::settings::SettingsStore;
use crate::speech::PlaybackController;
use crate::types::{Conversation, ConversationId, NewConversation, Turn};

/// Reply recorded when the tutor could not be reached
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process that. Please try again.";

/// Prompt sent in place of empty text when only an image is attached
pub const IMAGE_ONLY_PROMPT: &str = "¿Qué ves en esta imagen?";

pub const DEFAULT_LEVEL: &str = "beginner";

/// Supplies the signed-in user's identity token
#[async_trait]
pub trait IdTokenSource: Send + Sync {
    /// `None` when nobody is signed in; requests are then sent unauthenticated
    async fn id_token(&self) -> Result<Option<String>>;
}

/// A fixed token, or none
pub struct StaticIdToken(Option<String>);

impl StaticIdToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdTokenSource for StaticIdToken {
    async fn id_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// The remote tutor
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send the whole conversation so far and return the tutor's reply
    async fn send(&self, history: &[Turn], level: &str) -> Result<String>;
}

/// Tutor reached over the backend's `/api/chat` endpoint
pub struct HttpChatProvider {
    client: Client,
    base_url: String,
    tokens: Arc<dyn IdTokenSource>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [Turn],
    level: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: String,
}

impl HttpChatProvider {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn IdTokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn from_config(config: &TutorConfig, tokens: Arc<dyn IdTokenSource>) -> Self {
        Self::new(&config.api_base_url, tokens)
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn name(&self) -> &'static str {
        "Tutor API"
    }

    async fn send(&self, history: &[Turn], level: &str) -> Result<String> {
        let body = ChatRequest {
            messages: history,
            level,
        };

        let mut request = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(token) = self.tokens.id_token().await? {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        debug!("Sending {} turn(s) to the tutor", history.len());

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Chat API error: {} - {}", status, error_text);
            let detail = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.detail)
                .unwrap_or_else(|_| format!("{} - {}", status, error_text));
            return Err(Error::Chat(detail));
        }

        let chat_response: ChatResponse = response.json().await?;
        Ok(chat_response.reply)
    }
}

/// One conversation between the learner and the tutor
pub struct ChatSession {
    owner_id: String,
    level: String,
    provider: Arc<dyn ChatProvider>,
    store: Arc<dyn ConversationStore>,
    settings: Arc<SettingsStore>,
    playback: Option<Arc<PlaybackController>>,
    conversation: Mutex<Option<Conversation>>,
}

impl ChatSession {
    pub fn new(
        owner_id: impl Into<String>,
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn ConversationStore>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            level: DEFAULT_LEVEL.to_string(),
            provider,
            store,
            settings,
            playback: None,
            conversation: Mutex::new(None),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Speak replies through `playback` when auto-play is on
    pub fn with_playback(mut self, playback: Arc<PlaybackController>) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Continue a previously stored conversation
    pub fn resume(self, conversation: Conversation) -> Self {
        Self {
            conversation: Mutex::new(Some(conversation)),
            ..self
        }
    }

    pub async fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation.lock().await.as_ref().map(|c| c.id)
    }

    pub async fn turns(&self) -> Vec<Turn> {
        self.conversation
            .lock()
            .await
            .as_ref()
            .map(|c| c.turns.clone())
            .unwrap_or_default()
    }

    /// Start over; the next message opens a new stored conversation
    pub async fn reset(&self) {
        *self.conversation.lock().await = None;
    }

    /// Send a message, optionally with an image data URL, and return the reply turn
    ///
    /// Returns `Ok(None)` without doing anything when there is neither text nor an
    /// image, or while a previous message is still being answered. A failed call to
    /// the tutor is not an error: the fallback reply is recorded instead. Storage
    /// failures are.
    pub async fn send(&self, text: &str, image: Option<&str>) -> Result<Option<Turn>> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Ok(None);
        }
        if let Some(image) = image {
            validate_image(image)?;
        }

        let Ok(mut conversation) = self.conversation.try_lock() else {
            debug!("Message already in flight, ignoring send");
            return Ok(None);
        };

        let mut user_turn = Turn::user(if text.is_empty() { IMAGE_ONLY_PROMPT } else { text });
        if let Some(image) = image {
            user_turn = user_turn.with_image(image);
        }

        let mut history = conversation
            .as_ref()
            .map(|c| c.turns.clone())
            .unwrap_or_default();
        history.push(user_turn.clone());

        let (reply, delivered) = match self.provider.send(&history, &self.level).await {
            Ok(reply) => (Turn::model(reply), true),
            Err(e) => {
                warn!("{} failed to reply: {}", self.provider.name(), e);
                (Turn::model(FALLBACK_REPLY), false)
            }
        };

        let stored = match conversation.as_ref() {
            None => {
                let id = self
                    .store
                    .save(NewConversation::new(
                        &self.owner_id,
                        vec![user_turn, reply.clone()],
                    ))
                    .await?;
                info!("Started conversation {}", id);
                self.store.get(id).await?
            }
            Some(existing) => {
                self.store
                    .append_turns(existing.id, vec![user_turn, reply.clone()])
                    .await?
            }
        };
        *conversation = Some(stored);
        drop(conversation);

        if delivered {
            self.auto_play(&reply.text).await;
        }

        Ok(Some(reply))
    }

    async fn auto_play(&self, reply: &str) {
        let Some(playback) = &self.playback else {
            return;
        };
        let settings = self.settings.current();
        if settings.auto_play_tts && settings.voice_enabled {
            if let Err(e) = playback.speak(reply).await {
                warn!("Failed to speak reply: {}", e);
            }
        }
    }
}
