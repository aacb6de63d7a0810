//! Language-model request types and the [`LanguageModel`] trait.
//!
//! Providers (OpenAI-compatible, Gemini) live in the `docchat` app crate.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ServiceError;
use crate::models::{Role, Turn};

/// Inline image sent alongside a message (multimodal models only).
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// `image/png` or `image/jpeg`.
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip)]
    pub images: Vec<ImageAttachment>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.text.clone(),
            images: Vec::new(),
        }
    }
}

/// A single model invocation: system instructions plus ordered messages.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Preferred sampling temperature for this call. A temperature set in
    /// the provider's configuration takes precedence.
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system: system.into(),
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (e.g. `"openai"`, `"gemini"`).
    fn name(&self) -> &str;

    /// Run one chat completion and return the model's text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, ServiceError>;
}
