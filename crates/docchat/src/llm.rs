//! Language-model providers.
//!
//! - **[`OpenAiChat`]**: `POST {url}/v1/chat/completions` on OpenAI or any
//!   compatible server (LM Studio, llama.cpp, vLLM).
//! - **[`GeminiChat`]**: `POST {url}/v1beta/models/{model}:generateContent`.
//! - **[`DisabledModel`]**: fails every call; lets indexing-only commands
//!   run without model credentials.
//!
//! Both remote providers report safety refusals as
//! [`ServiceError::ContentPolicy`] so they are surfaced to the user and
//! never retried.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use docchat_core::error::ServiceError;
use docchat_core::llm::{ChatMessage, ChatRequest, LanguageModel};
use docchat_core::models::Role;

use crate::config::LlmConfig;
use crate::http;

const OPENAI_URL: &str = "https://api.openai.com";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini finish reasons that mean the answer was withheld.
const GEMINI_BLOCKED: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "RECITATION", "SPII"];

/// Sampling parameters for one call: configured values win over the
/// request's preferred temperature.
fn apply_overrides(request: &ChatRequest, config: &LlmConfig) -> (Option<f64>, Option<u32>) {
    (config.temperature.or(request.temperature), config.max_tokens)
}

fn encode_image(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ============ OpenAI-compatible ============

pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    config: LlmConfig,
}

impl OpenAiChat {
    /// A key is required against the public API; self-hosted servers
    /// configured through `llm.url` may run without one.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let key_env = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        let api_key = http::api_key_from_env(key_env);
        if api_key.is_none() && config.url.is_none() {
            bail!("{} environment variable not set", key_env);
        }
        Ok(Self {
            client: http::client()?,
            url: config
                .url
                .as_deref()
                .unwrap_or(OPENAI_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            config: config.clone(),
        })
    }

    fn body(&self, request: &ChatRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(request.messages.iter().map(openai_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        let (temperature, max_tokens) = apply_overrides(request, &self.config);
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }
        body
    }
}

fn openai_message(message: &ChatMessage) -> Value {
    if message.images.is_empty() {
        return json!({ "role": message.role.as_str(), "content": message.content });
    }
    let mut parts = vec![json!({ "type": "text", "text": message.content })];
    for image in &message.images {
        parts.push(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image.mime_type, encode_image(&image.bytes))
            }
        }));
    }
    json!({ "role": message.role.as_str(), "content": parts })
}

fn parse_openai_chat(payload: &Value) -> Result<String, ServiceError> {
    let choice = &payload["choices"][0];
    if choice.is_null() {
        return Err(ServiceError::Terminal(
            "OpenAI response contained no choices".to_string(),
        ));
    }
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(ServiceError::ContentPolicy(
            "the model's content filter withheld the answer".to_string(),
        ));
    }
    if let Some(refusal) = choice["message"]["refusal"].as_str() {
        return Err(ServiceError::ContentPolicy(refusal.to_string()));
    }
    choice["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ServiceError::Terminal("OpenAI response missing message content".to_string()))
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ServiceError> {
        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| http::transport_error("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.contains("content_policy_violation") {
                return Err(ServiceError::ContentPolicy(
                    "the request was rejected by the provider's content policy".to_string(),
                ));
            }
            return Err(http::status_error("OpenAI", status, &text));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Terminal(format!("invalid OpenAI response: {}", e)))?;
        parse_openai_chat(&payload)
    }
}

// ============ Gemini ============

pub struct GeminiChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    config: LlmConfig,
}

impl GeminiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let key_env = config.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY");
        let api_key = http::api_key_from_env(key_env)
            .ok_or_else(|| anyhow!("{} environment variable not set", key_env))?;
        Ok(Self {
            client: http::client()?,
            url: config
                .url
                .as_deref()
                .unwrap_or(GEMINI_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            config: config.clone(),
        })
    }

    fn body(&self, request: &ChatRequest) -> Value {
        let contents: Vec<Value> = request.messages.iter().map(gemini_content).collect();
        let mut generation = serde_json::Map::new();
        let (temperature, max_tokens) = apply_overrides(request, &self.config);
        if let Some(t) = temperature {
            generation.insert("temperature".to_string(), json!(t));
        }
        if let Some(t) = max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(t));
        }
        json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": contents,
            "generationConfig": generation,
        })
    }
}

fn gemini_content(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
    };
    let mut parts = vec![json!({ "text": message.content })];
    for image in &message.images {
        parts.push(json!({
            "inline_data": {
                "mime_type": image.mime_type,
                "data": encode_image(&image.bytes),
            }
        }));
    }
    json!({ "role": role, "parts": parts })
}

fn parse_gemini(payload: &Value) -> Result<String, ServiceError> {
    if let Some(reason) = payload["promptFeedback"]["blockReason"].as_str() {
        return Err(ServiceError::ContentPolicy(format!(
            "the prompt was blocked ({})",
            reason
        )));
    }
    let candidate = &payload["candidates"][0];
    if candidate.is_null() {
        return Err(ServiceError::Terminal(
            "Gemini response contained no candidates".to_string(),
        ));
    }
    if let Some(reason) = candidate["finishReason"].as_str() {
        if GEMINI_BLOCKED.contains(&reason) {
            return Err(ServiceError::ContentPolicy(format!(
                "the answer was withheld ({})",
                reason
            )));
        }
    }
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ServiceError::Terminal(
            "Gemini response contained no text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for GeminiChat {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| http::transport_error("Gemini", e))?;
        let payload = http::json_body("Gemini", response).await?;
        parse_gemini(&payload)
    }
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<String, ServiceError> {
        Err(ServiceError::Terminal(
            "language model is disabled (set llm.provider)".to_string(),
        ))
    }
}

/// Build the [`LanguageModel`] selected by `llm.provider`.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiChat::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledModel)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::llm::ImageAttachment;
    use docchat_core::models::Turn;

    fn request() -> ChatRequest {
        let history = [Turn::user("hi"), Turn::assistant("hello")];
        let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user("What is shown?").with_image(ImageAttachment {
            mime_type: "image/png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }));
        ChatRequest::new("Be brief.", messages)
    }

    #[test]
    fn test_openai_body_puts_system_first_and_inlines_images() {
        let chat = OpenAiChat {
            client: reqwest::Client::new(),
            url: OPENAI_URL.to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            config: LlmConfig {
                temperature: Some(0.1),
                ..LlmConfig::default()
            },
        };
        let body = chat.body(&request());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["messages"][3]["content"][1]["type"], "image_url");
        let url = body["messages"][3]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(body["temperature"], 0.1);
    }

    #[test]
    fn test_gemini_body_maps_roles() {
        let chat = GeminiChat {
            client: reqwest::Client::new(),
            url: GEMINI_URL.to_string(),
            api_key: "k".to_string(),
            model: "gemini-1.5-flash".to_string(),
            config: LlmConfig::default(),
        };
        let body = chat.body(&request());
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][2]["parts"][1]["inline_data"]["mime_type"],
            "image/png"
        );
    }

    #[test]
    fn test_request_temperature_applies_unless_configured() {
        let grounded = request().with_temperature(0.0);
        assert_eq!(apply_overrides(&grounded, &LlmConfig::default()), (Some(0.0), None));

        let configured = LlmConfig {
            temperature: Some(0.7),
            max_tokens: Some(512),
            ..LlmConfig::default()
        };
        assert_eq!(apply_overrides(&grounded, &configured), (Some(0.7), Some(512)));
        assert_eq!(apply_overrides(&request(), &LlmConfig::default()), (None, None));
    }

    #[test]
    fn test_gemini_body_carries_request_temperature() {
        let chat = GeminiChat {
            client: reqwest::Client::new(),
            url: GEMINI_URL.to_string(),
            api_key: "k".to_string(),
            model: "gemini-1.5-flash".to_string(),
            config: LlmConfig::default(),
        };
        let body = chat.body(&request().with_temperature(0.0));
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn test_parse_openai_chat() {
        let ok = json!({ "choices": [{ "finish_reason": "stop", "message": { "content": "Paris (page 2)" } }] });
        assert_eq!(parse_openai_chat(&ok).unwrap(), "Paris (page 2)");

        let filtered = json!({ "choices": [{ "finish_reason": "content_filter", "message": { "content": null } }] });
        assert_eq!(parse_openai_chat(&filtered).unwrap_err().kind(), "content_policy");

        assert_eq!(parse_openai_chat(&json!({})).unwrap_err().kind(), "terminal");
    }

    #[test]
    fn test_parse_gemini() {
        let ok = json!({ "candidates": [{ "finishReason": "STOP", "content": { "parts": [{ "text": "Par" }, { "text": "is" }] } }] });
        assert_eq!(parse_gemini(&ok).unwrap(), "Paris");

        let blocked_prompt = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert_eq!(parse_gemini(&blocked_prompt).unwrap_err().kind(), "content_policy");

        let blocked_answer = json!({ "candidates": [{ "finishReason": "PROHIBITED_CONTENT" }] });
        assert_eq!(parse_gemini(&blocked_answer).unwrap_err().kind(), "content_policy");

        let empty = json!({ "candidates": [] });
        assert_eq!(parse_gemini(&empty).unwrap_err().kind(), "terminal");
    }

    #[tokio::test]
    async fn test_disabled_model_fails_terminally() {
        let err = DisabledModel
            .chat(&ChatRequest::new("s", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "terminal");
    }
}
