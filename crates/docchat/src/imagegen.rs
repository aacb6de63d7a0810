//! Text-to-image generation.
//!
//! Best-effort: a failed generation is a [`ServiceError::Terminal`] and is
//! never retried.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use docchat_core::error::ServiceError;

use crate::config::ImageGenConfig;
use crate::http;

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate an image for `prompt` and return its URL.
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// DeepAI `POST {url}/api/text2img`.
pub struct DeepAiGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl DeepAiGenerator {
    pub fn new(config: &ImageGenConfig) -> Result<Self> {
        let api_key = http::api_key_from_env(&config.api_key_env)
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Ok(Self {
            client: http::client()?,
            url: config
                .url
                .as_deref()
                .unwrap_or("https://api.deepai.org")
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ImageGenerator for DeepAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/api/text2img", self.url))
            .header("api-key", &self.api_key)
            .form(&[("text", prompt)])
            .send()
            .await
            .map_err(|e| ServiceError::Terminal(format!("image generation request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ServiceError::Terminal(format!(
                "image generation failed with {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }
        parse_output_url(&body)
    }
}

fn parse_output_url(body: &str) -> Result<String, ServiceError> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ServiceError::Terminal(format!("invalid image generation response: {}", e)))?;
    json["output_url"]
        .as_str()
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Terminal("image generation returned no image".to_string()))
}

pub struct DisabledGenerator;

#[async_trait]
impl ImageGenerator for DisabledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Terminal(
            "image generation is disabled (set imagegen.provider)".to_string(),
        ))
    }
}

pub fn create_image_generator(config: &ImageGenConfig) -> Result<Arc<dyn ImageGenerator>> {
    match config.provider.as_str() {
        "deepai" => Ok(Arc::new(DeepAiGenerator::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown imagegen provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_url() {
        let url = parse_output_url(r#"{"id":"x","output_url":"https://img.example/cat.jpg"}"#).unwrap();
        assert_eq!(url, "https://img.example/cat.jpg");
        assert_eq!(parse_output_url(r#"{"err":"quota"}"#).unwrap_err().kind(), "terminal");
        assert_eq!(parse_output_url("<html>").unwrap_err().kind(), "terminal");
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let err = DisabledGenerator.generate("a cat").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
