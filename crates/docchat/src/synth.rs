//! Answer synthesis on top of a [`LanguageModel`].
//!
//! Grounded answers always go through [`prompt::grounded_request`], so
//! every answer carries the refusal contract. With no retrieved chunks the
//! model is not called at all and the refusal sentence is returned.
//! Grounded and image answers ask for temperature 0 unless `llm.temperature`
//! is configured.

use std::sync::Arc;

use docchat_core::error::ServiceError;
use docchat_core::llm::{ChatRequest, ImageAttachment, LanguageModel};
use docchat_core::models::{ScoredChunk, Turn};
use docchat_core::prompt::{self, REFUSAL};

use crate::policy::CallPolicy;

const GROUNDED_TEMPERATURE: f64 = 0.0;

pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    policy: CallPolicy,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, policy: CallPolicy) -> Self {
        Self { model, policy }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Answer `question` from `chunks`, replaying `turns` as conversation.
    pub async fn synthesize(
        &self,
        question: &str,
        chunks: &[ScoredChunk],
        turns: &[Turn],
    ) -> Result<String, ServiceError> {
        if chunks.is_empty() {
            tracing::debug!("no context retrieved; refusing without a model call");
            return Ok(REFUSAL.to_string());
        }
        let request = prompt::grounded_request(question, chunks, turns)
            .with_temperature(GROUNDED_TEMPERATURE);
        self.send("chat", request).await
    }

    /// Answer a question about an uploaded image.
    pub async fn describe(
        &self,
        question: &str,
        image: ImageAttachment,
        turns: &[Turn],
    ) -> Result<String, ServiceError> {
        let request = prompt::describe_request(question, image, turns)
            .with_temperature(GROUNDED_TEMPERATURE);
        self.send("describe", request).await
    }

    /// Ungrounded helper that points the user at the available services.
    pub async fn assist(&self, question: &str) -> Result<String, ServiceError> {
        self.send("assist", prompt::assistant_request(question)).await
    }

    async fn send(&self, op: &str, request: ChatRequest) -> Result<String, ServiceError> {
        let model = &self.model;
        let answer = self
            .policy
            .call(op, || model.chat(&request))
            .await?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docchat_core::chunk::content_id;
    use docchat_core::models::Chunk;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted replies and records every request.
    struct Scripted {
        replies: Mutex<Vec<Result<String, ServiceError>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<String, ServiceError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn policy() -> CallPolicy {
        CallPolicy::new(
            Duration::from_secs(1),
            2,
            Duration::from_millis(1),
            Duration::from_millis(2),
        )
    }

    fn scored(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: content_id(text),
                document: "atlas.pdf".to_string(),
                page: 2,
                chunk_index: 1,
                text: text.to_string(),
            },
            score: 0.8,
        }
    }

    #[tokio::test]
    async fn test_empty_context_refuses_without_calling_model() {
        let model = Scripted::new(vec![]);
        let synth = Synthesizer::new(model.clone(), policy());
        let answer = synth.synthesize("Anything?", &[], &[]).await.unwrap();
        assert_eq!(answer, REFUSAL);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grounded_answer_uses_context_and_history() {
        let model = Scripted::new(vec![Ok(" Paris (page 2)\n".to_string())]);
        let synth = Synthesizer::new(model.clone(), policy());
        let history = vec![Turn::user("hello"), Turn::assistant("hi")];
        let answer = synth
            .synthesize(
                "What is the capital of France?",
                &[scored("The capital of France is Paris.")],
                &history,
            )
            .await
            .unwrap();
        assert_eq!(answer, "Paris (page 2)");

        let seen = model.seen.lock().unwrap();
        assert!(seen[0].system.contains("(atlas.pdf, page 2)"));
        assert_eq!(seen[0].messages.len(), 3);
        assert_eq!(seen[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_assistant_leaves_temperature_to_config() {
        let model = Scripted::new(vec![Ok("Upload a PDF to start.".to_string())]);
        let synth = Synthesizer::new(model.clone(), policy());
        synth.assist("What can you do?").await.unwrap();
        assert_eq!(model.seen.lock().unwrap()[0].temperature, None);
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let model = Scripted::new(vec![
            Err(ServiceError::Retryable("503".to_string())),
            Ok("Paris".to_string()),
        ]);
        let synth = Synthesizer::new(model.clone(), policy());
        let answer = synth.synthesize("q", &[scored("Paris")], &[]).await.unwrap();
        assert_eq!(answer, "Paris");
        assert_eq!(model.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_content_policy_surfaces_after_one_attempt() {
        let model = Scripted::new(vec![
            Err(ServiceError::ContentPolicy("SAFETY".to_string())),
            Ok("never used".to_string()),
        ]);
        let synth = Synthesizer::new(model.clone(), policy());
        let err = synth.synthesize("q", &[scored("x")], &[]).await.unwrap_err();
        assert_eq!(err.kind(), "content_policy");
        assert_eq!(model.seen.lock().unwrap().len(), 1);
    }
}
