//! Prompt construction for grounded answers, image description, and the
//! general assistant.
//!
//! The grounded prompt carries a refusal contract: when the retrieved
//! context does not contain the answer, the model must reply with exactly
//! [`REFUSAL`]. Callers can compare against it to detect refusals.

use crate::llm::{ChatMessage, ChatRequest, ImageAttachment};
use crate::models::{ScoredChunk, Turn};

/// The exact sentence a grounded answer uses when the context is insufficient.
pub const REFUSAL: &str = "I can't answer that from the provided document.";

const GROUNDED_INSTRUCTIONS: &str = "You answer questions about a document the user uploaded. \
You are given numbered excerpts retrieved from that document.

Rules:
- Use only the information in the excerpts below. Do not use outside knowledge.
- Never fabricate facts, numbers, names, or quotes.
- Cite the page of each fact you use, like (page 3).
- Answer completely but concisely.
- If the excerpts do not contain the answer, reply with exactly this sentence and nothing else:";

const ASSISTANT_INSTRUCTIONS: &str = "You are a helpful assistant. Answer the user's question briefly. \
Then suggest which of the available services fits their request and how to use it.

Available services:
1. Document Q&A: upload a PDF, then ask questions about its contents.
2. Image generation: describe the picture you want and ask to draw it.
3. Image description: upload a JPEG or PNG image, then ask about it.";

const DESCRIBE_INSTRUCTIONS: &str = "You describe and answer questions about the image the user provides. \
Only state what is visible in the image.";

/// Render retrieved chunks as a numbered context block.
///
/// ```rust
/// use docchat_core::prompt::format_context;
/// assert_eq!(format_context(&[]), "(no excerpts)");
/// ```
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return "(no excerpts)".to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, sc)| {
            format!(
                "[{}] ({}, page {})\n{}",
                i + 1,
                sc.chunk.document,
                sc.chunk.page,
                sc.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt for a grounded answer over `chunks`.
pub fn grounded_system_prompt(chunks: &[ScoredChunk]) -> String {
    format!(
        "{}\n{}\n\nExcerpts:\n---------------------\n{}\n---------------------",
        GROUNDED_INSTRUCTIONS,
        REFUSAL,
        format_context(chunks)
    )
}

/// Build the full grounded request: instructions and context, prior
/// turns in order, then the new question.
pub fn grounded_request(question: &str, chunks: &[ScoredChunk], history: &[Turn]) -> ChatRequest {
    let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
    messages.push(ChatMessage::user(question));
    ChatRequest::new(grounded_system_prompt(chunks), messages)
}

/// Request asking a multimodal model about an uploaded image.
pub fn describe_request(prompt: &str, image: ImageAttachment, history: &[Turn]) -> ChatRequest {
    let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
    messages.push(ChatMessage::user(prompt).with_image(image));
    ChatRequest::new(DESCRIBE_INSTRUCTIONS, messages)
}

/// Request for the general, ungrounded assistant.
pub fn assistant_request(question: &str) -> ChatRequest {
    ChatRequest::new(ASSISTANT_INSTRUCTIONS, vec![ChatMessage::user(question)])
}

/// True when `answer` is the refusal sentence (ignoring surrounding whitespace).
pub fn is_refusal(answer: &str) -> bool {
    answer.trim() == REFUSAL
}
