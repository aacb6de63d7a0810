//! Core data models shared by the ingestion, retrieval, and chat pipeline.

use serde::{Deserialize, Serialize};

/// A span of extracted document text, the unit of embedding and retrieval.
///
/// `id` is the SHA-256 hex digest of `text`, so identical content always
/// maps to the same index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Name of the source document.
    pub document: String,
    /// 1-based page number the text was extracted from.
    pub page: u32,
    /// 0-based position of the chunk within its document.
    pub chunk_index: i64,
    pub text: String,
}

/// A chunk paired with its embedding, ready to be written to an index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}
