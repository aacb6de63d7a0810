//! Per-user chat session state.
//!
//! A [`Session`] owns its lifecycle state, the active document, the
//! conversation memory, and a display transcript. The orchestrator drives
//! every transition; this module only holds the state and its locks.
//!
//! ```text
//! Empty ──upload──▶ Ingesting ──ok──▶ Ready ──upload──▶ Ingesting
//!                       │ decode error → prior state
//!                       └ external failure → Error ──upload──▶ Ingesting
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use docchat_core::error::ServiceError;
use docchat_core::memory::ConversationMemory;
use docchat_core::models::Turn;

use crate::ingest::PageImage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    Ingesting,
    Ready,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Image { mime_type: String },
}

/// The document a session is currently chatting about.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    pub pages: Vec<PageImage>,
    pub chunk_count: usize,
}

/// Serializable view of a [`Document`] without its bytes.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    #[serde(flatten)]
    pub kind: DocumentKind,
    pub pages: usize,
    pub chunks: usize,
}

impl From<&Document> for DocumentInfo {
    fn from(doc: &Document) -> Self {
        Self {
            name: doc.name.clone(),
            kind: doc.kind.clone(),
            pages: doc.pages.len(),
            chunks: doc.chunk_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub collection: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(flatten)]
    pub state: SessionState,
    pub document: Option<DocumentInfo>,
    pub transcript: Vec<Turn>,
    pub memory_tokens: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("could not read the upload: {0}")]
    Decode(String),
    #[error("a document is already being processed for this session")]
    Busy,
    #[error("the session is not ready for questions ({0})")]
    NotReady(String),
    #[error("unsupported upload: only PDF, JPEG and PNG files are accepted")]
    UnsupportedUpload,
    #[error("ingestion failed: {0}")]
    IngestionFailed(ServiceError),
    #[error("could not answer: {0}")]
    QueryFailed(ServiceError),
    #[error("request declined by content policy: {0}")]
    ContentPolicy(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("{0} is not configured")]
    Unavailable(&'static str),
}

impl SessionError {
    /// Convert a failed query-path call, keeping content-policy refusals distinct.
    pub fn from_query(err: ServiceError) -> Self {
        match err {
            ServiceError::ContentPolicy(msg) => SessionError::ContentPolicy(msg),
            other => SessionError::QueryFailed(other),
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) document: Option<Document>,
    pub(crate) memory: ConversationMemory,
    pub(crate) transcript: Vec<Turn>,
}

pub struct Session {
    id: String,
    collection: String,
    created_at: DateTime<Utc>,
    /// Unix millis of the last lookup or completed operation.
    last_active: AtomicI64,
    inner: Mutex<SessionInner>,
    ingest_lock: Mutex<()>,
    query_lock: Mutex<()>,
}

impl Session {
    pub fn new(id: impl Into<String>, collection: impl Into<String>, memory_budget: usize) -> Self {
        let created_at = Utc::now();
        Self {
            id: id.into(),
            collection: collection.into(),
            created_at,
            last_active: AtomicI64::new(created_at.timestamp_millis()),
            inner: Mutex::new(SessionInner {
                state: SessionState::Empty,
                document: None,
                memory: ConversationMemory::new(memory_budget),
                transcript: Vec::new(),
            }),
            ingest_lock: Mutex::new(()),
            query_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Index collection this session reads and writes.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_active.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }

    /// Mark the session as used now.
    pub fn touch(&self) {
        self.last_active
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time since the session was last used.
    pub fn idle_for(&self) -> Duration {
        let idle_ms = Utc::now().timestamp_millis() - self.last_active.load(Ordering::Relaxed);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    /// True while an upload or a question is in flight.
    pub fn is_busy(&self) -> bool {
        self.ingest_lock.try_lock().is_err() || self.query_lock.try_lock().is_err()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            id: self.id.clone(),
            collection: self.collection.clone(),
            created_at: self.created_at,
            last_active: self.last_active(),
            state: inner.state.clone(),
            document: inner.document.as_ref().map(DocumentInfo::from),
            transcript: inner.transcript.clone(),
            memory_tokens: inner.memory.token_count(),
        }
    }

    pub async fn transcript(&self) -> Vec<Turn> {
        self.inner.lock().await.transcript.clone()
    }

    /// PNG of page `page` (1-based) of the active document, if rendered.
    pub async fn page_image(&self, page: u32) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner
            .document
            .as_ref()?
            .pages
            .iter()
            .find(|p| p.page == page)
            .map(|p| p.png.clone())
    }

    pub(crate) async fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    /// Claim the ingestion slot without waiting.
    pub(crate) fn try_begin_ingest(&self) -> Result<MutexGuard<'_, ()>, SessionError> {
        self.ingest_lock.try_lock().map_err(|_| SessionError::Busy)
    }

    /// Queue behind any in-flight question.
    pub(crate) async fn begin_query(&self) -> MutexGuard<'_, ()> {
        self.query_lock.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_session_is_empty() {
        let session = Session::new("abc", "session-abc", 100);
        let snap = session.snapshot().await;
        assert_eq!(snap.state, SessionState::Empty);
        assert!(snap.document.is_none());
        assert!(session.page_image(1).await.is_none());
    }

    #[tokio::test]
    async fn test_second_ingest_claim_is_busy() {
        let session = Session::new("abc", "c", 100);
        let _held = session.try_begin_ingest().unwrap();
        assert_eq!(session.try_begin_ingest().err(), Some(SessionError::Busy));
    }

    #[tokio::test]
    async fn test_busy_while_ingesting_or_querying() {
        let session = Session::new("abc", "c", 100);
        assert!(!session.is_busy());
        {
            let _ingesting = session.try_begin_ingest().unwrap();
            assert!(session.is_busy());
        }
        {
            let _querying = session.begin_query().await;
            assert!(session.is_busy());
        }
        assert!(!session.is_busy());
    }

    #[test]
    fn test_touch_resets_idle_time() {
        let session = Session::new("abc", "c", 100);
        session.last_active.store(
            session.created_at().timestamp_millis() - 60_000,
            Ordering::Relaxed,
        );
        assert!(session.idle_for() >= Duration::from_secs(60));
        session.touch();
        assert!(session.idle_for() < Duration::from_secs(5));
        assert!(session.last_active() >= session.created_at());
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_value(SessionState::Error {
            message: "embedding failed".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["message"], "embedding failed");
    }

    #[test]
    fn test_from_query_keeps_content_policy() {
        assert_eq!(
            SessionError::from_query(ServiceError::ContentPolicy("SAFETY".into())),
            SessionError::ContentPolicy("SAFETY".into())
        );
        assert!(matches!(
            SessionError::from_query(ServiceError::Terminal("x".into())),
            SessionError::QueryFailed(_)
        ));
    }
}
