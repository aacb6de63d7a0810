//! Session orchestration: the single entry point used by the CLI and the
//! HTTP server.
//!
//! The [`Orchestrator`] owns every collaborator (embedder, index, language
//! model, speech, image generation) and the registry of live sessions. It
//! drives each [`Session`] through its lifecycle and converts component
//! failures into [`SessionError`]s at the session boundary.
//!
//! # Concurrency
//!
//! - One ingestion per session at a time; a second upload is rejected with
//!   [`SessionError::Busy`] instead of waiting.
//! - Questions on the same session queue behind each other so memory
//!   updates apply in order.
//! - Sessions share nothing mutable except the vector index, and each
//!   session writes only its own collection.
//!
//! # Expiry
//!
//! Every lookup marks a session as used. [`Orchestrator::sweep_idle`] ends
//! sessions that have been idle longer than a limit and are not mid-upload
//! or mid-question; the server runs it periodically. Per-session
//! collections left behind by a previous process are removed by
//! [`Orchestrator::purge_orphaned_collections`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::RwLock;

use docchat_core::embedding::Embedder;
use docchat_core::error::ServiceError;
use docchat_core::llm::{ImageAttachment, LanguageModel};
use docchat_core::models::{ScoredChunk, Turn};
use docchat_core::prompt::{is_refusal, REFUSAL};
use docchat_core::store::VectorIndex;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::extract::{sniff_upload, PageExtractor, PdfExtractor, UploadKind};
use crate::imagegen::{create_image_generator, ImageGenerator};
use crate::ingest::Ingestor;
use crate::llm::create_language_model;
use crate::policy::CallPolicy;
use crate::progress::IngestProgressReporter;
use crate::render::{create_renderer, PageRenderer};
use crate::session::{Document, DocumentKind, Session, SessionError, SessionState};
use crate::speech::{create_speech, AudioChannel, AudioClip, AudioDevice, SpeechProviders, WavFileDevice};
use crate::sqlite_store::SqliteIndex;
use crate::synth::Synthesizer;

/// Everything the orchestrator talks to. Built from config by
/// [`Components::from_config`]; tests assemble their own.
pub struct Components {
    pub extractor: Arc<dyn PageExtractor>,
    pub renderer: Arc<dyn PageRenderer>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub model: Arc<dyn LanguageModel>,
    pub speech: SpeechProviders,
    pub audio: Arc<dyn AudioDevice>,
    pub imagegen: Arc<dyn ImageGenerator>,
}

impl Components {
    /// Open the SQLite index and construct every configured provider.
    /// Missing credentials fail here, before any session exists.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::open(config).await?;
        Ok(Self {
            extractor: Arc::new(PdfExtractor),
            renderer: create_renderer(&config.render)?,
            embedder: create_embedder(&config.embedding)?,
            index: Arc::new(SqliteIndex::new(pool)),
            model: create_language_model(&config.llm)?,
            speech: create_speech(&config.speech)?,
            audio: Arc::new(WavFileDevice::new(None, config.speech.output_dir.clone())),
            imagegen: create_image_generator(&config.imagegen)?,
        })
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub document: String,
    #[serde(flatten)]
    pub kind: DocumentKind,
    pub pages: usize,
    pub chunks: usize,
}

/// An answer plus the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredChunk>,
    pub refused: bool,
}

fn refusal() -> Answer {
    Answer {
        text: REFUSAL.to_string(),
        sources: Vec::new(),
        refused: true,
    }
}

/// A spoken question: what was heard and what was answered.
#[derive(Debug, Clone, Serialize)]
pub struct SpokenExchange {
    pub transcript: String,
    pub answer: Answer,
}

pub struct Orchestrator {
    config: Config,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    ingestor: Ingestor,
    synthesizer: Synthesizer,
    policy: CallPolicy,
    speech: SpeechProviders,
    audio: AudioChannel,
    imagegen: Arc<dyn ImageGenerator>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Orchestrator {
    pub fn new(config: Config, components: Components) -> Self {
        let policy = CallPolicy::from_config(&config.policy);
        let ingestor = Ingestor::new(
            &config,
            components.extractor,
            components.renderer,
            Arc::clone(&components.embedder),
            Arc::clone(&components.index),
        );
        Self {
            synthesizer: Synthesizer::new(components.model, policy.clone()),
            embedder: components.embedder,
            index: components.index,
            ingestor,
            policy,
            speech: components.speech,
            audio: AudioChannel::new(components.audio),
            imagegen: components.imagegen,
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.ingestor = self.ingestor.with_progress(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============ Session registry ============

    pub async fn create_session(&self) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let collection = self.config.index.collection_for(&id);
        let session = Arc::new(Session::new(
            id.clone(),
            collection,
            self.config.memory.token_budget,
        ));
        self.sessions.write().await.insert(id.clone(), Arc::clone(&session));
        tracing::info!(session = %id, collection = session.collection(), "session created");
        session
    }

    /// Look up a live session and mark it as used.
    pub async fn session(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Drop a session. A per-session collection is deleted with it; a
    /// shared collection is left alone.
    pub async fn end_session(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        self.release(&session).await;
        let age = chrono::Utc::now() - session.created_at();
        tracing::info!(session = id, age_secs = age.num_seconds(), "session ended");
        Ok(())
    }

    async fn release(&self, session: &Session) {
        if self.config.index.is_per_session() {
            if let Err(e) = self.index.delete_collection(session.collection()).await {
                tracing::warn!(session = session.id(), error = %e, "failed to delete session collection");
            }
        }
    }

    /// End every session idle for at least `max_idle` that has no upload or
    /// question in flight. Returns how many were ended.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.idle_for() >= max_idle && !s.is_busy())
                .map(|s| s.id().to_string())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            self.release(session).await;
            tracing::info!(
                session = session.id(),
                idle_secs = session.idle_for().as_secs(),
                "session expired"
            );
        }
        expired.len()
    }

    /// Delete per-session collections that belong to no live session,
    /// e.g. after a restart. Fixed collections are never touched.
    pub async fn purge_orphaned_collections(&self) -> Result<usize> {
        if !self.config.index.is_per_session() {
            return Ok(0);
        }
        let live: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.collection().to_string())
            .collect();
        let mut purged = 0;
        for name in self.index.collections().await? {
            if self.config.index.is_session_collection(&name) && !live.contains(&name) {
                self.index.delete_collection(&name).await?;
                tracing::info!(collection = %name, "deleted orphaned session collection");
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ============ Upload ============

    /// Make `bytes` the session's active document.
    pub async fn upload(
        &self,
        session: &Session,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadSummary, SessionError> {
        let kind = sniff_upload(&bytes).ok_or(SessionError::UnsupportedUpload)?;
        let _ingesting = session.try_begin_ingest()?;

        let prior = {
            let mut inner = session.inner().await;
            std::mem::replace(&mut inner.state, SessionState::Ingesting)
        };
        tracing::info!(session = session.id(), document = name, kind = kind.mime_type(), "upload started");

        let document = match kind {
            UploadKind::Image { mime_type } => Document {
                name: name.to_string(),
                kind: DocumentKind::Image {
                    mime_type: mime_type.to_string(),
                },
                bytes,
                pages: Vec::new(),
                chunk_count: 0,
            },
            UploadKind::Pdf => {
                let ingested = match self.ingestor.ingest(name, &bytes).await {
                    Ok(doc) => doc,
                    Err(err) => {
                        session.inner().await.state = prior;
                        tracing::warn!(session = session.id(), document = name, error = %err, "upload rejected");
                        return Err(SessionError::Decode(err.to_string()));
                    }
                };
                if let Err(err) = self
                    .ingestor
                    .index(session.collection(), &ingested.chunks)
                    .await
                {
                    session.inner().await.state = SessionState::Error {
                        message: err.to_string(),
                    };
                    tracing::error!(session = session.id(), document = name, error = %err, "ingestion failed");
                    return Err(SessionError::IngestionFailed(err));
                }
                Document {
                    name: name.to_string(),
                    kind: DocumentKind::Pdf,
                    bytes,
                    pages: ingested.pages,
                    chunk_count: ingested.chunks.len(),
                }
            }
        };

        let summary = UploadSummary {
            document: document.name.clone(),
            kind: document.kind.clone(),
            pages: document.pages.len(),
            chunks: document.chunk_count,
        };

        let mut inner = session.inner().await;
        // answers about the previous document must not leak into this one
        inner.memory.clear();
        inner.document = Some(document);
        inner.state = SessionState::Ready;
        session.touch();
        tracing::info!(session = session.id(), document = name, chunks = summary.chunks, "document ready");
        Ok(summary)
    }

    // ============ Questions ============

    /// Answer `question` in the context of the session's document.
    pub async fn ask(&self, session: &Session, question: &str) -> Result<Answer, SessionError> {
        let question = question.trim();
        let _querying = session.begin_query().await;

        let (state, document, history) = {
            let inner = session.inner().await;
            let document = inner
                .document
                .as_ref()
                .map(|d| (d.kind.clone(), d.bytes.clone()));
            (inner.state.clone(), document, inner.memory.snapshot())
        };

        let answer = match (&state, document) {
            (SessionState::Ingesting, _) => {
                return Err(SessionError::NotReady("a document is being processed".to_string()))
            }
            (SessionState::Error { message }, _) => {
                return Err(SessionError::NotReady(format!(
                    "the last upload failed: {}",
                    message
                )))
            }
            _ if question.is_empty() => return Ok(refusal()),
            (SessionState::Empty, _) => {
                session.inner().await.transcript.push(Turn::user(question));
                refusal()
            }
            (SessionState::Ready, Some((DocumentKind::Image { mime_type }, bytes))) => {
                session.inner().await.transcript.push(Turn::user(question));
                let text = self
                    .synthesizer
                    .describe(question, ImageAttachment { mime_type, bytes }, &history)
                    .await
                    .map_err(SessionError::from_query)?;
                Answer {
                    refused: is_refusal(&text),
                    text,
                    sources: Vec::new(),
                }
            }
            (SessionState::Ready, _) => {
                session.inner().await.transcript.push(Turn::user(question));
                self.answer_from_index(session.collection(), question, &history)
                    .await?
            }
        };

        let mut inner = session.inner().await;
        inner.memory.append(Turn::user(question));
        inner.memory.append(Turn::assistant(answer.text.clone()));
        inner.transcript.push(Turn::assistant(answer.text.clone()));
        session.touch();
        Ok(answer)
    }

    async fn answer_from_index(
        &self,
        collection: &str,
        question: &str,
        history: &[Turn],
    ) -> Result<Answer, SessionError> {
        let sources = self
            .retrieve(collection, question)
            .await
            .map_err(SessionError::from_query)?;
        let text = self
            .synthesizer
            .synthesize(question, &sources, history)
            .await
            .map_err(SessionError::from_query)?;
        Ok(Answer {
            refused: is_refusal(&text),
            text,
            sources,
        })
    }

    /// Top `retrieval.top_k` chunks of `collection` for `question`.
    pub async fn retrieve(&self, collection: &str, question: &str) -> Result<Vec<ScoredChunk>, ServiceError> {
        if self
            .index
            .count(collection)
            .await
            .map_err(|e| ServiceError::Terminal(format!("index unavailable: {:#}", e)))?
            == 0
        {
            return Ok(Vec::new());
        }
        let texts = vec![question.to_string()];
        let embedder = &self.embedder;
        let mut vectors = self
            .policy
            .call("embed query", || embedder.embed(&texts))
            .await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| ServiceError::Terminal("empty embedding response".to_string()))?;
        self.index
            .query(collection, &vector, self.config.retrieval.top_k)
            .await
            .map_err(|e| ServiceError::Terminal(format!("index query failed: {:#}", e)))
    }

    // ============ Voice ============

    /// Record a spoken question, transcribe it, and answer it.
    pub async fn listen(&self, session: &Session, duration: Duration) -> Result<SpokenExchange, SessionError> {
        let clip = self
            .audio
            .record(duration, self.config.speech.sample_rate)
            .await
            .map_err(|e| SessionError::QueryFailed(ServiceError::Terminal(format!("recording failed: {:#}", e))))?;
        self.ask_spoken(session, &clip).await
    }

    /// Transcribe an already captured clip and answer it.
    pub async fn ask_spoken(&self, session: &Session, clip: &AudioClip) -> Result<SpokenExchange, SessionError> {
        let transcript = self.transcribe(clip).await?;
        tracing::info!(session = session.id(), chars = transcript.len(), "transcribed question");
        let answer = self.ask(session, &transcript).await?;
        Ok(SpokenExchange { transcript, answer })
    }

    /// Transcribe `clip`, first converting it to `speech.sample_rate`.
    pub async fn transcribe(&self, clip: &AudioClip) -> Result<String, SessionError> {
        let (stt, _) = self.speech.as_ref().ok_or(SessionError::Unavailable("speech"))?;
        let target = self.config.speech.sample_rate;
        if clip.sample_rate != target {
            tracing::debug!(from = clip.sample_rate, to = target, "resampling clip for transcription");
        }
        let clip = clip.resample(target);
        self.policy
            .call("transcribe", || stt.transcribe(&clip))
            .await
            .map_err(SessionError::from_query)
    }

    /// Synthesize `text` as speech.
    pub async fn synthesize_speech(&self, text: &str) -> Result<AudioClip, SessionError> {
        let (_, tts) = self.speech.as_ref().ok_or(SessionError::Unavailable("speech"))?;
        self.policy
            .call("speak", || tts.synthesize(text))
            .await
            .map_err(SessionError::from_query)
    }

    /// Synthesize `text` and play it on the audio device.
    pub async fn speak(&self, text: &str) -> Result<Option<PathBuf>, SessionError> {
        let clip = self.synthesize_speech(text).await?;
        self.audio
            .play(clip)
            .await
            .map_err(|e| SessionError::QueryFailed(ServiceError::Terminal(format!("playback failed: {:#}", e))))
    }

    // ============ Images and assistant ============

    /// Generate an image for `prompt`. Attempted once.
    pub async fn draw(&self, prompt: &str) -> Result<String, SessionError> {
        let imagegen = &self.imagegen;
        self.policy
            .without_retries()
            .call("draw", || imagegen.generate(prompt))
            .await
            .map_err(SessionError::from_query)
    }

    /// Ungrounded helper answer that lists the available services.
    pub async fn assist(&self, question: &str) -> Result<String, SessionError> {
        self.synthesizer
            .assist(question)
            .await
            .map_err(SessionError::from_query)
    }
}
