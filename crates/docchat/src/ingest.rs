//! Document ingestion pipeline.
//!
//! Turns an uploaded PDF into indexed chunks in two steps:
//!
//! ```text
//! ingest(name, bytes)
//!   ├── extract page text ─┐  (concurrently)
//!   ├── render page PNGs ──┘
//!   └── chunk each page           → IngestedDocument
//!
//! index(collection, chunks)
//!   ├── embed batches (bounded concurrency, order kept, CallPolicy)
//!   └── write all entries in one transaction
//! ```
//!
//! Nothing is written to the index until every chunk has been embedded,
//! so a failed upload never leaves a partial collection behind.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};

use docchat_core::chunk::chunk_pages;
use docchat_core::embedding::Embedder;
use docchat_core::error::ServiceError;
use docchat_core::models::{Chunk, IndexEntry};
use docchat_core::store::VectorIndex;

use crate::config::Config;
use crate::extract::PageExtractor;
use crate::policy::CallPolicy;
use crate::progress::{IngestEvent, IngestProgressReporter, NoProgress};
use crate::render::PageRenderer;

/// Rendered image of one page (display only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub page: u32,
    pub png: Vec<u8>,
}

/// Result of extracting and chunking one PDF.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub name: String,
    pub pages: Vec<PageImage>,
    pub page_texts: Vec<String>,
    pub chunks: Vec<Chunk>,
}

pub struct Ingestor {
    extractor: Arc<dyn PageExtractor>,
    renderer: Arc<dyn PageRenderer>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    policy: CallPolicy,
    progress: Arc<dyn IngestProgressReporter>,
    max_tokens: usize,
    batch_size: usize,
    concurrency: usize,
    replace_on_upload: bool,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        extractor: Arc<dyn PageExtractor>,
        renderer: Arc<dyn PageRenderer>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            extractor,
            renderer,
            embedder,
            index,
            policy: CallPolicy::from_config(&config.policy),
            progress: Arc::new(NoProgress),
            max_tokens: config.chunking.max_tokens,
            batch_size: config.embedding.batch_size.max(1),
            concurrency: config.embedding.concurrency.max(1),
            replace_on_upload: config.index.replace_on_upload,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Extract, render, and chunk a PDF. Fails only with
    /// [`ServiceError::Decode`].
    pub async fn ingest(&self, name: &str, bytes: &[u8]) -> Result<IngestedDocument, ServiceError> {
        self.progress.report(IngestEvent::Extracting {
            document: name.to_string(),
        });

        let render_timeout = self.policy.timeout();
        let render = async {
            tokio::time::timeout(render_timeout, self.renderer.render(bytes))
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("rendering timed out after {:?}", render_timeout)))
        };
        let (texts, images) = tokio::join!(self.extractor.pages(bytes), render);

        let page_texts = texts.map_err(|e| ServiceError::Decode(e.to_string()))?;
        let pages = match images {
            Ok(images) => images
                .into_iter()
                .enumerate()
                .map(|(i, png)| PageImage {
                    page: i as u32 + 1,
                    png,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(document = name, error = %e, "page rendering failed; continuing without images");
                Vec::new()
            }
        };

        let chunks = chunk_pages(name, &page_texts, self.max_tokens);
        if chunks.is_empty() {
            return Err(ServiceError::Decode(
                "document contains no extractable text".to_string(),
            ));
        }
        tracing::info!(
            document = name,
            pages = page_texts.len(),
            chunks = chunks.len(),
            "extracted document"
        );

        Ok(IngestedDocument {
            name: name.to_string(),
            pages,
            page_texts,
            chunks,
        })
    }

    /// Embed `chunks` and write them to `collection`, replacing its
    /// contents when `index.replace_on_upload` is set. Returns the number
    /// of entries written.
    pub async fn index(&self, collection: &str, chunks: &[Chunk]) -> Result<usize, ServiceError> {
        let document = chunks
            .first()
            .map(|c| c.document.clone())
            .unwrap_or_default();
        let vectors = self.embed_chunks(&document, chunks).await?;

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        self.progress.report(IngestEvent::Indexing {
            document: document.clone(),
            chunks: entries.len() as u64,
        });

        let written = if self.replace_on_upload {
            self.index.replace_collection(collection, &entries).await
        } else {
            self.index.upsert_batch(collection, &entries).await
        };
        written.map_err(|e| ServiceError::Terminal(format!("index write failed: {:#}", e)))?;

        tracing::info!(document = %document, collection, entries = entries.len(), "indexed document");
        Ok(entries.len())
    }

    async fn embed_chunks(&self, document: &str, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let total = chunks.len() as u64;
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();

        let mut done = 0u64;
        let mut vectors = Vec::with_capacity(chunks.len());
        let mut results = stream::iter(batches)
            .map(|texts| async move {
                let embedder = &self.embedder;
                self.policy
                    .call("embed", || embedder.embed(&texts))
                    .await
            })
            .buffered(self.concurrency);

        while let Some(batch) = results.try_next().await? {
            done += batch.len() as u64;
            vectors.extend(batch);
            self.progress.report(IngestEvent::Embedding {
                document: document.to_string(),
                n: done,
                total,
            });
        }
        Ok(vectors)
    }
}
