//! # docchat
//!
//! **Retrieval-augmented chat over a single uploaded document.**
//!
//! A user opens a session, uploads a PDF or an image, and asks questions.
//! PDF answers are grounded in the document's own text; image questions go
//! to a multimodal model together with the image. Speech in and out, image
//! generation, and a small assistant sit beside the main flow.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌──────────────┐
//! │  Upload  │──▶│  Ingestor  │──▶│ Embedder │──▶│ Vector index │
//! │ PDF/img  │   │ text+pages │   │  batched │   │ SQLite / mem │
//! └──────────┘   └────────────┘   └──────────┘   └──────┬───────┘
//!                                                       │ top-k
//!   question ──▶ Orchestrator ──▶ Synthesizer ◀─────────┘
//!                    │  ▲            (LLM)
//!                    ▼  │
//!             Conversation memory
//! ```
//!
//! ## Data Flow
//!
//! 1. [`extract::sniff_upload`] classifies the upload by its bytes.
//! 2. The [`ingest::Ingestor`] extracts page text, renders page images, and
//!    chunks pages with `docchat_core::chunk`.
//! 3. Chunks are embedded in bounded-concurrency batches ([`embedding`]) and
//!    written to the session's collection ([`sqlite_store`]).
//! 4. [`orchestrator::Orchestrator::ask`] embeds the question, retrieves the
//!    top-k chunks, and calls the [`synth::Synthesizer`] with recent memory.
//! 5. Every remote call runs under the [`policy::CallPolicy`] (timeout plus
//!    exponential backoff on retryable errors).
//!
//! ## Quick Start
//!
//! ```bash
//! docchat init
//! docchat ask ./paper.pdf "What is the main result?"
//! docchat chat ./paper.pdf --speak
//! docchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] | Persistent [`docchat_core::store::VectorIndex`] |
//! | [`extract`] / [`render`] | Upload sniffing, PDF text, page images |
//! | [`ingest`] | Document ingestion pipeline |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] / [`synth`] | Chat providers and answer synthesis |
//! | [`speech`] | Speech to text, text to speech, audio devices |
//! | [`imagegen`] | Text-to-image generation |
//! | [`policy`] / [`http`] | Retry, timeout, and HTTP error classification |
//! | [`session`] / [`orchestrator`] | Session state machine and entry points |
//! | [`server`] | HTTP API |
//! | [`progress`] / [`logging`] | Ingest progress and tracing setup |
//!
//! ## Configuration
//!
//! See `config/docchat.example.toml` for every section and its defaults.

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod imagegen;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod render;
pub mod server;
pub mod session;
pub mod speech;
pub mod sqlite_store;
pub mod synth;
