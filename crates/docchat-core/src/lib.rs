//! # Doc Chat Core
//!
//! Shared, WASM-safe logic for Doc Chat: data models, chunking, the
//! vector index abstraction, conversation memory, grounded prompt
//! construction, and the external-service error taxonomy.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Everything that talks to the outside world
//! lives in the `docchat` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod store;
