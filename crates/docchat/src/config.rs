//! Configuration parsing and validation.
//!
//! Doc Chat is configured via a TOML file (default: `config/docchat.toml`).
//! Only `[db]` is required; every other section has defaults.
//!
//! Credentials never appear in the file. Provider sections name the
//! environment variable that holds the key (`api_key_env`), and providers
//! read it once when they are constructed.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/docchat.sqlite"
//!
//! [index]
//! collection = "quickstart"     # or "{session}" for one collection per session
//!
//! [embedding]
//! provider = "local"
//! model = "bge-small-en-v1.5"
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-1.5-flash"
//! api_key_env = "GEMINI_API_KEY"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Placeholder in `index.collection` replaced by the session id.
pub const SESSION_PLACEHOLDER: &str = "{session}";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub imagegen: ImageGenConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Fixed collection name, or a template containing `{session}`.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Swap the collection's contents on each successful upload instead
    /// of accumulating entries.
    #[serde(default = "default_true")]
    pub replace_on_upload: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            replace_on_upload: true,
        }
    }
}

fn default_collection() -> String {
    SESSION_PLACEHOLDER.to_string()
}
fn default_true() -> bool {
    true
}

impl IndexConfig {
    /// Collection name used by the session with id `session_id`.
    pub fn collection_for(&self, session_id: &str) -> String {
        self.collection
            .replace(SESSION_PLACEHOLDER, &format!("session-{}", session_id))
    }

    /// True when each session gets its own collection.
    pub fn is_per_session(&self) -> bool {
        self.collection.contains(SESSION_PLACEHOLDER)
    }

    /// True when `name` could have been produced by [`collection_for`](Self::collection_for).
    /// Always false for a fixed collection.
    pub fn is_session_collection(&self, name: &str) -> bool {
        let Some((prefix, suffix)) = self.collection.split_once(SESSION_PLACEHOLDER) else {
            return false;
        };
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .and_then(|rest| rest.strip_prefix("session-"))
            .is_some_and(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Whitespace-token budget for replayed conversation turns.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
        }
    }
}

fn default_token_budget() -> usize {
    15_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local`, `openai`, `ollama`, or `hashing`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `openai` / `ollama`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of batches embedded in parallel during ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_openai_key_env(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `gemini`, `openai` (any OpenAI-compatible server), or `disabled`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            url: None,
            api_key_env: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    /// `openai` (any OpenAI-compatible audio API) or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Recording length for spoken questions.
    #[serde(default = "default_record_secs")]
    pub record_secs: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Speak every answer in `docchat chat`.
    #[serde(default)]
    pub auto_speak: bool,
    /// Directory where played audio is written as WAV files.
    #[serde(default = "default_audio_dir")]
    pub output_dir: PathBuf,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            api_key_env: default_openai_key_env(),
            stt_model: default_stt_model(),
            tts_model: default_tts_model(),
            voice: default_voice(),
            record_secs: default_record_secs(),
            sample_rate: default_sample_rate(),
            auto_speak: false,
            output_dir: default_audio_dir(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_stt_model() -> String {
    "whisper-1".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_voice() -> String {
    "alloy".to_string()
}
fn default_record_secs() -> u64 {
    5
}
fn default_sample_rate() -> u32 {
    16_000
}
fn default_audio_dir() -> PathBuf {
    PathBuf::from("./data/audio")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageGenConfig {
    /// `deepai` or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_deepai_key_env")]
    pub api_key_env: String,
}

impl Default for ImageGenConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            api_key_env: default_deepai_key_env(),
        }
    }
}

fn default_deepai_key_env() -> String {
    "DEEPAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// `pdftoppm` or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_pdftoppm")]
    pub command: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            dpi: default_dpi(),
            command: default_pdftoppm(),
        }
    }
}

fn default_dpi() -> u32 {
    100
}
fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}

/// Timeout and retry settings applied to every external call.
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted upload or audio body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Sessions unused for this long are ended. `0` keeps them forever.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_session_idle_secs() -> u64 {
    3_600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write daily-rolling log files here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Config with every default and the database at `db_path`.
    pub fn with_db(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            index: IndexConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            speech: SpeechConfig::default(),
            imagegen: ImageGenConfig::default(),
            render: RenderConfig::default(),
            policy: PolicyConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.memory.token_budget == 0 {
        bail!("memory.token_budget must be > 0");
    }
    if config.embedding.batch_size == 0 || config.embedding.concurrency == 0 {
        bail!("embedding.batch_size and embedding.concurrency must be > 0");
    }
    if config.policy.timeout_secs == 0 {
        bail!("policy.timeout_secs must be > 0");
    }
    if config.server.max_upload_bytes == 0 {
        bail!("server.max_upload_bytes must be > 0");
    }
    if config.speech.sample_rate == 0 || config.speech.record_secs == 0 {
        bail!("speech.sample_rate and speech.record_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" | "hashing" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hashing.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "gemini" | "openai" | "disabled" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be gemini, openai, or disabled.",
            other
        ),
    }
    match config.speech.provider.as_str() {
        "openai" | "disabled" => {}
        other => bail!("Unknown speech provider: '{}'. Must be openai or disabled.", other),
    }
    match config.imagegen.provider.as_str() {
        "deepai" | "disabled" => {}
        other => bail!("Unknown imagegen provider: '{}'. Must be deepai or disabled.", other),
    }
    match config.render.provider.as_str() {
        "pdftoppm" | "disabled" => {}
        other => bail!("Unknown render provider: '{}'. Must be pdftoppm or disabled.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/docchat.sqlite\"\n").unwrap();
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.memory.token_budget, 15_000);
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.llm.provider, "gemini");
        assert!(cfg.index.is_per_session());
        assert!(cfg.index.replace_on_upload);
    }

    #[test]
    fn test_collection_template() {
        let per_session = IndexConfig::default();
        assert_eq!(per_session.collection_for("abc"), "session-abc");

        let fixed = IndexConfig {
            collection: "quickstart".to_string(),
            replace_on_upload: false,
        };
        assert_eq!(fixed.collection_for("abc"), "quickstart");
        assert!(!fixed.is_per_session());
    }

    #[test]
    fn test_recognizes_session_collections() {
        let per_session = IndexConfig::default();
        assert!(per_session.is_session_collection(&per_session.collection_for("1234")));
        assert!(!per_session.is_session_collection("quickstart"));
        assert!(!per_session.is_session_collection("session-"));

        let templated = IndexConfig {
            collection: "docs-{session}-v2".to_string(),
            replace_on_upload: true,
        };
        assert!(templated.is_session_collection(&templated.collection_for("ab")));
        assert!(!templated.is_session_collection("session-ab"));

        let fixed = IndexConfig {
            collection: "session-shared".to_string(),
            replace_on_upload: true,
        };
        assert!(!fixed.is_session_collection("session-shared"));
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let err = parse_config("[db]\npath = \"x\"\n[retrieval]\ntop_k = 0\n").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_rejects_unknown_llm_provider() {
        let err = parse_config("[db]\npath = \"x\"\n[llm]\nprovider = \"selenium\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../../../config/docchat.example.toml")).unwrap();
        let defaults = Config::with_db("./data/docchat.sqlite");
        assert_eq!(cfg.db.path, defaults.db.path);
        assert_eq!(cfg.retrieval.top_k, defaults.retrieval.top_k);
        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(cfg.policy.max_delay_ms, defaults.policy.max_delay_ms);
        assert_eq!(cfg.server.max_upload_bytes, defaults.server.max_upload_bytes);
        assert_eq!(cfg.server.session_idle_secs, defaults.server.session_idle_secs);
    }
}
