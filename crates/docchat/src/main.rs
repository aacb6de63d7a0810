//! # docchat CLI
//!
//! Chat with a PDF or an image from the terminal, or serve the same
//! pipeline over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite index and run schema migrations |
//! | `docchat ingest <file>` | Chunk, embed, and index a PDF into a named collection |
//! | `docchat collections` | List indexed collections and their chunk counts |
//! | `docchat ask <file> "<question>"` | One-shot question about a PDF or image |
//! | `docchat chat <file>` | Interactive chat about a PDF or image |
//! | `docchat describe <image> "<prompt>"` | Ask about a JPEG or PNG image |
//! | `docchat transcribe <wav>` | Speech to text |
//! | `docchat speak "<text>" --out <wav>` | Text to speech |
//! | `docchat draw "<prompt>"` | Generate an image, prints its URL |
//! | `docchat assist "<question>"` | Ask the built-in assistant |
//! | `docchat serve` | Start the HTTP API |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use docchat::config::{self, Config};
use docchat::db;
use docchat::extract::{sniff_upload, UploadKind};
use docchat::ingest::Ingestor;
use docchat::orchestrator::{Answer, Components, Orchestrator};
use docchat::progress::ProgressMode;
use docchat::session::Session;
use docchat::speech::{wav, WavFileDevice};
use docchat::sqlite_store::SqliteIndex;
use docchat::{logging, server};
use docchat_core::store::VectorIndex;

/// docchat: retrieval-augmented chat over a single uploaded document.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "Chat with a PDF or image through a retrieval-augmented pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database. Safe to run repeatedly.
    Init,

    /// Ingest a PDF into a named collection of the persistent index.
    Ingest {
        file: PathBuf,

        /// Target collection.
        #[arg(long, default_value = "default")]
        collection: String,

        /// Emit progress as JSON lines on stderr.
        #[arg(long, conflicts_with = "quiet")]
        json_progress: bool,

        /// Disable progress output.
        #[arg(long)]
        quiet: bool,
    },

    /// List collections in the index.
    Collections,

    /// Ask one question about a PDF or image.
    Ask {
        file: PathBuf,
        question: String,

        /// Also print the retrieved chunks.
        #[arg(long)]
        sources: bool,
    },

    /// Interactive chat about a PDF or image.
    ///
    /// Type a question per line. `/listen` asks a spoken question from the
    /// `--voice` recording, `/quit` exits.
    Chat {
        file: PathBuf,

        /// Speak every answer (written as WAV files under `speech.output_dir`).
        #[arg(long)]
        speak: bool,

        /// WAV file used as the microphone for `/listen`.
        #[arg(long)]
        voice: Option<PathBuf>,
    },

    /// Ask a multimodal model about a JPEG or PNG image.
    Describe { image: PathBuf, prompt: String },

    /// Transcribe a WAV file.
    Transcribe { file: PathBuf },

    /// Synthesize speech into a WAV file.
    Speak {
        text: String,

        #[arg(long, default_value = "speech.wav")]
        out: PathBuf,
    },

    /// Generate an image from a text prompt.
    Draw { prompt: String },

    /// Ask the built-in assistant about what docchat can do.
    Assist { question: String },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            db::open(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            collection,
            json_progress,
            quiet,
        } => {
            let mode = if quiet {
                ProgressMode::Off
            } else if json_progress {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            run_ingest(&cfg, &file, &collection, mode).await?;
        }
        Commands::Collections => {
            run_collections(&cfg).await?;
        }
        Commands::Ask {
            file,
            question,
            sources,
        } => {
            let orch = Orchestrator::new(cfg.clone(), Components::from_config(&cfg).await?);
            let session = open_document(&orch, &file).await?;
            let result = orch.ask(&session, &question).await;
            orch.end_session(session.id()).await?;
            print_answer(&result?, sources);
        }
        Commands::Chat { file, speak, voice } => {
            let mut components = Components::from_config(&cfg).await?;
            components.audio = Arc::new(WavFileDevice::new(voice, cfg.speech.output_dir.clone()));
            let orch = Orchestrator::new(cfg.clone(), components)
                .with_progress(Arc::from(ProgressMode::default_for_tty().reporter()));
            let session = open_document(&orch, &file).await?;
            let result = run_chat(&orch, &session, speak || cfg.speech.auto_speak).await;
            orch.end_session(session.id()).await?;
            result?;
        }
        Commands::Describe { image, prompt } => {
            let (_, bytes) = read_upload(&image).await?;
            if !matches!(sniff_upload(&bytes), Some(UploadKind::Image { .. })) {
                bail!("{} is not a JPEG or PNG image", image.display());
            }
            let orch = Orchestrator::new(cfg.clone(), Components::from_config(&cfg).await?);
            let session = open_document(&orch, &image).await?;
            let result = orch.ask(&session, &prompt).await;
            orch.end_session(session.id()).await?;
            print_answer(&result?, false);
        }
        Commands::Transcribe { file } => {
            let orch = Orchestrator::new(cfg.clone(), Components::from_config(&cfg).await?);
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let clip = wav::decode(&bytes)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            println!("{}", orch.transcribe(&clip).await?);
        }
        Commands::Speak { text, out } => {
            let orch = Orchestrator::new(cfg.clone(), Components::from_config(&cfg).await?);
            let clip = orch.synthesize_speech(&text).await?;
            tokio::fs::write(&out, wav::encode(&clip))
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "Wrote {} ({:.1}s)",
                out.display(),
                clip.duration().as_secs_f32()
            );
        }
        Commands::Draw { prompt } => {
            let orch = Orchestrator::new(cfg.clone(), Components::from_config(&cfg).await?);
            println!("{}", orch.draw(&prompt).await?);
        }
        Commands::Assist { question } => {
            let orch = Orchestrator::new(cfg.clone(), Components::from_config(&cfg).await?);
            println!("{}", orch.assist(&question).await?);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn read_upload(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((name, bytes))
}

async fn open_document(orch: &Orchestrator, path: &Path) -> Result<Arc<Session>> {
    let (name, bytes) = read_upload(path).await?;
    let session = orch.create_session().await;
    match orch.upload(&session, &name, bytes).await {
        Ok(summary) => {
            eprintln!(
                "Loaded {} ({} pages, {} chunks)",
                summary.document, summary.pages, summary.chunks
            );
            Ok(session)
        }
        Err(e) => {
            orch.end_session(session.id()).await?;
            bail!("{}: {}", path.display(), e)
        }
    }
}

async fn run_ingest(cfg: &Config, path: &Path, collection: &str, mode: ProgressMode) -> Result<()> {
    let (name, bytes) = read_upload(path).await?;
    let components = Components::from_config(cfg).await?;
    let ingestor = Ingestor::new(
        cfg,
        components.extractor,
        components.renderer,
        components.embedder,
        components.index,
    )
    .with_progress(Arc::from(mode.reporter()));

    let document = ingestor
        .ingest(&name, &bytes)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;
    let written = ingestor.index(collection, &document.chunks).await?;
    println!(
        "Ingested {}: {} pages, {} chunks into collection '{}'",
        document.name,
        document.page_texts.len(),
        written,
        collection
    );
    Ok(())
}

async fn run_collections(cfg: &Config) -> Result<()> {
    let index = SqliteIndex::new(db::open(cfg).await?);
    let collections = index.collections().await?;
    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }
    println!("{:<40} CHUNKS", "COLLECTION");
    for name in collections {
        let count = index.count(&name).await?;
        println!("{:<40} {}", name, count);
    }
    Ok(())
}

async fn run_chat(orch: &Orchestrator, session: &Session, speak: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match line {
            "" => {
                eprint!("> ");
                continue;
            }
            "/quit" | "/exit" => break,
            "/listen" => orch
                .listen(session, Duration::from_secs(orch.config().speech.record_secs))
                .await
                .map(|exchange| {
                    println!("you said: {}", exchange.transcript);
                    exchange.answer
                }),
            question => orch.ask(session, question).await,
        };

        match result {
            Ok(answer) => {
                print_answer(&answer, false);
                if speak {
                    match orch.speak(&answer.text).await {
                        Ok(Some(path)) => eprintln!("(audio: {})", path.display()),
                        Ok(None) => {}
                        Err(e) => eprintln!("speech unavailable: {}", e),
                    }
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
        eprint!("> ");
    }
    Ok(())
}

fn print_answer(answer: &Answer, sources: bool) {
    println!("{}", answer.text);
    if sources {
        for (i, s) in answer.sources.iter().enumerate() {
            println!(
                "\n[{}] page {} (score {:.3})\n{}",
                i + 1,
                s.chunk.page,
                s.score,
                s.chunk.text
            );
        }
    }
}
