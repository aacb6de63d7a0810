//! Ingestion progress reporting.
//!
//! Uploads go through extraction, embedding, and indexing. Reporters emit
//! one event per step on **stderr** so stdout stays parseable for scripts
//! (`docchat ask` prints only the answer).

use std::io::Write;

/// A single progress event for one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestEvent {
    /// Text is being pulled out of the document.
    Extracting { document: String },
    /// `n` of `total` chunks have been embedded.
    Embedding {
        document: String,
        n: u64,
        total: u64,
    },
    /// Embedded chunks are being written to the index.
    Indexing { document: String, chunks: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress: "ingest report.pdf  embedding  64 / 1,024 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Extracting { document } => {
                format!("ingest {}  extracting...\n", document)
            }
            IngestEvent::Embedding { document, n, total } => format!(
                "ingest {}  embedding  {} / {} chunks\n",
                document,
                format_number(*n),
                format_number(*total)
            ),
            IngestEvent::Indexing { document, chunks } => format!(
                "ingest {}  indexing  {} chunks\n",
                document,
                format_number(*chunks)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::Extracting { document } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "extracting"
            }),
            IngestEvent::Embedding { document, n, total } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IngestEvent::Indexing { document, chunks } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "indexing",
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_groups_thousands() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(64_512), "64,512");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
