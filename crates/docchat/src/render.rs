//! Page image rendering for uploaded PDFs.
//!
//! Rendered pages back the "view page" feature of the chat UI. Rendering is
//! best-effort: the ingestor bounds it by the call policy's timeout, logs a
//! warning, and continues without images when it fails or times out.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::RenderConfig;

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// PNG bytes for each page, in page order. Empty when rendering is off.
    async fn render(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>>;
}

pub struct DisabledRenderer;

#[async_trait]
impl PageRenderer for DisabledRenderer {
    async fn render(&self, _pdf: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }
}

/// Renders with poppler's `pdftoppm`.
pub struct PdftoppmRenderer {
    command: String,
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new(command: impl Into<String>, dpi: u32) -> Self {
        Self {
            command: command.into(),
            dpi,
        }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>> {
        let dir = tempfile::TempDir::new()?;
        let input = dir.path().join("upload.pdf");
        tokio::fs::write(&input, pdf).await?;
        let prefix = dir.path().join("page");

        let output = tokio::process::Command::new(&self.command)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(&input)
            .arg(&prefix)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.command, stderr.trim());
        }

        let mut pages = Vec::new();
        for (_, path) in numbered_pages(dir.path())? {
            pages.push(tokio::fs::read(&path).await?);
        }
        Ok(pages)
    }
}

/// `page-N.png` files in `dir`, sorted by N. pdftoppm zero-pads N to the
/// width of the page count, so a plain name sort is not enough.
fn numbered_pages(dir: &Path) -> Result<Vec<(u32, std::path::PathBuf)>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }
        if let Some(n) = stem
            .strip_prefix("page-")
            .and_then(|n| n.parse::<u32>().ok())
        {
            pages.push((n, path));
        }
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages)
}

pub fn create_renderer(config: &RenderConfig) -> Result<Arc<dyn PageRenderer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledRenderer)),
        "pdftoppm" => Ok(Arc::new(PdftoppmRenderer::new(
            config.command.clone(),
            config.dpi,
        ))),
        other => bail!("Unknown render provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_pages_sorts_numerically() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["page-10.png", "page-02.png", "page-1.png", "notes.txt", "page-x.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pages: Vec<u32> = numbered_pages(dir.path())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(pages, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let renderer = PdftoppmRenderer::new("docchat-no-such-renderer", 72);
        assert!(renderer.render(b"%PDF-1.4").await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_renders_nothing() {
        assert!(DisabledRenderer.render(b"%PDF-1.4").await.unwrap().is_empty());
    }
}
