//! Upload sniffing and PDF text extraction.
//!
//! Uploads are classified by their leading bytes, never by file name:
//! PDFs start with `%PDF-`, PNGs with the 8-byte PNG signature, JPEGs with
//! `FF D8 FF`. Anything else is rejected as unsupported.
//!
//! Extraction returns one string per page so chunks can cite page
//! numbers. It never panics into the caller: the parser runs on a blocking
//! thread and a panic there is reported as [`ExtractError::Pdf`].

use async_trait::async_trait;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Pdf,
    Image { mime_type: &'static str },
}

impl UploadKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            UploadKind::Pdf => MIME_PDF,
            UploadKind::Image { mime_type } => mime_type,
        }
    }
}

/// Classify an upload by its magic bytes.
///
/// Image signatures are anchored at offset 0 and checked first, so an
/// image whose metadata happens to contain `%PDF-` stays an image.
pub fn sniff_upload(bytes: &[u8]) -> Option<UploadKind> {
    if bytes.starts_with(PNG_SIGNATURE) {
        return Some(UploadKind::Image {
            mime_type: MIME_PNG,
        });
    }
    if bytes.starts_with(JPEG_SIGNATURE) {
        return Some(UploadKind::Image {
            mime_type: MIME_JPEG,
        });
    }
    // some writers emit a few junk bytes before the header
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5)
        .any(|w| w == b"%PDF-")
        .then_some(UploadKind::Pdf)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("document contains no extractable text")]
    NoText,
}

/// Turns a PDF into per-page text.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// One entry per page, in page order. Fails with
    /// [`ExtractError::NoText`] when every page is blank.
    async fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

/// [`PageExtractor`] backed by `pdf-extract`.
pub struct PdfExtractor;

#[async_trait]
impl PageExtractor for PdfExtractor {
    async fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let owned = bytes.to_vec();
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&owned)
                .map_err(|e| ExtractError::Pdf(e.to_string()))
        })
        .await
        .map_err(|_| ExtractError::Pdf("parser aborted on malformed input".to_string()))??;
        require_text(pages)
    }
}

/// Reject documents whose pages are all blank.
pub fn require_text(pages: Vec<String>) -> Result<Vec<String>, ExtractError> {
    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(ExtractError::NoText);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_pdf_png_and_jpeg() {
        assert_eq!(sniff_upload(b"%PDF-1.7\n..."), Some(UploadKind::Pdf));
        assert_eq!(
            sniff_upload(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(UploadKind::Image {
                mime_type: MIME_PNG
            })
        );
        assert_eq!(
            sniff_upload(&[0xFF, 0xD8, 0xFF, 0xE0]).map(|k| k.mime_type()),
            Some(MIME_JPEG)
        );
    }

    #[test]
    fn png_with_pdf_marker_in_text_chunk_is_an_image() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(b"\x00\x00\x00\x12tEXtComment\x00%PDF-1.4 notes");
        assert_eq!(
            sniff_upload(&png),
            Some(UploadKind::Image {
                mime_type: MIME_PNG
            })
        );

        let mut jpeg = JPEG_SIGNATURE.to_vec();
        jpeg.extend_from_slice(b"\xE1 Exif %PDF-");
        assert_eq!(sniff_upload(&jpeg).map(|k| k.mime_type()), Some(MIME_JPEG));
    }

    #[test]
    fn rejects_unknown_bytes() {
        assert_eq!(sniff_upload(b"GIF89a"), None);
        assert_eq!(sniff_upload(b""), None);
        assert_eq!(sniff_upload(b"plain text that mentions a PDF"), None);
    }

    #[tokio::test]
    async fn invalid_pdf_returns_error() {
        let err = PdfExtractor.pages(b"%PDF-1.4\n1 0 obj << /Type").await.unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn blank_pages_are_rejected() {
        assert_eq!(
            require_text(vec![" ".to_string(), "\n".to_string()]),
            Err(ExtractError::NoText)
        );
        assert!(require_text(vec!["".to_string(), "text".to_string()]).is_ok());
    }
}
