//! Error types for the pagewise library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ParseError`] — **Fatal**: the document cannot be processed at all
//!   (bad input file, wrong password, provider not configured, invalid
//!   configuration). Returned as `Err(ParseError)` from the document-level
//!   entry points and from [`crate::parse::DocumentParserBuilder::build`].
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be produced
//!   (page failed to load, the primary generation call returned nothing).
//!   The page is dropped and the document carries on. These never escape the
//!   document pipeline; they are logged and reported to progress callbacks.
//!
//! Configuration errors are deliberately raised while the parser is built so
//! that a missing API key or an impossible option combination fails before
//! the first page is touched.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pagewise library.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Reading the source file failed after it was resolved.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Generation backend errors ─────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Image extraction errors ───────────────────────────────────────────
    /// The detector strategy was selected but no detector could be loaded.
    #[error("Layout detector unavailable: {0}")]
    DetectorUnavailable(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file (sidecar, marker, markdown).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sidecar or marker file exists but could not be decoded.
    #[error("Failed to decode '{path}': {detail}")]
    Deserialize { path: PathBuf, detail: String },

    /// A document could not be serialised to JSON.
    #[error("Failed to serialise document: {0}")]
    Serialize(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParseError {
    /// True for errors that describe the input document rather than the
    /// environment. A batch run skips such documents and keeps going.
    pub fn is_document_local(&self) -> bool {
        matches!(
            self,
            ParseError::FileNotFound { .. }
                | ParseError::PermissionDenied { .. }
                | ParseError::NotAPdf { .. }
                | ParseError::ReadFailed { .. }
                | ParseError::CorruptPdf { .. }
                | ParseError::PasswordRequired { .. }
                | ParseError::WrongPassword { .. }
                | ParseError::DownloadFailed { .. }
                | ParseError::DownloadTimeout { .. }
        )
    }
}

/// A non-fatal error for a single page.
///
/// A page that fails this way is dropped from the document; the rolling
/// context is not extended and the next page is processed as usual.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page could not be loaded or rasterised.
    #[error("Page {page}: failed to load: {detail}")]
    LoadFailed { page: usize, detail: String },

    /// The primary generation call returned no result.
    #[error("Page {page}: generation failed")]
    GenerationFailed { page: usize },

    /// A background task panicked while processing the page.
    #[error("Page {page}: worker task failed: {detail}")]
    TaskFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::LoadFailed { page, .. }
            | PageError::GenerationFailed { page }
            | PageError::TaskFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_pdf_display_shows_magic() {
        let e = ParseError::NotAPdf {
            path: PathBuf::from("/tmp/x.txt"),
            magic: *b"PK\x03\x04",
        };
        let msg = e.to_string();
        assert!(msg.contains("/tmp/x.txt"), "got: {msg}");
        assert!(msg.contains("80"), "got: {msg}");
    }

    #[test]
    fn provider_not_configured_carries_hint() {
        let e = ParseError::ProviderNotConfigured {
            provider: "auto".into(),
            hint: "Set OPENAI_API_KEY".into(),
        };
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn document_local_classification() {
        assert!(ParseError::CorruptPdf {
            path: "a.pdf".into(),
            detail: "xref".into()
        }
        .is_document_local());
        assert!(!ParseError::InvalidConfig("x".into()).is_document_local());
        assert!(!ParseError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: String::new()
        }
        .is_document_local());
    }

    #[test]
    fn page_error_reports_page() {
        assert_eq!(PageError::GenerationFailed { page: 7 }.page(), 7);
        let e = PageError::LoadFailed {
            page: 2,
            detail: "bad xobject".into(),
        };
        assert_eq!(e.page(), 2);
        assert!(e.to_string().contains("bad xobject"));
    }
}
