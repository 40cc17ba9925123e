//! # pagewise
//!
//! Parse PDF documents page by page into typed content blocks using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Text-layer extractors lose structure: headings look like body text,
//! tables become word soup, figures vanish. This crate shows the model each
//! page as an image, together with the page's text layer, the embedded
//! figures worth describing and the headings seen on earlier pages, and asks
//! it for a JSON list of blocks (`heading`, `text`, `table`,
//! `table-of-contents`, `footer`, `image`). Because each page sees what came
//! before it, heading levels stay consistent across a long document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file, URL or bytes; hash the content
//!  ├─ 2. Load     text layer, page bitmap, embedded image regions (pdfium)
//!  ├─ 3. Images   size/containment filter, crop, content-addressed ids
//!  ├─ 4. Prompt   instructions + prior headings + prior pages + text layer
//!  ├─ 5. VLM      one call per page (plus optional improve pass)
//!  ├─ 6. Parse    tolerant JSON extraction → ContentElement list
//!  └─ 7. Output   ParsedDocument, JSON sidecar, Markdown
//! ```
//!
//! Pages run strictly in order: page N's headings are in page N+1's prompt.
//! A page whose model call fails is dropped and the document continues.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagewise::{DocumentParser, ParserConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from EDGEQUAKE_LLM_PROVIDER / OPENAI_API_KEY / …
//!     let config = ParserConfig::builder().post_improve(true).build()?;
//!     let parser = DocumentParser::builder(config).build()?;
//!     let doc = parser.parse("document.pdf").await?;
//!     println!("{}", pagewise::to_markdown(&doc));
//!     eprintln!("tokens: {:?}", doc.token_usage().total_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagewise` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `onnx`  | off     | [`OnnxLayoutDetector`] for the detector image-extraction strategy |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagewise = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod markdown;
pub mod model;
pub mod parse;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;
pub mod usage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    DetectorConfig, Dimension, ExtractionMethod, GenerationConfig, ImageExtractionConfig, ImageFormat, ImageSize,
    ParserConfig, ParserConfigBuilder, PromptConfig, RawTextConfig, RawTextStrategy,
};
pub use context::{PriorHeading, PromptContext, RollingContext, RollingWindow};
pub use directory::{DirectoryOutcome, DirectoryParser, DirectorySummary};
pub use error::{PageError, ParseError};
pub use markdown::{page_to_markdown, to_markdown};
pub use model::{
    ContentElement, ContentType, DocumentMetadata, DocumentPage, Medium, ParsedDocument, RawContentElement,
};
pub use parse::{inspect_with, DocumentParser, DocumentParserBuilder};
pub use persist::{read_parsed, restore_duplicates, save_parsed, sidecar_path};
pub use pipeline::extract::{
    DetectorImageExtractor, Detection, ImageExtractor, LayoutDetector, RegionImageExtractor,
};
pub use pipeline::images::{filter_candidates, BBox, EmbeddedImage};
pub use pipeline::llm::{GenerationRequest, Llm, LlmResponse, ProviderLlm};
#[cfg(feature = "onnx")]
pub use pipeline::onnx::OnnxLayoutDetector;
pub use pipeline::source::{DocumentOpener, DocumentSource, LoadedPage, PdfiumOpener};
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
pub use stream::{CancellationFlag, PageStream};
pub use usage::{estimate_image_tokens, LlmUsage};
