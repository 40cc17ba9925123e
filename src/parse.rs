//! Document-level entry points.
//!
//! [`DocumentParser`] bundles everything resolved once per deployment (the
//! configuration, the generation backend, the document opener and the
//! image-extraction strategy) and exposes the per-document operations:
//!
//! | operation               | model calls | result                          |
//! |-------------------------|-------------|---------------------------------|
//! | [`parse`]               | yes         | whole [`ParsedDocument`]        |
//! | [`parse_paged`]         | yes         | lazy [`PageStream`]             |
//! | [`parse_bytes`]         | yes         | whole document from memory      |
//! | [`get_number_of_pages`] | no          | page count                      |
//! | [`inspect`]             | no          | [`DocumentMetadata`]            |
//! | [`estimate_usage`]      | no          | estimated [`LlmUsage`]          |
//!
//! Configuration mistakes (no provider, detector strategy without a model,
//! invalid bounds) surface from [`DocumentParserBuilder::build`], before any
//! document is opened.
//!
//! [`parse`]: DocumentParser::parse
//! [`parse_paged`]: DocumentParser::parse_paged
//! [`parse_bytes`]: DocumentParser::parse_bytes
//! [`get_number_of_pages`]: DocumentParser::get_number_of_pages
//! [`inspect`]: DocumentParser::inspect
//! [`estimate_usage`]: DocumentParser::estimate_usage

use crate::config::ParserConfig;
use crate::error::ParseError;
use crate::model::{DocumentMetadata, ParsedDocument};
use crate::persist;
use crate::pipeline::extract::{extractor_for, ImageExtractor, LayoutDetector};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::llm::{Llm, ProviderLlm};
use crate::pipeline::source::{DocumentOpener, DocumentSource, PdfiumOpener, RenderOptions};
use crate::stream::{page_stream, CancellationFlag, OpenedDocument, PageStream};
use crate::usage::{EstimateConfig, LlmUsage};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Page-wise document parser.
///
/// # Example
/// ```rust,no_run
/// use pagewise::{DocumentParser, ParserConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ParserConfig::builder().consider_last_headings_n(5).build()?;
///     let parser = DocumentParser::builder(config).build()?;
///     let doc = parser.parse("report.pdf").await?;
///     for page in &doc.content {
///         println!("page {}: {} blocks", page.page_number, page.content.len());
///     }
///     eprintln!("tokens: {:?}", doc.token_usage().total_tokens);
///     Ok(())
/// }
/// ```
pub struct DocumentParser<L: Llm = ProviderLlm> {
    config: Arc<ParserConfig>,
    llm: Arc<L>,
    opener: Arc<dyn DocumentOpener>,
    extractor: Arc<dyn ImageExtractor>,
    cancel: CancellationFlag,
}

impl DocumentParser<ProviderLlm> {
    pub fn builder(config: ParserConfig) -> DocumentParserBuilder {
        DocumentParserBuilder::new(config)
    }
}

/// Builder for [`DocumentParser`].
pub struct DocumentParserBuilder {
    config: ParserConfig,
    opener: Option<Arc<dyn DocumentOpener>>,
    detector: Option<Arc<dyn LayoutDetector>>,
    extractor: Option<Arc<dyn ImageExtractor>>,
    cancel: Option<CancellationFlag>,
}

impl DocumentParserBuilder {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            opener: None,
            detector: None,
            extractor: None,
            cancel: None,
        }
    }

    /// Replace the pdfium opener.
    pub fn opener(mut self, opener: Arc<dyn DocumentOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Layout detector for the detector strategy, instead of a model path.
    pub fn detector(mut self, detector: Arc<dyn LayoutDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Bypass strategy selection entirely.
    pub fn extractor(mut self, extractor: Arc<dyn ImageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Build with the edgequake-llm provider resolved from the configuration.
    pub fn build(self) -> Result<DocumentParser<ProviderLlm>, ParseError> {
        let llm = ProviderLlm::from_config(&self.config)?;
        info!(model = %llm.provider().model(), "Using configured LLM provider");
        self.build_with_llm(llm)
    }

    /// Build with a caller-supplied generation backend.
    pub fn build_with_llm<L: Llm>(self, llm: L) -> Result<DocumentParser<L>, ParseError> {
        let extractor = match self.extractor {
            Some(e) => e,
            None => extractor_for(&self.config.images, self.detector)?,
        };
        Ok(DocumentParser {
            config: Arc::new(self.config),
            llm: Arc::new(llm),
            opener: self.opener.unwrap_or_else(|| Arc::new(PdfiumOpener)),
            extractor,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Metadata-only operations don't need a backend.
pub(crate) async fn open_source(
    opener: &Arc<dyn DocumentOpener>,
    path: &Path,
    password: Option<&str>,
) -> Result<Arc<dyn DocumentSource>, ParseError> {
    let opener = Arc::clone(opener);
    let path = path.to_path_buf();
    let password = password.map(str::to_string);
    tokio::task::spawn_blocking(move || opener.open(&path, password.as_deref()))
        .await
        .map_err(|e| ParseError::Internal(format!("Task join error: {}", e)))?
}

impl<L: Llm + 'static> DocumentParser<L> {
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// The flag this parser checks between pages.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    async fn open(&self, resolved: &ResolvedInput) -> Result<Arc<dyn DocumentSource>, ParseError> {
        open_source(&self.opener, resolved.path(), self.config.password.as_deref()).await
    }

    /// Parse a path or URL page by page, collecting every emitted page.
    ///
    /// Dropped pages are absent; the others keep their source page numbers.
    /// With `save_sidecar` set, local inputs get a `<stem>.parsed.json`.
    pub async fn parse(&self, input: &str) -> Result<ParsedDocument, ParseError> {
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        let sidecar_target = match &resolved {
            ResolvedInput::Local(p) => Some(p.clone()),
            ResolvedInput::Temporary { .. } => None,
        };
        let doc = self.parse_resolved(input.to_string(), resolved).await?;

        if self.config.save_sidecar {
            match sidecar_target {
                Some(source) => {
                    let written = persist::save_parsed(&source, &doc)?;
                    info!("Saved {}", written.display());
                }
                None => warn!("Not saving a sidecar for non-local input {}", input),
            }
        }
        Ok(doc)
    }

    /// Parse an in-memory PDF.
    pub async fn parse_bytes(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        let resolved = input::resolve_bytes(bytes)?;
        self.parse_resolved("<memory>".to_string(), resolved).await
    }

    async fn parse_resolved(&self, path: String, resolved: ResolvedInput) -> Result<ParsedDocument, ParseError> {
        let start = Instant::now();
        info!("Parsing {}", path);
        let md5_sum = md5_of(resolved.path()).await?;
        let source = self.open(&resolved).await?;
        let total = source.page_count();

        let mut metadata = source.metadata().to_map();
        let stream = self.stream_for(path.clone(), source, resolved);
        let results: Vec<_> = stream.collect().await;
        let processed = results.len();
        let content: Vec<_> = results.into_iter().flatten().collect();

        if processed < total && self.cancel.is_cancelled() {
            metadata.insert("cancelled".into(), Value::Bool(true));
        }
        info!(
            "Parsed {}: {}/{} pages emitted in {:.1}s",
            path,
            content.len(),
            total,
            start.elapsed().as_secs_f64()
        );

        Ok(ParsedDocument {
            path,
            md5_sum: Some(md5_sum),
            content,
            metadata,
        })
    }

    fn stream_for(&self, path: String, source: Arc<dyn DocumentSource>, resolved: ResolvedInput) -> PageStream {
        page_stream(OpenedDocument {
            path,
            source,
            config: Arc::clone(&self.config),
            llm: Arc::clone(&self.llm),
            extractor: Arc::clone(&self.extractor),
            cancel: self.cancel.clone(),
            input: Some(resolved),
        })
    }

    /// Stream pages of a path or URL as they are parsed.
    ///
    /// Yields `Some(page)` for emitted pages and `None` for dropped ones.
    pub async fn parse_paged(&self, input: &str) -> Result<PageStream, ParseError> {
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        let source = self.open(&resolved).await?;
        Ok(self.stream_for(input.to_string(), source, resolved))
    }

    /// Page count without parsing content.
    pub async fn get_number_of_pages(&self, input: &str) -> Result<usize, ParseError> {
        Ok(self.inspect(input).await?.page_count)
    }

    /// Document metadata without parsing content.
    pub async fn inspect(&self, input: &str) -> Result<DocumentMetadata, ParseError> {
        inspect_with(&self.opener, input, &self.config).await
    }

    /// Estimate what parsing `input` would cost, without calling the model.
    ///
    /// Renders and extracts every page like a real run so the image counts
    /// match; text tokens come from the local text layer.
    pub async fn estimate_usage(&self, input: &str) -> Result<LlmUsage, ParseError> {
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        let source = self.open(&resolved).await?;
        let config = Arc::clone(&self.config);
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || estimate_pages(&*source, &config, &*extractor))
            .await
            .map_err(|e| ParseError::Internal(format!("Task join error: {}", e)))
    }
}

/// Metadata of `input`, opened with `opener`.
pub async fn inspect_with(
    opener: &Arc<dyn DocumentOpener>,
    input: &str,
    config: &ParserConfig,
) -> Result<DocumentMetadata, ParseError> {
    let resolved = input::resolve_input(input, config.download_timeout_secs).await?;
    let source = open_source(opener, resolved.path(), config.password.as_deref()).await?;
    Ok(source.metadata().clone())
}

async fn md5_of(path: &Path) -> Result<String, ParseError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || input::md5_file(&path))
        .await
        .map_err(|e| ParseError::Internal(format!("Task join error: {}", e)))?
}

fn estimate_pages(source: &dyn DocumentSource, config: &ParserConfig, extractor: &dyn ImageExtractor) -> LlmUsage {
    let estimate = EstimateConfig::default();
    let render = config.use_vision.then_some(RenderOptions {
        resolution: config.images.resolution,
        max_pixels: config.max_rendered_pixels,
    });
    let calls_per_page = if config.post_improve { 2 } else { 1 };

    (0..source.page_count())
        .filter_map(|index| match source.load_page(index, render) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!("Page {} skipped in estimate: {}", index + 1, e);
                None
            }
        })
        .map(|page| {
            let mut dims: Vec<(u32, u32)> = Vec::new();
            if let Some(bitmap) = &page.bitmap {
                dims.push((bitmap.width(), bitmap.height()));
                if config.images.extract_images {
                    dims.extend(
                        extractor
                            .extract(&page, &config.images)
                            .iter()
                            .map(|i| (i.image.width(), i.image.height())),
                    );
                }
            }
            let text_chars = page.text.chars().count();
            let one = estimate.page_usage(text_chars, &dims, config.images.use_low_details);
            debug!("Page {} estimate: {:?}", page.page_number, one);
            (0..calls_per_page).map(|_| one.clone()).sum::<LlmUsage>()
        })
        .sum()
}
