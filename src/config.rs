//! Configuration types for page-wise document parsing.
//!
//! All parsing behaviour is controlled through [`ParserConfig`], built via
//! its [`ParserConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across tasks, serialise the serialisable parts
//! for logging, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A thirty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest. Sub-configs (`images`, `prompt`,
//! `raw_text`, `generation`) are plain serde structs so they can also be
//! loaded from JSON and dropped into the builder wholesale.

use crate::error::ParseError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Points per inch in PDF user space.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Configuration for parsing a document.
///
/// Built via [`ParserConfig::builder()`] or using [`ParserConfig::default()`].
///
/// # Example
/// ```rust
/// use pagewise::ParserConfig;
///
/// let config = ParserConfig::builder()
///     .resolution(200)
///     .consider_last_headings_n(5)
///     .custom_instruction("Keep footnotes as text blocks")
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ParserConfig {
    /// Send the page render (and embedded images) to the model. Default: true.
    ///
    /// With vision off the model only sees the raw extracted text, which is
    /// cheap but loses layout, tables drawn as graphics, and figures.
    pub use_vision: bool,

    /// Run a second "improve" pass over the first answer. Default: false.
    ///
    /// Roughly doubles cost per page. A failed improve call keeps the first
    /// answer; a successful one replaces it.
    pub post_improve: bool,

    /// How the raw page text fed to the prompt is produced.
    pub raw_text: RawTextConfig,

    /// Prompt assembly: preamble, instructions and rolling-context sizes.
    pub prompt: PromptConfig,

    /// Embedded-image extraction and filtering.
    pub images: ImageExtractionConfig,

    /// Sampling options for every generation call.
    pub generation: GenerationConfig,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4096.
    ///
    /// A safety cap independent of resolution: a 300-DPI render of an A0
    /// poster would otherwise allocate hundreds of megabytes.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Per generation call timeout in seconds. Default: 120.
    ///
    /// A call that times out counts as "no result": the page is dropped for
    /// the primary call, the first answer is kept for the improve call.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Write a `<stem>.parsed.json` sidecar after each successful parse. Default: false.
    pub save_sidecar: bool,

    /// Receives per-page progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            use_vision: true,
            post_improve: false,
            raw_text: RawTextConfig::default(),
            prompt: PromptConfig::default(),
            images: ImageExtractionConfig::default(),
            generation: GenerationConfig::default(),
            max_rendered_pixels: 4096,
            model: None,
            provider_name: None,
            provider: None,
            password: None,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            save_sidecar: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("use_vision", &self.use_vision)
            .field("post_improve", &self.post_improve)
            .field("raw_text", &self.raw_text)
            .field("prompt", &self.prompt)
            .field("images", &self.images)
            .field("generation", &self.generation)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("save_sidecar", &self.save_sidecar)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ParseProgressCallback>"),
            )
            .finish()
    }
}

impl ParserConfig {
    /// Create a new builder for `ParserConfig`.
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder {
            config: Self::default(),
        }
    }

    /// Pixels per PDF point at the configured image resolution.
    pub fn pixels_per_point(&self) -> f32 {
        self.images.resolution as f32 / POINTS_PER_INCH
    }
}

/// Builder for [`ParserConfig`].
#[derive(Debug)]
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl ParserConfigBuilder {
    pub fn use_vision(mut self, v: bool) -> Self {
        self.config.use_vision = v;
        self
    }

    pub fn post_improve(mut self, v: bool) -> Self {
        self.config.post_improve = v;
        self
    }

    pub fn raw_text(mut self, raw_text: RawTextConfig) -> Self {
        self.config.raw_text = raw_text;
        self
    }

    pub fn raw_text_strategy(mut self, strategy: RawTextStrategy) -> Self {
        self.config.raw_text.strategy = strategy;
        self
    }

    pub fn prompt(mut self, prompt: PromptConfig) -> Self {
        self.config.prompt = prompt;
        self
    }

    pub fn system_prompt_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.config.prompt.system_prompt_preamble = Some(preamble.into());
        self
    }

    /// Append one deployment-specific instruction to the prompts.
    pub fn custom_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.prompt.custom_instructions.push(instruction.into());
        self
    }

    pub fn consider_last_headings_n(mut self, n: usize) -> Self {
        self.config.prompt.consider_last_headings_n = n;
        self
    }

    pub fn consider_last_parsed_pages_n(mut self, n: usize) -> Self {
        self.config.prompt.consider_last_parsed_pages_n = n;
        self
    }

    pub fn include_raw_extracted_text(mut self, v: bool) -> Self {
        self.config.prompt.include_raw_extracted_text = v;
        self
    }

    pub fn images(mut self, images: ImageExtractionConfig) -> Self {
        self.config.images = images;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.images.extract_images = v;
        self
    }

    pub fn extraction_method(mut self, method: ExtractionMethod) -> Self {
        self.config.images.method = method;
        self
    }

    pub fn min_image_size(mut self, size: Option<ImageSize>) -> Self {
        self.config.images.min_size = size;
        self
    }

    pub fn max_image_size(mut self, size: Option<ImageSize>) -> Self {
        self.config.images.max_size = size;
        self
    }

    pub fn exclude_fully_contained(mut self, v: bool) -> Self {
        self.config.images.exclude_fully_contained = v;
        self
    }

    pub fn max_images_per_page(mut self, n: usize) -> Self {
        self.config.images.max_images_per_page = n;
        self
    }

    pub fn use_low_details(mut self, v: bool) -> Self {
        self.config.images.use_low_details = v;
        self
    }

    /// Rendering resolution in DPI. Clamped to 72–600.
    pub fn resolution(mut self, dpi: u32) -> Self {
        self.config.images.resolution = dpi.clamp(72, 600);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.images.image_format = format;
        self
    }

    /// Select the detector strategy with an ONNX layout model at `path`.
    pub fn detector_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.images.method = ExtractionMethod::Detector;
        self.config.images.detector.model_path = Some(path.into());
        self
    }

    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.images.detector = detector;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.generation.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.generation.max_tokens = n;
        self
    }

    pub fn json_mode(mut self, v: bool) -> Self {
        self.config.generation.json_mode = v;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn save_sidecar(mut self, v: bool) -> Self {
        self.config.save_sidecar = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParserConfig, ParseError> {
        let c = &self.config;
        let images = &c.images;
        if images.resolution < 72 || images.resolution > 600 {
            return Err(ParseError::InvalidConfig(format!(
                "resolution must be 72–600 DPI, got {}",
                images.resolution
            )));
        }
        if images.extract_images && images.max_images_per_page == 0 {
            return Err(ParseError::InvalidConfig(
                "max_images_per_page must be ≥ 1 when image extraction is enabled".into(),
            ));
        }
        for (name, size) in [("min_size", &images.min_size), ("max_size", &images.max_size)] {
            if let Some(size) = size {
                size.validate().map_err(|e| ParseError::InvalidConfig(format!("{name}: {e}")))?;
            }
        }
        let det = &images.detector;
        if !(0.0..=1.0).contains(&det.conf_threshold) || !(0.0..=1.0).contains(&det.iou_threshold) {
            return Err(ParseError::InvalidConfig(
                "detector thresholds must be within 0.0–1.0".into(),
            ));
        }
        if det.input_size < 32 {
            return Err(ParseError::InvalidConfig(format!(
                "detector input_size must be ≥ 32, got {}",
                det.input_size
            )));
        }
        if c.generation.max_tokens == 0 {
            return Err(ParseError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Sub-configs ──────────────────────────────────────────────────────────

/// Where the raw page text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawTextStrategy {
    /// Text layer extracted by pdfium. (default)
    #[default]
    Local,
    /// Text layer cleaned up by an extra generation call.
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTextConfig {
    pub strategy: RawTextStrategy,
    /// Attach the page render to the clean-up call. Default: true.
    pub llm_use_vision: bool,
}

impl Default for RawTextConfig {
    fn default() -> Self {
        Self {
            strategy: RawTextStrategy::Local,
            llm_use_vision: true,
        }
    }
}

/// Prompt assembly settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Replaces the default "You are an expert…" opening of system prompts.
    pub system_prompt_preamble: Option<String>,
    /// Extra bullet points appended to the instructions section.
    pub custom_instructions: Vec<String>,
    /// Size of the rolling window of prior headings. 0 disables it. Default: 10.
    pub consider_last_headings_n: usize,
    /// Size of the rolling window of prior parsed pages. 0 disables it. Default: 0.
    ///
    /// Prior pages are sent verbatim as JSON, so every slot adds roughly one
    /// page worth of request tokens to each call.
    pub consider_last_parsed_pages_n: usize,
    /// Put the locally extracted text into the prompt. Default: true.
    pub include_raw_extracted_text: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt_preamble: None,
            custom_instructions: Vec::new(),
            consider_last_headings_n: 10,
            consider_last_parsed_pages_n: 0,
            include_raw_extracted_text: true,
        }
    }
}

/// Sampling options shared by all generation calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Default: 0.1. Low temperature keeps transcription faithful.
    pub temperature: f32,
    /// Default: 4096. Dense pages with tables need well over 2 000.
    pub max_tokens: usize,
    /// Ask the backend to constrain output to a JSON object. Default: true.
    pub json_mode: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
            json_mode: true,
        }
    }
}

/// How embedded-image candidates are found on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Image objects placed on the page, cropped from the page render. (default)
    #[default]
    Regions,
    /// Figure regions found by a layout-detection model on the page render.
    Detector,
}

/// Encoding used for media payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub(crate) fn as_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

/// One side of an [`ImageSize`] bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// PDF points (1/72 inch), scaled to pixels at the configured resolution.
    Points(f32),
    /// Fraction of the page's extent in the same direction.
    Relative(f32),
}

impl Dimension {
    /// Resolve to pixels given the page extent in pixels and the pixel scale.
    pub fn to_pixels(self, page_extent_px: f32, pixels_per_point: f32) -> f32 {
        match self {
            Dimension::Points(pt) => pt * pixels_per_point,
            Dimension::Relative(f) => f * page_extent_px,
        }
    }
}

/// A width/height bound used by the relevance filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: Dimension,
    pub height: Dimension,
}

impl ImageSize {
    pub fn points(width: f32, height: f32) -> Self {
        Self {
            width: Dimension::Points(width),
            height: Dimension::Points(height),
        }
    }

    pub fn relative(width: f32, height: f32) -> Self {
        Self {
            width: Dimension::Relative(width),
            height: Dimension::Relative(height),
        }
    }

    /// Absolute `(width, height)` in pixels for a page of the given pixel size.
    pub fn to_pixels(&self, page_width_px: f32, page_height_px: f32, pixels_per_point: f32) -> (f32, f32) {
        (
            self.width.to_pixels(page_width_px, pixels_per_point),
            self.height.to_pixels(page_height_px, pixels_per_point),
        )
    }

    fn validate(&self) -> Result<(), String> {
        for d in [self.width, self.height] {
            match d {
                Dimension::Points(v) if !(v >= 0.0 && v.is_finite()) => {
                    return Err(format!("absolute size must be ≥ 0, got {v}"))
                }
                Dimension::Relative(f) if !(0.0..=1.0).contains(&f) => {
                    return Err(format!("relative size must be within 0.0–1.0, got {f}"))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Settings for the detector extraction strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX layout model (requires the `onnx` feature).
    pub model_path: Option<PathBuf>,
    /// The page render is scaled so its longer side equals this. Default: 800.
    pub input_size: u32,
    /// Detections below this confidence are ignored. Default: 0.5.
    pub conf_threshold: f32,
    /// Overlap above which the weaker of two same-class boxes is dropped. Default: 0.4.
    pub iou_threshold: f32,
    /// Padding added around each detected box, in PDF points. Default: 10.
    pub margin: f32,
    /// Class ids treated as figures (image, chart, seal). Default: `[1, 16, 17]`.
    pub figure_classes: Vec<usize>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: 800,
            conf_threshold: 0.5,
            iou_threshold: 0.4,
            margin: 10.0,
            figure_classes: vec![1, 16, 17],
        }
    }
}

/// Embedded-image extraction and relevance filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageExtractionConfig {
    /// Extract embedded images at all (needs vision). Default: true.
    pub extract_images: bool,
    pub method: ExtractionMethod,
    /// Candidates narrower or shorter than this are dropped. Default: 20×20 pt.
    pub min_size: Option<ImageSize>,
    /// Candidates wider or taller than this are dropped. Default: 90 % × 90 % of the page.
    pub max_size: Option<ImageSize>,
    /// Drop candidates lying entirely inside another candidate. Default: true.
    pub exclude_fully_contained: bool,
    /// Keep at most this many of the largest candidates. Default: 10.
    pub max_images_per_page: usize,
    /// Send embedded images with low detail. Default: true.
    pub use_low_details: bool,
    /// Rendering resolution in DPI. Default: 300.
    pub resolution: u32,
    pub image_format: ImageFormat,
    pub detector: DetectorConfig,
}

impl Default for ImageExtractionConfig {
    fn default() -> Self {
        Self {
            extract_images: true,
            method: ExtractionMethod::Regions,
            min_size: Some(ImageSize::points(20.0, 20.0)),
            max_size: Some(ImageSize::relative(0.9, 0.9)),
            exclude_fully_contained: true,
            max_images_per_page: 10,
            use_low_details: true,
            resolution: 300,
            image_format: ImageFormat::Png,
            detector: DetectorConfig::default(),
        }
    }
}
