//! Generation client: one multimodal call in, raw text plus usage out.
//!
//! The page pipeline talks to the model through the [`Llm`] trait only.
//! [`ProviderLlm`] is the production implementation on top of an
//! edgequake-llm `LLMProvider`; tests plug in scripted fakes.
//!
//! ## Failure contract
//!
//! `generate` never errors. A transport failure, a timeout or an empty
//! answer is logged and reported as `None`. Whether that drops the page or
//! merely keeps an earlier answer is for the caller to decide. There is no
//! retry here: a failed page is skipped and the document moves on.
//!
//! ## Message layout
//!
//! 1. **System message** (optional)
//! 2. **User message**: the rendered user prompt, followed by one line per
//!    attached image in attachment order (`Image of the full PDF page:`,
//!    `image_number = 1: …`), with the images attached in that same order.

use crate::config::{GenerationConfig, ParserConfig};
use crate::error::ParseError;
use crate::model::Medium;
use crate::pipeline::encode;
use crate::usage::LlmUsage;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Resolution hint attached to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDetail {
    High,
    Low,
    Auto,
}

impl ImageDetail {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageDetail::High => "high",
            ImageDetail::Low => "low",
            ImageDetail::Auto => "auto",
        }
    }
}

/// An image attachment with the text that introduces it.
#[derive(Debug, Clone)]
pub struct LlmImage {
    pub medium: Medium,
    pub detail: ImageDetail,
    pub description: String,
}

impl LlmImage {
    pub const PAGE_DESCRIPTION: &'static str = "Image of the full PDF page:";

    pub fn page(medium: Medium) -> Self {
        Self {
            medium,
            detail: ImageDetail::High,
            description: Self::PAGE_DESCRIPTION.to_string(),
        }
    }

    /// An enumerated embedded image, introduced as `image_number = K:`.
    pub fn embedded(medium: Medium, caption_idx: u32, low_detail: bool) -> Self {
        Self {
            medium,
            detail: if low_detail { ImageDetail::Low } else { ImageDetail::Auto },
            description: format!("image_number = {caption_idx}:"),
        }
    }

    fn to_image_data(&self) -> ImageData {
        encode::to_image_data(&self.medium, self.detail.as_str())
    }
}

/// Everything one generation call needs.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub page_image: Option<LlmImage>,
    pub embedded_images: Vec<LlmImage>,
    pub options: GenerationConfig,
}

impl GenerationRequest {
    /// Attachments in the order they are sent.
    pub fn images(&self) -> impl Iterator<Item = &LlmImage> {
        self.page_image.iter().chain(self.embedded_images.iter())
    }

    /// User prompt followed by the image introductions.
    pub fn user_text(&self) -> String {
        let mut text = self.user_prompt.clone();
        let mut images = self.images().peekable();
        if images.peek().is_some() {
            text.push_str("\n# Attached images, in order\n\n");
            for image in images {
                text.push_str(&image.description);
                text.push('\n');
            }
        }
        text
    }
}

/// Raw model output plus what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub raw: String,
    pub usage: LlmUsage,
}

/// A multimodal text-generation backend.
pub trait Llm: Send + Sync {
    /// `None` means "no result": the call failed or returned nothing usable.
    fn generate(&self, request: GenerationRequest) -> impl Future<Output = Option<LlmResponse>> + Send;
}

impl<L: Llm> Llm for Arc<L> {
    fn generate(&self, request: GenerationRequest) -> impl Future<Output = Option<LlmResponse>> + Send {
        (**self).generate(request)
    }
}

/// [`Llm`] backed by an edgequake-llm provider.
#[derive(Clone)]
pub struct ProviderLlm {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl ProviderLlm {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]).
    pub fn from_config(config: &ParserConfig) -> Result<Self, ParseError> {
        Ok(Self::new(
            resolve_provider(config)?,
            Duration::from_secs(config.api_timeout_secs),
        ))
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }
}

impl Llm for ProviderLlm {
    async fn generate(&self, request: GenerationRequest) -> Option<LlmResponse> {
        let start = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(ChatMessage::system(system));
        }
        let images: Vec<ImageData> = request.images().map(LlmImage::to_image_data).collect();
        let image_count = images.len();
        messages.push(ChatMessage::user_with_images(&request.user_text(), images));

        let options = build_options(&request.options);
        let response = match tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options))).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!("Generation call failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("Generation call timed out after {}s", self.timeout.as_secs());
                return None;
            }
        };

        if response.content.trim().is_empty() {
            warn!("Generation call returned an empty answer");
            return None;
        }

        debug!(
            "Generation: {} images, {} input tokens, {} output tokens, {:?}",
            image_count,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let usage = LlmUsage::new(response.prompt_tokens as u64, response.completion_tokens as u64)
            .with_model(self.provider.model());
        Some(LlmResponse {
            raw: response.content,
            usage,
        })
    }
}

/// Build `CompletionOptions` from the generation config.
fn build_options(config: &GenerationConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        response_format: config.json_mode.then(|| "json_object".to_string()),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ParseError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| ParseError::ProviderNotConfigured {
        provider: provider_name.to_string(),
        hint: format!("{e}"),
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, then full auto-detection.
pub fn resolve_provider(config: &ParserConfig) -> Result<Arc<dyn LLMProvider>, ParseError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| ParseError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn medium(id: &str) -> Medium {
        Medium {
            id: id.into(),
            mime_type: "image/png".into(),
            content_b64: "AAAA".into(),
            description: None,
        }
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&GenerationConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
        assert_eq!(opts.response_format.as_deref(), Some("json_object"));

        let plain = build_options(&GenerationConfig {
            json_mode: false,
            ..Default::default()
        });
        assert!(plain.response_format.is_none());
    }

    #[test]
    fn user_text_introduces_images_in_order() {
        let request = GenerationRequest {
            system_prompt: None,
            user_prompt: "Parse the page.\n".into(),
            page_image: Some(LlmImage::page(medium("p"))),
            embedded_images: vec![
                LlmImage::embedded(medium("a"), 1, true),
                LlmImage::embedded(medium("b"), 2, false),
            ],
            options: GenerationConfig::default(),
        };
        let text = request.user_text();
        assert!(text.ends_with("Image of the full PDF page:\nimage_number = 1:\nimage_number = 2:\n"));
        let details: Vec<&str> = request.images().map(|i| i.detail.as_str()).collect();
        assert_eq!(details, vec!["high", "low", "auto"]);
    }

    #[test]
    fn user_text_without_images_is_prompt() {
        let request = GenerationRequest {
            system_prompt: Some("sys".into()),
            user_prompt: "only text".into(),
            page_image: None,
            embedded_images: vec![],
            options: GenerationConfig::default(),
        };
        assert_eq!(request.user_text(), "only text");
    }
}
