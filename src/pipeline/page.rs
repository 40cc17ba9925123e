//! Page pipeline: one page in, one [`DocumentPage`] (or nothing) out.
//!
//! ```text
//! gather-images ─▶ raw-text ─▶ generate ─▶ [improve] ─▶ parse ─▶ reconcile ─▶ emit
//!  (blocking)     (opt. LLM)    (LLM)        (LLM)
//! ```
//!
//! [`gather`] is the blocking half (pdfium, cropping, encoding) and runs in
//! `spawn_blocking`; [`PagePipeline::run`] is the async half that talks to
//! the model. The rolling context is only read here. Extending it is the
//! document pipeline's job, once the page is known to have succeeded.
//!
//! Outcomes:
//!
//! | primary call | answer parses | result                                  |
//! |--------------|---------------|-----------------------------------------|
//! | `None`       | n/a           | page dropped                            |
//! | ok           | no            | page emitted, no content, `error=true`  |
//! | ok           | partly        | page emitted, good blocks, `error=true` |
//! | ok           | fully         | page emitted                            |

use crate::config::{GenerationConfig, ParserConfig, RawTextStrategy};
use crate::context::{PromptContext, RollingContext};
use crate::error::PageError;
use crate::model::{ContentElement, DocumentPage, Medium};
use crate::pipeline::encode;
use crate::pipeline::extract::ImageExtractor;
use crate::pipeline::images::content_id;
use crate::pipeline::llm::{GenerationRequest, Llm, LlmImage};
use crate::pipeline::response::{parse_blocks, ParsedBlocks};
use crate::pipeline::source::{DocumentSource, RenderOptions};
use crate::prompts;
use crate::usage::LlmUsage;
use serde_json::{json, Map};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// An embedded image, encoded and captioned, ready for the prompt.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub caption_idx: u32,
    pub medium: Medium,
}

/// What the blocking stage hands to the async stage.
#[derive(Debug, Clone)]
pub struct GatheredPage {
    /// 1-based.
    pub page_number: usize,
    pub width_pts: f32,
    pub height_pts: f32,
    /// Locally extracted text layer.
    pub text: String,
    /// The full page render, when vision is on.
    pub page_image: Option<Medium>,
    /// Dense caption indices `1..=M`.
    pub images: Vec<PageImage>,
}

impl GatheredPage {
    /// Caption index → image id, as the response parser needs it.
    pub fn image_lookup(&self) -> HashMap<u32, String> {
        self.images
            .iter()
            .map(|i| (i.caption_idx, i.medium.id.clone()))
            .collect()
    }

    fn pool(&self) -> HashMap<&str, &Medium> {
        self.images.iter().map(|i| (i.medium.id.as_str(), &i.medium)).collect()
    }
}

/// Load page `index`, render it and extract its embedded images. Blocking.
pub fn gather(
    source: &dyn DocumentSource,
    index: usize,
    config: &ParserConfig,
    extractor: &dyn ImageExtractor,
) -> Result<GatheredPage, PageError> {
    let render = config.use_vision.then_some(RenderOptions {
        resolution: config.images.resolution,
        max_pixels: config.max_rendered_pixels,
    });
    let page = source.load_page(index, render).map_err(|detail| PageError::LoadFailed {
        page: index + 1,
        detail,
    })?;

    let format = config.images.image_format;
    let page_image = page.bitmap.as_ref().and_then(|bitmap| {
        encode::to_medium(bitmap, content_id(bitmap), format, None)
            .map_err(|e| warn!("Page {}: page render could not be encoded: {}", page.page_number, e))
            .ok()
    });

    let images = if config.use_vision && config.images.extract_images {
        let extracted = extractor.extract(&page, &config.images);
        // Encoding failures drop the image; captions are re-densified below.
        extracted
            .iter()
            .filter_map(|img| match img.to_medium(format, None) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("Page {}: image {} dropped: {}", page.page_number, img.caption_idx, e);
                    None
                }
            })
            .enumerate()
            .map(|(i, medium)| PageImage {
                caption_idx: i as u32 + 1,
                medium,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(GatheredPage {
        page_number: page.page_number,
        width_pts: page.width_pts,
        height_pts: page.height_pts,
        text: page.text,
        page_image,
        images,
    })
}

/// Result of running one page through the pipeline.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    Emitted(DocumentPage),
    Dropped(PageError),
}

/// The async half of the page pipeline.
pub struct PagePipeline<'a, L: Llm> {
    pub config: &'a ParserConfig,
    pub llm: &'a L,
}

impl<'a, L: Llm> PagePipeline<'a, L> {
    pub fn new(config: &'a ParserConfig, llm: &'a L) -> Self {
        Self { config, llm }
    }

    fn page_attachment(&self, page: &GatheredPage) -> Option<LlmImage> {
        if !self.config.use_vision {
            return None;
        }
        page.page_image.clone().map(LlmImage::page)
    }

    fn embedded_attachments(&self, page: &GatheredPage) -> Vec<LlmImage> {
        page.images
            .iter()
            .map(|i| LlmImage::embedded(i.medium.clone(), i.caption_idx, self.config.images.use_low_details))
            .collect()
    }

    /// Raw text for the prompt: local, or cleaned up by the model.
    async fn raw_text(&self, page: &GatheredPage, usage: &mut LlmUsage) -> String {
        if self.config.raw_text.strategy != RawTextStrategy::Llm {
            return page.text.clone();
        }
        // The clean-up call always sees the text layer, whatever the prompt settings.
        let ctx = PromptContext {
            raw_extracted_text: (!page.text.trim().is_empty()).then(|| page.text.clone()),
            ..PromptContext::from_config(self.config)
        };
        let page_image = if self.config.raw_text.llm_use_vision {
            self.page_attachment(page)
        } else {
            None
        };
        let request = GenerationRequest {
            system_prompt: None,
            user_prompt: prompts::raw_text_user_prompt(&ctx),
            page_image,
            embedded_images: Vec::new(),
            options: GenerationConfig {
                json_mode: false,
                ..self.config.generation.clone()
            },
        };
        match self.llm.generate(request).await {
            Some(response) => {
                *usage += response.usage;
                response.raw
            }
            None => {
                warn!(
                    "Page {}: raw text clean-up failed, using the local text layer",
                    page.page_number
                );
                page.text.clone()
            }
        }
    }

    /// Run the page through the model.
    pub async fn run(&self, page: &GatheredPage, rolling: &RollingContext) -> PageOutcome {
        let n = page.page_number;
        let mut usage = LlmUsage::default();

        let raw_text = self.raw_text(page, &mut usage).await;

        let ctx = PromptContext::from_config(self.config)
            .with_raw_text(self.config, &raw_text)
            .with_rolling(rolling)
            .with_embedded_images(page.images.len());

        let request = GenerationRequest {
            system_prompt: Some(prompts::extract_system_prompt(&ctx)),
            user_prompt: prompts::extract_user_prompt(&ctx),
            page_image: self.page_attachment(page),
            embedded_images: self.embedded_attachments(page),
            options: self.config.generation.clone(),
        };
        let Some(first) = self.llm.generate(request).await else {
            warn!("Page {}: generation failed, page dropped", n);
            return PageOutcome::Dropped(PageError::GenerationFailed { page: n });
        };
        usage += first.usage;
        let mut authoritative = first.raw;
        let mut improved = false;

        if self.config.post_improve {
            let ctx = ctx.clone().with_raw_parsed(&authoritative);
            let request = GenerationRequest {
                system_prompt: Some(prompts::improve_system_prompt(&ctx)),
                user_prompt: prompts::improve_user_prompt(&ctx),
                page_image: self.page_attachment(page),
                embedded_images: Vec::new(),
                options: self.config.generation.clone(),
            };
            match self.llm.generate(request).await {
                Some(second) => {
                    usage += second.usage;
                    authoritative = second.raw;
                    improved = true;
                }
                None => warn!("Page {}: improve pass failed, keeping the first answer", n),
            }
        }

        let lookup = page.image_lookup();
        let parsed = parse_blocks(&authoritative, &lookup).unwrap_or_else(|| {
            warn!("Page {}: no usable block list in the answer", n);
            ParsedBlocks {
                elements: Vec::new(),
                error: true,
            }
        });

        let (content, media) = reconcile(parsed.elements, page);

        let mut metadata = Map::new();
        metadata.insert("width_pts".into(), json!(page.width_pts));
        metadata.insert("height_pts".into(), json!(page.height_pts));
        metadata.insert("embedded_images".into(), json!(page.images.len()));
        metadata.insert("improved".into(), json!(improved));

        info!(
            "Page {}: {} blocks, {} media{}",
            n,
            content.len(),
            media.len(),
            if parsed.error { " (degraded)" } else { "" }
        );

        PageOutcome::Emitted(DocumentPage {
            page_number: n,
            content,
            media,
            raw_extracted_text: raw_text,
            raw_llm_response: authoritative,
            token_usage: usage,
            metadata,
            error: parsed.error,
        })
    }
}

/// Attach the referenced media and null out references to unknown ids.
///
/// Each medium takes the block's own text as description. An image
/// referenced twice is stored once.
pub fn reconcile(elements: Vec<ContentElement>, page: &GatheredPage) -> (Vec<ContentElement>, Vec<Medium>) {
    let pool = page.pool();
    let mut media: Vec<Medium> = Vec::new();
    let content = elements
        .into_iter()
        .map(|element| match element {
            ContentElement::Image {
                content,
                medium_id: Some(id),
            } => match pool.get(id.as_str()) {
                Some(medium) => {
                    if !media.iter().any(|m| m.id == id) {
                        media.push(Medium {
                            description: Some(content.clone()),
                            ..(*medium).clone()
                        });
                    }
                    ContentElement::Image {
                        content,
                        medium_id: Some(id),
                    }
                }
                None => {
                    debug!("Page {}: medium {} not in the page pool", page.page_number, id);
                    ContentElement::Image {
                        content,
                        medium_id: None,
                    }
                }
            },
            other => other,
        })
        .collect();
    (content, media)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::LlmResponse;
    use std::sync::Mutex;

    /// Replays canned answers and records every request.
    struct Scripted {
        answers: Mutex<Vec<Option<LlmResponse>>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(answers: Vec<Option<&str>>) -> Self {
            Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .rev()
                        .map(|a| {
                            a.map(|raw| LlmResponse {
                                raw: raw.to_string(),
                                usage: LlmUsage::new(100, 10),
                            })
                        })
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Llm for Scripted {
        async fn generate(&self, request: GenerationRequest) -> Option<LlmResponse> {
            self.seen.lock().unwrap().push(request);
            self.answers.lock().unwrap().pop().flatten()
        }
    }

    fn medium(id: &str) -> Medium {
        Medium {
            id: id.into(),
            mime_type: "image/png".into(),
            content_b64: "AAAA".into(),
            description: None,
        }
    }

    fn gathered(images: usize) -> GatheredPage {
        GatheredPage {
            page_number: 2,
            width_pts: 612.0,
            height_pts: 792.0,
            text: "Local text".into(),
            page_image: Some(medium("page")),
            images: (1..=images)
                .map(|i| PageImage {
                    caption_idx: i as u32,
                    medium: medium(&format!("img-{i}")),
                })
                .collect(),
        }
    }

    const TWO_IMAGES: &str = r#"{"page_content_blocks": [
        {"type": "heading", "content": "Results", "heading_level": 1},
        {"type": "image", "content": "Bar chart of revenue", "image_number": 2},
        {"type": "image", "content": "Unknown figure", "image_number": 5}
    ]}"#;

    #[tokio::test]
    async fn reconciles_media_and_flags_dangling_reference() {
        let config = ParserConfig::default();
        let llm = Scripted::new(vec![Some(TWO_IMAGES)]);
        let outcome = PagePipeline::new(&config, &llm)
            .run(&gathered(2), &RollingContext::new(10, 0))
            .await;
        let PageOutcome::Emitted(page) = outcome else {
            panic!("page should be emitted");
        };
        assert_eq!(page.page_number, 2);
        assert!(page.error);
        assert_eq!(page.content.len(), 3);
        assert_eq!(page.content[1].medium_id(), Some("img-2"));
        assert_eq!(page.content[2].medium_id(), None);
        assert_eq!(page.media.len(), 1);
        assert_eq!(page.media[0].description.as_deref(), Some("Bar chart of revenue"));
        assert_eq!(page.token_usage, LlmUsage::new(100, 10));

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].page_image.is_some());
        assert_eq!(seen[0].embedded_images.len(), 2);
        assert!(seen[0].user_text().contains("image_number = 2:"));
    }

    #[tokio::test]
    async fn failed_generation_drops_page() {
        let config = ParserConfig::default();
        let llm = Scripted::new(vec![None]);
        let outcome = PagePipeline::new(&config, &llm)
            .run(&gathered(0), &RollingContext::new(10, 0))
            .await;
        assert!(matches!(outcome, PageOutcome::Dropped(PageError::GenerationFailed { page: 2 })));
    }

    #[tokio::test]
    async fn malformed_answer_degrades_page() {
        let config = ParserConfig::default();
        let llm = Scripted::new(vec![Some("I am unable to help with that.")]);
        let PageOutcome::Emitted(page) = PagePipeline::new(&config, &llm)
            .run(&gathered(0), &RollingContext::new(10, 0))
            .await
        else {
            panic!("page should be emitted");
        };
        assert!(page.error);
        assert!(page.content.is_empty());
        assert_eq!(page.raw_llm_response, "I am unable to help with that.");
        assert_eq!(page.token_usage, LlmUsage::new(100, 10));
    }

    #[tokio::test]
    async fn one_malformed_block_of_five_degrades_page() {
        let config = ParserConfig::default();
        let answer = r#"{"page_content_blocks": [
            {"type": "heading", "content": "Maintenance", "heading_level": 1},
            {"type": "text", "content": "Check the seals monthly."},
            {"type": "heading", "content": "Intervals"},
            {"type": "table", "content": "| part | months |"},
            {"type": "footer", "content": "Rev. B"}
        ]}"#;
        let llm = Scripted::new(vec![Some(answer)]);
        let PageOutcome::Emitted(page) = PagePipeline::new(&config, &llm)
            .run(&gathered(0), &RollingContext::new(10, 0))
            .await
        else {
            panic!("page should be emitted");
        };
        assert!(page.error);
        let texts: Vec<_> = page.content.iter().map(|e| e.content()).collect();
        assert_eq!(texts, vec!["Maintenance", "Check the seals monthly.", "| part | months |", "Rev. B"]);
        assert_eq!(page.raw_llm_response, answer);
        assert_eq!(page.token_usage, LlmUsage::new(100, 10));
    }

    #[tokio::test]
    async fn improve_supersedes_and_adds_usage() {
        let config = ParserConfig::builder().post_improve(true).build().unwrap();
        let first = r#"{"page_content_blocks": [{"type": "text", "content": "draft"}]}"#;
        let second = r#"{"page_content_blocks": [{"type": "text", "content": "final"}]}"#;
        let llm = Scripted::new(vec![Some(first), Some(second)]);
        let PageOutcome::Emitted(page) = PagePipeline::new(&config, &llm)
            .run(&gathered(1), &RollingContext::new(10, 0))
            .await
        else {
            panic!("page should be emitted");
        };
        assert_eq!(page.content[0].content(), "final");
        assert_eq!(page.token_usage, LlmUsage::new(200, 20));
        let seen = llm.seen.lock().unwrap();
        assert!(seen[1].embedded_images.is_empty());
        assert!(seen[1].user_prompt.contains("draft"));
    }

    #[tokio::test]
    async fn failed_improve_keeps_first_answer() {
        let config = ParserConfig::builder().post_improve(true).build().unwrap();
        let first = r#"{"page_content_blocks": [{"type": "text", "content": "draft"}]}"#;
        let llm = Scripted::new(vec![Some(first), None]);
        let PageOutcome::Emitted(page) = PagePipeline::new(&config, &llm)
            .run(&gathered(0), &RollingContext::new(10, 0))
            .await
        else {
            panic!("page should be emitted");
        };
        assert_eq!(page.content[0].content(), "draft");
        assert_eq!(page.token_usage, LlmUsage::new(100, 10));
        assert!(!page.error);
    }

    #[tokio::test]
    async fn llm_raw_text_is_used_and_counted() {
        let config = ParserConfig::builder()
            .raw_text_strategy(RawTextStrategy::Llm)
            .build()
            .unwrap();
        let answer = r#"{"page_content_blocks": []}"#;
        let llm = Scripted::new(vec![Some("Cleaned text"), Some(answer)]);
        let PageOutcome::Emitted(page) = PagePipeline::new(&config, &llm)
            .run(&gathered(1), &RollingContext::new(10, 0))
            .await
        else {
            panic!("page should be emitted");
        };
        assert_eq!(page.raw_extracted_text, "Cleaned text");
        assert_eq!(page.token_usage, LlmUsage::new(200, 20));
        let seen = llm.seen.lock().unwrap();
        assert!(seen[0].system_prompt.is_none());
        assert!(!seen[0].options.json_mode);
        assert!(seen[0].embedded_images.is_empty());
        assert!(seen[1].user_prompt.contains("Cleaned text"));
    }

    #[tokio::test]
    async fn vision_off_sends_no_images() {
        let config = ParserConfig::builder().use_vision(false).build().unwrap();
        let mut page = gathered(0);
        page.page_image = None;
        let llm = Scripted::new(vec![Some(r#"{"page_content_blocks": []}"#)]);
        let _ = PagePipeline::new(&config, &llm).run(&page, &RollingContext::new(10, 0)).await;
        let seen = llm.seen.lock().unwrap();
        assert!(seen[0].page_image.is_none());
        assert!(seen[0].embedded_images.is_empty());
    }

    #[test]
    fn repeated_reference_stores_medium_once() {
        let elements = vec![
            ContentElement::Image {
                content: "first".into(),
                medium_id: Some("img-1".into()),
            },
            ContentElement::Image {
                content: "again".into(),
                medium_id: Some("img-1".into()),
            },
        ];
        let (content, media) = reconcile(elements, &gathered(1));
        assert_eq!(content.len(), 2);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].description.as_deref(), Some("first"));
    }
}
