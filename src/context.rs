//! Rolling prompt context.
//!
//! Multi-page documents stay coherent because every page prompt carries a
//! little of what came before: the last N headings (so heading levels stay
//! consistent) and, optionally, the last M parsed pages verbatim (so lists
//! and tables that run across a page break continue correctly).
//!
//! Both windows are fixed-capacity FIFOs owned by the document pipeline.
//! They are only extended with pages that parsed successfully, and only
//! after the page is finished, so page N+1 always sees exactly the context
//! produced by pages ≤ N. A capacity of 0 means "always empty".
//!
//! [`PromptContext`] is the data dictionary handed to the prompt renderers.
//! Unset or empty values are `None` so a template can test for presence and
//! drop a whole section instead of printing an empty heading.

use crate::config::ParserConfig;
use crate::model::{ContentElement, DocumentPage};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Fixed-capacity FIFO; pushing into a full window evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.push(item);
        }
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A heading remembered from an earlier page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorHeading {
    pub level: u32,
    pub content: String,
}

impl PriorHeading {
    /// Prompt form: `heading_level 2: 3.1 Scope`.
    pub fn render(&self) -> String {
        format!("heading_level {}: {}", self.level, self.content)
    }
}

/// Context threaded from page to page by the document pipeline.
#[derive(Debug, Clone)]
pub struct RollingContext {
    pub headings: RollingWindow<PriorHeading>,
    /// Prior pages as their serialised block lists.
    pub pages: RollingWindow<String>,
}

impl RollingContext {
    pub fn new(headings_n: usize, pages_n: usize) -> Self {
        Self {
            headings: RollingWindow::new(headings_n),
            pages: RollingWindow::new(pages_n),
        }
    }

    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(
            config.prompt.consider_last_headings_n,
            config.prompt.consider_last_parsed_pages_n,
        )
    }

    /// Fold a successfully parsed page into both windows.
    pub fn record(&mut self, page: &DocumentPage) {
        self.headings.extend(page.headings().filter_map(|h| match h {
            ContentElement::Heading { content, heading_level } => Some(PriorHeading {
                level: *heading_level,
                content: content.clone(),
            }),
            _ => None,
        }));
        if self.pages.capacity() > 0 {
            self.pages.push(page.content_to_string());
        }
    }

    pub fn rendered_headings(&self) -> Vec<String> {
        self.headings.iter().map(PriorHeading::render).collect()
    }

    pub fn rendered_pages(&self) -> Vec<String> {
        self.pages.iter().filter(|p| !p.is_empty()).cloned().collect()
    }
}

/// Everything a prompt template may reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromptContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_preamble: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_headings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_parsed_pages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_vision: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_parsed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_raw_parser_use_vision: Option<bool>,
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn non_empty_list(v: Vec<String>) -> Option<Vec<String>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

impl PromptContext {
    /// Static parts taken from the configuration.
    pub fn from_config(config: &ParserConfig) -> Self {
        Self {
            system_prompt_preamble: config.prompt.system_prompt_preamble.as_deref().and_then(non_empty),
            custom_instructions: non_empty_list(
                config
                    .prompt
                    .custom_instructions
                    .iter()
                    .filter(|i| !i.trim().is_empty())
                    .cloned()
                    .collect(),
            ),
            use_vision: Some(config.use_vision),
            llm_raw_parser_use_vision: Some(config.use_vision && config.raw_text.llm_use_vision),
            ..Default::default()
        }
    }

    /// Raw text, honouring `include_raw_extracted_text`.
    pub fn with_raw_text(mut self, config: &ParserConfig, raw: &str) -> Self {
        self.raw_extracted_text = if config.prompt.include_raw_extracted_text {
            non_empty(raw)
        } else {
            None
        };
        self
    }

    pub fn with_rolling(mut self, rolling: &RollingContext) -> Self {
        self.previous_headings = non_empty_list(rolling.rendered_headings());
        self.previous_parsed_pages = non_empty_list(rolling.rendered_pages());
        self
    }

    pub fn with_embedded_images(mut self, count: usize) -> Self {
        self.embedded_images = Some(count > 0);
        self
    }

    pub fn with_raw_parsed(mut self, raw_parsed: &str) -> Self {
        self.raw_parsed = non_empty(raw_parsed);
        self
    }

    /// Template view: only the keys that are set.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Section driver: `true` for `Some(true)`, `false` for `None`/`Some(false)`.
    pub(crate) fn flag(v: Option<bool>) -> bool {
        v.unwrap_or(false)
    }
}
