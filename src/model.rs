//! Document model: typed content blocks, media, pages and documents.
//!
//! ```text
//! ParsedDocument ──owns──▶ DocumentPage* ──owns──▶ Medium*
//!                                 │
//!                                 └──▶ ContentElement*  (Image.medium_id ─ weak ref ─▶ Medium.id)
//! ```
//!
//! ## Why a closed enum for content?
//!
//! A heading without a level, or a table with a `medium_id`, is not a
//! representable value: [`ContentElement`] carries exactly the fields each
//! variant needs. The serialised form is still the flat `{"type": …}` object
//! downstream consumers expect, thanks to serde's internal tagging.
//!
//! The untyped shape coming back from the model is [`RawContentElement`];
//! converting it is a pure function of the raw block and the page's
//! `image_number → medium id` lookup.

use crate::usage::LlmUsage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

// ── Content types ────────────────────────────────────────────────────────

/// Discriminant of a [`ContentElement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Heading,
    Text,
    Table,
    TableOfContents,
    Footer,
    Image,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::Heading,
        ContentType::Text,
        ContentType::Table,
        ContentType::TableOfContents,
        ContentType::Footer,
        ContentType::Image,
    ];

    /// Wire tag, e.g. `"table-of-contents"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Heading => "heading",
            ContentType::Text => "text",
            ContentType::Table => "table",
            ContentType::TableOfContents => "table-of-contents",
            ContentType::Footer => "footer",
            ContentType::Image => "image",
        }
    }

    /// Parse a wire tag, also accepting the legacy `heading-level-N` form.
    ///
    /// Returns the type plus the heading level encoded in the tag, if any.
    pub fn parse_tag(tag: &str) -> Option<(ContentType, Option<u32>)> {
        let tag = tag.trim().to_ascii_lowercase();
        if let Some(level) = tag.strip_prefix("heading-level-") {
            return level
                .parse::<u32>()
                .ok()
                .map(|l| (ContentType::Heading, Some(l)));
        }
        ContentType::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .map(|t| (t, None))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentType::parse_tag(s)
            .map(|(t, _)| t)
            .ok_or_else(|| BlockError::UnknownType(s.to_string()))
    }
}

// ── Content elements ─────────────────────────────────────────────────────

/// One typed content block of a page, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentElement {
    Heading { content: String, heading_level: u32 },
    Text { content: String },
    Table { content: String },
    TableOfContents { content: String },
    Footer { content: String },
    Image {
        content: String,
        #[serde(default)]
        medium_id: Option<String>,
    },
}

impl ContentElement {
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentElement::Heading { .. } => ContentType::Heading,
            ContentElement::Text { .. } => ContentType::Text,
            ContentElement::Table { .. } => ContentType::Table,
            ContentElement::TableOfContents { .. } => ContentType::TableOfContents,
            ContentElement::Footer { .. } => ContentType::Footer,
            ContentElement::Image { .. } => ContentType::Image,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ContentElement::Heading { content, .. }
            | ContentElement::Text { content }
            | ContentElement::Table { content }
            | ContentElement::TableOfContents { content }
            | ContentElement::Footer { content }
            | ContentElement::Image { content, .. } => content,
        }
    }

    pub fn heading_level(&self) -> Option<u32> {
        match self {
            ContentElement::Heading { heading_level, .. } => Some(*heading_level),
            _ => None,
        }
    }

    pub fn medium_id(&self) -> Option<&str> {
        match self {
            ContentElement::Image { medium_id, .. } => medium_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, ContentElement::Heading { .. })
    }
}

/// Why a raw block could not become a [`ContentElement`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("unknown content type '{0}'")]
    UnknownType(String),

    #[error("heading without heading_level")]
    MissingHeadingLevel,

    #[error("heading_level must be ≥ 1, got {0}")]
    InvalidHeadingLevel(i64),

    #[error("malformed block: {0}")]
    Malformed(String),
}

/// A content block exactly as the model returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawContentElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default, deserialize_with = "lenient_int")]
    pub heading_level: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub image_number: Option<i64>,
}

/// Integers as models actually write them: `2`, `2.0` or `"2"`.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let whole = |f: f64| (f.is_finite() && f.fract() == 0.0).then_some(f as i64);
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole))
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected an integer, got {n}"))),
        Some(Value::String(s)) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(whole))
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expected an integer, got '{s}'")))
        }
        Some(other) => Err(D::Error::custom(format!("expected an integer, got {other}"))),
    }
}

/// A converted block, plus the `image_number` it failed to resolve, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub element: ContentElement,
    pub dangling_image: Option<i64>,
}

impl RawContentElement {
    /// Decode one entry of `page_content_blocks`.
    pub fn from_value(value: &Value) -> Result<Self, BlockError> {
        serde_json::from_value(value.clone()).map_err(|e| BlockError::Malformed(e.to_string()))
    }

    /// Convert into a typed element.
    ///
    /// `image_lookup` maps the page-local caption index to the content id of
    /// the extracted image. An unresolvable `image_number` never fails the
    /// conversion: the element keeps its text and gets no `medium_id`.
    pub fn to_element(&self, image_lookup: &HashMap<u32, String>) -> Result<ContentElement, BlockError> {
        self.convert(image_lookup).map(|c| c.element)
    }

    /// [`to_element`](Self::to_element), also reporting a dangling image reference.
    pub fn convert(&self, image_lookup: &HashMap<u32, String>) -> Result<Conversion, BlockError> {
        let mut dangling_image = None;
        let (kind, tag_level) =
            ContentType::parse_tag(&self.kind).ok_or_else(|| BlockError::UnknownType(self.kind.clone()))?;
        let content = self.content.clone();

        let element = match kind {
            ContentType::Heading => {
                let level = match (self.heading_level, tag_level) {
                    (Some(l), _) => l,
                    (None, Some(l)) => l as i64,
                    (None, None) => return Err(BlockError::MissingHeadingLevel),
                };
                if level < 1 || level > u32::MAX as i64 {
                    return Err(BlockError::InvalidHeadingLevel(level));
                }
                ContentElement::Heading {
                    content,
                    heading_level: level as u32,
                }
            }
            ContentType::Text => ContentElement::Text { content },
            ContentType::Table => ContentElement::Table { content },
            ContentType::TableOfContents => ContentElement::TableOfContents { content },
            ContentType::Footer => ContentElement::Footer { content },
            ContentType::Image => {
                let medium_id = self.image_number.and_then(|n| {
                    let id = u32::try_from(n).ok().and_then(|k| image_lookup.get(&k)).cloned();
                    if id.is_none() {
                        warn!("image_number {} does not match any extracted image", n);
                        dangling_image = Some(n);
                    }
                    id
                });
                ContentElement::Image { content, medium_id }
            }
        };
        Ok(Conversion {
            element,
            dangling_image,
        })
    }
}

// ── Media ────────────────────────────────────────────────────────────────

/// An encoded image owned by a page, identified by a hash of its pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medium {
    pub id: String,
    pub mime_type: String,
    pub content_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Pages & documents ────────────────────────────────────────────────────

/// One successfully parsed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    /// 1-based, matches the source page order. Never renumbered.
    pub page_number: usize,
    pub content: Vec<ContentElement>,
    #[serde(default)]
    pub media: Vec<Medium>,
    #[serde(default)]
    pub raw_extracted_text: String,
    #[serde(default)]
    pub raw_llm_response: String,
    #[serde(default)]
    pub token_usage: LlmUsage,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Set when at least one block could not be converted.
    #[serde(default)]
    pub error: bool,
}

impl DocumentPage {
    pub fn headings(&self) -> impl Iterator<Item = &ContentElement> {
        self.content.iter().filter(|e| e.is_heading())
    }

    /// The page's blocks as a JSON array, or `""` for an empty page.
    ///
    /// This is the form prior pages take in the next page's prompt.
    pub fn content_to_string(&self) -> String {
        if self.content.is_empty() {
            return String::new();
        }
        serde_json::to_string(&self.content).unwrap_or_default()
    }

    pub fn medium(&self, id: &str) -> Option<&Medium> {
        self.media.iter().find(|m| m.id == id)
    }
}

/// A parsed document: identity plus the pages that parsed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub path: String,
    #[serde(default)]
    pub md5_sum: Option<String>,
    pub content: Vec<DocumentPage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ParsedDocument {
    /// Sum of all page usages. Computed on demand, never stored.
    pub fn token_usage(&self) -> LlmUsage {
        self.content.iter().map(|p| &p.token_usage).sum()
    }

    /// True when any emitted page is degraded.
    pub fn has_errors(&self) -> bool {
        self.content.iter().any(|p| p.error)
    }
}

/// Metadata extracted from the PDF without parsing content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    pub page_count: usize,
    #[serde(default)]
    pub pdf_version: String,
}

impl DocumentMetadata {
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
