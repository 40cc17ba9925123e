//! Response parser: noisy model text → typed content blocks.
//!
//! Models wrap their JSON in chatter ("Sure! Here is…") or code fences, so
//! the parser takes the span from the first `{` to the last `}` and decodes
//! only that. Nothing here panics or returns `Err`: a bad answer becomes
//! `None`, a bad block becomes a flagged page with the other blocks intact.

use crate::model::{ContentElement, RawContentElement};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Key of the block list in the response object.
pub const BLOCKS_KEY: &str = "page_content_blocks";

/// Span from the first `{` to the last `}`, if any.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Decode the JSON object embedded in `raw`.
pub fn parse_response(raw: &str) -> Option<Value> {
    let Some(json) = extract_json(raw) else {
        warn!("Model response contains no JSON object");
        return None;
    };
    match serde_json::from_str::<Value>(json) {
        Ok(v @ Value::Object(_)) => Some(v),
        Ok(_) => None,
        Err(e) => {
            warn!("Model response is not valid JSON: {}", e);
            None
        }
    }
}

/// The raw block list of a decoded response.
pub fn block_list(response: &Value) -> Option<&[Value]> {
    match response.get(BLOCKS_KEY) {
        Some(Value::Array(blocks)) => Some(blocks.as_slice()),
        _ => {
            warn!("Model response has no '{}' array", BLOCKS_KEY);
            None
        }
    }
}

/// Conversion result of one page's block list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBlocks {
    pub elements: Vec<ContentElement>,
    /// At least one block failed to convert or referenced an unknown image.
    pub error: bool,
}

/// Convert every raw block, skipping the ones that fail.
///
/// `image_lookup` maps caption index → extracted image id.
pub fn convert_blocks(blocks: &[Value], image_lookup: &HashMap<u32, String>) -> ParsedBlocks {
    let mut parsed = ParsedBlocks {
        elements: Vec::with_capacity(blocks.len()),
        error: false,
    };
    for (i, value) in blocks.iter().enumerate() {
        let converted = RawContentElement::from_value(value).and_then(|raw| raw.convert(image_lookup));
        match converted {
            Ok(c) => {
                if c.dangling_image.is_some() {
                    parsed.error = true;
                }
                parsed.elements.push(c.element);
            }
            Err(e) => {
                warn!("Skipping content block {}: {}", i + 1, e);
                parsed.error = true;
            }
        }
    }
    debug!(
        "Converted {} of {} content blocks",
        parsed.elements.len(),
        blocks.len()
    );
    parsed
}

/// [`parse_response`] + [`block_list`] + [`convert_blocks`].
///
/// `None` when the answer has no usable block list at all.
pub fn parse_blocks(raw: &str, image_lookup: &HashMap<u32, String>) -> Option<ParsedBlocks> {
    let response = parse_response(raw)?;
    let blocks = block_list(&response)?;
    Some(convert_blocks(blocks, image_lookup))
}
