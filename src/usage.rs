//! Token-usage accounting.
//!
//! [`LlmUsage`] is the unit of cost bookkeeping: every generation call
//! produces one, pages sum the usage of all their calls, and a document's
//! usage is the sum over its pages. Fields are optional because providers do
//! not always report every counter; a missing value is *absent*, not zero,
//! until it meets a present value:
//!
//! ```text
//! None + None = None      None + 5 = 5      3 + 5 = 8
//! ```
//!
//! Addition is associative and commutative for every field, including
//! `model`, which merges into a sorted, de-duplicated, comma-joined set.
//! That property is what lets a document recompute its total from pages in
//! any grouping and still match the per-page figures exactly.
//!
//! The module also carries the offline estimator used by `--estimate-only`:
//! a tile-based vision-token formula plus a characters-to-tokens ratio for
//! text, so a batch can be priced before any request is sent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Token usage of one or more generation calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    #[serde(default)]
    pub request_tokens: Option<u64>,
    #[serde(default)]
    pub response_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
}

impl LlmUsage {
    /// Usage with request/response counters; total is derived.
    pub fn new(request_tokens: u64, response_tokens: u64) -> Self {
        Self {
            request_tokens: Some(request_tokens),
            response_tokens: Some(response_tokens),
            total_tokens: Some(request_tokens + response_tokens),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = if model.is_empty() { None } else { Some(model) };
        self
    }

    /// True when no counter and no model is present.
    pub fn is_empty(&self) -> bool {
        self.request_tokens.is_none()
            && self.response_tokens.is_none()
            && self.total_tokens.is_none()
            && self.model.is_none()
    }
}

fn add_counter(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x),
        (Some(x), Some(y)) => Some(x + y),
    }
}

fn merge_models(a: Option<String>, b: Option<String>) -> Option<String> {
    let names: BTreeSet<String> = a
        .iter()
        .chain(b.iter())
        .flat_map(|m| m.split(','))
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.into_iter().collect::<Vec<_>>().join(","))
    }
}

impl Add for LlmUsage {
    type Output = LlmUsage;

    fn add(self, rhs: LlmUsage) -> LlmUsage {
        LlmUsage {
            request_tokens: add_counter(self.request_tokens, rhs.request_tokens),
            response_tokens: add_counter(self.response_tokens, rhs.response_tokens),
            total_tokens: add_counter(self.total_tokens, rhs.total_tokens),
            model: merge_models(self.model, rhs.model),
        }
    }
}

impl AddAssign for LlmUsage {
    fn add_assign(&mut self, rhs: LlmUsage) {
        let lhs = std::mem::take(self);
        *self = lhs + rhs;
    }
}

impl Sum for LlmUsage {
    fn sum<I: Iterator<Item = LlmUsage>>(iter: I) -> Self {
        iter.fold(LlmUsage::default(), Add::add)
    }
}

impl<'a> Sum<&'a LlmUsage> for LlmUsage {
    fn sum<I: Iterator<Item = &'a LlmUsage>>(iter: I) -> Self {
        iter.cloned().sum()
    }
}

// ── Estimation ───────────────────────────────────────────────────────────

/// Request tokens a vision model charges for one image.
///
/// Tile-based formula: images below 512 px (or sent with low detail) cost
/// only `base_tokens`; otherwise the image is fitted into 2048×2048, its
/// shortest side scaled to 768 px, and every started 512 px tile costs
/// `tokens_per_tile`.
pub fn estimate_image_tokens(
    width: u32,
    height: u32,
    base_tokens: u64,
    tokens_per_tile: u64,
    low_res: bool,
) -> u64 {
    if width == 0 || height == 0 {
        return 0;
    }
    if low_res || width.max(height) < 512 {
        return base_tokens;
    }

    let (mut w, mut h) = (width as f64, height as f64);
    if w.max(h) > 2048.0 {
        let scale = 2048.0 / w.max(h);
        w = (w * scale).floor();
        h = (h * scale).floor();
    }
    let scale = 768.0 / w.min(h);
    w = (w * scale).floor();
    h = (h * scale).floor();

    let tiles = (w / 512.0).ceil() as u64 * (h / 512.0).ceil() as u64;
    tiles * tokens_per_tile + base_tokens
}

/// Constants for the offline cost estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateConfig {
    /// Fixed prompt overhead per page (system + user template text).
    pub prompt_tokens: u64,
    /// Tokens per character of extracted text.
    pub tokens_per_char: f64,
    /// Base cost of one image (gpt-4o-mini pricing by default).
    pub image_base_tokens: u64,
    /// Cost per 512 px tile.
    pub image_tokens_per_tile: u64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            prompt_tokens: 1_000,
            tokens_per_char: 0.3,
            image_base_tokens: 2_833,
            image_tokens_per_tile: 5_667,
        }
    }
}

impl EstimateConfig {
    /// Estimated usage for one page.
    ///
    /// `images` holds the pixel size of the page render followed by each
    /// embedded image; `low_detail` applies to the embedded images only.
    pub fn page_usage(&self, text_chars: usize, images: &[(u32, u32)], low_detail: bool) -> LlmUsage {
        let text_tokens = (text_chars as f64 * self.tokens_per_char) as u64;
        let image_tokens: u64 = images
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                estimate_image_tokens(
                    w,
                    h,
                    self.image_base_tokens,
                    self.image_tokens_per_tile,
                    i > 0 && low_detail,
                )
            })
            .sum();
        let response_tokens = if self.tokens_per_char > 0.0 {
            (text_tokens as f64 / self.tokens_per_char) as u64
        } else {
            0
        };
        LlmUsage::new(self.prompt_tokens + text_tokens + image_tokens, response_tokens)
    }
}
