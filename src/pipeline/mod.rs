//! Pipeline stages for turning one PDF page into typed content blocks.
//!
//! Each submodule implements one step. The stages are wired together by
//! [`page`] (one page) and [`crate::stream`] (pages in order).
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ extract ──▶ encode ──▶ llm ──▶ response ──▶ page
//! (URL/path) (pdfium)  (regions)  (base64)   (VLM)   (JSON)      (reconcile)
//! ```
//!
//! 1. [`input`]    — canonicalise the user-supplied path, URL or bytes to a
//!    local file and hash it
//! 2. [`source`]   — open the document, load text, bitmap and image regions
//!    per page; blocking, runs in `spawn_blocking`
//! 3. [`images`] / [`extract`] — pick the embedded images worth showing the
//!    model, from pdfium image objects or a layout detector
//! 4. [`encode`]   — encode and base64-wrap page and embedded images
//! 5. [`llm`]      — the generation backend; the only stage with network I/O
//! 6. [`response`] — pull the block list out of noisy model output
//! 7. [`page`]     — the per-page state machine tying the above together

pub mod encode;
pub mod extract;
pub mod images;
pub mod input;
pub mod llm;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod page;
pub mod response;
pub mod source;
