//! Progress-callback trait for per-page parsing events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParserConfigBuilder::progress_callback`] to receive
//! events as the document pipeline works through each page.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a database record or a terminal progress bar
//! without the library knowing anything about how the host application
//! communicates. Pages are processed strictly in order, so events for one
//! document arrive in page order; the trait is still `Send + Sync` because the
//! callback is shared with the spawned stream and with directory runs.
//!
//! # Example
//!
//! ```rust
//! use pagewise::{ParseProgressCallback, ParserConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct DroppedPages(AtomicUsize);
//!
//! impl ParseProgressCallback for DroppedPages {
//!     fn on_page_dropped(&self, page_num: usize, reason: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num} dropped: {reason}");
//!     }
//! }
//!
//! let config = ParserConfig::builder()
//!     .progress_callback(Arc::new(DroppedPages(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the document pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once after the document was opened.
    fn on_document_start(&self, path: &str, total_pages: usize) {
        let _ = (path, total_pages);
    }

    /// Called before the page pipeline starts on a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page was emitted.
    ///
    /// # Arguments
    /// * `blocks`   — number of content blocks on the page
    /// * `degraded` — the page carries `error = true`
    fn on_page_complete(&self, page_num: usize, total_pages: usize, blocks: usize, degraded: bool) {
        let _ = (page_num, total_pages, blocks, degraded);
    }

    /// Called when a page was dropped (load failure, generation failure).
    fn on_page_dropped(&self, page_num: usize, reason: &str) {
        let _ = (page_num, reason);
    }

    /// Called once after the last page, or after cancellation.
    ///
    /// # Arguments
    /// * `emitted` — pages that made it into the document
    fn on_document_complete(&self, total_pages: usize, emitted: usize) {
        let _ = (total_pages, emitted);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ParserConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;
