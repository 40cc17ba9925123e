//! Document pipeline as a stream: one item per source page, in page order.
//!
//! ## Why stream?
//!
//! Large documents take minutes. A stream lets callers show partial results,
//! drive progress bars or write pages to disk as they arrive, with memory
//! bounded by one page instead of the whole document. The eager
//! [`crate::DocumentParser::parse`] is this stream, collected.
//!
//! ## Ordering
//!
//! Pages run strictly one after another. The rolling context (prior
//! headings, prior pages) lives in the stream state and is extended with
//! page N before page N+1 is gathered, so there is no `buffer_unordered`
//! here: concurrency would break that ordering.
//!
//! Each item is `Some(page)` for an emitted page and `None` for a dropped
//! one, so consumers can count pages without re-reading the source. The
//! stream is finite and cannot be restarted.

use crate::config::ParserConfig;
use crate::context::RollingContext;
use crate::error::PageError;
use crate::model::DocumentPage;
use crate::pipeline::extract::ImageExtractor;
use crate::pipeline::input::ResolvedInput;
use crate::pipeline::llm::Llm;
use crate::pipeline::page::{gather, PageOutcome, PagePipeline};
use crate::pipeline::source::DocumentSource;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of page results; `None` marks a dropped page.
pub type PageStream = Pin<Box<dyn Stream<Item = Option<DocumentPage>> + Send>>;

/// Cooperative cancellation, checked between pages.
///
/// Clones share the same flag. A page already in flight is finished; no
/// further page is started.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An opened document plus everything needed to run its pages.
pub(crate) struct OpenedDocument<L: Llm> {
    pub path: String,
    pub source: Arc<dyn DocumentSource>,
    pub config: Arc<ParserConfig>,
    pub llm: Arc<L>,
    pub extractor: Arc<dyn ImageExtractor>,
    pub cancel: CancellationFlag,
    /// Keeps a downloaded or materialised input alive while pages are read.
    pub input: Option<ResolvedInput>,
}

struct StreamState<L: Llm> {
    doc: OpenedDocument<L>,
    callback: ProgressCallback,
    rolling: RollingContext,
    next_index: usize,
    total: usize,
    emitted: usize,
}

/// Turn an opened document into a [`PageStream`].
pub(crate) fn page_stream<L: Llm + 'static>(doc: OpenedDocument<L>) -> PageStream {
    let total = doc.source.page_count();
    let callback: ProgressCallback = doc
        .config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));
    callback.on_document_start(&doc.path, total);
    let state = StreamState {
        rolling: RollingContext::from_config(&doc.config),
        doc,
        callback,
        next_index: 0,
        total,
        emitted: 0,
    };

    let s = stream::unfold(state, |mut st| async move {
        if st.next_index >= st.total || st.doc.cancel.is_cancelled() {
            if st.next_index < st.total {
                info!(
                    "Cancelled after {} of {} pages of {}",
                    st.next_index, st.total, st.doc.path
                );
            }
            st.callback.on_document_complete(st.total, st.emitted);
            // Releases the temp input, if any.
            drop(st.doc.input.take());
            return None;
        }

        let index = st.next_index;
        st.next_index += 1;
        let page_num = index + 1;
        st.callback.on_page_start(page_num, st.total);

        let item = match run_page(&st.doc, index, &st.rolling).await {
            Ok(page) => {
                st.rolling.record(&page);
                st.emitted += 1;
                st.callback
                    .on_page_complete(page_num, st.total, page.content.len(), page.error);
                Some(page)
            }
            Err(e) => {
                warn!("{}", e);
                st.callback.on_page_dropped(page_num, &e.to_string());
                None
            }
        };
        Some((item, st))
    });

    Box::pin(s)
}

/// Gather (blocking) then run the page through the model.
async fn run_page<L: Llm>(
    doc: &OpenedDocument<L>,
    index: usize,
    rolling: &RollingContext,
) -> Result<DocumentPage, PageError> {
    let source = Arc::clone(&doc.source);
    let config = Arc::clone(&doc.config);
    let extractor = Arc::clone(&doc.extractor);
    let gathered = tokio::task::spawn_blocking(move || gather(&*source, index, &config, &*extractor))
        .await
        .map_err(|e| PageError::TaskFailed {
            page: index + 1,
            detail: e.to_string(),
        })??;

    match PagePipeline::new(&doc.config, &*doc.llm).run(&gathered, rolling).await {
        PageOutcome::Emitted(page) => Ok(page),
        PageOutcome::Dropped(e) => Err(e),
    }
}
