//! Document pipeline tests against an in-memory document and a scripted model.
//!
//! No pdfium and no network: the opener hands out a fake source whose pages
//! carry a text layer, a synthetic render and image regions, and the model
//! answers per page from a script.

use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use pagewise::pipeline::source::RenderOptions;
use pagewise::{
    persist, read_parsed, sidecar_path, to_markdown, BBox, CancellationFlag, ContentElement, DirectoryOutcome,
    DirectoryParser, DocumentMetadata, DocumentOpener, DocumentParser, DocumentSource, GenerationRequest, Llm,
    LlmResponse, LlmUsage, LoadedPage, ParseError, ParseProgressCallback, ParserConfig, ParserConfigBuilder,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const WIDTH_PTS: f32 = 200.0;
const HEIGHT_PTS: f32 = 300.0;

// ── Fake document ────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct FakePage {
    text: String,
    regions: Vec<BBox>,
    broken: bool,
}

impl FakePage {
    fn text(page_number: usize, body: &str) -> Self {
        Self {
            text: format!("<<page {page_number}>> {body}"),
            ..Default::default()
        }
    }

    fn with_region(mut self, bbox: BBox) -> Self {
        self.regions.push(bbox);
        self
    }
}

struct FakeSource {
    meta: DocumentMetadata,
    pages: Vec<FakePage>,
    loads: AtomicUsize,
}

impl FakeSource {
    fn new(pages: Vec<FakePage>) -> Arc<Self> {
        Arc::new(Self {
            meta: DocumentMetadata {
                title: Some("Fake manual".into()),
                page_count: pages.len(),
                pdf_version: "1.7".into(),
                ..Default::default()
            },
            pages,
            loads: AtomicUsize::new(0),
        })
    }

    fn render(index: usize, page: &FakePage, opts: RenderOptions) -> DynamicImage {
        let ppp = opts.resolution as f32 / 72.0;
        let (w, h) = ((WIDTH_PTS * ppp) as u32, (HEIGHT_PTS * ppp) as u32);
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        for (k, region) in page.regions.iter().enumerate() {
            let colour = Rgba([(40 * index + 90 * k) as u8, 120, 200, 255]);
            let x0 = (region.x0 * ppp) as u32;
            let y0 = (region.top * ppp) as u32;
            let x1 = ((region.x1 * ppp) as u32).min(w);
            let y1 = ((region.bottom * ppp) as u32).min(h);
            for y in y0..y1 {
                for x in x0..x1 {
                    img.put_pixel(x, y, colour);
                }
            }
        }
        DynamicImage::ImageRgba8(img)
    }
}

impl DocumentSource for FakeSource {
    fn metadata(&self) -> &DocumentMetadata {
        &self.meta
    }

    fn load_page(&self, index: usize, render: Option<RenderOptions>) -> Result<LoadedPage, String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let page = self.pages.get(index).ok_or("page out of range")?;
        if page.broken {
            return Err("damaged content stream".into());
        }
        Ok(LoadedPage {
            page_number: index + 1,
            width_pts: WIDTH_PTS,
            height_pts: HEIGHT_PTS,
            text: page.text.clone(),
            bitmap: render.map(|opts| Self::render(index, page, opts)),
            image_regions: page.regions.clone(),
        })
    }
}

struct FakeOpener(Arc<FakeSource>);

impl DocumentOpener for FakeOpener {
    fn open(&self, _path: &Path, _password: Option<&str>) -> Result<Arc<dyn DocumentSource>, ParseError> {
        Ok(self.0.clone() as Arc<dyn DocumentSource>)
    }
}

// ── Scripted model ───────────────────────────────────────────────────────────

/// Answers are queued per page; a page with no answer left fails the call.
#[derive(Default)]
struct ScriptedLlm {
    answers: Mutex<HashMap<usize, VecDeque<Option<String>>>>,
    requests: Mutex<Vec<(usize, GenerationRequest)>>,
    cancel_on_first_call: Option<CancellationFlag>,
}

impl ScriptedLlm {
    fn answer(self, page: usize, raw: Option<String>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(raw);
        self
    }

    fn requests_for(&self, page: usize) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn page_of(request: &GenerationRequest) -> usize {
    let prompt = &request.user_prompt;
    prompt
        .find("<<page ")
        .and_then(|i| {
            let rest = &prompt[i + 7..];
            rest[..rest.find(">>")?].parse().ok()
        })
        .unwrap_or(0)
}

impl Llm for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Option<LlmResponse> {
        let page = page_of(&request);
        self.requests.lock().unwrap().push((page, request));
        if let Some(flag) = &self.cancel_on_first_call {
            flag.cancel();
        }
        let raw = self
            .answers
            .lock()
            .unwrap()
            .get_mut(&page)
            .and_then(|q| q.pop_front())
            .flatten()?;
        Some(LlmResponse {
            raw,
            usage: LlmUsage::new(100, 20),
        })
    }
}

fn blocks(blocks: Value) -> Option<String> {
    Some(
        json!({
            "page_layout_description": "blocks in reading order",
            "page_content_blocks": blocks,
        })
        .to_string(),
    )
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    _dir: tempfile::TempDir,
    pdf: PathBuf,
    source: Arc<FakeSource>,
}

impl Harness {
    fn new(pages: Vec<FakePage>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("manual.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n% fake body\n").unwrap();
        Self {
            _dir: dir,
            pdf,
            source: FakeSource::new(pages),
        }
    }

    fn input(&self) -> String {
        self.pdf.to_string_lossy().into_owned()
    }

    fn parser<L: Llm>(&self, config: ParserConfig, llm: L) -> DocumentParser<L> {
        DocumentParser::builder(config)
            .opener(Arc::new(FakeOpener(self.source.clone())))
            .build_with_llm(llm)
            .unwrap()
    }

    fn parser_with_cancel<L: Llm>(&self, config: ParserConfig, llm: L, cancel: CancellationFlag) -> DocumentParser<L> {
        DocumentParser::builder(config)
            .opener(Arc::new(FakeOpener(self.source.clone())))
            .cancellation(cancel)
            .build_with_llm(llm)
            .unwrap()
    }
}

fn config() -> ParserConfigBuilder {
    ParserConfig::builder().resolution(72)
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    dropped: AtomicUsize,
    finished_with: AtomicUsize,
}

impl ParseProgressCallback for Counting {
    fn on_page_start(&self, _page_num: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_num: usize, _total: usize, _blocks: usize, _degraded: bool) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_dropped(&self, _page_num: usize, _reason: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _total: usize, emitted: usize) {
        self.finished_with.store(emitted, Ordering::SeqCst);
    }
}

// ── Ordering, partial failure, rolling context ──────────────────────────────

#[tokio::test]
async fn failed_page_is_dropped_and_absent_from_context() {
    let h = Harness::new(vec![
        FakePage::text(1, "Introduction. This manual covers pumps."),
        FakePage::text(2, "Failed Section. Nothing here survives."),
        FakePage::text(3, "Pumps must be primed before use."),
    ]);
    let llm = Arc::new(
        ScriptedLlm::default()
            .answer(
                1,
                blocks(json!([
                    {"type": "heading", "content": "Introduction", "heading_level": 1},
                    {"type": "text", "content": "This manual covers pumps."}
                ])),
            )
            .answer(2, None)
            .answer(
                3,
                blocks(json!([{"type": "text", "content": "Pumps must be primed before use."}])),
            ),
    );
    let progress = Arc::new(Counting::default());
    let cfg = config().progress_callback(progress.clone()).build().unwrap();
    let parser = h.parser(cfg, llm.clone());

    let doc = parser.parse(&h.input()).await.unwrap();

    let numbers: Vec<_> = doc.content.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![1, 3]);
    assert!(!doc.has_errors());
    assert_eq!(doc.md5_sum.as_deref().map(str::len), Some(32));
    assert_eq!(doc.metadata.get("title"), Some(&json!("Fake manual")));

    let page3 = &llm.requests_for(3)[0];
    assert!(page3.user_prompt.contains("heading_level 1: Introduction"));
    assert!(!page3.user_prompt.contains("Failed Section"));

    assert_eq!(progress.started.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
    assert_eq!(progress.dropped.load(Ordering::SeqCst), 1);
    assert_eq!(progress.finished_with.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn paged_stream_yields_none_for_dropped_pages() {
    let h = Harness::new(vec![
        FakePage::text(1, "one"),
        FakePage {
            broken: true,
            ..FakePage::text(2, "two")
        },
        FakePage::text(3, "three"),
    ]);
    let llm = ScriptedLlm::default()
        .answer(1, blocks(json!([{"type": "text", "content": "one"}])))
        .answer(3, blocks(json!([{"type": "text", "content": "three"}])));
    let parser = h.parser(config().build().unwrap(), llm);

    let items: Vec<_> = parser.parse_paged(&h.input()).await.unwrap().collect().await;

    let shape: Vec<_> = items.iter().map(|p| p.as_ref().map(|p| p.page_number)).collect();
    assert_eq!(shape, vec![Some(1), None, Some(3)]);
}

#[tokio::test]
async fn heading_window_keeps_the_most_recent() {
    let h = Harness::new(vec![FakePage::text(1, "first"), FakePage::text(2, "second")]);
    let llm = Arc::new(
        ScriptedLlm::default()
            .answer(
                1,
                blocks(json!([
                    {"type": "heading", "content": "Alpha", "heading_level": 1},
                    {"type": "heading", "content": "Bravo", "heading_level": 2},
                    {"type": "heading-level-3", "content": "Charlie"}
                ])),
            )
            .answer(2, blocks(json!([]))),
    );
    let parser = h.parser(config().consider_last_headings_n(2).build().unwrap(), llm.clone());

    parser.parse(&h.input()).await.unwrap();

    let prompt = &llm.requests_for(2)[0].user_prompt;
    assert!(prompt.contains("heading_level 2: Bravo\nheading_level 3: Charlie"));
    assert!(!prompt.contains("Alpha"));
    assert!(!prompt.contains("# Previous structured pages"));
}

#[tokio::test]
async fn prior_pages_are_sent_as_blocks() {
    let h = Harness::new(vec![FakePage::text(1, "first"), FakePage::text(2, "second")]);
    let llm = Arc::new(
        ScriptedLlm::default()
            .answer(1, blocks(json!([{"type": "text", "content": "Valve rating"}])))
            .answer(2, blocks(json!([]))),
    );
    let cfg = config()
        .consider_last_parsed_pages_n(1)
        .consider_last_headings_n(0)
        .build()
        .unwrap();
    let parser = h.parser(cfg, llm.clone());

    parser.parse(&h.input()).await.unwrap();

    let prompt = &llm.requests_for(2)[0].user_prompt;
    assert!(prompt.contains("# Previous structured pages"));
    assert!(prompt.contains("Valve rating"));
    assert!(!prompt.contains("# Previous headings"));
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_references_resolve_to_page_media() {
    let h = Harness::new(vec![
        FakePage::text(1, "Pump diagram").with_region(BBox::new(20.0, 40.0, 120.0, 140.0))
    ]);
    let llm = Arc::new(ScriptedLlm::default().answer(
        1,
        blocks(json!([
            {"type": "image", "content": "Pump diagram", "image_number": 1},
            {"type": "image", "content": "Imagined photo", "image_number": 7}
        ])),
    ));
    let parser = h.parser(config().build().unwrap(), llm.clone());

    let doc = parser.parse(&h.input()).await.unwrap();
    let page = &doc.content[0];

    let id = page.content[0].medium_id().expect("resolved image");
    assert_eq!(page.media.len(), 1);
    assert_eq!(page.media[0].id, id);
    assert_eq!(page.media[0].mime_type, "image/png");
    assert_eq!(page.media[0].description.as_deref(), Some("Pump diagram"));
    assert_eq!(page.content[1].medium_id(), None);
    assert!(page.error, "a dangling image number degrades the page");

    let request = &llm.requests_for(1)[0];
    let descriptions: Vec<_> = request.images().map(|i| i.description.as_str()).collect();
    assert_eq!(descriptions, vec!["Image of the full PDF page:", "image_number = 1:"]);
    assert!(request.user_text().ends_with("image_number = 1:\n"));
}

#[tokio::test]
async fn text_only_mode_sends_no_images() {
    let h = Harness::new(vec![
        FakePage::text(1, "Plain").with_region(BBox::new(20.0, 40.0, 120.0, 140.0))
    ]);
    let llm = Arc::new(ScriptedLlm::default().answer(1, blocks(json!([{"type": "text", "content": "Plain"}]))));
    let parser = h.parser(config().use_vision(false).build().unwrap(), llm.clone());

    let doc = parser.parse(&h.input()).await.unwrap();

    assert!(doc.content[0].media.is_empty());
    assert_eq!(llm.requests_for(1)[0].images().count(), 0);
}

// ── Usage, improve pass, degraded answers ───────────────────────────────────

#[tokio::test]
async fn usage_adds_up_across_calls_and_pages() {
    let h = Harness::new(vec![FakePage::text(1, "a"), FakePage::text(2, "b")]);
    let first = blocks(json!([{"type": "text", "content": "draft"}]));
    let second = blocks(json!([{"type": "text", "content": "final"}]));
    let llm = ScriptedLlm::default()
        .answer(1, first.clone())
        .answer(1, second.clone())
        .answer(2, first)
        .answer(2, None);
    let parser = h.parser(config().post_improve(true).build().unwrap(), llm);

    let doc = parser.parse(&h.input()).await.unwrap();

    let p1 = &doc.content[0];
    assert_eq!(p1.token_usage.request_tokens, Some(200));
    assert_eq!(p1.token_usage.response_tokens, Some(40));
    assert_eq!(p1.content[0].content(), "final");
    assert_eq!(p1.metadata.get("improved"), Some(&json!(true)));

    // Failed improve pass keeps the first answer and its usage only.
    let p2 = &doc.content[1];
    assert_eq!(p2.token_usage.request_tokens, Some(100));
    assert_eq!(p2.content[0].content(), "draft");
    assert_eq!(p2.metadata.get("improved"), Some(&json!(false)));

    let total = doc.token_usage();
    assert_eq!(total, p1.token_usage.clone() + p2.token_usage.clone());
    assert_eq!(total.request_tokens, Some(300));
}

#[tokio::test]
async fn llm_raw_text_adds_a_call_and_replaces_the_text() {
    let h = Harness::new(vec![FakePage::text(1, "col A col B")]);
    let llm = Arc::new(
        ScriptedLlm::default()
            .answer(1, Some("<<page 1>> col A\ncol B".into()))
            .answer(1, blocks(json!([{"type": "text", "content": "col A"}]))),
    );
    let cfg = config()
        .raw_text_strategy(pagewise::RawTextStrategy::Llm)
        .build()
        .unwrap();
    let parser = h.parser(cfg, llm.clone());

    let doc = parser.parse(&h.input()).await.unwrap();

    let requests = llm.requests_for(1);
    assert_eq!(requests.len(), 2);
    assert!(requests[0].system_prompt.is_none());
    assert!(!requests[0].options.json_mode);
    assert!(requests[1].user_prompt.contains("col A\ncol B"));
    assert_eq!(doc.content[0].raw_extracted_text, "<<page 1>> col A\ncol B");
    assert_eq!(doc.content[0].token_usage.request_tokens, Some(200));
}

#[tokio::test]
async fn unparseable_answer_gives_a_degraded_page() {
    let h = Harness::new(vec![FakePage::text(1, "x")]);
    let llm = ScriptedLlm::default().answer(1, Some("Sorry, I cannot read this page.".into()));
    let parser = h.parser(config().build().unwrap(), llm);

    let doc = parser.parse(&h.input()).await.unwrap();

    let page = &doc.content[0];
    assert!(page.error);
    assert!(page.content.is_empty());
    assert_eq!(page.raw_llm_response, "Sorry, I cannot read this page.");
    assert_eq!(page.token_usage.request_tokens, Some(100));
}

#[tokio::test]
async fn malformed_block_is_skipped_and_the_rest_kept() {
    let h = Harness::new(vec![FakePage::text(1, "x"), FakePage::text(2, "y")]);
    let llm = ScriptedLlm::default()
        .answer(
            1,
            blocks(json!([
                {"type": "heading", "content": "Pumps", "heading_level": 1},
                {"type": "text", "content": "Centrifugal pumps move water."},
                {"type": "sidebar", "content": "Not a block type"},
                {"type": "text", "content": "They need priming."},
                {"type": "footer", "content": "Page 1"}
            ])),
        )
        .answer(2, blocks(json!([{"type": "text", "content": "Next page"}])));
    let parser = h.parser(config().build().unwrap(), llm);

    let doc = parser.parse(&h.input()).await.unwrap();

    assert_eq!(doc.content.len(), 2);
    let page = &doc.content[0];
    assert!(page.error);
    assert_eq!(page.content.len(), 4);
    assert_eq!(page.content[2].content(), "They need priming.");
    assert!(page.raw_llm_response.contains("sidebar"));
    assert_eq!(page.token_usage.request_tokens, Some(100));
    assert!(!doc.content[1].error);
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_parse_keeps_finished_pages() {
    let h = Harness::new(vec![FakePage::text(1, "a"), FakePage::text(2, "b"), FakePage::text(3, "c")]);
    let cancel = CancellationFlag::new();
    let llm = ScriptedLlm {
        cancel_on_first_call: Some(cancel.clone()),
        ..Default::default()
    }
    .answer(1, blocks(json!([{"type": "text", "content": "a"}])))
    .answer(2, blocks(json!([{"type": "text", "content": "b"}])));
    let parser = h.parser_with_cancel(config().build().unwrap(), llm, cancel);

    let doc = parser.parse(&h.input()).await.unwrap();

    assert_eq!(doc.content.len(), 1);
    assert_eq!(doc.metadata.get("cancelled"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn cancelled_stream_ends_early() {
    let h = Harness::new(vec![FakePage::text(1, "a"), FakePage::text(2, "b")]);
    let llm = ScriptedLlm::default()
        .answer(1, blocks(json!([])))
        .answer(2, blocks(json!([])));
    let parser = h.parser(config().build().unwrap(), llm);
    let cancel = parser.cancellation();

    let mut stream = parser.parse_paged(&h.input()).await.unwrap();
    assert!(stream.next().await.is_some());
    cancel.cancel();
    assert!(stream.next().await.is_none());
}

// ── Metadata-only operations ─────────────────────────────────────────────────

#[test]
fn page_count_without_model_calls() {
    let h = Harness::new(vec![FakePage::text(1, "a"), FakePage::text(2, "b")]);
    let llm = Arc::new(ScriptedLlm::default());
    let parser = h.parser(config().build().unwrap(), llm.clone());

    let n = tokio_test::block_on(parser.get_number_of_pages(&h.input())).unwrap();

    assert_eq!(n, 2);
    assert_eq!(llm.calls(), 0);
    assert_eq!(h.source.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn estimate_counts_images_without_calling_the_model() {
    let h = Harness::new(vec![
        FakePage::text(1, "some text on the page").with_region(BBox::new(20.0, 40.0, 120.0, 140.0))
    ]);
    let llm = Arc::new(ScriptedLlm::default());
    let text_only = h.parser(config().use_vision(false).build().unwrap(), llm.clone());
    let with_vision = h.parser(config().build().unwrap(), llm.clone());

    let small = text_only.estimate_usage(&h.input()).await.unwrap();
    let large = with_vision.estimate_usage(&h.input()).await.unwrap();

    assert!(small.request_tokens.unwrap() > 0);
    assert!(large.request_tokens.unwrap() > small.request_tokens.unwrap());
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn missing_file_is_fatal() {
    let h = Harness::new(vec![FakePage::text(1, "a")]);
    let parser = h.parser(config().build().unwrap(), ScriptedLlm::default());
    let err = parser.parse("/definitely/not/here.pdf").await.unwrap_err();
    assert!(matches!(err, ParseError::FileNotFound { .. }));
}

// ── Outputs ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sidecar_and_markdown_round_trip() {
    let h = Harness::new(vec![FakePage::text(1, "Scope")]);
    let llm = ScriptedLlm::default().answer(
        1,
        blocks(json!([
            {"type": "heading", "content": "Scope", "heading_level": 1},
            {"type": "table", "content": "| a | b |\n| 1 | 2 |"}
        ])),
    );
    let parser = h.parser(config().save_sidecar(true).build().unwrap(), llm);

    let doc = parser.parse(&h.input()).await.unwrap();

    let sidecar = sidecar_path(&h.pdf);
    assert!(sidecar.exists());
    assert_eq!(read_parsed(&sidecar).unwrap(), doc);
    assert_eq!(
        to_markdown(&doc),
        "# Scope\n\n| a | b |\n| --- | --- |\n| 1 | 2 |\n"
    );
}

#[tokio::test]
async fn directory_walk_skips_duplicate_content() {
    let dir = tempfile::tempdir().unwrap();
    let body = b"%PDF-1.7\n% same bytes\n";
    std::fs::write(dir.path().join("a.pdf"), body).unwrap();
    std::fs::create_dir(dir.path().join("copies")).unwrap();
    std::fs::write(dir.path().join("copies").join("b.pdf"), body).unwrap();
    std::fs::write(dir.path().join("c.pdf"), b"GIF89a not a pdf").unwrap();

    let source = FakeSource::new(vec![FakePage::text(1, "x")]);
    let llm = ScriptedLlm::default().answer(1, blocks(json!([{"type": "text", "content": "x"}])));
    let parser = DocumentParser::builder(config().save_sidecar(true).build().unwrap())
        .opener(Arc::new(FakeOpener(source)))
        .build_with_llm(llm)
        .unwrap();

    let mut outcomes = Vec::new();
    let summary = DirectoryParser::new(&parser)
        .parse_dir(dir.path(), |o| outcomes.push(o))
        .await
        .unwrap();

    assert_eq!((summary.parsed, summary.duplicates, summary.failed), (1, 1, 1));
    assert_eq!(summary.usage.request_tokens, Some(100));
    assert!(matches!(&outcomes[0], DirectoryOutcome::Parsed { path, .. } if path.ends_with("a.pdf")));
    assert!(matches!(&outcomes[1], DirectoryOutcome::Failed { error: ParseError::NotAPdf { .. }, .. }));
    match &outcomes[2] {
        DirectoryOutcome::Duplicate { path, original } => {
            assert!(path.ends_with("copies/b.pdf"));
            assert!(original.ends_with("a.pdf"));
        }
        other => panic!("expected duplicate, got {other:?}"),
    }

    let restored = persist::restore_duplicates(dir.path()).unwrap();
    assert_eq!(restored, vec![dir.path().join("copies").join("b.parsed.json")]);
    let copy = read_parsed(&restored[0]).unwrap();
    assert_eq!(copy.content, read_parsed(&dir.path().join("a.parsed.json")).unwrap().content);
}

#[test]
fn content_elements_serialise_with_type_tags() {
    let e = ContentElement::Heading {
        content: "Scope".into(),
        heading_level: 2,
    };
    assert_eq!(
        serde_json::to_value(&e).unwrap(),
        json!({"type": "heading", "content": "Scope", "heading_level": 2})
    );
}
