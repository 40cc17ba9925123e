//! CLI binary for pagewise.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ParserConfig` and writes results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pagewise::{
    inspect_with, persist, to_markdown, CancellationFlag, DirectoryOutcome, DirectoryParser, DocumentOpener,
    DocumentParser, GenerationRequest, Llm, LlmResponse, ParseProgressCallback, ParsedDocument, ParserConfig,
    PdfiumOpener, ProgressCallback, RawTextStrategy,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per document plus a log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<Option<Instant>>,
    dropped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            dropped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Parsing");
    }

    fn page_elapsed(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_document_start(&self, path: &str, total_pages: usize) {
        self.activate_bar(total_pages);
        self.dropped.store(0, Ordering::SeqCst);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{path}: {total_pages} pages"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.page_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, blocks: usize, degraded: bool) {
        let mark = if degraded { yellow("~") } else { green("✓") };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            mark,
            page_num,
            total,
            dim(&format!("{blocks:>3} blocks")),
            dim(&format!("{:.1}s", self.page_elapsed())),
        ));
        self.bar.inc(1);
    }

    fn on_page_dropped(&self, page_num: usize, reason: &str) {
        let elapsed = self.page_elapsed();
        self.dropped.fetch_add(1, Ordering::SeqCst);
        let msg: String = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page_num,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, total_pages: usize, emitted: usize) {
        self.bar.finish_and_clear();
        let dropped = self.dropped.load(Ordering::SeqCst);
        let skipped = total_pages.saturating_sub(emitted + dropped);
        if dropped == 0 && skipped == 0 {
            eprintln!("{} {} pages parsed", green("✔"), bold(&emitted.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages parsed  ({} dropped, {} not reached)",
                if emitted == 0 { red("✘") } else { cyan("⚠") },
                bold(&emitted.to_string()),
                total_pages,
                red(&dropped.to_string()),
                skipped,
            );
        }
    }
}

/// Backend for `--estimate-only`: nothing is ever sent.
struct NoBackend;

impl Llm for NoBackend {
    async fn generate(&self, _request: GenerationRequest) -> Option<LlmResponse> {
        None
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse to Markdown on stdout
  pagewise report.pdf

  # Structured JSON plus Markdown files
  pagewise report.pdf -o report.json --markdown report.md

  # Better heading levels on long documents
  pagewise --headings 20 --prior-pages 1 --improve manual.pdf -o manual.json

  # A whole directory; each PDF gets a <stem>.parsed.json sidecar
  pagewise ./archive/

  # Inspect PDF metadata (no API key needed)
  pagewise --inspect-only report.pdf

  # Estimate token usage without calling the model
  pagewise --estimate-only report.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
  PAGEWISE_*              Any flag, e.g. PAGEWISE_RESOLUTION=200
"#;

/// Parse PDF files into typed content blocks using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pagewise",
    version,
    about = "Parse PDF files page by page into typed content blocks using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file, HTTP/HTTPS URL, or a directory of PDFs.
    input: String,

    /// Write the parsed document as JSON to this file.
    #[arg(short, long, env = "PAGEWISE_OUTPUT")]
    output: Option<PathBuf>,

    /// Write the parsed document as Markdown to this file.
    #[arg(long, env = "PAGEWISE_MARKDOWN")]
    markdown: Option<PathBuf>,

    /// Save a <stem>.parsed.json sidecar next to each local PDF.
    #[arg(long, env = "PAGEWISE_SAVE")]
    save: bool,

    /// Print PDF metadata only, no parsing.
    #[arg(long)]
    inspect_only: bool,

    /// Print the estimated token usage only, no model calls.
    #[arg(long)]
    estimate_only: bool,

    /// Send text only: no page render, no embedded images.
    #[arg(long, env = "PAGEWISE_NO_VISION")]
    no_vision: bool,

    /// Run a second pass that corrects the first answer.
    #[arg(long, env = "PAGEWISE_IMPROVE")]
    improve: bool,

    /// Clean the text layer with an extra model call per page.
    #[arg(long, env = "PAGEWISE_LLM_RAW_TEXT")]
    llm_raw_text: bool,

    /// Do not extract embedded images.
    #[arg(long, env = "PAGEWISE_NO_IMAGES")]
    no_images: bool,

    /// ONNX layout model; switches image extraction to the detector strategy.
    #[arg(long, env = "PAGEWISE_DETECTOR_MODEL")]
    detector_model: Option<PathBuf>,

    /// Rendering resolution in DPI (72–600).
    #[arg(long, env = "PAGEWISE_RESOLUTION", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    resolution: u32,

    /// Embedded images sent per page.
    #[arg(long, env = "PAGEWISE_MAX_IMAGES", default_value_t = 10)]
    max_images: usize,

    /// Prior headings included in each prompt (0 disables).
    #[arg(long, env = "PAGEWISE_HEADINGS", default_value_t = 10)]
    headings: usize,

    /// Prior parsed pages included in each prompt.
    #[arg(long, env = "PAGEWISE_PRIOR_PAGES", default_value_t = 0)]
    prior_pages: usize,

    /// Extra instruction for the model (repeatable).
    #[arg(long = "instruction", env = "PAGEWISE_INSTRUCTIONS", value_delimiter = '\n')]
    instructions: Vec<String>,

    /// Replace the opening sentence of the system prompts.
    #[arg(long, env = "PAGEWISE_PREAMBLE")]
    preamble: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PAGEWISE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PAGEWISE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAGEWISE_PASSWORD")]
    password: Option<String>,

    /// Parse every file of a directory, even duplicates.
    #[arg(long, env = "PAGEWISE_NO_DEDUP")]
    no_dedup: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAGEWISE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PAGEWISE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEWISE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEWISE_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAGEWISE_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only && !cli.estimate_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    ensure_pdfium(cli.quiet)?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ParseProgressCallback>)
    } else {
        None
    };
    let is_dir = Path::new(&cli.input).is_dir();
    let config = build_config(&cli, progress, is_dir)?;

    // ── Metadata-only modes ──────────────────────────────────────────────
    if cli.inspect_only {
        let opener: Arc<dyn DocumentOpener> = Arc::new(PdfiumOpener);
        let meta = inspect_with(&opener, &cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        println!("File:         {}", cli.input);
        for (label, value) in [
            ("Title", &meta.title),
            ("Author", &meta.author),
            ("Subject", &meta.subject),
            ("Creator", &meta.creator),
            ("Producer", &meta.producer),
            ("Created", &meta.creation_date),
            ("Modified", &meta.modification_date),
        ] {
            if let Some(v) = value {
                println!("{:<13} {}", format!("{label}:"), v);
            }
        }
        println!("Pages:        {}", meta.page_count);
        println!("PDF Version:  {}", meta.pdf_version);
        return Ok(());
    }

    if cli.estimate_only {
        let parser = DocumentParser::builder(config)
            .build_with_llm(NoBackend)
            .context("Invalid configuration")?;
        let usage = parser
            .estimate_usage(&cli.input)
            .await
            .context("Estimation failed")?;
        println!(
            "Estimated tokens: {} in  /  {} out  /  {} total",
            usage.request_tokens.unwrap_or(0),
            usage.response_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0)
        );
        return Ok(());
    }

    // ── Parse ────────────────────────────────────────────────────────────
    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Interrupted, finishing the current page…", yellow("!"));
            on_signal.cancel();
        }
    });

    let parser = DocumentParser::builder(config)
        .cancellation(cancel)
        .build()
        .context("Failed to set up the parser")?;

    if is_dir {
        return parse_directory(&cli, &parser).await;
    }

    let doc = parser.parse(&cli.input).await.context("Parsing failed")?;
    write_outputs(&cli, &doc)?;

    if !cli.quiet {
        let usage = doc.token_usage();
        eprintln!(
            "   {} tokens in  /  {} tokens out{}",
            dim(&usage.request_tokens.unwrap_or(0).to_string()),
            dim(&usage.response_tokens.unwrap_or(0).to_string()),
            if doc.has_errors() {
                format!("  {}", yellow("(some pages degraded)"))
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// Make sure a pdfium library is available, downloading it on first run.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;
    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Map CLI args to `ParserConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>, is_dir: bool) -> Result<ParserConfig> {
    let mut builder = ParserConfig::builder()
        .use_vision(!cli.no_vision)
        .post_improve(cli.improve)
        .extract_images(!cli.no_images)
        .resolution(cli.resolution)
        .max_images_per_page(cli.max_images)
        .consider_last_headings_n(cli.headings)
        .consider_last_parsed_pages_n(cli.prior_pages)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .save_sidecar(cli.save || is_dir);

    if cli.llm_raw_text {
        builder = builder.raw_text_strategy(RawTextStrategy::Llm);
    }
    if let Some(ref path) = cli.detector_model {
        builder = builder.detector_model_path(path.clone());
    }
    for instruction in cli.instructions.iter().filter(|i| !i.trim().is_empty()) {
        builder = builder.custom_instruction(instruction.as_str());
    }
    if let Some(ref preamble) = cli.preamble {
        builder = builder.system_prompt_preamble(preamble.as_str());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.as_str());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.as_str());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Write `--output` / `--markdown`, or Markdown to stdout when neither is set.
fn write_outputs(cli: &Cli, doc: &ParsedDocument) -> Result<()> {
    if let Some(ref path) = cli.output {
        let json = serde_json::to_vec_pretty(doc).context("Failed to serialise document")?;
        persist::write_atomic(path, &json)?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    }
    if let Some(ref path) = cli.markdown {
        persist::write_atomic(path, to_markdown(doc).as_bytes())?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    }
    if cli.output.is_none() && cli.markdown.is_none() && !cli.save {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(to_markdown(doc).as_bytes())
            .context("Failed to write to stdout")?;
    }
    Ok(())
}

async fn parse_directory<L: Llm + 'static>(cli: &Cli, parser: &DocumentParser<L>) -> Result<()> {
    let dir = PathBuf::from(&cli.input);
    let mut walker = DirectoryParser::new(parser);
    if cli.no_dedup {
        walker = walker.without_dedup();
    }
    let quiet = cli.quiet;
    let mut failures: HashMap<PathBuf, String> = HashMap::new();
    let summary = walker
        .parse_dir(&dir, |outcome| match outcome {
            DirectoryOutcome::Parsed { path, doc } => {
                if !quiet {
                    eprintln!(
                        "{} {}  {}",
                        green("✔"),
                        path.display(),
                        dim(&format!("{} pages", doc.content.len()))
                    );
                }
            }
            DirectoryOutcome::Duplicate { path, original } => {
                if !quiet {
                    eprintln!(
                        "{} {}  {}",
                        cyan("="),
                        path.display(),
                        dim(&format!("same as {}", original.display()))
                    );
                }
            }
            DirectoryOutcome::Failed { path, error } => {
                failures.insert(path, error.to_string());
            }
        })
        .await
        .context("Failed to walk directory")?;

    let mut failed: Vec<_> = failures.into_iter().collect();
    failed.sort();
    for (path, error) in &failed {
        eprintln!("{} {}: {}", red("✗"), path.display(), error);
    }
    if !quiet {
        eprintln!(
            "{} {} parsed, {} duplicates, {} failed{}  —  {} tokens in / {} out",
            if summary.failed == 0 { green("✔") } else { cyan("⚠") },
            summary.parsed,
            summary.duplicates,
            summary.failed,
            if summary.cancelled { " (interrupted)" } else { "" },
            summary.usage.request_tokens.unwrap_or(0),
            summary.usage.response_tokens.unwrap_or(0),
        );
    }
    Ok(())
}
