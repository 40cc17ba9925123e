//! Parse every PDF under a directory, skipping duplicate content.
//!
//! Files are visited in sorted path order, recursively. Each file's MD5 is
//! looked up in a hash → first-path table; a hit writes a duplicate marker
//! next to the file instead of parsing it again. A failed document is
//! reported and the walk continues.

use crate::error::ParseError;
use crate::model::ParsedDocument;
use crate::parse::DocumentParser;
use crate::persist;
use crate::pipeline::input::md5_file;
use crate::pipeline::llm::Llm;
use crate::usage::LlmUsage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What happened to one file of the walk.
#[derive(Debug)]
pub enum DirectoryOutcome {
    Parsed { path: PathBuf, doc: ParsedDocument },
    /// Same content as `original`, which was parsed (or seeded) earlier.
    Duplicate { path: PathBuf, original: PathBuf },
    Failed { path: PathBuf, error: ParseError },
}

impl DirectoryOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DirectoryOutcome::Parsed { path, .. }
            | DirectoryOutcome::Duplicate { path, .. }
            | DirectoryOutcome::Failed { path, .. } => path,
        }
    }
}

/// Counts and summed usage of a directory walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectorySummary {
    pub parsed: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub usage: LlmUsage,
    /// The walk stopped early on cancellation.
    pub cancelled: bool,
}

/// PDFs under `dir`, sorted, recursively, without generated files.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let mut files = Vec::new();
    persist::collect_files(dir, &mut files, &|p| {
        !persist::is_generated(p)
            && p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
    })?;
    Ok(files)
}

/// Directory walker around a [`DocumentParser`].
pub struct DirectoryParser<'a, L: Llm> {
    parser: &'a DocumentParser<L>,
    known: HashMap<String, PathBuf>,
    dedup: bool,
}

impl<'a, L: Llm + 'static> DirectoryParser<'a, L> {
    pub fn new(parser: &'a DocumentParser<L>) -> Self {
        Self {
            parser,
            known: HashMap::new(),
            dedup: true,
        }
    }

    /// Seed the dedup table with hashes parsed in an earlier run.
    pub fn with_known(mut self, known: HashMap<String, PathBuf>) -> Self {
        self.known.extend(known);
        self
    }

    /// Parse every file, even when its content was seen before.
    pub fn without_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }

    /// The hash → first-path table, including this walk's documents.
    pub fn known(&self) -> &HashMap<String, PathBuf> {
        &self.known
    }

    /// Walk `dir`, handing each outcome to `sink` as soon as it is known.
    ///
    /// Only an unreadable `dir` is an error; per-file failures go to `sink`.
    pub async fn parse_dir<F>(&mut self, dir: &Path, mut sink: F) -> Result<DirectorySummary, ParseError>
    where
        F: FnMut(DirectoryOutcome),
    {
        let files = list_pdfs(dir)?;
        info!("Found {} PDF files under {}", files.len(), dir.display());
        let cancel = self.parser.cancellation();
        let mut summary = DirectorySummary::default();

        for path in files {
            if cancel.is_cancelled() {
                info!("Directory walk cancelled");
                summary.cancelled = true;
                break;
            }
            let outcome = self.visit(path).await;
            match &outcome {
                DirectoryOutcome::Parsed { doc, .. } => {
                    summary.parsed += 1;
                    summary.usage += doc.token_usage();
                }
                DirectoryOutcome::Duplicate { .. } => summary.duplicates += 1,
                DirectoryOutcome::Failed { path, error } => {
                    if error.is_document_local() {
                        warn!("Skipping {}: {}", path.display(), error);
                    } else {
                        error!("Failed to parse {}: {}", path.display(), error);
                    }
                    summary.failed += 1;
                }
            }
            sink(outcome);
        }

        info!(
            "Directory done: {} parsed, {} duplicates, {} failed, {} tokens",
            summary.parsed,
            summary.duplicates,
            summary.failed,
            summary.usage.total_tokens.unwrap_or(0)
        );
        Ok(summary)
    }

    async fn visit(&mut self, path: PathBuf) -> DirectoryOutcome {
        let hash_path = path.clone();
        let hash = match tokio::task::spawn_blocking(move || md5_file(&hash_path)).await {
            Ok(Ok(h)) => h,
            Ok(Err(error)) => return DirectoryOutcome::Failed { path, error },
            Err(e) => {
                return DirectoryOutcome::Failed {
                    path,
                    error: ParseError::Internal(format!("Task join error: {}", e)),
                }
            }
        };

        if self.dedup {
            if let Some(original) = self.known.get(&hash) {
                info!("{} duplicates {}", path.display(), original.display());
                if let Err(e) = persist::write_duplicate_marker(&path, original) {
                    warn!("{}", e);
                }
                return DirectoryOutcome::Duplicate {
                    path,
                    original: original.clone(),
                };
            }
        }

        match self.parser.parse(&path.to_string_lossy()).await {
            Ok(doc) => {
                self.known.entry(hash).or_insert_with(|| path.clone());
                DirectoryOutcome::Parsed { path, doc }
            }
            Err(error) => DirectoryOutcome::Failed { path, error },
        }
    }
}
