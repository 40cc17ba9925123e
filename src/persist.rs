//! JSON sidecars and duplicate markers stored next to source PDFs.
//!
//! `report.pdf` gets `report.parsed.json` (the whole [`ParsedDocument`]) and,
//! when its content duplicates a file parsed earlier, `report.duplicate.txt`
//! holding the original's path. Writes go through a temp file in the target
//! directory followed by a rename, so a crash never leaves half a sidecar.

use crate::error::ParseError;
use crate::model::ParsedDocument;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix of a parsed-document sidecar.
pub const SIDECAR_SUFFIX: &str = ".parsed.json";
/// Suffix of a duplicate marker.
pub const DUPLICATE_SUFFIX: &str = ".duplicate.txt";

fn sibling(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    source.with_file_name(format!("{stem}{suffix}"))
}

/// `<dir>/<stem>.parsed.json` for `<dir>/<stem>.pdf`.
pub fn sidecar_path(source: &Path) -> PathBuf {
    sibling(source, SIDECAR_SUFFIX)
}

/// `<dir>/<stem>.duplicate.txt` for `<dir>/<stem>.pdf`.
pub fn duplicate_marker_path(source: &Path) -> PathBuf {
    sibling(source, DUPLICATE_SUFFIX)
}

/// True for files this module writes.
pub fn is_generated(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX) || n.ends_with(DUPLICATE_SUFFIX))
}

/// Write `bytes` to `target` through a temp file + rename.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), ParseError> {
    let write_err = |source: std::io::Error| ParseError::OutputWriteFailed {
        path: target.to_path_buf(),
        source,
    };
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(target).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Serialise `doc` as the sidecar of `source`. Returns the sidecar path.
pub fn save_parsed(source: &Path, doc: &ParsedDocument) -> Result<PathBuf, ParseError> {
    let target = sidecar_path(source);
    let json = serde_json::to_vec_pretty(doc)?;
    write_atomic(&target, &json)?;
    debug!("Wrote {} ({} bytes)", target.display(), json.len());
    Ok(target)
}

/// Read a sidecar (or any JSON file holding a [`ParsedDocument`]).
pub fn read_parsed(path: &Path) -> Result<ParsedDocument, ParseError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ParseError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ParseError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ParseError::Deserialize {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Record that `duplicate` has the same content as `original`.
pub fn write_duplicate_marker(duplicate: &Path, original: &Path) -> Result<PathBuf, ParseError> {
    let marker = duplicate_marker_path(duplicate);
    write_atomic(&marker, original.to_string_lossy().as_bytes())?;
    Ok(marker)
}

/// The original path a marker points at.
pub fn read_duplicate_marker(marker: &Path) -> Result<PathBuf, ParseError> {
    let text = std::fs::read_to_string(marker).map_err(|e| ParseError::ReadFailed {
        path: marker.to_path_buf(),
        source: e,
    })?;
    let original = text.trim();
    if original.is_empty() {
        return Err(ParseError::Deserialize {
            path: marker.to_path_buf(),
            detail: "empty duplicate marker".to_string(),
        });
    }
    Ok(PathBuf::from(original))
}

/// For every duplicate marker under `dir`, copy the original's sidecar next
/// to the duplicate, pointing its `path` at the duplicate.
///
/// Markers whose original has no sidecar are skipped with a warning. Returns
/// the sidecars written.
pub fn restore_duplicates(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let mut markers = Vec::new();
    collect_files(dir, &mut markers, &|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(DUPLICATE_SUFFIX))
    })?;

    let mut written = Vec::new();
    for marker in markers {
        let original = read_duplicate_marker(&marker)?;
        let original_sidecar = sidecar_path(&original);
        if !original_sidecar.exists() {
            warn!(
                "No sidecar for {} (referenced by {})",
                original.display(),
                marker.display()
            );
            continue;
        }
        let name = marker
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(DUPLICATE_SUFFIX))
            .unwrap_or("document");
        let duplicate = marker.with_file_name(format!("{name}.pdf"));

        let mut doc = read_parsed(&original_sidecar)?;
        doc.path = duplicate.to_string_lossy().into_owned();
        written.push(save_parsed(&duplicate, &doc)?);
    }
    info!("Restored {} duplicate sidecars under {}", written.len(), dir.display());
    Ok(written)
}

/// Recursive walk collecting files that satisfy `keep`, sorted by name
/// within each directory.
///
/// Symlinks are not followed. Unreadable entries below `dir` are skipped.
pub(crate) fn collect_files(
    dir: &Path,
    out: &mut Vec<PathBuf>,
    keep: &dyn Fn(&Path) -> bool,
) -> Result<(), ParseError> {
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ParseError::ReadFailed {
                    path: dir.to_path_buf(),
                    source: e.into(),
                })
            }
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() && keep(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(())
}
