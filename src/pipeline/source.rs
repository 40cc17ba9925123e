//! Paginated document access: open once, load pages one at a time.
//!
//! ## Why a trait?
//!
//! The page pipeline needs four things from a page (1-based number, point
//! size, text layer, a bitmap at a given resolution) plus the positions of
//! embedded image objects. [`DocumentOpener`] / [`DocumentSource`] are that
//! narrow interface; [`PdfiumOpener`] is the production implementation and
//! tests substitute an in-memory fake without touching pdfium at all.
//!
//! ## Why re-open per page?
//!
//! `PdfDocument` borrows the `Pdfium` binding, so it cannot be stored across
//! calls. The source keeps the file bytes in memory and re-parses them for
//! every page. Parsing the xref table is cheap compared to rendering, and
//! memory stays bounded to one page's objects at a time.
//!
//! All methods are blocking; async callers go through `spawn_blocking`
//! because pdfium is not async-safe.

use crate::error::ParseError;
use crate::model::DocumentMetadata;
use crate::pipeline::images::BBox;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// How to rasterise a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Dots per inch.
    pub resolution: u32,
    /// Cap for the longer side in pixels.
    pub max_pixels: u32,
}

/// A page snapshot handed to the page pipeline.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    /// 1-based.
    pub page_number: usize,
    pub width_pts: f32,
    pub height_pts: f32,
    pub text: String,
    /// Present when rendering was requested.
    pub bitmap: Option<DynamicImage>,
    /// Embedded image objects, in points, top-left origin.
    pub image_regions: Vec<BBox>,
}

impl LoadedPage {
    /// Pixels per point of the bitmap (may differ from the requested
    /// resolution when the render was capped).
    pub fn pixels_per_point(&self) -> Option<f32> {
        let bitmap = self.bitmap.as_ref()?;
        if self.width_pts <= 0.0 {
            return None;
        }
        Some(bitmap.width() as f32 / self.width_pts)
    }
}

/// An opened document.
pub trait DocumentSource: Send + Sync {
    fn metadata(&self) -> &DocumentMetadata;

    fn page_count(&self) -> usize {
        self.metadata().page_count
    }

    /// Load page `index` (0-based); render it when `render` is set.
    fn load_page(&self, index: usize, render: Option<RenderOptions>) -> Result<LoadedPage, String>;
}

/// Opens documents by path.
pub trait DocumentOpener: Send + Sync {
    fn open(&self, path: &Path, password: Option<&str>) -> Result<Arc<dyn DocumentSource>, ParseError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Production opener backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumOpener;

impl DocumentOpener for PdfiumOpener {
    fn open(&self, path: &Path, password: Option<&str>) -> Result<Arc<dyn DocumentSource>, ParseError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ParseError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => ParseError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => ParseError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let source = PdfiumSource::new(path.to_path_buf(), bytes, password.map(str::to_string))?;
        Ok(Arc::new(source))
    }
}

/// Bind pdfium, downloading the library on first use.
pub fn bind_pdfium() -> Result<Pdfium, ParseError> {
    pdfium_auto::bind_pdfium_silent().map_err(|e| ParseError::PdfiumBindingFailed(e.to_string()))
}

/// A PDF held in memory.
pub struct PdfiumSource {
    path: PathBuf,
    bytes: Vec<u8>,
    password: Option<String>,
    metadata: DocumentMetadata,
}

impl PdfiumSource {
    pub fn new(path: PathBuf, bytes: Vec<u8>, password: Option<String>) -> Result<Self, ParseError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, password.as_deref())
            .map_err(|e| classify_open_error(&path, password.is_some(), e))?;
        let metadata = read_metadata(&document);
        info!("PDF loaded: {} pages", metadata.page_count);
        drop(document);
        Ok(Self {
            path,
            bytes,
            password,
            metadata,
        })
    }
}

impl DocumentSource for PdfiumSource {
    fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    fn load_page(&self, index: usize, render: Option<RenderOptions>) -> Result<LoadedPage, String> {
        let pdfium = bind_pdfium().map_err(|e| e.to_string())?;
        let document = pdfium
            .load_pdf_from_byte_slice(&self.bytes, self.password.as_deref())
            .map_err(|e| format!("{e:?}"))?;
        let page = document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{e:?}"))?;

        let width_pts = page.width().value;
        let height_pts = page.height().value;
        let text = page.text().map(|t| t.all()).map_err(|e| format!("{e:?}"))?;

        let bitmap = match render {
            Some(opts) => {
                let scale = opts.resolution as f32 / 72.0;
                let render_config = PdfRenderConfig::new()
                    .scale_page_by_factor(scale)
                    .set_maximum_width(opts.max_pixels as i32)
                    .set_maximum_height(opts.max_pixels as i32);
                let bitmap = page
                    .render_with_config(&render_config)
                    .map_err(|e| format!("{e:?}"))?;
                let image = bitmap.as_image();
                debug!(
                    "Rendered page {} of {} → {}x{} px",
                    index + 1,
                    self.path.display(),
                    image.width(),
                    image.height()
                );
                Some(image)
            }
            None => None,
        };

        let mut image_regions = Vec::new();
        for object in page.objects().iter() {
            if object.as_image_object().is_none() {
                continue;
            }
            if let Ok(bounds) = object.bounds() {
                // PDF space has a bottom-left origin.
                let region = BBox::new(
                    bounds.left().value,
                    height_pts - bounds.top().value,
                    bounds.right().value,
                    height_pts - bounds.bottom().value,
                );
                image_regions.push(region);
            }
        }

        Ok(LoadedPage {
            page_number: index + 1,
            width_pts,
            height_pts,
            text,
            bitmap,
            image_regions,
        })
    }
}

fn classify_open_error(path: &Path, had_password: bool, e: PdfiumError) -> ParseError {
    let err_str = format!("{e:?}");
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            ParseError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            ParseError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        ParseError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

fn read_metadata(document: &PdfDocument) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    }
}
