//! Embedded-image extraction strategies.
//!
//! Both strategies produce candidate boxes in page points and hand them to
//! the shared funnel in [`crate::pipeline::images`]:
//!
//! - [`RegionImageExtractor`] uses the image objects placed on the page and
//!   crops them out of the page render. Cheap, and exact for born-digital
//!   PDFs, but blind to vector charts and to figures inside scanned pages.
//! - [`DetectorImageExtractor`] runs a [`LayoutDetector`] over a downscaled
//!   render and keeps figure-class detections. Works on scans, costs one
//!   model inference per page.
//!
//! The strategy is chosen once when the parser is built
//! ([`extractor_for`]); the page pipeline only sees `Arc<dyn ImageExtractor>`.

use crate::config::{ExtractionMethod, ImageExtractionConfig};
use crate::error::ParseError;
use crate::pipeline::images::{crop_region, filter_candidates, select_images, BBox, EmbeddedImage, PageGeometry};
use crate::pipeline::source::LoadedPage;
use image::{imageops::FilterType, RgbImage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces the ranked, capped and captioned embedded images of one page.
pub trait ImageExtractor: Send + Sync {
    fn extract(&self, page: &LoadedPage, config: &ImageExtractionConfig) -> Vec<EmbeddedImage>;
}

fn geometry(page: &LoadedPage) -> Option<PageGeometry> {
    Some(PageGeometry {
        width_pts: page.width_pts,
        height_pts: page.height_pts,
        pixels_per_point: page.pixels_per_point()?,
    })
}

/// Filter, rank, crop and caption `candidates` (points) against the page render.
fn finish(page: &LoadedPage, candidates: &[BBox], config: &ImageExtractionConfig) -> Vec<EmbeddedImage> {
    let (Some(bitmap), Some(geometry)) = (page.bitmap.as_ref(), geometry(page)) else {
        return Vec::new();
    };
    let ranked = filter_candidates(candidates, &geometry, config);
    let images = select_images(&ranked, config.max_images_per_page, |bbox| {
        crop_region(bitmap, bbox, geometry.pixels_per_point)
    });
    debug!(
        "Page {}: {} embedded images selected from {} candidates",
        page.page_number,
        images.len(),
        candidates.len()
    );
    images
}

// ── Region strategy ──────────────────────────────────────────────────────

/// Crops the page's placed image objects out of the page render.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionImageExtractor;

impl ImageExtractor for RegionImageExtractor {
    fn extract(&self, page: &LoadedPage, config: &ImageExtractionConfig) -> Vec<EmbeddedImage> {
        finish(page, &page.image_regions, config)
    }
}

// ── Detector strategy ────────────────────────────────────────────────────

/// One box found by a [`LayoutDetector`], in pixels of the image it was given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub score: f32,
    pub bbox: BBox,
}

/// A layout-analysis model.
pub trait LayoutDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, String>;
}

/// Greedy class-wise non-maximum suppression.
///
/// Within each class, detections are visited by descending score; one is
/// kept unless it overlaps an already kept box of the same class by more
/// than `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

/// Finds figure regions with a [`LayoutDetector`].
#[derive(Clone)]
pub struct DetectorImageExtractor {
    detector: Arc<dyn LayoutDetector>,
}

impl DetectorImageExtractor {
    pub fn new(detector: Arc<dyn LayoutDetector>) -> Self {
        Self { detector }
    }

    /// Figure boxes in page points, margin applied, clamped and de-duplicated.
    pub fn candidates(&self, page: &LoadedPage, config: &ImageExtractionConfig) -> Vec<BBox> {
        let (Some(bitmap), Some(ppp)) = (page.bitmap.as_ref(), page.pixels_per_point()) else {
            return Vec::new();
        };
        let det = &config.detector;
        let longer = bitmap.width().max(bitmap.height()).max(1);
        let scale = det.input_size as f32 / longer as f32;
        let w = ((bitmap.width() as f32 * scale).round() as u32).max(1);
        let h = ((bitmap.height() as f32 * scale).round() as u32).max(1);
        let input = image::imageops::resize(&bitmap.to_rgb8(), w, h, FilterType::Triangle);

        let detections = match self.detector.detect(&input) {
            Ok(d) => d,
            Err(e) => {
                warn!("Page {}: layout detection failed: {}", page.page_number, e);
                return Vec::new();
            }
        };
        let total = detections.len();

        let figures: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.score >= det.conf_threshold && det.figure_classes.contains(&d.class_id))
            .collect();
        let figures = non_max_suppression(figures, det.iou_threshold);

        let to_points = 1.0 / (scale * ppp);
        let mut boxes: Vec<BBox> = Vec::with_capacity(figures.len());
        for d in figures {
            let b = d
                .bbox
                .scale(to_points)
                .expand(det.margin)
                .clamp(page.width_pts, page.height_pts);
            if b.area() > 0.0 && !boxes.contains(&b) {
                boxes.push(b);
            }
        }
        debug!(
            "Page {}: {} detections, {} figure boxes",
            page.page_number,
            total,
            boxes.len()
        );
        boxes
    }
}

impl ImageExtractor for DetectorImageExtractor {
    fn extract(&self, page: &LoadedPage, config: &ImageExtractionConfig) -> Vec<EmbeddedImage> {
        let boxes = self.candidates(page, config);
        finish(page, &boxes, config)
    }
}

/// Pick the extraction strategy for `config`.
///
/// `detector` overrides the model configured by path. The detector strategy
/// without any detector is a configuration error.
pub fn extractor_for(
    config: &ImageExtractionConfig,
    detector: Option<Arc<dyn LayoutDetector>>,
) -> Result<Arc<dyn ImageExtractor>, ParseError> {
    match config.method {
        ExtractionMethod::Regions => Ok(Arc::new(RegionImageExtractor)),
        ExtractionMethod::Detector => {
            if let Some(detector) = detector {
                return Ok(Arc::new(DetectorImageExtractor::new(detector)));
            }
            let Some(path) = config.detector.model_path.as_ref() else {
                return Err(ParseError::DetectorUnavailable(
                    "detector extraction selected but no detector model configured".into(),
                ));
            };
            load_model_detector(path, config.detector.input_size)
        }
    }
}

#[cfg(feature = "onnx")]
fn load_model_detector(path: &std::path::Path, input_size: u32) -> Result<Arc<dyn ImageExtractor>, ParseError> {
    let detector = crate::pipeline::onnx::OnnxLayoutDetector::from_file(path)?.with_input_size(input_size);
    Ok(Arc::new(DetectorImageExtractor::new(Arc::new(detector))))
}

#[cfg(not(feature = "onnx"))]
fn load_model_detector(path: &std::path::Path, _input_size: u32) -> Result<Arc<dyn ImageExtractor>, ParseError> {
    Err(ParseError::DetectorUnavailable(format!(
        "cannot load '{}': built without the `onnx` feature",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    /// Page of 100×100 pt rendered at 2 px/pt.
    fn page(regions: Vec<BBox>) -> LoadedPage {
        LoadedPage {
            page_number: 1,
            width_pts: 100.0,
            height_pts: 100.0,
            text: String::new(),
            bitmap: Some(DynamicImage::ImageRgba8(RgbaImage::from_fn(200, 200, |x, y| {
                Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255])
            }))),
            image_regions: regions,
        }
    }

    struct FixedDetector(Vec<Detection>);

    impl LayoutDetector for FixedDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, String> {
            Ok(self.0.clone())
        }
    }

    fn det(class_id: usize, score: f32, x0: f32, y0: f32, x1: f32, y1: f32) -> Detection {
        Detection {
            class_id,
            score,
            bbox: BBox::new(x0, y0, x1, y1),
        }
    }

    #[test]
    fn region_extractor_crops_regions() {
        let p = page(vec![BBox::new(10.0, 10.0, 40.0, 50.0), BBox::new(50.0, 50.0, 60.0, 55.0)]);
        let images = RegionImageExtractor.extract(&p, &ImageExtractionConfig::default());
        // Second region is under 20 pt high.
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].caption_idx, 1);
        assert_eq!((images[0].image.width(), images[0].image.height()), (60, 80));
    }

    #[test]
    fn unrendered_page_yields_nothing() {
        let mut p = page(vec![BBox::new(10.0, 10.0, 40.0, 50.0)]);
        p.bitmap = None;
        assert!(RegionImageExtractor.extract(&p, &ImageExtractionConfig::default()).is_empty());
    }

    #[test]
    fn nms_is_class_wise() {
        let kept = non_max_suppression(
            vec![
                det(1, 0.6, 0.0, 0.0, 10.0, 10.0),
                det(1, 0.9, 1.0, 1.0, 11.0, 11.0),
                det(2, 0.7, 0.0, 0.0, 10.0, 10.0),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].class_id, 2);
    }

    #[test]
    fn detector_boxes_are_rescaled_to_points() {
        // input_size 100 on a 200 px render → scale 0.5; 1 px/pt at the detector.
        let cfg = ImageExtractionConfig {
            detector: crate::config::DetectorConfig {
                input_size: 100,
                margin: 5.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let extractor = DetectorImageExtractor::new(Arc::new(FixedDetector(vec![
            det(1, 0.95, 20.0, 20.0, 60.0, 60.0),
            det(1, 0.30, 0.0, 0.0, 90.0, 90.0), // below threshold
            det(3, 0.99, 0.0, 0.0, 50.0, 50.0), // not a figure class
            det(16, 0.80, 70.0, 70.0, 100.0, 100.0),
        ])));
        let boxes = extractor.candidates(&page(vec![]), &cfg);
        assert_eq!(
            boxes,
            vec![BBox::new(15.0, 15.0, 65.0, 65.0), BBox::new(65.0, 65.0, 100.0, 100.0)]
        );
        let images = extractor.extract(&page(vec![]), &cfg);
        assert_eq!(images.iter().map(|i| i.caption_idx).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn detector_without_model_is_a_config_error() {
        let cfg = ImageExtractionConfig {
            method: ExtractionMethod::Detector,
            ..Default::default()
        };
        assert!(matches!(
            extractor_for(&cfg, None),
            Err(ParseError::DetectorUnavailable(_))
        ));
        let injected: Arc<dyn LayoutDetector> = Arc::new(FixedDetector(vec![]));
        assert!(extractor_for(&cfg, Some(injected)).is_ok());
    }
}
