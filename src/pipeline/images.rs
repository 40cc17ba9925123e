//! Embedded-image candidates: geometry, relevance filter, ranking and ids.
//!
//! Whatever strategy finds candidate regions on a page, they all go through
//! the same funnel before the model sees them:
//!
//! ```text
//! candidates ─▶ size filter ─▶ containment filter ─▶ sort by area ─▶ crop ─▶ cap ─▶ caption 1..M
//! ```
//!
//! * **Size filter**: a candidate must reach the minimum in *both* width and
//!   height, and is excluded when *either* side exceeds the maximum. The
//!   upper bound mostly removes full-page scans that duplicate the page
//!   render itself.
//! * **Containment**: a region lying entirely inside another surviving
//!   region is a fragment of it. For identical boxes the first one wins.
//! * **Caption indices** are assigned last, densely from 1, in the final
//!   order. They are what the prompt enumerates and what the model quotes
//!   back as `image_number`, so they must never have gaps.
//!
//! The result is a fresh `Vec<EmbeddedImage>`; nothing is renumbered in place.

use crate::config::{ImageExtractionConfig, ImageFormat};
use crate::model::Medium;
use crate::pipeline::encode;
use image::DynamicImage;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Axis-aligned box in page points, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub top: f32,
    pub x1: f32,
    pub bottom: f32,
}

impl BBox {
    /// Build from two corners in any order.
    pub fn new(x0: f32, top: f32, x1: f32, bottom: f32) -> Self {
        Self {
            x0: x0.min(x1),
            top: top.min(bottom),
            x1: x0.max(x1),
            bottom: top.max(bottom),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// All four edges of `other` lie within `self`.
    pub fn contains(&self, other: &BBox) -> bool {
        other.x0 >= self.x0 && other.top >= self.top && other.x1 <= self.x1 && other.bottom <= self.bottom
    }

    pub fn expand(&self, margin: f32) -> Self {
        Self::new(self.x0 - margin, self.top - margin, self.x1 + margin, self.bottom + margin)
    }

    /// Clamp into `[0, width] × [0, height]`.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.x0.clamp(0.0, width),
            self.top.clamp(0.0, height),
            self.x1.clamp(0.0, width),
            self.bottom.clamp(0.0, height),
        )
    }

    pub fn scale(&self, factor: f32) -> Self {
        Self::new(self.x0 * factor, self.top * factor, self.x1 * factor, self.bottom * factor)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let iy = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// A candidate after filtering and ranking, before cropping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub bbox: BBox,
    pub width_px: f32,
    pub height_px: f32,
}

/// Page geometry the size bounds are resolved against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_pts: f32,
    pub height_pts: f32,
    pub pixels_per_point: f32,
}

impl PageGeometry {
    pub fn width_px(&self) -> f32 {
        self.width_pts * self.pixels_per_point
    }

    pub fn height_px(&self) -> f32 {
        self.height_pts * self.pixels_per_point
    }
}

/// Size filter, containment filter and area ranking.
///
/// Returns every surviving candidate in final order; the cap is applied
/// after cropping so that a failed crop does not leave a gap.
pub fn filter_candidates(
    candidates: &[BBox],
    geometry: &PageGeometry,
    config: &ImageExtractionConfig,
) -> Vec<RankedCandidate> {
    let ppp = geometry.pixels_per_point;
    let min = config
        .min_size
        .map(|s| s.to_pixels(geometry.width_px(), geometry.height_px(), ppp));
    let max = config
        .max_size
        .map(|s| s.to_pixels(geometry.width_px(), geometry.height_px(), ppp));

    let sized: Vec<RankedCandidate> = candidates
        .iter()
        .map(|b| RankedCandidate {
            bbox: *b,
            width_px: b.width() * ppp,
            height_px: b.height() * ppp,
        })
        .filter(|c| match min {
            Some((w, h)) => c.width_px >= w && c.height_px >= h,
            None => true,
        })
        .filter(|c| match max {
            Some((w, h)) => c.width_px <= w && c.height_px <= h,
            None => true,
        })
        .collect();

    let mut kept: Vec<RankedCandidate> = if config.exclude_fully_contained {
        sized
            .iter()
            .enumerate()
            .filter(|(i, c)| {
                !sized.iter().enumerate().any(|(j, other)| {
                    j != *i && other.bbox.contains(&c.bbox) && (other.bbox != c.bbox || j < *i)
                })
            })
            .map(|(_, c)| *c)
            .collect()
    } else {
        sized
    };

    kept.sort_by(|a, b| (b.width_px * b.height_px).total_cmp(&(a.width_px * a.height_px)));
    debug!(
        "{} of {} image candidates survive the relevance filter",
        kept.len(),
        candidates.len()
    );
    kept
}

/// A relevant image of one page, ready for the prompt.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    /// 1-based, dense, page-local.
    pub caption_idx: u32,
    pub bbox: BBox,
    pub image: DynamicImage,
    /// Content id of the decoded pixels.
    pub id: String,
}

impl EmbeddedImage {
    pub fn new(caption_idx: u32, bbox: BBox, image: DynamicImage) -> Self {
        let id = content_id(&image);
        Self {
            caption_idx,
            bbox,
            image,
            id,
        }
    }

    /// Encode into a [`Medium`] carrying `description`.
    pub fn to_medium(&self, format: ImageFormat, description: Option<String>) -> Result<Medium, image::ImageError> {
        encode::to_medium(&self.image, self.id.clone(), format, description)
    }
}

/// Crop ranked candidates, skip failed crops, cap and caption.
pub fn select_images<F>(ranked: &[RankedCandidate], max_images: usize, mut crop: F) -> Vec<EmbeddedImage>
where
    F: FnMut(&BBox) -> Option<DynamicImage>,
{
    ranked
        .iter()
        .filter_map(|c| match crop(&c.bbox) {
            Some(img) => Some((c.bbox, img)),
            None => {
                debug!("Dropping image candidate {:?}: crop failed", c.bbox);
                None
            }
        })
        .take(max_images)
        .enumerate()
        .map(|(i, (bbox, img))| EmbeddedImage::new(i as u32 + 1, bbox, img))
        .collect()
}

/// Crop `bbox` (points) out of a page bitmap rendered at `pixels_per_point`.
pub fn crop_region(bitmap: &DynamicImage, bbox: &BBox, pixels_per_point: f32) -> Option<DynamicImage> {
    let px = bbox
        .scale(pixels_per_point)
        .clamp(bitmap.width() as f32, bitmap.height() as f32);
    let x = px.x0.floor() as u32;
    let y = px.top.floor() as u32;
    let w = (px.x1.ceil() as u32).saturating_sub(x);
    let h = (px.bottom.ceil() as u32).saturating_sub(y);
    if w == 0 || h == 0 {
        return None;
    }
    Some(bitmap.crop_imm(x, y, w, h))
}

/// Content-addressed id: UUIDv5 (OID namespace) of the MD5 of the pixels.
///
/// Hashes decoded RGBA pixels plus dimensions, never encoded bytes, so the
/// same region yields the same id whatever format it is stored in.
pub fn content_id(image: &DynamicImage) -> String {
    let rgba = image.to_rgba8();
    let mut hasher = Md5::new();
    hasher.update(rgba.width().to_le_bytes());
    hasher.update(rgba.height().to_le_bytes());
    hasher.update(rgba.as_raw());
    let digest = hasher.finalize();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_slice()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageSize;
    use image::{Rgba, RgbaImage};

    fn geometry() -> PageGeometry {
        // US letter at 72 DPI → 1 px per point.
        PageGeometry {
            width_pts: 612.0,
            height_pts: 792.0,
            pixels_per_point: 1.0,
        }
    }

    fn solid(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255])))
    }

    #[test]
    fn bbox_normalises_and_contains() {
        let b = BBox::new(10.0, 50.0, 0.0, 20.0);
        assert_eq!(b, BBox::new(0.0, 20.0, 10.0, 50.0));
        assert!(b.contains(&BBox::new(1.0, 21.0, 9.0, 49.0)));
        assert!(b.contains(&b));
        assert!(!b.contains(&BBox::new(1.0, 21.0, 11.0, 49.0)));
    }

    #[test]
    fn iou_of_disjoint_and_identical() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn size_filter_and_and_or() {
        let cfg = ImageExtractionConfig {
            min_size: Some(ImageSize::points(20.0, 20.0)),
            max_size: Some(ImageSize::relative(0.9, 0.9)),
            ..Default::default()
        };
        let boxes = [
            BBox::new(0.0, 0.0, 100.0, 10.0),  // too short
            BBox::new(0.0, 0.0, 10.0, 100.0),  // too narrow
            BBox::new(0.0, 0.0, 600.0, 100.0), // too wide
            BBox::new(0.0, 0.0, 50.0, 50.0),   // ok
        ];
        let kept = filter_candidates(&boxes, &geometry(), &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, boxes[3]);
    }

    #[test]
    fn contained_regions_are_dropped() {
        let cfg = ImageExtractionConfig::default();
        let outer = BBox::new(100.0, 100.0, 400.0, 400.0);
        let inner = BBox::new(150.0, 150.0, 250.0, 250.0);
        let twin = outer;
        let kept = filter_candidates(&[inner, outer, twin], &geometry(), &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, outer);

        let cfg = ImageExtractionConfig {
            exclude_fully_contained: false,
            ..Default::default()
        };
        assert_eq!(filter_candidates(&[inner, outer], &geometry(), &cfg).len(), 2);
    }

    #[test]
    fn ranking_is_by_area_descending() {
        let cfg = ImageExtractionConfig::default();
        let small = BBox::new(0.0, 0.0, 40.0, 40.0);
        let large = BBox::new(100.0, 100.0, 300.0, 300.0);
        let mid = BBox::new(400.0, 400.0, 500.0, 500.0);
        let kept = filter_candidates(&[small, large, mid], &geometry(), &cfg);
        let order: Vec<BBox> = kept.iter().map(|c| c.bbox).collect();
        assert_eq!(order, vec![large, mid, small]);
    }

    #[test]
    fn caption_indices_are_dense_after_filtering() {
        let cfg = ImageExtractionConfig {
            max_images_per_page: 6,
            ..Default::default()
        };
        // 20 candidates: 10 tiny ones (filtered), 10 disjoint relevant ones.
        let mut boxes = Vec::new();
        for i in 0..10 {
            let x = (i * 55) as f32;
            boxes.push(BBox::new(x, 0.0, x + 5.0, 5.0));
            boxes.push(BBox::new(x, 100.0, x + 50.0, 150.0 + i as f32));
        }
        let ranked = filter_candidates(&boxes, &geometry(), &cfg);
        assert_eq!(ranked.len(), 10);
        let mut shade = 0u8;
        let images = select_images(&ranked, cfg.max_images_per_page, |_| {
            shade = shade.wrapping_add(1);
            Some(solid(4, 4, shade))
        });
        let idx: Vec<u32> = images.iter().map(|i| i.caption_idx).collect();
        assert_eq!(idx, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn failed_crops_do_not_leave_gaps() {
        let ranked: Vec<RankedCandidate> = (0..4)
            .map(|i| RankedCandidate {
                bbox: BBox::new(i as f32 * 100.0, 0.0, i as f32 * 100.0 + 50.0, 50.0),
                width_px: 50.0,
                height_px: 50.0,
            })
            .collect();
        let mut calls = 0;
        let images = select_images(&ranked, 10, |_| {
            calls += 1;
            if calls == 2 {
                None
            } else {
                Some(solid(2, 2, calls as u8))
            }
        });
        assert_eq!(images.len(), 3);
        assert_eq!(images.iter().map(|i| i.caption_idx).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(images[1].bbox, ranked[2].bbox);
    }

    #[test]
    fn content_id_depends_on_pixels_only() {
        let a = solid(8, 8, 10);
        let b = solid(8, 8, 10);
        let c = solid(8, 8, 11);
        assert_eq!(content_id(&a), content_id(&b));
        assert_ne!(content_id(&a), content_id(&c));
        // Same pixels, different buffer layout.
        let rgb = DynamicImage::ImageRgb8(a.to_rgb8());
        assert_eq!(content_id(&a), content_id(&rgb));
    }

    #[test]
    fn crop_region_scales_and_clamps() {
        let page = solid(200, 100, 0);
        let img = crop_region(&page, &BBox::new(10.0, 10.0, 60.0, 200.0), 2.0).unwrap();
        assert_eq!((img.width(), img.height()), (100, 80));
        assert!(crop_region(&page, &BBox::new(500.0, 500.0, 600.0, 600.0), 1.0).is_none());
    }
}
