//! RT-DETR style layout detector on ONNX Runtime (`onnx` feature).
//!
//! Expected model signature (PaddleDetection export):
//!
//! | name           | shape          | meaning                                  |
//! |----------------|----------------|------------------------------------------|
//! | `image`        | `[1,3,S,S]`    | ImageNet-normalised RGB, CHW             |
//! | `im_shape`     | `[1,2]`        | `[height, width]` of the source image    |
//! | `scale_factor` | `[1,2]`        | `[S/height, S/width]`                    |
//! | `fetch_name_0` | `[N,6]`        | `[class, score, x0, y0, x1, y1]` rows    |
//! | `fetch_name_1` | `[1]` (i32)    | number of valid rows                     |
//!
//! Output boxes are in pixels of the source image, so the caller's scaling
//! is the only one that applies.

use crate::error::ParseError;
use crate::pipeline::extract::{Detection, LayoutDetector};
use crate::pipeline::images::BBox;
use image::{imageops::FilterType, RgbImage};
use ort::{inputs, session::Session, value::Value};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

const MEAN: [f32; 3] = [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0];
const NORM: [f32; 3] = [1.0 / 0.229 / 255.0, 1.0 / 0.224 / 255.0, 1.0 / 0.225 / 255.0];

pub struct OnnxLayoutDetector {
    // `Session::run` takes `&mut self`.
    session: Mutex<Session>,
    input_size: u32,
}

impl OnnxLayoutDetector {
    pub const DEFAULT_INPUT_SIZE: u32 = 800;

    pub fn from_file(path: &Path) -> Result<Self, ParseError> {
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ParseError::DetectorUnavailable(format!("{}: {e}", path.display())))?;
        info!("Layout model loaded from {}", path.display());
        Ok(Self {
            session: Mutex::new(session),
            input_size: Self::DEFAULT_INPUT_SIZE,
        })
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size.max(32);
        self
    }

    /// Square resize plus mean/std normalisation into a CHW buffer.
    fn normalise(&self, image: &RgbImage) -> Vec<f32> {
        let s = self.input_size;
        let resized = image::imageops::resize(image, s, s, FilterType::Triangle);
        let plane = (s * s) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (i, px) in resized.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = (px[c] as f32 - MEAN[c]) * NORM[c];
            }
        }
        data
    }
}

impl LayoutDetector for OnnxLayoutDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, String> {
        let (w, h) = (image.width().max(1) as f32, image.height().max(1) as f32);
        let s = self.input_size as usize;
        let size = self.input_size as f32;

        let image_input = Value::from_array(([1usize, 3, s, s].as_slice(), self.normalise(image)))
            .map_err(|e| format!("image input: {e}"))?;
        let im_shape = Value::from_array(([1usize, 2].as_slice(), vec![h, w]))
            .map_err(|e| format!("im_shape input: {e}"))?;
        let scale_factor = Value::from_array(([1usize, 2].as_slice(), vec![size / h, size / w]))
            .map_err(|e| format!("scale_factor input: {e}"))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("detector session poisoned: {e}"))?;
        let outputs = session
            .run(inputs![
                "image" => image_input,
                "im_shape" => im_shape,
                "scale_factor" => scale_factor
            ])
            .map_err(|e| format!("forward pass: {e}"))?;

        let (_, rows) = outputs
            .get("fetch_name_0")
            .ok_or("output 'fetch_name_0' not found")?
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("extract boxes: {e}"))?;
        let count = match outputs.get("fetch_name_1") {
            Some(v) => v
                .try_extract_tensor::<i32>()
                .map(|(_, n)| n.first().copied().unwrap_or(0).max(0) as usize)
                .map_err(|e| format!("extract count: {e}"))?,
            None => rows.len() / 6,
        };

        Ok(rows
            .chunks_exact(6)
            .take(count)
            .map(|r| Detection {
                class_id: r[0].max(0.0) as usize,
                score: r[1],
                bbox: BBox::new(r[2], r[3], r[4], r[5]),
            })
            .collect())
    }
}
