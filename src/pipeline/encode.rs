//! Image encoding: `DynamicImage` → base64 payload, wrapped as a [`Medium`]
//! for the document model or as `ImageData` for the provider request.
//!
//! PNG is the default because it is lossless: text crispness matters far more
//! than payload size for transcription accuracy. JPEG and WebP are available
//! for deployments where request size dominates.

use crate::config::ImageFormat;
use crate::model::Medium;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode `img` in `format` and return the base64 payload.
pub fn encode_b64(img: &DynamicImage, format: ImageFormat) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    // JPEG has no alpha channel and the WebP encoder only takes 8-bit buffers.
    match format {
        ImageFormat::Png => img.write_to(&mut cursor, format.as_image_format())?,
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut cursor, format.as_image_format())?
        }
        ImageFormat::Webp => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut cursor, format.as_image_format())?
        }
    }

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} image → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(b64)
}

/// Encode into a [`Medium`] owned by a page.
pub fn to_medium(
    img: &DynamicImage,
    id: String,
    format: ImageFormat,
    description: Option<String>,
) -> Result<Medium, image::ImageError> {
    Ok(Medium {
        id,
        mime_type: format.mime_type().to_string(),
        content_b64: encode_b64(img, format)?,
        description,
    })
}

/// Wrap an encoded medium for the provider request.
///
/// `detail` is `"high"` for the page render and `"low"` for embedded images
/// when low detail is configured: the provider then bills one overview tile
/// instead of the full tiling.
pub fn to_image_data(medium: &Medium, detail: &str) -> ImageData {
    ImageData::new(medium.content_b64.clone(), medium.mime_type.clone()).with_detail(detail)
}
