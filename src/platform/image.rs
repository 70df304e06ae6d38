//! Image re-encoding for Bluesky uploads
//!
//! Bluesky rejects blobs of 1 MB or more, so uploads are re-encoded as
//! JPEG, lowering the quality in steps of 5 until the result fits.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;

use crate::error::AppError;

/// Encoded images must be strictly smaller than this
pub const FILE_SIZE_LIMIT: usize = 1_000_000;
const QUALITY_STEP: u8 = 5;

/// Re-encode `input` as a JPEG smaller than `limit` bytes
///
/// # Errors
/// Validation error if the input is not a decodable image or does not fit
/// even at the lowest quality.
pub fn encode_jpeg_under(input: &[u8], limit: usize) -> Result<Vec<u8>, AppError> {
    let decoded = image::load_from_memory(input)
        .map_err(|e| AppError::Validation(format!("Unsupported image: {}", e)))?;
    let rgb = decoded.to_rgb8();

    let mut quality = 100u8;
    loop {
        let mut output = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut output, quality)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JPEG encoding failed: {}", e)))?;
        let output = output.into_inner();

        if output.len() < limit {
            tracing::debug!(quality, bytes = output.len(), "Image re-encoded");
            return Ok(output);
        }
        if quality <= QUALITY_STEP {
            return Err(AppError::Validation(format!(
                "Image cannot be compressed below {} bytes",
                limit
            )));
        }
        quality -= QUALITY_STEP;
    }
}

/// [`encode_jpeg_under`] with the Bluesky limit, on the blocking pool
pub async fn scale_to_jpeg(input: Vec<u8>) -> Result<Vec<u8>, AppError> {
    tokio::task::spawn_blocking(move || encode_jpeg_under(&input, FILE_SIZE_LIMIT))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
}
