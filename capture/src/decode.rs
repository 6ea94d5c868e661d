use image::ImageReader;
use mask_halftone_common::frame::{Frame, FrameError, PixelFormat};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to detect image format: {0}")]
    Format(std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Decode an encoded still (JPEG from the camera, or any format `image` knows)
/// into an `rgb8` frame.
pub fn decode_frame(bytes: &[u8], captured_at_ms: i64, seq: u64) -> Result<Frame, DecodeError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(DecodeError::Format)?
        .decode()?;
    let rgb = img.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame::new(
        width,
        height,
        PixelFormat::Rgb8,
        rgb.into_raw(),
        captured_at_ms,
        seq,
    )?)
}
