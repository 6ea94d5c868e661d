use serde::Deserialize;

/// Memory layout of the pixels inside a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Interleaved 8-bit red, green, blue.
    Rgb8,
    /// Interleaved 8-bit red, green, blue, alpha.
    Rgba8,
    /// Single 8-bit intensity channel.
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Luma8 => 1,
        }
    }
}

/// Where the top row of the buffer ends up when the image is displayed upright.
///
/// `Right` means the buffer has to be rotated 90° clockwise to be upright,
/// which is how most phone and robot camera sensors deliver portrait video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Up,
    Right,
    Down,
    Left,
}

impl Orientation {
    /// Whether rotating upright swaps width and height.
    pub fn is_transposed(self) -> bool {
        matches!(self, Orientation::Right | Orientation::Left)
    }
}

/// A captured camera frame: a tightly packed pixel buffer plus capture metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub orientation: Orientation,
    data: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            format,
            orientation: Orientation::Up,
            data,
            captured_at_ms,
            seq,
        })
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Dimensions after the frame has been rotated upright.
    pub fn upright_dimensions(&self) -> (u32, u32) {
        if self.orientation.is_transposed() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// `{prefix}{date}/{timestamp}_{seq}.{ext}`, e.g.
/// "frames/2026-02-18/20260218T093000000Z_000042.png".
pub fn output_name(prefix: &str, captured_at_ms: i64, seq: u64, ext: &str) -> String {
    let dt = chrono::DateTime::from_timestamp_millis(captured_at_ms)
        .unwrap_or_else(chrono::Utc::now);
    let date = dt.format("%Y-%m-%d");
    let ts = dt.format("%Y%m%dT%H%M%S%3fZ");
    format!("{prefix}{date}/{ts}_{seq:06}.{ext}")
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mis_sized_buffer() {
        let result = Frame::new(4, 4, PixelFormat::Rgb8, vec![0; 47], 0, 0);
        assert!(matches!(
            result,
            Err(FrameError::BufferSize {
                got: 47,
                expected: 48
            })
        ));
    }

    #[test]
    fn new_rejects_zero_dimensions() {
        let result = Frame::new(0, 4, PixelFormat::Luma8, vec![], 0, 0);
        assert!(matches!(result, Err(FrameError::EmptyDimensions { .. })));
    }

    #[test]
    fn upright_dimensions_follow_orientation() {
        let frame =
            Frame::new(640, 480, PixelFormat::Rgba8, vec![0; 640 * 480 * 4], 0, 1).unwrap();
        assert_eq!(frame.upright_dimensions(), (640, 480));

        let frame = frame.with_orientation(Orientation::Right);
        assert_eq!(frame.upright_dimensions(), (480, 640));

        let frame = frame.with_orientation(Orientation::Down);
        assert_eq!(frame.upright_dimensions(), (640, 480));
    }

    #[test]
    fn output_name_is_dated_and_sequenced() {
        let name = output_name("frames/", 1708300000000, 7, "png");
        assert!(name.starts_with("frames/2024-02-18/"));
        assert!(name.ends_with("_000007.png"));
    }
}
