//! Person segmentation: frame in, single-channel foreground mask out.

pub mod luma;
pub mod onnx;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use mask_halftone_common::config::{QualityLevel, SegmentationConfig};
use mask_halftone_common::frame::{Frame, Orientation, PixelFormat};
use tracing::info;

use crate::filter::Rect;

/// Per-pixel foreground confidence, 0 = background, 255 = person.
#[derive(Debug, Clone)]
pub struct Mask {
    image: GrayImage,
}

impl Mask {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn extent(&self) -> Rect {
        Rect::from_size(self.image.width(), self.image.height())
    }

    /// Fraction of pixels that are more likely foreground than not.
    pub fn foreground_fraction(&self) -> f32 {
        let total = self.image.pixels().len();
        if total == 0 {
            return 0.0;
        }
        let foreground = self.image.pixels().filter(|p| p.0[0] >= 128).count();
        foreground as f32 / total as f32
    }
}

/// A segmentation backend.
///
/// `Ok(None)` means the backend ran but found no subject; the caller treats
/// it the same as an error and skips the frame.
pub trait Segmenter: Send {
    fn segment(&mut self, frame: &Frame) -> Result<Option<Mask>, SegmentationError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("segmentation model error: {0}")]
    Model(String),
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
    #[error("unsupported tensor layout {0:?}, expected 'nhwc' or 'nchw'")]
    UnsupportedLayout(String),
    #[error("unknown segmentation backend {0:?}, expected 'onnx' or 'luma'")]
    UnknownBackend(String),
    #[error("frame buffer does not match its {width}x{height} {format:?} header")]
    InvalidFrame {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
}

/// Build the backend selected by `config.backend`.
pub fn from_config(config: &SegmentationConfig) -> Result<Box<dyn Segmenter>, SegmentationError> {
    let policy = MaskPolicy::from_config(config);
    let segmenter: Box<dyn Segmenter> = match config.backend.as_str() {
        "onnx" => Box::new(onnx::OnnxSegmenter::load(config, policy)?),
        "luma" => Box::new(luma::LumaKeySegmenter::new(config.luma_threshold, policy)),
        other => return Err(SegmentationError::UnknownBackend(other.to_string())),
    };
    info!(
        backend = segmenter.name(),
        quality = ?config.quality,
        "segmentation backend ready"
    );
    Ok(segmenter)
}

/// Converts a frame to RGB and rotates it upright.
pub fn upright_rgb(frame: &Frame) -> Result<RgbImage, SegmentationError> {
    let invalid = || SegmentationError::InvalidFrame {
        width: frame.width,
        height: frame.height,
        format: frame.format,
    };
    let data = frame.data().to_vec();
    let rgb = match frame.format {
        PixelFormat::Rgb8 => RgbImage::from_raw(frame.width, frame.height, data).ok_or_else(invalid)?,
        PixelFormat::Rgba8 => {
            let rgba = RgbaImage::from_raw(frame.width, frame.height, data).ok_or_else(invalid)?;
            DynamicImage::ImageRgba8(rgba).into_rgb8()
        }
        PixelFormat::Luma8 => {
            let gray = GrayImage::from_raw(frame.width, frame.height, data).ok_or_else(invalid)?;
            DynamicImage::ImageLuma8(gray).into_rgb8()
        }
    };
    Ok(match frame.orientation {
        Orientation::Up => rgb,
        Orientation::Right => imageops::rotate90(&rgb),
        Orientation::Down => imageops::rotate180(&rgb),
        Orientation::Left => imageops::rotate270(&rgb),
    })
}

/// Shared post-processing: scale the raw mask for the quality level and
/// decide whether a subject was found.
#[derive(Debug, Clone, Copy)]
pub struct MaskPolicy {
    pub quality: QualityLevel,
    pub min_foreground_fraction: f32,
}

impl MaskPolicy {
    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self {
            quality: config.quality,
            min_foreground_fraction: config.min_foreground_fraction,
        }
    }

    /// `raw` is the backend's native-resolution mask, `upright` the size of
    /// the upright frame it was computed from.
    pub fn finish(&self, raw: GrayImage, upright: (u32, u32)) -> Option<Mask> {
        let (width, height) = upright;
        let scaled = match self.quality {
            QualityLevel::Fast => raw,
            QualityLevel::Balanced => {
                resize_to(raw, (width / 2).max(1), (height / 2).max(1), FilterType::Triangle)
            }
            QualityLevel::Accurate => resize_to(raw, width, height, FilterType::CatmullRom),
        };
        let mask = Mask::new(scaled);
        if mask.foreground_fraction() < self.min_foreground_fraction {
            return None;
        }
        Some(mask)
    }
}

fn resize_to(img: GrayImage, width: u32, height: u32, filter: FilterType) -> GrayImage {
    if img.dimensions() == (width, height) {
        return img;
    }
    imageops::resize(&img, width, height, filter)
}
