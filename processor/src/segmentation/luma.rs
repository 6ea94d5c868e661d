use image::imageops::{self, FilterType};
use image::{DynamicImage, Luma};
use mask_halftone_common::frame::Frame;
use tracing::debug;

use super::{upright_rgb, Mask, MaskPolicy, SegmentationError, Segmenter};

/// Half-width of the soft edge around the threshold.
const SOFTNESS: f32 = 0.1;
/// Native mask resolution is the upright frame downscaled by this factor.
const DOWNSAMPLE: u32 = 4;

/// Luminance key: everything brighter than the threshold is foreground.
///
/// Useful for a backlit subject in front of a dark backdrop, and for
/// running the pipeline without a model.
pub struct LumaKeySegmenter {
    threshold: f32,
    policy: MaskPolicy,
}

impl LumaKeySegmenter {
    pub fn new(threshold: f32, policy: MaskPolicy) -> Self {
        Self { threshold, policy }
    }

    fn confidence(&self, luma: u8) -> u8 {
        let lo = self.threshold - SOFTNESS;
        let hi = self.threshold + SOFTNESS;
        let t = ((luma as f32 / 255.0 - lo) / (hi - lo)).clamp(0.0, 1.0);
        let smooth = t * t * (3.0 - 2.0 * t);
        (smooth * 255.0).round() as u8
    }
}

impl Segmenter for LumaKeySegmenter {
    fn segment(&mut self, frame: &Frame) -> Result<Option<Mask>, SegmentationError> {
        let upright = upright_rgb(frame)?;
        let (width, height) = upright.dimensions();
        let small = imageops::resize(
            &upright,
            (width / DOWNSAMPLE).max(1),
            (height / DOWNSAMPLE).max(1),
            FilterType::Triangle,
        );
        let mut raw = DynamicImage::ImageRgb8(small).into_luma8();
        for px in raw.pixels_mut() {
            *px = Luma([self.confidence(px.0[0])]);
        }
        debug!(seq = frame.seq, threshold = self.threshold, "luma key computed");
        Ok(self.policy.finish(raw, (width, height)))
    }

    fn name(&self) -> &str {
        "luma"
    }
}
