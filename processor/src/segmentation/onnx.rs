//! Person segmentation with an ONNX model run through ONNX Runtime.
//!
//! Works with the common single-input selfie/person segmentation exports:
//! an `[1, H, W, 3]` (NHWC) or `[1, 3, H, W]` (NCHW) float input in `[0, 1]`
//! and a confidence output of shape `[1, H, W, C]`, `[1, C, H, W]`,
//! `[1, H, W]` or `[H, W]`. With two channels the second one is the person
//! class.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use mask_halftone_common::config::SegmentationConfig;
use mask_halftone_common::frame::Frame;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::{upright_rgb, Mask, MaskPolicy, SegmentationError, Segmenter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

impl TensorLayout {
    pub fn parse(s: &str) -> Result<Self, SegmentationError> {
        match s {
            "nhwc" => Ok(TensorLayout::Nhwc),
            "nchw" => Ok(TensorLayout::Nchw),
            other => Err(SegmentationError::UnsupportedLayout(other.to_string())),
        }
    }
}

fn model_err(e: impl std::fmt::Display) -> SegmentationError {
    SegmentationError::Model(e.to_string())
}

/// Wraps the ONNX Runtime session.
pub struct OnnxSegmenter {
    session: Session,
    input_width: u32,
    input_height: u32,
    layout: TensorLayout,
    policy: MaskPolicy,
}

impl OnnxSegmenter {
    pub fn load(config: &SegmentationConfig, policy: MaskPolicy) -> Result<Self, SegmentationError> {
        let layout = TensorLayout::parse(&config.input_layout)?;
        let session = Session::builder()
            .map_err(model_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_err)?
            .with_intra_threads(config.intra_threads)
            .map_err(model_err)?
            .commit_from_file(&config.model_path)
            .map_err(model_err)?;
        info!(
            model = %config.model_path.display(),
            input_width = config.input_width,
            input_height = config.input_height,
            layout = config.input_layout,
            "loaded segmentation model"
        );
        Ok(Self {
            session,
            input_width: config.input_width,
            input_height: config.input_height,
            layout,
            policy,
        })
    }
}

impl Segmenter for OnnxSegmenter {
    fn segment(&mut self, frame: &Frame) -> Result<Option<Mask>, SegmentationError> {
        let upright = upright_rgb(frame)?;
        let upright_dims = upright.dimensions();
        let resized = imageops::resize(
            &upright,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let data = to_tensor_data(&resized, self.layout);
        let (w, h) = (self.input_width as usize, self.input_height as usize);
        let shape = match self.layout {
            TensorLayout::Nhwc => [1usize, h, w, 3],
            TensorLayout::Nchw => [1usize, 3, h, w],
        };
        let input = Tensor::from_array((shape, data.into_boxed_slice())).map_err(model_err)?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(model_err)?;
        let (out_shape, out_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(model_err)?;
        let dims: Vec<i64> = out_shape.iter().copied().collect();
        debug!(seq = frame.seq, ?dims, "segmentation inference done");

        let raw = decode_mask(&dims, out_data)?;
        Ok(self.policy.finish(raw, upright_dims))
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Flatten an RGB image into a float tensor in `[0, 1]`.
fn to_tensor_data(img: &RgbImage, layout: TensorLayout) -> Vec<f32> {
    let raw = img.as_raw();
    let size = (img.width() * img.height()) as usize;
    match layout {
        TensorLayout::Nhwc => raw.iter().map(|&v| v as f32 / 255.0).collect(),
        TensorLayout::Nchw => {
            let mut data = vec![0f32; 3 * size];
            for idx in 0..size {
                data[idx] = raw[idx * 3] as f32 / 255.0; // R
                data[size + idx] = raw[idx * 3 + 1] as f32 / 255.0; // G
                data[2 * size + idx] = raw[idx * 3 + 2] as f32 / 255.0; // B
            }
            data
        }
    }
}

/// Turn the model's confidence tensor into an 8-bit mask.
fn decode_mask(dims: &[i64], data: &[f32]) -> Result<GrayImage, SegmentationError> {
    let dim = |i: usize| usize::try_from(dims[i]).unwrap_or(0);
    // (height, width, channels, channel-last)
    let (height, width, channels, channel_last) = match dims.len() {
        2 => (dim(0), dim(1), 1, true),
        3 => (dim(1), dim(2), 1, true),
        4 if dim(3) <= 2 && dim(1) > 2 => (dim(1), dim(2), dim(3), true),
        4 => (dim(2), dim(3), dim(1), false),
        _ => {
            return Err(SegmentationError::UnexpectedOutput(format!(
                "unsupported output shape {dims:?}"
            )))
        }
    };
    if height == 0 || width == 0 || channels == 0 {
        return Err(SegmentationError::UnexpectedOutput(format!(
            "empty output shape {dims:?}"
        )));
    }
    if data.len() < height * width * channels {
        return Err(SegmentationError::UnexpectedOutput(format!(
            "output has {} values, shape {dims:?} needs {}",
            data.len(),
            height * width * channels
        )));
    }

    let person = if channels >= 2 { 1 } else { 0 };
    let mut mask = GrayImage::new(width as u32, height as u32);
    for (x, y, px) in mask.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        let idx = if channel_last {
            (y * width + x) * channels + person
        } else {
            person * height * width + y * width + x
        };
        *px = Luma([(data[idx].clamp(0.0, 1.0) * 255.0).round() as u8]);
    }
    Ok(mask)
}
