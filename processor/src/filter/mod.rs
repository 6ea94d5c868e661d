//! Lazily evaluated filter graph.
//!
//! An [`Image`] is a cheap handle to a node in an immutable DAG. Building a
//! chain only records filters and parameters; pixels are computed when an
//! image is evaluated for a region, and every filter pulls exactly the input
//! region it needs. Images carry an integer [`Rect`] extent. Sampling outside
//! a source image clamps to its edge, so filters that read beyond the
//! source (box blur) see a constant continuation instead of transparency.

mod box_blur;
mod dot_screen;
mod false_color;
mod invert;

use image::{GrayImage, Rgba, RgbaImage};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use box_blur::NAME as BOX_BLUR;
pub use dot_screen::NAME as DOT_SCREEN;
pub use false_color::NAME as FALSE_COLOR;
pub use invert::NAME as INVERT;

/// Parameter key of the input image, shared by every filter.
pub const INPUT_IMAGE: &str = "image";

/// Straight-alpha RGBA pixel with channels in `[0, 1]`.
pub type Pixel = [f32; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Grow the rectangle by `by` pixels on every side, saturating at the
    /// limits of the coordinate types.
    pub fn outset(&self, by: u32) -> Rect {
        let shift = i32::try_from(by).unwrap_or(i32::MAX);
        let grow = by.saturating_mul(2);
        Rect::new(
            self.x.saturating_sub(shift),
            self.y.saturating_sub(shift),
            self.width.saturating_add(grow),
            self.height.saturating_add(grow),
        )
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x as i64 || bottom <= y as i64 {
            return Rect::new(x, y, 0, 0);
        }
        Rect::new(x, y, (right - x as i64) as u32, (bottom - y as i64) as u32)
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_pixel(self) -> Pixel {
        [self.r, self.g, self.b, self.a]
    }

    /// The 8-bit pixel this color renders to.
    pub fn to_rgba8(self) -> Rgba<u8> {
        Rgba(self.to_pixel().map(quantize))
    }
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// A rectangle of evaluated pixels.
#[derive(Debug, Clone)]
pub struct Raster {
    extent: Rect,
    pixels: Vec<Pixel>,
}

impl Raster {
    fn from_pixels(extent: Rect, pixels: Vec<Pixel>) -> Self {
        debug_assert_eq!(pixels.len(), extent.width as usize * extent.height as usize);
        Self { extent, pixels }
    }

    fn from_fn(extent: Rect, mut f: impl FnMut(i32, i32) -> Pixel) -> Self {
        let mut pixels = Vec::with_capacity(extent.width as usize * extent.height as usize);
        for row in 0..extent.height as i32 {
            for col in 0..extent.width as i32 {
                pixels.push(f(extent.x + col, extent.y + row));
            }
        }
        Self { extent, pixels }
    }

    /// Apply `f` to every pixel. The result has the same extent.
    fn map(&self, mut f: impl FnMut(i32, i32, Pixel) -> Pixel) -> Raster {
        let width = self.extent.width as usize;
        let pixels = self
            .pixels
            .iter()
            .enumerate()
            .map(|(i, &px)| {
                let x = self.extent.x + (i % width) as i32;
                let y = self.extent.y + (i / width) as i32;
                f(x, y, px)
            })
            .collect();
        Self::from_pixels(self.extent, pixels)
    }

    pub fn extent(&self) -> Rect {
        self.extent
    }

    /// Pixel at absolute coordinates, clamped to the nearest edge.
    fn sample_clamped(&self, x: i32, y: i32) -> Pixel {
        if self.extent.is_empty() {
            return [0.0; 4];
        }
        let col = (x as i64 - self.extent.x as i64).clamp(0, self.extent.width as i64 - 1);
        let row = (y as i64 - self.extent.y as i64).clamp(0, self.extent.height as i64 - 1);
        self.pixels[row as usize * self.extent.width as usize + col as usize]
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.extent.width, self.extent.height);
        for (dst, src) in out.pixels_mut().zip(&self.pixels) {
            *dst = Rgba(src.map(quantize));
        }
        out
    }
}

/// One stage of the filter graph.
trait Kernel: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Extent of the output for an input with extent `input`.
    fn extent(&self, input: Rect) -> Rect {
        input
    }

    /// Input region needed to produce `roi`.
    fn input_region(&self, roi: Rect) -> Rect {
        roi
    }

    /// Compute `roi` from `input`, which covers `self.input_region(roi)`.
    fn apply(&self, input: &Raster, roi: Rect) -> Raster;
}

#[derive(Debug)]
enum Node {
    Source(Raster),
    Filter {
        kernel: Box<dyn Kernel>,
        input: Image,
        extent: Rect,
    },
    Crop {
        rect: Rect,
        input: Image,
    },
}

/// Handle to a lazily evaluated image.
#[derive(Debug, Clone)]
pub struct Image {
    node: Arc<Node>,
}

impl Image {
    /// Wrap a single-channel mask as an opaque gray image.
    pub fn from_mask(mask: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();
        let pixels = mask
            .pixels()
            .map(|p| {
                let v = p.0[0] as f32 / 255.0;
                [v, v, v, 1.0]
            })
            .collect();
        Self::from_node(Node::Source(Raster::from_pixels(
            Rect::from_size(width, height),
            pixels,
        )))
    }

    fn from_node(node: Node) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    fn filtered(kernel: Box<dyn Kernel>, input: Image) -> Self {
        let extent = kernel.extent(input.extent());
        Self::from_node(Node::Filter {
            kernel,
            input,
            extent,
        })
    }

    pub fn extent(&self) -> Rect {
        match self.node.as_ref() {
            Node::Source(raster) => raster.extent,
            Node::Filter { extent, .. } => *extent,
            Node::Crop { rect, input } => input.extent().intersect(rect),
        }
    }

    /// Restrict the image to `rect`. Nothing is computed.
    pub fn cropped(&self, rect: Rect) -> Image {
        Self::from_node(Node::Crop {
            rect,
            input: self.clone(),
        })
    }

    /// Whether both handles refer to the same node.
    #[cfg(test)]
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Names of the filters from the source to this image, in order.
    pub fn filter_names(&self) -> Vec<&'static str> {
        let mut names = match self.node.as_ref() {
            Node::Source(_) => Vec::new(),
            Node::Filter { input, .. } | Node::Crop { input, .. } => input.filter_names(),
        };
        if let Node::Filter { kernel, .. } = self.node.as_ref() {
            names.push(kernel.name());
        }
        names
    }

    /// Compute the pixels of `roi`.
    pub fn evaluate(&self, roi: Rect) -> Raster {
        if roi.is_empty() {
            return Raster::from_pixels(roi, Vec::new());
        }
        match self.node.as_ref() {
            Node::Source(raster) => Raster::from_fn(roi, |x, y| raster.sample_clamped(x, y)),
            Node::Filter { kernel, input, .. } => {
                let source = input.evaluate(kernel.input_region(roi));
                kernel.apply(&source, roi)
            }
            Node::Crop { rect, input } => {
                if rect.contains(&roi) {
                    return input.evaluate(roi);
                }
                // Outside the crop rectangle is transparent.
                let inside = roi.intersect(rect);
                let pixels = input.evaluate(inside);
                Raster::from_fn(roi, |x, y| {
                    if inside.contains(&Rect::new(x, y, 1, 1)) {
                        pixels.sample_clamped(x, y)
                    } else {
                        [0.0; 4]
                    }
                })
            }
        }
    }

    /// Evaluate the whole extent into an 8-bit RGBA image.
    pub fn render(&self) -> Result<RgbaImage, FilterError> {
        let extent = self.extent();
        if extent.is_empty() {
            return Err(FilterError::EmptyExtent);
        }
        Ok(self.evaluate(extent).to_rgba8())
    }
}

#[derive(Debug, Clone)]
pub enum ParamValue {
    Image(Image),
    Scalar(f32),
    Vector([f32; 2]),
    Color(Color),
}

impl ParamValue {
    fn kind(&self) -> &'static str {
        match self {
            ParamValue::Image(_) => "image",
            ParamValue::Scalar(_) => "scalar",
            ParamValue::Vector(_) => "vector",
            ParamValue::Color(_) => "color",
        }
    }
}

impl From<Image> for ParamValue {
    fn from(image: Image) -> Self {
        ParamValue::Image(image)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Scalar(v)
    }
}

impl From<[f32; 2]> for ParamValue {
    fn from(v: [f32; 2]) -> Self {
        ParamValue::Vector(v)
    }
}

impl From<Color> for ParamValue {
    fn from(c: Color) -> Self {
        ParamValue::Color(c)
    }
}

/// Named filter parameters.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    fn wrong_type(filter: &str, key: &str, expected: &'static str, got: &ParamValue) -> FilterError {
        FilterError::WrongType {
            filter: filter.to_string(),
            param: key.to_string(),
            expected,
            got: got.kind(),
        }
    }

    fn image(&self, filter: &str, key: &str) -> Result<Image, FilterError> {
        match self.values.get(key) {
            Some(ParamValue::Image(image)) => Ok(image.clone()),
            Some(other) => Err(Self::wrong_type(filter, key, "image", other)),
            None => Err(FilterError::MissingParameter {
                filter: filter.to_string(),
                param: key.to_string(),
            }),
        }
    }

    fn color(&self, filter: &str, key: &str) -> Result<Color, FilterError> {
        match self.values.get(key) {
            Some(ParamValue::Color(color)) => Ok(*color),
            Some(other) => Err(Self::wrong_type(filter, key, "color", other)),
            None => Err(FilterError::MissingParameter {
                filter: filter.to_string(),
                param: key.to_string(),
            }),
        }
    }

    fn scalar_or(&self, filter: &str, key: &str, default: f32) -> Result<f32, FilterError> {
        match self.values.get(key) {
            Some(ParamValue::Scalar(v)) => Ok(*v),
            Some(other) => Err(Self::wrong_type(filter, key, "scalar", other)),
            None => Ok(default),
        }
    }

    fn vector_or(&self, filter: &str, key: &str, default: [f32; 2]) -> Result<[f32; 2], FilterError> {
        match self.values.get(key) {
            Some(ParamValue::Vector(v)) => Ok(*v),
            Some(other) => Err(Self::wrong_type(filter, key, "vector", other)),
            None => Ok(default),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unknown filter {0:?}")]
    UnknownFilter(String),
    #[error("filter {filter} is missing parameter {param:?}")]
    MissingParameter { filter: String, param: String },
    #[error("filter {filter} parameter {param:?} must be a {expected}, got a {got}")]
    WrongType {
        filter: String,
        param: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("filter {filter} parameter {param:?} is invalid: {reason}")]
    InvalidValue {
        filter: String,
        param: String,
        reason: String,
    },
    #[error("image has an empty extent")]
    EmptyExtent,
}

/// Construct the filter called `name` over `params[INPUT_IMAGE]`.
///
/// Nothing is evaluated; the returned image computes its pixels on demand.
pub fn apply(name: &str, params: &Params) -> Result<Image, FilterError> {
    let kernel: Box<dyn Kernel> = match name {
        invert::NAME => Box::new(invert::Invert),
        box_blur::NAME => Box::new(box_blur::BoxBlur::from_params(params)?),
        dot_screen::NAME => Box::new(dot_screen::DotScreen::from_params(params)?),
        false_color::NAME => Box::new(false_color::FalseColor::from_params(params)?),
        other => return Err(FilterError::UnknownFilter(other.to_string())),
    };
    let input = params.image(name, INPUT_IMAGE)?;
    Ok(Image::filtered(kernel, input))
}
