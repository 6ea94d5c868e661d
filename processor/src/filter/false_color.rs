use super::{Color, FilterError, Kernel, Params, Raster, Rect};

pub const NAME: &str = "false_color";

/// Maps luminance onto the gradient `color0 → color1`, alpha included.
#[derive(Debug)]
pub(super) struct FalseColor {
    color0: Color,
    color1: Color,
}

impl FalseColor {
    pub(super) fn from_params(params: &Params) -> Result<Self, FilterError> {
        Ok(Self {
            color0: params.color(NAME, "color0")?,
            color1: params.color(NAME, "color1")?,
        })
    }
}

/// Rec. 709 luma. Weights in ten-thousandths so that gray stays exact.
fn luma(r: f32, g: f32, b: f32) -> f32 {
    ((r * 2126.0 + g * 7152.0 + b * 722.0) / 10_000.0).clamp(0.0, 1.0)
}

impl Kernel for FalseColor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, input: &Raster, _roi: Rect) -> Raster {
        let c0 = self.color0.to_pixel();
        let c1 = self.color1.to_pixel();
        input.map(|_, _, [r, g, b, _]| {
            let t = luma(r, g, b);
            [0, 1, 2, 3].map(|i| c0[i] * (1.0 - t) + c1[i] * t)
        })
    }
}
