use std::f32::consts::TAU;

use super::{FilterError, Kernel, Params, Raster, Rect};

pub const NAME: &str = "dot_screen";

const DEFAULT_WIDTH: f32 = 6.0;
const DEFAULT_CENTER: [f32; 2] = [150.0, 150.0];

/// Monochrome halftone screen.
///
/// The dot pattern `sin(u)·sin(v)` is laid over rotated coordinates around
/// `center`, one dot per `width` pixels. Pure black and pure white pass
/// through unchanged; mid tones break up into dots.
#[derive(Debug)]
pub(super) struct DotScreen {
    width: f32,
    angle: f32,
    center: [f32; 2],
}

impl DotScreen {
    pub(super) fn from_params(params: &Params) -> Result<Self, FilterError> {
        let width = params.scalar_or(NAME, "width", DEFAULT_WIDTH)?;
        if !width.is_finite() || width <= 0.0 {
            return Err(FilterError::InvalidValue {
                filter: NAME.to_string(),
                param: "width".to_string(),
                reason: format!("must be a finite value > 0, got {width}"),
            });
        }
        let angle = params.scalar_or(NAME, "angle", 0.0)?;
        if !angle.is_finite() {
            return Err(not_finite("angle", format!("{angle}")));
        }
        let center = params.vector_or(NAME, "center", DEFAULT_CENTER)?;
        if !center.iter().all(|c| c.is_finite()) {
            return Err(not_finite("center", format!("{center:?}")));
        }
        Ok(Self {
            width,
            angle,
            center,
        })
    }
}

fn not_finite(param: &str, got: String) -> FilterError {
    FilterError::InvalidValue {
        filter: NAME.to_string(),
        param: param.to_string(),
        reason: format!("must be finite, got {got}"),
    }
}

impl Kernel for DotScreen {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, input: &Raster, _roi: Rect) -> Raster {
        let (sin, cos) = self.angle.sin_cos();
        let frequency = TAU / self.width;
        input.map(|x, y, [r, g, b, a]| {
            let dx = x as f32 + 0.5 - self.center[0];
            let dy = y as f32 + 0.5 - self.center[1];
            let u = (cos * dx - sin * dy) * frequency;
            let v = (sin * dx + cos * dy) * frequency;
            let pattern = u.sin() * v.sin();
            let gray = (r + g + b) / 3.0;
            let value = (gray * 10.0 - 5.0 + pattern * 4.0).clamp(0.0, 1.0);
            [value, value, value, a]
        })
    }
}
