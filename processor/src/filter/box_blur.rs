use super::{FilterError, Kernel, Params, Pixel, Raster, Rect};

pub const NAME: &str = "box_blur";

const DEFAULT_RADIUS: f32 = 10.0;
/// Largest accepted radius. The output grows by `2r` in each dimension.
const MAX_RADIUS: f32 = 1024.0;

/// Mean over a `(2r + 1)²` window, computed as two separable running sums.
///
/// The output extent grows by `r` on every side, like a blur that lets
/// color bleed past the edge of its input.
#[derive(Debug)]
pub(super) struct BoxBlur {
    radius: u32,
}

impl BoxBlur {
    pub(super) fn from_params(params: &Params) -> Result<Self, FilterError> {
        let radius = params.scalar_or(NAME, "radius", DEFAULT_RADIUS)?;
        if !radius.is_finite() || !(0.0..=MAX_RADIUS).contains(&radius) {
            return Err(FilterError::InvalidValue {
                filter: NAME.to_string(),
                param: "radius".to_string(),
                reason: format!("must be between 0 and {MAX_RADIUS}, got {radius}"),
            });
        }
        Ok(Self {
            radius: radius.round() as u32,
        })
    }
}

impl Kernel for BoxBlur {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extent(&self, input: Rect) -> Rect {
        input.outset(self.radius)
    }

    fn input_region(&self, roi: Rect) -> Rect {
        roi.outset(self.radius)
    }

    fn apply(&self, input: &Raster, roi: Rect) -> Raster {
        if self.radius == 0 {
            return input.clone();
        }
        let r = self.radius as usize;
        let window = 2 * r + 1;
        let in_width = input.extent().width as usize;
        let in_height = input.extent().height as usize;
        let out_width = roi.width as usize;
        let out_height = roi.height as usize;

        // Horizontal pass: every input row, output columns only.
        let mut horizontal = Vec::with_capacity(out_width * in_height);
        for row in input.pixels.chunks_exact(in_width) {
            running_mean(row.iter().copied(), window, out_width, &mut horizontal);
        }

        // Vertical pass over the columns of the horizontal result.
        let mut columns = Vec::with_capacity(out_height);
        let mut pixels = vec![[0.0; 4]; out_width * out_height];
        for col in 0..out_width {
            columns.clear();
            let column = (0..in_height).map(|row| horizontal[row * out_width + col]);
            running_mean(column, window, out_height, &mut columns);
            for (row, px) in columns.iter().enumerate() {
                pixels[row * out_width + col] = *px;
            }
        }

        Raster::from_pixels(roi, pixels)
    }
}

/// Push `count` window means of `samples` onto `out`. `samples` must yield
/// `count + window - 1` items.
fn running_mean(
    samples: impl Iterator<Item = Pixel> + Clone,
    window: usize,
    count: usize,
    out: &mut Vec<Pixel>,
) {
    let mut sum = [0.0f64; 4];
    let mut leading = samples.clone();
    for px in leading.by_ref().take(window) {
        add(&mut sum, px, 1.0);
    }
    let mut trailing = samples;
    let scale = 1.0 / window as f64;
    for i in 0..count {
        out.push(sum.map(|s| (s * scale) as f32));
        if i + 1 < count {
            if let (Some(old), Some(new)) = (trailing.next(), leading.next()) {
                add(&mut sum, old, -1.0);
                add(&mut sum, new, 1.0);
            }
        }
    }
}

fn add(sum: &mut [f64; 4], px: Pixel, sign: f64) {
    for (s, v) in sum.iter_mut().zip(px) {
        *s += sign * v as f64;
    }
}
