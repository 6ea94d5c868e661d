use super::{Kernel, Raster, Rect};

pub const NAME: &str = "invert";

/// Inverts the color channels, leaving alpha alone.
#[derive(Debug)]
pub(super) struct Invert;

impl Kernel for Invert {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, input: &Raster, _roi: Rect) -> Raster {
        input.map(|_, _, [r, g, b, a]| [1.0 - r, 1.0 - g, 1.0 - b, a])
    }
}
