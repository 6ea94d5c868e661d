use mask_halftone_capture::{CaptureConnection, DeliveredFrame};
use mask_halftone_common::frame::Frame;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::filter::{self, Color, FilterError, Image, Params, INPUT_IMAGE};
use crate::segmentation::{Mask, Segmenter};
use crate::surface::{OutputSlot, PublishedImage};

/// Shadow color of the false-color remap.
pub const DARK_TINT: Color = Color::new(0.1, 0.1, 0.1, 0.9);
/// Highlight color of the false-color remap.
pub const LIGHT_TINT: Color = Color::new(0.8, 0.8, 0.9, 0.9);

const FINE_BLUR_RADIUS: f32 = 20.0;
const FINE_SCREEN_WIDTH: f32 = 20.0;
const COARSE_BLUR_RADIUS: f32 = 60.0;
const COARSE_SCREEN_WIDTH: f32 = 60.0;

/// Build the halftone chain over `mask`:
/// invert → blur(20) → dot screen(20) → blur(60) → dot screen(60) → false color,
/// cropped back to the mask's extent. Nothing is rendered here.
pub fn stylize(mask: &Mask) -> Result<Image, FilterError> {
    let source = Image::from_mask(mask.image());
    let inverted = filter::apply(filter::INVERT, &Params::new().with(INPUT_IMAGE, source))?;
    let fine_blur = filter::apply(
        filter::BOX_BLUR,
        &Params::new()
            .with(INPUT_IMAGE, inverted)
            .with("radius", FINE_BLUR_RADIUS),
    )?;
    let fine_screen = filter::apply(
        filter::DOT_SCREEN,
        &Params::new()
            .with(INPUT_IMAGE, fine_blur)
            .with("width", FINE_SCREEN_WIDTH),
    )?;
    let coarse_blur = filter::apply(
        filter::BOX_BLUR,
        &Params::new()
            .with(INPUT_IMAGE, fine_screen)
            .with("radius", COARSE_BLUR_RADIUS),
    )?;
    let coarse_screen = filter::apply(
        filter::DOT_SCREEN,
        &Params::new()
            .with(INPUT_IMAGE, coarse_blur)
            .with("width", COARSE_SCREEN_WIDTH),
    )?;
    let colored = filter::apply(
        filter::FALSE_COLOR,
        &Params::new()
            .with(INPUT_IMAGE, coarse_screen)
            .with("color0", DARK_TINT)
            .with("color1", LIGHT_TINT),
    )?;
    Ok(colored.cropped(mask.extent()))
}

/// What happened to a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Published,
    NoMask,
    SegmentationFailed,
    FilterFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub received: u64,
    pub published: u64,
    pub no_mask: u64,
    pub segmentation_errors: u64,
    pub filter_errors: u64,
}

/// Builds the output image for a mask.
pub type ChainBuilder = fn(&Mask) -> Result<Image, FilterError>;

/// Turns captured frames into stylized output images, one at a time.
pub struct FrameProcessor {
    segmenter: Box<dyn Segmenter>,
    chain: ChainBuilder,
    output: OutputSlot,
    stats: ProcessorStats,
}

impl FrameProcessor {
    pub fn new(segmenter: Box<dyn Segmenter>, output: OutputSlot) -> Self {
        Self {
            segmenter,
            chain: stylize,
            output,
            stats: ProcessorStats::default(),
        }
    }

    /// Process one captured frame. Failures drop the frame and leave the
    /// current output image as it was.
    pub fn process_frame(&mut self, frame: &Frame, connection: &CaptureConnection) -> FrameOutcome {
        self.stats.received += 1;
        if self.stats.received % 100 == 0 {
            debug!(total = self.stats.received, "frames processed");
        }

        let mask = match self.segmenter.segment(frame) {
            Ok(Some(mask)) => mask,
            Ok(None) => {
                debug!(seq = frame.seq, "no subject found, skipping frame");
                self.stats.no_mask += 1;
                return FrameOutcome::NoMask;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    seq = frame.seq,
                    segmenter = self.segmenter.name(),
                    "segmentation failed, skipping frame"
                );
                self.stats.segmentation_errors += 1;
                return FrameOutcome::SegmentationFailed;
            }
        };

        let image = match (self.chain)(&mask) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "failed to build filter chain, skipping frame");
                self.stats.filter_errors += 1;
                return FrameOutcome::FilterFailed;
            }
        };

        debug!(
            seq = frame.seq,
            source = &*connection.source,
            upright = ?frame.upright_dimensions(),
            mask = ?mask.image().dimensions(),
            stages = ?image.filter_names(),
            "publishing output image"
        );
        self.output.publish(PublishedImage {
            image,
            source: connection.source.clone(),
            seq: connection.seq,
            captured_at_ms: connection.captured_at_ms,
            generation: 0,
        });
        self.stats.published += 1;
        FrameOutcome::Published
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }
}

/// Process delivered frames on the calling thread until every sender is gone.
pub fn run_delivery_loop(
    mut rx: mpsc::Receiver<DeliveredFrame>,
    mut processor: FrameProcessor,
) -> ProcessorStats {
    info!("frame delivery loop started");
    while let Some(delivered) = rx.blocking_recv() {
        processor.process_frame(&delivered.frame, &delivered.connection);
    }
    let stats = processor.stats();
    info!(
        received = stats.received,
        published = stats.published,
        no_mask = stats.no_mask,
        segmentation_errors = stats.segmentation_errors,
        filter_errors = stats.filter_errors,
        "frame delivery loop stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::SegmentationError;
    use image::{GrayImage, Luma};
    use mask_halftone_common::frame::PixelFormat;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays scripted segmentation results.
    struct ScriptedSegmenter {
        script: VecDeque<Result<Option<Mask>, SegmentationError>>,
    }

    impl ScriptedSegmenter {
        fn new(script: Vec<Result<Option<Mask>, SegmentationError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl Segmenter for ScriptedSegmenter {
        fn segment(&mut self, _frame: &Frame) -> Result<Option<Mask>, SegmentationError> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn solid_mask(width: u32, height: u32, shade: u8) -> Mask {
        Mask::new(GrayImage::from_pixel(width, height, Luma([shade])))
    }

    fn frame(seq: u64) -> (Frame, CaptureConnection) {
        let frame = Frame::new(4, 4, PixelFormat::Luma8, vec![0; 16], 1000 + seq as i64, seq)
            .unwrap();
        let connection = CaptureConnection {
            source: Arc::from("test"),
            seq,
            captured_at_ms: frame.captured_at_ms,
        };
        (frame, connection)
    }

    #[test]
    fn output_extent_matches_mask_extent() {
        let mask = Mask::new(GrayImage::from_fn(37, 23, |x, y| Luma([((x * y) % 256) as u8])));
        let image = stylize(&mask).unwrap();
        assert_eq!(image.extent(), mask.extent());
        assert_eq!(image.render().unwrap().dimensions(), (37, 23));
    }

    #[test]
    fn chain_runs_every_stage_in_order() {
        let image = stylize(&solid_mask(4, 4, 0)).unwrap();
        assert_eq!(
            image.filter_names(),
            vec![
                filter::INVERT,
                filter::BOX_BLUR,
                filter::DOT_SCREEN,
                filter::BOX_BLUR,
                filter::DOT_SCREEN,
                filter::FALSE_COLOR,
            ]
        );
    }

    #[test]
    fn identical_masks_render_identically() {
        let mask = Mask::new(GrayImage::from_fn(48, 32, |x, y| {
            Luma([if (x as i32 - 24).pow(2) + (y as i32 - 16).pow(2) < 150 { 255 } else { 0 }])
        }));
        let first = stylize(&mask).unwrap().render().unwrap();
        let second = stylize(&mask.clone()).unwrap().render().unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn full_foreground_renders_dark_tint() {
        let rendered = stylize(&solid_mask(24, 16, 255)).unwrap().render().unwrap();
        let dark = DARK_TINT.to_rgba8();
        assert!(rendered.pixels().all(|p| *p == dark));
    }

    #[test]
    fn empty_foreground_renders_light_tint() {
        let rendered = stylize(&solid_mask(24, 16, 0)).unwrap().render().unwrap();
        let light = LIGHT_TINT.to_rgba8();
        assert!(rendered.pixels().all(|p| *p == light));
    }

    #[test]
    fn missing_mask_leaves_output_untouched() {
        let (slot, mut rx) = OutputSlot::new();
        let segmenter = ScriptedSegmenter::new(vec![Ok(Some(solid_mask(8, 8, 255))), Ok(None)]);
        let mut processor = FrameProcessor::new(Box::new(segmenter), slot);

        let (f, c) = frame(0);
        assert_eq!(processor.process_frame(&f, &c), FrameOutcome::Published);
        let before = rx.borrow_and_update().clone().unwrap();

        let (f, c) = frame(1);
        assert_eq!(processor.process_frame(&f, &c), FrameOutcome::NoMask);
        assert!(!rx.has_changed().unwrap());
        let after = rx.borrow().clone().unwrap();
        assert!(after.image.ptr_eq(&before.image));
        assert_eq!(after.seq, 0);
    }

    #[test]
    fn filter_failure_skips_frame_and_keeps_output() {
        fn broken_chain(_mask: &Mask) -> Result<Image, FilterError> {
            filter::apply("posterize", &Params::new())
        }

        let (slot, mut rx) = OutputSlot::new();
        let segmenter = ScriptedSegmenter::new(vec![
            Ok(Some(solid_mask(8, 8, 255))),
            Ok(Some(solid_mask(8, 8, 0))),
        ]);
        let mut processor = FrameProcessor::new(Box::new(segmenter), slot);
        let (f, c) = frame(0);
        assert_eq!(processor.process_frame(&f, &c), FrameOutcome::Published);
        rx.mark_unchanged();

        processor.chain = broken_chain;
        let (f, c) = frame(1);
        assert_eq!(processor.process_frame(&f, &c), FrameOutcome::FilterFailed);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().as_ref().unwrap().seq, 0);

        let stats = processor.stats();
        assert_eq!(stats.filter_errors, 1);
        assert_eq!(stats.published, 1);
    }

    #[test]
    fn redraws_track_successful_segmentations() {
        let (slot, mut rx) = OutputSlot::new();
        let segmenter = ScriptedSegmenter::new(vec![
            Ok(Some(solid_mask(8, 8, 255))),
            Ok(None),
            Err(SegmentationError::Model("inference failed".into())),
            Ok(Some(solid_mask(8, 8, 0))),
            Ok(Some(solid_mask(8, 8, 128))),
        ]);
        let mut processor = FrameProcessor::new(Box::new(segmenter), slot);

        let mut notifications = 0;
        for seq in 0..5 {
            let (f, c) = frame(seq);
            processor.process_frame(&f, &c);
            if rx.has_changed().unwrap() {
                rx.mark_unchanged();
                notifications += 1;
            }
        }

        let stats = processor.stats();
        assert_eq!(notifications, 3);
        assert_eq!(
            stats,
            ProcessorStats {
                received: 5,
                published: 3,
                no_mask: 1,
                segmentation_errors: 1,
                filter_errors: 0,
            }
        );
        assert_eq!(rx.borrow().as_ref().unwrap().seq, 4);
    }

    #[test]
    fn delivery_loop_drains_until_senders_close() {
        let (slot, _rx) = OutputSlot::new();
        let segmenter = ScriptedSegmenter::new(vec![
            Ok(Some(solid_mask(4, 4, 0))),
            Ok(Some(solid_mask(4, 4, 0))),
        ]);
        let processor = FrameProcessor::new(Box::new(segmenter), slot);

        let (tx, rx) = mpsc::channel(4);
        for seq in 0..3 {
            let (frame, connection) = frame(seq);
            tx.try_send(DeliveredFrame { frame, connection }).unwrap();
        }
        drop(tx);

        let stats = std::thread::spawn(move || run_delivery_loop(rx, processor))
            .join()
            .unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.no_mask, 1);
    }
}
