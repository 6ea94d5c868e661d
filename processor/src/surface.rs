//! The current output image and the surface that redraws it.

use image::ImageFormat;
use mask_halftone_common::config::OutputConfig;
use mask_halftone_common::frame::output_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::filter::{FilterError, Image};

/// An output image together with the frame it was computed from.
#[derive(Debug, Clone)]
pub struct PublishedImage {
    pub image: Image,
    pub source: Arc<str>,
    pub seq: u64,
    pub captured_at_ms: i64,
    /// Publish counter, starting at 1. Assigned by [`OutputSlot::publish`].
    pub generation: u64,
}

/// Holder of the current output image. Every publish replaces the previous
/// value and wakes the presentation task.
#[derive(Debug)]
pub struct OutputSlot {
    tx: watch::Sender<Option<PublishedImage>>,
    generation: u64,
}

impl OutputSlot {
    pub fn new() -> (Self, watch::Receiver<Option<PublishedImage>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx, generation: 0 }, rx)
    }

    pub fn publish(&mut self, mut image: PublishedImage) {
        self.generation += 1;
        image.generation = self.generation;
        self.tx.send_replace(Some(image));
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<PublishedImage> {
        self.tx.borrow().clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("failed to render output image: {0}")]
    Render(#[from] FilterError),
    #[error("failed to write {0}: {1}")]
    Write(String, String),
    #[error("unknown output mode {0:?}, expected 'latest' or 'sequence'")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationStats {
    pub redraws: u64,
    /// Publishes replaced by a newer image before they could be drawn.
    pub coalesced: u64,
}

/// Something that shows output images.
pub trait PresentationSurface: Send {
    fn draw(&mut self, frame: &PublishedImage) -> Result<(), SurfaceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileMode {
    /// Overwrite a single file.
    Latest,
    /// One file per redraw below a directory. Images published while a
    /// draw is in progress coalesce into the newest one.
    Sequence,
}

/// Renders output images to PNG files.
pub struct FileSurface {
    mode: FileMode,
    path: PathBuf,
    prefix: String,
}

impl FileSurface {
    pub fn from_config(config: &OutputConfig) -> Result<Self, SurfaceError> {
        let mode = match config.mode.as_str() {
            "latest" => FileMode::Latest,
            "sequence" => FileMode::Sequence,
            other => return Err(SurfaceError::UnknownMode(other.to_string())),
        };
        Ok(Self {
            mode,
            path: config.path.clone(),
            prefix: config.prefix.clone(),
        })
    }

    fn target(&self, frame: &PublishedImage) -> PathBuf {
        match self.mode {
            FileMode::Latest => self.path.clone(),
            FileMode::Sequence => self.path.join(output_name(
                &self.prefix,
                frame.captured_at_ms,
                frame.seq,
                "png",
            )),
        }
    }
}

fn write_err(path: &Path, e: impl std::fmt::Display) -> SurfaceError {
    SurfaceError::Write(path.display().to_string(), e.to_string())
}

impl PresentationSurface for FileSurface {
    fn draw(&mut self, frame: &PublishedImage) -> Result<(), SurfaceError> {
        let rgba = frame.image.render()?;
        let target = self.target(frame);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
        }

        // Write next to the target and rename so readers never see a torn file.
        let tmp = target.with_extension("png.tmp");
        rgba.save_with_format(&tmp, ImageFormat::Png)
            .map_err(|e| write_err(&tmp, e))?;
        std::fs::rename(&tmp, &target).map_err(|e| write_err(&target, e))?;

        debug!(seq = frame.seq, path = %target.display(), "output image written");
        Ok(())
    }

    fn name(&self) -> &str {
        match self.mode {
            FileMode::Latest => "file-latest",
            FileMode::Sequence => "file-sequence",
        }
    }
}

/// Redraw `surface` every time a new output image is published, until the
/// slot is dropped. Only the newest image is drawn; publishes that arrive
/// during a draw are counted as coalesced.
pub async fn run_presentation(
    mut rx: watch::Receiver<Option<PublishedImage>>,
    mut surface: Box<dyn PresentationSurface>,
) -> PresentationStats {
    info!(surface = surface.name(), "presentation surface ready");
    let mut stats = PresentationStats::default();
    let mut last_generation = 0u64;

    while rx.changed().await.is_ok() {
        let Some(frame) = rx.borrow_and_update().clone() else {
            continue;
        };
        let skipped = frame.generation.saturating_sub(last_generation + 1);
        if skipped > 0 {
            debug!(skipped, seq = frame.seq, "output images coalesced during draw");
            stats.coalesced += skipped;
        }
        last_generation = frame.generation;
        stats.redraws += 1;

        let drawn = tokio::task::spawn_blocking(move || {
            let result = surface.draw(&frame);
            (surface, frame.seq, result)
        })
        .await;
        match drawn {
            Ok((returned, seq, result)) => {
                surface = returned;
                if let Err(e) = result {
                    warn!(error = %e, seq, "failed to draw output image");
                }
            }
            Err(e) => {
                warn!(error = %e, "presentation task failed, stopping redraws");
                break;
            }
        }
    }

    info!(
        redraws = stats.redraws,
        coalesced = stats.coalesced,
        "presentation surface stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn published(seq: u64) -> PublishedImage {
        PublishedImage {
            image: Image::from_mask(&GrayImage::from_pixel(3, 2, Luma([200]))),
            source: Arc::from("test"),
            seq,
            captured_at_ms: 1708300000000 + seq as i64,
            generation: 0,
        }
    }

    #[test]
    fn publish_replaces_current_and_notifies() {
        let (mut slot, mut rx) = OutputSlot::new();
        assert!(slot.current().is_none());
        assert!(!rx.has_changed().unwrap());

        slot.publish(published(1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().seq, 1);

        slot.publish(published(2));
        let current = slot.current().unwrap();
        assert_eq!(current.seq, 2);
        assert_eq!(current.generation, 2);
    }

    #[test]
    fn unknown_output_mode_is_rejected() {
        let config = OutputConfig {
            mode: "window".into(),
            ..OutputConfig::default()
        };
        assert!(matches!(
            FileSurface::from_config(&config),
            Err(SurfaceError::UnknownMode(_))
        ));
    }

    #[test]
    fn latest_mode_overwrites_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/latest.png");
        let config = OutputConfig {
            mode: "latest".into(),
            path: path.clone(),
            prefix: String::new(),
        };
        let mut surface = FileSurface::from_config(&config).unwrap();

        surface.draw(&published(1)).unwrap();
        surface.draw(&published(2)).unwrap();

        let written = image::open(&path).unwrap().into_rgba8();
        assert_eq!(written.dimensions(), (3, 2));
        assert_eq!(written.get_pixel(0, 0).0, [200, 200, 200, 255]);
        assert!(!path.with_extension("png.tmp").exists());
    }

    #[test]
    fn sequence_mode_writes_one_file_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let config = OutputConfig {
            mode: "sequence".into(),
            path: dir.path().to_path_buf(),
            prefix: "frames/".into(),
        };
        let mut surface = FileSurface::from_config(&config).unwrap();

        surface.draw(&published(1)).unwrap();
        surface.draw(&published(2)).unwrap();

        let day = dir.path().join("frames/2024-02-18");
        let mut names: Vec<String> = std::fs::read_dir(&day)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("_000001.png"));
        assert!(names[1].ends_with("_000002.png"));
    }

    #[tokio::test]
    async fn presentation_redraws_once_per_publish() {
        let dir = tempfile::tempdir().unwrap();
        let config = OutputConfig {
            mode: "sequence".into(),
            path: dir.path().to_path_buf(),
            prefix: String::new(),
        };
        let surface = FileSurface::from_config(&config).unwrap();
        let (mut slot, rx) = OutputSlot::new();
        let presenter = tokio::spawn(run_presentation(rx, Box::new(surface)));

        slot.publish(published(1));
        drop(slot);

        let stats = presenter.await.unwrap();
        assert_eq!(stats, PresentationStats { redraws: 1, coalesced: 0 });
    }

    /// Surface that takes a while to draw.
    struct SlowSurface;

    impl PresentationSurface for SlowSurface {
        fn draw(&mut self, _frame: &PublishedImage) -> Result<(), SurfaceError> {
            std::thread::sleep(std::time::Duration::from_millis(30));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publishes_during_a_draw_are_counted_as_coalesced() {
        let (mut slot, rx) = OutputSlot::new();
        let presenter = tokio::spawn(run_presentation(rx, Box::new(SlowSurface)));

        for seq in 1..=5 {
            slot.publish(published(seq));
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        drop(slot);

        let stats = presenter.await.unwrap();
        assert!(stats.redraws >= 1);
        assert!(stats.coalesced >= 1, "{stats:?}");
        assert_eq!(stats.redraws + stats.coalesced, 5);
    }
}
