use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::{CaptureError, FrameSink};

/// List the image files in `dir` in lexical order.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| CaptureError::ReadDir(dir.display().to_string(), e))?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let extension = path.extension()?.to_str()?.to_ascii_lowercase();
            matches!(extension.as_str(), "png" | "jpg" | "jpeg" | "webp").then_some(path)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(CaptureError::EmptyDirectory(dir.display().to_string()));
    }
    Ok(files)
}

/// Replay the stills in `dir` as a camera feed, one per `interval`.
pub async fn run_directory_capture(
    dir: &Path,
    sink: &FrameSink,
    interval: Duration,
    loop_playback: bool,
) -> Result<(), CaptureError> {
    let files = list_images(dir)?;
    info!(dir = %dir.display(), files = files.len(), loop_playback, "replaying image directory");

    let mut ticker = tokio::time::interval(interval);
    loop {
        for path in &files {
            ticker.tick().await;
            match tokio::fs::read(path).await {
                Ok(bytes) => sink.deliver_encoded(&bytes)?,
                Err(e) => warn!(error = %e, path = %path.display(), "failed to read image"),
            }
        }
        if !loop_playback {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use mask_halftone_common::frame::Orientation;
    use tokio::sync::mpsc;

    fn write_png(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(4, 3, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn list_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 0);
        write_png(dir.path(), "a.png", 0);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let files = list_images(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn list_images_rejects_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_images(dir.path()),
            Err(CaptureError::EmptyDirectory(_))
        ));
    }

    #[tokio::test]
    async fn replays_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "000.png", 10);
        write_png(dir.path(), "001.png", 200);

        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx, "replay", Orientation::Right);
        run_directory_capture(dir.path(), &sink, Duration::from_millis(1), false)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.frame.data()[0], 10);
        assert_eq!(second.frame.data()[0], 200);
        assert_eq!(first.frame.orientation, Orientation::Right);
        assert!(first.connection.seq < second.connection.seq);
    }
}
