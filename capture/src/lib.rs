//! Capture sources that decode camera images into [`Frame`]s and push them
//! to a single consumer.

pub mod decode;
pub mod directory;
pub mod mjpeg;

use mask_halftone_common::config::CaptureConfig;
use mask_halftone_common::frame::{Frame, Orientation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to read capture directory {0}: {1}")]
    ReadDir(String, std::io::Error),
    #[error("no image files found in {0}")]
    EmptyDirectory(String),
    #[error("capture mode {0:?} needs {1} to be set")]
    MissingSetting(String, &'static str),
    #[error("unknown capture mode {0:?}, expected 'mjpeg', 'polling' or 'directory'")]
    UnknownMode(String),
    #[error("frame receiver closed")]
    ReceiverClosed,
}

/// Describes which source delivered a frame. Handed to the consumer next to
/// every [`Frame`].
#[derive(Debug, Clone)]
pub struct CaptureConnection {
    pub source: Arc<str>,
    pub seq: u64,
    pub captured_at_ms: i64,
}

/// A frame in flight from a capture source to the processor.
#[derive(Debug)]
pub struct DeliveredFrame {
    pub frame: Frame,
    pub connection: CaptureConnection,
}

/// Sending half of the capture → processor hand-off.
///
/// The channel is expected to be tiny (capacity 1). When the consumer is
/// still busy with the previous frame the new one is discarded instead of
/// queued, so the processor always works on a recent frame.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<DeliveredFrame>,
    source: Arc<str>,
    orientation: Orientation,
    seq: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<DeliveredFrame>, source: &str, orientation: Orientation) -> Self {
        Self {
            tx,
            source: Arc::from(source),
            orientation,
            seq: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Decode an encoded image (JPEG, PNG, ...) and deliver it.
    pub fn deliver_encoded(&self, bytes: &[u8]) -> Result<(), CaptureError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now_ms = chrono::Utc::now().timestamp_millis();
        match decode::decode_frame(bytes, now_ms, seq) {
            Ok(frame) => self.deliver(frame),
            Err(e) => {
                debug!(error = %e, seq, "failed to decode captured image, skipping");
                Ok(())
            }
        }
    }

    /// Tag `frame` with the configured orientation and hand it to the consumer.
    /// Returns [`CaptureError::ReceiverClosed`] once nobody is listening.
    pub fn deliver(&self, frame: Frame) -> Result<(), CaptureError> {
        let frame = frame.with_orientation(self.orientation);
        let connection = CaptureConnection {
            source: Arc::clone(&self.source),
            seq: frame.seq,
            captured_at_ms: frame.captured_at_ms,
        };
        match self.tx.try_send(DeliveredFrame { frame, connection }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(late)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(seq = late.frame.seq, dropped, "processor busy, dropping late frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CaptureError::ReceiverClosed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Run the capture source selected by `config.mode` until the receiver goes away.
pub async fn run_capture(config: &CaptureConfig, sink: FrameSink) -> Result<(), CaptureError> {
    info!(mode = config.mode, fps = config.fps, "starting capture");
    let result = match config.mode.as_str() {
        "mjpeg" => {
            require_url(config)?;
            let url = format!(
                "{}?quality={}&fps={}",
                config.url, config.quality, config.fps
            );
            mjpeg::run_mjpeg_capture(&url, &sink).await
        }
        "polling" => {
            require_url(config)?;
            let url = format!(
                "{}?quality={}",
                config.url.replace("/stream", "/frame"),
                config.quality
            );
            mjpeg::run_polling_capture(&url, &sink, frame_interval(config.fps)).await
        }
        "directory" => {
            let dir = config
                .directory
                .as_deref()
                .ok_or_else(|| CaptureError::MissingSetting(config.mode.clone(), "directory"))?;
            directory::run_directory_capture(
                dir,
                &sink,
                frame_interval(config.fps),
                config.loop_playback,
            )
            .await
        }
        other => Err(CaptureError::UnknownMode(other.to_string())),
    };

    match &result {
        Ok(()) | Err(CaptureError::ReceiverClosed) => {
            info!(dropped = sink.dropped(), "capture stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "capture failed");
            result
        }
    }
}

fn require_url(config: &CaptureConfig) -> Result<(), CaptureError> {
    if config.url.is_empty() {
        return Err(CaptureError::MissingSetting(config.mode.clone(), "url"));
    }
    Ok(())
}

fn frame_interval(fps: f64) -> Duration {
    if fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mask_halftone_common::frame::PixelFormat;

    fn frame(seq: u64) -> Frame {
        Frame::new(2, 2, PixelFormat::Luma8, vec![0; 4], 1000 + seq as i64, seq).unwrap()
    }

    #[test]
    fn deliver_tags_orientation_and_connection() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = FrameSink::new(tx, "cam-0", Orientation::Left);

        sink.deliver(frame(3)).unwrap();

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.frame.orientation, Orientation::Left);
        assert_eq!(&*delivered.connection.source, "cam-0");
        assert_eq!(delivered.connection.seq, 3);
        assert_eq!(delivered.connection.captured_at_ms, 1003);
    }

    #[test]
    fn deliver_drops_late_frames_when_busy() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = FrameSink::new(tx, "cam-0", Orientation::Up);

        sink.deliver(frame(0)).unwrap();
        sink.deliver(frame(1)).unwrap();
        sink.deliver(frame(2)).unwrap();

        assert_eq!(sink.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().frame.seq, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn deliver_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = FrameSink::new(tx, "cam-0", Orientation::Up);
        assert!(matches!(sink.deliver(frame(0)), Err(CaptureError::ReceiverClosed)));
    }

    #[tokio::test]
    async fn run_capture_rejects_unknown_mode() {
        let (tx, _rx) = mpsc::channel(1);
        let config = CaptureConfig {
            mode: "rtsp".into(),
            url: String::new(),
            directory: None,
            quality: 80,
            fps: 10.0,
            orientation: Orientation::Up,
            loop_playback: false,
        };
        let sink = FrameSink::new(tx, "cam-0", Orientation::Up);
        assert!(matches!(
            run_capture(&config, sink).await,
            Err(CaptureError::UnknownMode(_))
        ));
    }

    #[tokio::test]
    async fn run_capture_requires_url_for_http_modes() {
        let (tx, _rx) = mpsc::channel(1);
        let config = CaptureConfig {
            mode: "polling".into(),
            url: String::new(),
            directory: None,
            quality: 80,
            fps: 10.0,
            orientation: Orientation::Up,
            loop_playback: false,
        };
        let sink = FrameSink::new(tx, "cam-0", Orientation::Up);
        assert!(matches!(
            run_capture(&config, sink).await,
            Err(CaptureError::MissingSetting(_, "url"))
        ));
    }
}
