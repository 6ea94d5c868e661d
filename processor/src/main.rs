mod filter;
mod processor;
mod segmentation;
mod surface;

use mask_halftone_capture::{run_capture, FrameSink};
use mask_halftone_common::config::{CaptureConfig, Config};
use processor::FrameProcessor;
use std::path::PathBuf;
use surface::{FileSurface, OutputSlot};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        capture_mode = config.capture.mode,
        orientation = ?config.capture.orientation,
        backend = config.segmentation.backend,
        quality = ?config.segmentation.quality,
        output_mode = config.output.mode,
        "starting mask-halftone"
    );

    let segmenter = match segmentation::from_config(&config.segmentation) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize segmenter");
            std::process::exit(1);
        }
    };
    let surface = match FileSurface::from_config(&config.output) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize output surface");
            std::process::exit(1);
        }
    };

    let (slot, slot_rx) = OutputSlot::new();
    let presenter = tokio::spawn(surface::run_presentation(slot_rx, Box::new(surface)));

    // Capacity 1: a frame that arrives while the processor is busy is dropped.
    let (tx, rx) = mpsc::channel(1);
    let frame_processor = FrameProcessor::new(segmenter, slot);
    let delivery = match std::thread::Builder::new()
        .name("frame-delivery".into())
        .spawn(move || processor::run_delivery_loop(rx, frame_processor))
    {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to spawn frame delivery thread");
            std::process::exit(1);
        }
    };

    let sink = FrameSink::new(tx, &source_label(&config.capture), config.capture.orientation);
    let capture_result = tokio::select! {
        result = run_capture(&config.capture, sink) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    };

    // The sink is gone by now, so the delivery loop drains and returns.
    match tokio::task::spawn_blocking(move || delivery.join()).await {
        Ok(Ok(stats)) => info!(
            received = stats.received,
            published = stats.published,
            "frame processing finished"
        ),
        _ => warn!("frame delivery thread did not shut down cleanly"),
    }
    match presenter.await {
        Ok(stats) => info!(
            redraws = stats.redraws,
            coalesced = stats.coalesced,
            "presentation finished"
        ),
        Err(e) => warn!(error = %e, "presentation task failed"),
    }

    if let Err(e) = capture_result {
        error!(error = %e, "exiting after capture failure");
        std::process::exit(1);
    }
}

/// Label attached to every frame from this capture source.
fn source_label(config: &CaptureConfig) -> String {
    match config.directory.as_deref() {
        Some(dir) if config.mode == "directory" => dir.display().to_string(),
        _ => config.url.clone(),
    }
}
