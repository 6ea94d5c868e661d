use bytes::BytesMut;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{CaptureError, FrameSink};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Largest part accepted before the parser gives up on it and resyncs.
const DEFAULT_MAX_PART_BYTES: usize = 16 * 1024 * 1024;
/// Largest header block accepted before resyncing.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` MJPEG body.
///
/// Feed it network chunks as they arrive; it returns every JPEG whose
/// closing boundary has been seen. Boundaries and header blocks may span
/// chunks. A part larger than the size limit is discarded and the parser
/// resumes at the next boundary.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
    max_part_bytes: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
        }
    }

    pub fn with_max_part_bytes(mut self, max_part_bytes: usize) -> Self {
        self.max_part_bytes = max_part_bytes;
        self
    }

    /// Drop a part that outgrew its limit, keeping the tail in case it
    /// holds the start of the next boundary.
    fn resync(&mut self) {
        warn!(
            buffered = self.buffer.len(),
            limit = self.max_part_bytes,
            "MJPEG part too large, skipping to next boundary"
        );
        let keep = BOUNDARY.len().min(self.buffer.len());
        let _ = self.buffer.split_to(self.buffer.len() - keep);
        self.jpeg_start = 0;
        self.state = ParseState::SeekingBoundary;
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut jpegs = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else if self.buffer.len() > MAX_HEADER_BYTES {
                        self.resync();
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    if let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg_data = self.buffer[..end].to_vec();
                        let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());

                        if !jpeg_data.is_empty() {
                            jpegs.push(jpeg_data);
                        }
                        self.state = ParseState::SeekingHeaderEnd;
                    } else if self.buffer.len() > self.max_part_bytes {
                        self.resync();
                    } else {
                        // Skip already-scanned bytes on the next chunk
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    }
                }
            }
        }

        jpegs
    }
}

/// Consume the MJPEG stream and deliver decoded frames.
/// Reconnects with exponential backoff on failure.
pub async fn run_mjpeg_capture(stream_url: &str, sink: &FrameSink) -> Result<(), CaptureError> {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url = stream_url, "connecting to MJPEG stream");
        match consume_stream(stream_url, sink).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(CaptureError::ReceiverClosed) => return Err(CaptureError::ReceiverClosed),
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(url: &str, sink: &FrameSink) -> Result<(), CaptureError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(CaptureError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(CaptureError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(CaptureError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(CaptureError::HttpStream)?;
        for jpeg in parser.push(&chunk) {
            debug!(bytes = jpeg.len(), "received MJPEG part");
            sink.deliver_encoded(&jpeg)?;
        }
    }

    Ok(())
}

/// Polling-based fallback: periodically fetch single frames.
pub async fn run_polling_capture(
    frame_url: &str,
    sink: &FrameSink,
    interval: Duration,
) -> Result<(), CaptureError> {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match client.get(frame_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(jpeg) => sink.deliver_encoded(&jpeg)?,
                Err(e) => warn!(error = %e, "failed to read camera frame body"),
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from camera");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera frame");
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
