use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use motion_cam_common::config::Config;
use motion_cam_common::frame::CapturedFrame;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::capture::FrameSource;
use crate::detector::{MotionDetector, MotionParams};
use crate::recorder::encoder::ClipWriter;
use crate::recorder::Recorder;
use crate::storage::{MediaStore, StorageError};
use crate::stream::{encode_stream_part, StreamError};

/// Log every Nth failure of an acquisition streak after the first.
const FAILURE_LOG_EVERY: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("clip flush task failed: {0}")]
    Flush(#[from] tokio::task::JoinError),
}

/// One viewer's frame loop: acquire, detect, record, encode.
///
/// Detector reference and recorder buffer belong to this loop only. The
/// camera, media store and clip writer are shared between viewers.
pub struct FramePipeline<S, W> {
    camera: Arc<Mutex<S>>,
    store: Arc<MediaStore>,
    writer: Arc<W>,
    detector: MotionDetector,
    recorder: Recorder,
    jpeg_quality: u8,
    retry_initial: Duration,
    retry_max: Duration,
}

impl<S: FrameSource, W: ClipWriter + 'static> FramePipeline<S, W> {
    pub fn new(
        camera: Arc<Mutex<S>>,
        store: Arc<MediaStore>,
        writer: Arc<W>,
        config: &Config,
    ) -> Self {
        let params =
            MotionParams::from_config(&config.motion, config.camera.width, config.camera.height);
        let recorder = Recorder::from_config(&config.recording);
        let retry_initial_ms = config.camera.retry_initial_ms.max(1);
        debug!(
            min_changed_pixels = params.min_changed_pixels,
            frames_needed = recorder.frames_needed(),
            "frame pipeline created"
        );
        Self {
            camera,
            store,
            writer,
            detector: MotionDetector::new(params),
            recorder,
            jpeg_quality: config.stream.jpeg_quality,
            retry_initial: Duration::from_millis(retry_initial_ms),
            retry_max: Duration::from_millis(config.camera.retry_max_ms.max(retry_initial_ms)),
        }
    }

    /// Pull frames until one arrives. Failures are never fatal; the loop
    /// backs off exponentially between attempts.
    async fn acquire(&mut self) -> CapturedFrame {
        let mut failures: u32 = 0;
        let mut backoff = self.retry_initial;

        loop {
            let result = {
                let mut camera = self.camera.lock().await;
                camera.next_frame().await
            };
            match result {
                Ok(frame) => {
                    if failures > 0 {
                        info!(failures, "frame acquisition recovered");
                    }
                    return frame;
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
                        warn!(
                            error = %e,
                            failures,
                            "frame acquisition failed, retrying in {:?}",
                            backoff
                        );
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry_max);
                }
            }
        }
    }

    /// Run one loop iteration and return the encoded stream part.
    pub async fn next_part(&mut self) -> Result<Bytes, PipelineError> {
        let frame = self.acquire().await;

        let reading = self.detector.observe(&frame.image);
        if reading.motion {
            debug!(seq = frame.seq, changed_pixels = reading.changed_pixels, "motion detected");
        }

        let step = self.recorder.advance(&frame, reading.motion);

        if step.snapshot {
            let path = self.store.save_snapshot(&frame).await?;
            info!(
                path = path.display().to_string(),
                changed_pixels = reading.changed_pixels,
                "motion detected, saved image"
            );
        }

        if let Some(clip) = step.clip {
            // Detached, so a viewer disconnecting mid-flush still gets a whole file.
            let store = Arc::clone(&self.store);
            let writer = Arc::clone(&self.writer);
            let flush = tokio::spawn(async move {
                let (path, finished) = store.save_clip(writer.as_ref(), &clip).await?;
                info!(
                    path = path.display().to_string(),
                    frames = finished.frame_count,
                    bytes = finished.size_bytes,
                    "saved video"
                );
                Ok::<_, StorageError>(())
            });
            flush.await??;
        }

        Ok(encode_stream_part(&frame.image, self.jpeg_quality)?)
    }

    /// Lazy, infinite stream of encoded parts. A frame is only acquired when
    /// the consumer polls; dropping the stream ends the loop. A write or
    /// encoding failure ends the stream.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
    where
        S: 'static,
    {
        async_stream::stream! {
            loop {
                match self.next_part().await {
                    Ok(part) => yield Ok::<Bytes, Infallible>(part),
                    Err(e) => {
                        error!(error = %e, "frame pipeline failed, ending stream");
                        break;
                    }
                }
            }
        }
    }
}

impl<S, W> Drop for FramePipeline<S, W> {
    fn drop(&mut self) {
        debug!(
            state = ?self.recorder.state(),
            discarded_frames = self.recorder.buffered(),
            "frame pipeline closed"
        );
    }
}
