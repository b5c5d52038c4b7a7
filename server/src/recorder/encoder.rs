use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use image::imageops::{self, FilterType};
use motion_cam_common::config::{CameraConfig, RecordingConfig};
use motion_cam_common::frame::CapturedFrame;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Summary of a clip written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedClip {
    pub frame_count: u32,
    pub size_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("failed to move finished clip into place: {0}")]
    Finalize(String),
    #[error("failed to stat clip output: {0}")]
    ReadOutput(String),
}

/// Writes a buffered sequence of frames to a video file.
pub trait ClipWriter: Send + Sync {
    fn write_clip(
        &self,
        output: &Path,
        frames: &[CapturedFrame],
    ) -> impl Future<Output = Result<FinishedClip, EncoderError>> + Send;
}

/// Encodes clips by piping raw RGB frames into an ffmpeg subprocess.
///
/// Output is AVI at a fixed frame rate and size, tagged with the configured
/// four-character code.
#[derive(Debug, Clone)]
pub struct FfmpegClipWriter {
    ffmpeg_path: String,
    width: u32,
    height: u32,
    fps: u32,
    fourcc: String,
}

impl FfmpegClipWriter {
    pub fn new(camera: &CameraConfig, recording: &RecordingConfig) -> Self {
        Self {
            ffmpeg_path: camera.ffmpeg_path.clone(),
            width: camera.width,
            height: camera.height,
            fps: recording.fps,
            fourcc: recording.fourcc.clone(),
        }
    }

    fn args(&self, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
            "-r".into(),
            self.fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            encoder_for_fourcc(&self.fourcc).into(),
            "-vtag".into(),
            self.fourcc.clone(),
            "-q:v".into(),
            "5".into(),
            "-f".into(),
            "avi".into(),
            "-y".into(),
            output.display().to_string(),
        ]
    }
}

/// Where a clip is encoded before it is renamed to `output`.
fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// ffmpeg encoder matching a codec tag.
fn encoder_for_fourcc(fourcc: &str) -> &'static str {
    match fourcc.to_ascii_uppercase().as_str() {
        "MJPG" => "mjpeg",
        "H264" | "X264" | "AVC1" => "libx264",
        // XVID, DIVX, FMP4, DX50 and anything unknown: MPEG-4 Part 2
        _ => "mpeg4",
    }
}

impl ClipWriter for FfmpegClipWriter {
    async fn write_clip(
        &self,
        output: &Path,
        frames: &[CapturedFrame],
    ) -> Result<FinishedClip, EncoderError> {
        let partial = partial_path(output);
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.args(&partial))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            fourcc = self.fourcc,
            fps = self.fps,
            frames = frames.len(),
            output = partial.display().to_string(),
            "ffmpeg clip encoder started"
        );

        let mut frame_count = 0u32;
        for frame in frames {
            let write = if frame.image.dimensions() == (self.width, self.height) {
                stdin.write_all(frame.image.as_raw()).await
            } else {
                let resized =
                    imageops::resize(&frame.image, self.width, self.height, FilterType::Triangle);
                stdin.write_all(resized.as_raw()).await
            };
            if let Err(e) = write {
                let _ = child.kill().await;
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(EncoderError::Write(e.to_string()));
            }
            frame_count += 1;
        }

        // Close stdin so ffmpeg knows there are no more frames.
        drop(stdin);

        let result = child
            .wait_with_output()
            .await
            .map_err(|e| EncoderError::Wait(e.to_string()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(EncoderError::FfmpegFailed(stderr.into_owned()));
        }

        if let Err(e) = tokio::fs::rename(&partial, output).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(EncoderError::Finalize(e.to_string()));
        }

        let size_bytes = tokio::fs::metadata(output)
            .await
            .map_err(|e| EncoderError::ReadOutput(e.to_string()))?
            .len();

        info!(
            frame_count,
            bytes = size_bytes,
            output = output.display().to_string(),
            "clip encoding complete"
        );

        Ok(FinishedClip {
            frame_count,
            size_bytes,
        })
    }
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(ffmpeg_path: &str) {
    match Command::new(ffmpeg_path).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; capture and encoding may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                ffmpeg = ffmpeg_path,
                "ffmpeg not found; camera capture and clip recording will fail"
            );
        }
    }
}
