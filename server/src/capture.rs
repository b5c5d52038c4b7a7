use std::future::Future;
use std::process::Stdio;

use bytes::BytesMut;
use chrono::Utc;
use motion_cam_common::config::CameraConfig;
use motion_cam_common::frame::{CapturedFrame, FrameError};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to read frame: {0}")]
    Read(std::io::Error),
    #[error("camera stream closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Blocking pull of camera frames, one at a time.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> impl Future<Output = Result<CapturedFrame, CaptureError>> + Send;
}

struct CaptureProcess {
    child: Child,
    stdout: ChildStdout,
}

/// Camera read through an ffmpeg subprocess emitting raw `rgb24` frames.
///
/// The subprocess is started on the first pull. A failed read tears it down
/// and the next pull starts a fresh one.
pub struct FfmpegCamera {
    config: CameraConfig,
    process: Option<CaptureProcess>,
    pending: BytesMut,
    seq: u64,
}

impl FfmpegCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            process: None,
            pending: BytesMut::new(),
            seq: 0,
        }
    }

    fn frame_len(&self) -> usize {
        self.config.width as usize * self.config.height as usize * 3
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            self.config.input_format.clone(),
            "-video_size".into(),
            format!("{}x{}", self.config.width, self.config.height),
            "-i".into(),
            self.config.device.clone(),
            // Scale in case the device ignored the requested size.
            "-vf".into(),
            format!("scale={}:{}", self.config.width, self.config.height),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "pipe:1".into(),
        ]
    }

    fn spawn(&self) -> Result<CaptureProcess, CaptureError> {
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Spawn("could not get stdout handle".into()))?;

        info!(
            device = self.config.device,
            input_format = self.config.input_format,
            width = self.config.width,
            height = self.config.height,
            "camera capture started"
        );
        Ok(CaptureProcess { child, stdout })
    }

    fn teardown(&mut self) {
        self.pending.clear();
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.child.start_kill() {
                debug!(error = %e, "capture process already exited");
            }
        }
    }
}

impl FrameSource for FfmpegCamera {
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        if self.process.is_none() {
            self.process = Some(self.spawn()?);
        }

        // Partial frames stay in `pending`, so a dropped call loses no bytes.
        let frame_len = self.frame_len();
        while self.pending.len() < frame_len {
            self.pending.reserve(frame_len - self.pending.len());
            let read = match self.process.as_mut() {
                Some(process) => process.stdout.read_buf(&mut self.pending).await,
                None => return Err(CaptureError::Closed),
            };
            match read {
                Ok(0) => {
                    self.teardown();
                    return Err(CaptureError::Closed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.teardown();
                    return Err(CaptureError::Read(e));
                }
            }
        }

        let data = self.pending.split_to(frame_len).to_vec();
        let seq = self.seq;
        self.seq += 1;
        let frame = CapturedFrame::from_rgb24(
            self.config.width,
            self.config.height,
            data,
            Utc::now().timestamp_millis(),
            seq,
        )?;
        Ok(frame)
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.teardown();
    }
}
