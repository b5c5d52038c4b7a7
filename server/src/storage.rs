use std::path::{Path, PathBuf};

use motion_cam_common::config::MediaConfig;
use motion_cam_common::frame::CapturedFrame;
use tokio::sync::Mutex;
use tracing::debug;

use crate::recorder::encoder::{ClipWriter, EncoderError, FinishedClip};
use crate::recorder::keys::{clip_file_name, snapshot_file_name};
use crate::stream::{encode_jpeg, StreamError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to create directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] StreamError),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("failed to write clip {0}: {1}")]
    Clip(String, EncoderError),
}

/// Flat-file store for motion snapshots and recorded clips.
///
/// Snapshot writes and clip flushes share one lock, so they never interleave
/// even when several viewer connections record at once.
pub struct MediaStore {
    images_dir: PathBuf,
    videos_dir: PathBuf,
    jpeg_quality: u8,
    write_lock: Mutex<()>,
}

impl MediaStore {
    /// Open the store, creating both media directories if needed.
    pub async fn open(config: &MediaConfig, jpeg_quality: u8) -> Result<Self, StorageError> {
        let images_dir = PathBuf::from(&config.images_dir);
        let videos_dir = PathBuf::from(&config.videos_dir);
        for dir in [&images_dir, &videos_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::CreateDir(dir.display().to_string(), e))?;
        }
        Ok(Self {
            images_dir,
            videos_dir,
            jpeg_quality,
            write_lock: Mutex::new(()),
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    /// Save `frame` as a JPEG named after its capture second.
    /// A snapshot from the same second overwrites the earlier one.
    pub async fn save_snapshot(&self, frame: &CapturedFrame) -> Result<PathBuf, StorageError> {
        let path = self
            .images_dir
            .join(snapshot_file_name(&frame.captured_at_local()));
        let jpeg = encode_jpeg(&frame.image, self.jpeg_quality)?;

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&path, &jpeg)
            .await
            .map_err(|e| StorageError::Write(path.display().to_string(), e))?;
        debug!(path = path.display().to_string(), bytes = jpeg.len(), "snapshot written");
        Ok(path)
    }

    /// Write a full clip, named after the capture second of its last frame.
    pub async fn save_clip<W: ClipWriter>(
        &self,
        writer: &W,
        frames: &[CapturedFrame],
    ) -> Result<(PathBuf, FinishedClip), StorageError> {
        let flushed_at = frames
            .last()
            .map(CapturedFrame::captured_at_local)
            .unwrap_or_else(chrono::Local::now);
        let path = self.videos_dir.join(clip_file_name(&flushed_at));

        let _guard = self.write_lock.lock().await;
        let clip = writer
            .write_clip(&path, frames)
            .await
            .map_err(|e| StorageError::Clip(path.display().to_string(), e))?;
        Ok((path, clip))
    }
}
