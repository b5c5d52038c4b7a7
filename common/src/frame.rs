use chrono::{DateTime, Local, TimeZone, Utc};
use image::RgbImage;

/// A decoded camera frame with capture metadata.
///
/// Pixels are packed RGB, row-major, `width * height * 3` bytes.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbImage,
    /// Capture time as Unix milliseconds.
    pub captured_at_ms: i64,
    /// Sequence number assigned by the frame source.
    pub seq: u64,
}

impl CapturedFrame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Build a frame from a raw `rgb24` buffer as produced by a rawvideo pipe.
    pub fn from_rgb24(
        width: u32,
        height: u32,
        data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: data.len(),
                expected,
            });
        }
        let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::SizeMismatch {
            got: 0,
            expected,
        })?;
        Ok(Self::new(image, captured_at_ms, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Capture time in the host's local timezone. Falls back to now for
    /// out-of-range timestamps.
    pub fn captured_at_local(&self) -> DateTime<Local> {
        Utc.timestamp_millis_opt(self.captured_at_ms)
            .single()
            .unwrap_or_else(Utc::now)
            .with_timezone(&Local)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("raw frame has {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}
