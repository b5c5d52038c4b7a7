use serde::Deserialize;
use std::path::Path;

/// Frame area the default motion pixel threshold was tuned for (640x480).
const REFERENCE_AREA: u64 = 640 * 480;
/// Changed-pixel count that signals motion at the reference area.
const REFERENCE_MIN_CHANGED_PIXELS: u64 = 50_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_device")]
    pub device: String,
    /// ffmpeg demuxer used to open `device` (`v4l2`, `avfoundation`, `dshow`, ...).
    #[serde(default = "default_input_format")]
    pub input_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Side of the square Gaussian kernel; must be odd.
    #[serde(default = "default_blur_kernel")]
    pub blur_kernel: u32,
    /// Per-pixel intensity difference above which a pixel counts as changed.
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: u8,
    /// Changed-pixel count above which a frame reports motion.
    /// Scales with the capture area when unset.
    #[serde(default)]
    pub min_changed_pixels: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Save a still for every frame that reports motion.
    EveryMotionFrame,
    /// Save a still only when a recording starts.
    OnsetOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Four-character codec tag written into the AVI stream header.
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
    #[serde(default = "default_snapshot_policy")]
    pub snapshot_policy: SnapshotPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
    #[serde(default = "default_videos_dir")]
    pub videos_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            input_format: default_input_format(),
            width: default_width(),
            height: default_height(),
            ffmpeg_path: default_ffmpeg_path(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            blur_kernel: default_blur_kernel(),
            diff_threshold: default_diff_threshold(),
            min_changed_pixels: None,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            fps: default_fps(),
            fourcc: default_fourcc(),
            snapshot_policy: default_snapshot_policy(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            videos_dir: default_videos_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        let camera = &self.camera;
        if camera.retry_initial_ms == 0 || camera.retry_initial_ms > camera.retry_max_ms {
            return Err(ConfigError::Invalid(format!(
                "camera.retry_initial_ms must be within 1..={}, got {}",
                camera.retry_max_ms, camera.retry_initial_ms
            )));
        }
        if self.motion.blur_kernel == 0 || self.motion.blur_kernel % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "motion.blur_kernel must be odd, got {}",
                self.motion.blur_kernel
            )));
        }
        if self.recording.fps == 0 || self.recording.duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "recording.fps and recording.duration_secs must be non-zero".into(),
            ));
        }
        let fourcc = &self.recording.fourcc;
        if fourcc.len() != 4 || !fourcc.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "recording.fourcc must be four ASCII characters, got {fourcc:?}"
            )));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "stream.jpeg_quality must be within 1..=100, got {}",
                self.stream.jpeg_quality
            )));
        }
        Ok(())
    }
}

impl MotionConfig {
    /// Changed-pixel threshold for frames of the given size.
    pub fn pixel_threshold(&self, width: u32, height: u32) -> u64 {
        self.min_changed_pixels.unwrap_or_else(|| {
            let area = u64::from(width) * u64::from(height);
            REFERENCE_MIN_CHANGED_PIXELS * area / REFERENCE_AREA
        })
    }
}

impl RecordingConfig {
    /// Number of frames in one recorded clip.
    pub fn frames_needed(&self) -> usize {
        self.duration_secs as usize * self.fps as usize
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_device() -> String {
    "/dev/video0".into()
}
fn default_input_format() -> String {
    "v4l2".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}
fn default_retry_initial_ms() -> u64 {
    50
}
fn default_retry_max_ms() -> u64 {
    2000
}
fn default_blur_kernel() -> u32 {
    21
}
fn default_diff_threshold() -> u8 {
    25
}
fn default_duration_secs() -> u32 {
    15
}
fn default_fps() -> u32 {
    20
}
fn default_fourcc() -> String {
    "XVID".into()
}
fn default_snapshot_policy() -> SnapshotPolicy {
    SnapshotPolicy::EveryMotionFrame
}
fn default_images_dir() -> String {
    "images".into()
}
fn default_videos_dir() -> String {
    "videos".into()
}
fn default_bind() -> String {
    "0.0.0.0:5000".into()
}
fn default_jpeg_quality() -> u8 {
    95
}
fn default_log_level() -> String {
    "info".into()
}
