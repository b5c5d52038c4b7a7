use image::{GrayImage, Luma, RgbImage};
use motion_cam_common::config::MotionConfig;
use tracing::debug;

/// Tunables for frame-to-frame motion detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionParams {
    /// Side of the square Gaussian kernel (odd).
    pub blur_kernel: u32,
    /// A pixel counts as changed if its blurred intensity moved by more than this.
    pub diff_threshold: u8,
    /// Motion is reported when more than this many pixels changed.
    pub min_changed_pixels: u64,
}

impl MotionParams {
    pub fn from_config(config: &MotionConfig, width: u32, height: u32) -> Self {
        Self {
            blur_kernel: config.blur_kernel,
            diff_threshold: config.diff_threshold,
            min_changed_pixels: config.pixel_threshold(width, height),
        }
    }
}

/// Outcome of comparing one frame against the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionReading {
    pub motion: bool,
    pub changed_pixels: u64,
}

impl MotionReading {
    const NONE: Self = Self {
        motion: false,
        changed_pixels: 0,
    };
}

/// Grayscale + Gaussian blur, the form frames are compared in.
pub fn preprocess(frame: &RgbImage, blur_kernel: u32) -> GrayImage {
    gaussian_blur(&luma(frame), blur_kernel)
}

/// BT.601 luma in 14-bit fixed point, rounded.
fn luma(frame: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let v = (u32::from(r) * R + u32::from(g) * G + u32::from(b) * B + (1 << (SHIFT - 1)))
            >> SHIFT;
        Luma([v as u8])
    })
}

/// Compare `frame` against the previous reference.
///
/// Returns the reading and the reference to use for the next call, which is
/// always the blurred grayscale form of `frame`. Without a previous reference
/// (or when the frame size changed) no motion is reported.
pub fn detect(
    previous: Option<&GrayImage>,
    frame: &RgbImage,
    params: &MotionParams,
) -> (MotionReading, GrayImage) {
    let current = preprocess(frame, params.blur_kernel);

    let Some(previous) = previous else {
        return (MotionReading::NONE, current);
    };
    if previous.dimensions() != current.dimensions() {
        debug!(
            previous = ?previous.dimensions(),
            current = ?current.dimensions(),
            "frame size changed, resetting reference"
        );
        return (MotionReading::NONE, current);
    }

    let changed_pixels = previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .filter(|(a, b)| a.abs_diff(**b) > params.diff_threshold)
        .count() as u64;

    let reading = MotionReading {
        motion: changed_pixels > params.min_changed_pixels,
        changed_pixels,
    };
    (reading, current)
}

/// Stateful wrapper around [`detect`] that keeps the reference frame.
pub struct MotionDetector {
    params: MotionParams,
    reference: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(params: MotionParams) -> Self {
        Self {
            params,
            reference: None,
        }
    }

    pub fn observe(&mut self, frame: &RgbImage) -> MotionReading {
        let (reading, reference) = detect(self.reference.as_ref(), frame, &self.params);
        self.reference = Some(reference);
        reading
    }
}

/// Separable Gaussian blur with a `size` x `size` kernel and reflect-101 borders.
/// Sigma is derived from the kernel size.
fn gaussian_blur(image: &GrayImage, size: u32) -> GrayImage {
    let kernel = gaussian_kernel(size);
    let radius = (kernel.len() / 2) as i64;
    let (width, height) = image.dimensions();
    let (w, h) = (width as i64, height as i64);
    let src = image.as_raw();

    let mut horizontal = vec![0f32; src.len()];
    for y in 0..h {
        let row = (y * w) as usize;
        for x in 0..w {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect_101(x + k as i64 - radius, w);
                acc += weight * src[row + sx] as f32;
            }
            horizontal[row + x as usize] = acc;
        }
    }

    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect_101(y + k as i64 - radius, h);
                acc += weight * horizontal[sy * width as usize + x as usize];
            }
            out[(y * w + x) as usize] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| image.clone())
}

fn gaussian_kernel(size: u32) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as i32;
    let weights: Vec<f32> = (-half..=half)
        .map(|x| (-((x * x) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Mirror an out-of-range index without repeating the edge sample (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(mut i: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    while i < 0 || i >= len {
        if i < 0 {
            i = -i;
        }
        if i >= len {
            i = 2 * len - 2 - i;
        }
    }
    i as usize
}
