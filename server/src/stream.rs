use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use motion_cam_common::mjpeg;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Compress a frame to JPEG at the given quality (1..=100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, StreamError> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}

/// Encode a frame as one part of the live multipart stream.
pub fn encode_stream_part(image: &RgbImage, quality: u8) -> Result<Bytes, StreamError> {
    let jpeg = encode_jpeg(image, quality)?;
    Ok(mjpeg::encode_part(&jpeg))
}
