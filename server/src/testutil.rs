//! Stand-ins for the camera and ffmpeg used across test modules.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use image::{Rgb, RgbImage};
use motion_cam_common::frame::CapturedFrame;

use crate::capture::{CaptureError, FrameSource};
use crate::recorder::encoder::{ClipWriter, EncoderError, FinishedClip};

pub fn solid_frame(
    width: u32,
    height: u32,
    value: u8,
    captured_at_ms: i64,
    seq: u64,
) -> CapturedFrame {
    CapturedFrame::new(
        RgbImage::from_pixel(width, height, Rgb([value, value, value])),
        captured_at_ms,
        seq,
    )
}

/// Write an executable `/bin/sh` script standing in for ffmpeg.
/// It ignores its arguments unless `body` reads them.
pub fn fake_ffmpeg(dir: &Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("ffmpeg");
    std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script.display().to_string()
}

/// Frame source replaying a fixed script; reports `Closed` once exhausted.
#[derive(Default)]
pub struct ScriptedSource {
    script: VecDeque<Result<CapturedFrame, CaptureError>>,
    pub pulls: usize,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<CapturedFrame, CaptureError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            pulls: 0,
        }
    }

    /// Solid frames of the given intensities, 50 ms apart.
    pub fn from_values(width: u32, height: u32, values: &[u8]) -> Self {
        Self::new(values.iter().enumerate().map(|(i, &v)| {
            Ok(solid_frame(width, height, v, 1708300000000 + i as i64 * 50, i as u64))
        }))
    }
}

impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        self.pulls += 1;
        self.script.pop_front().unwrap_or(Err(CaptureError::Closed))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub seqs: Vec<u64>,
}

/// Clip writer that records what it was asked to write and leaves a
/// placeholder file at the target path.
#[derive(Clone, Default)]
pub struct MemoryClipWriter {
    clips: Arc<Mutex<Vec<RecordedClip>>>,
    delay: Duration,
}

impl MemoryClipWriter {
    /// Take `delay` to write each clip, like a slow encoder.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn clips(&self) -> Vec<RecordedClip> {
        self.clips.lock().unwrap().clone()
    }
}

impl ClipWriter for MemoryClipWriter {
    async fn write_clip(
        &self,
        output: &Path,
        frames: &[CapturedFrame],
    ) -> Result<FinishedClip, EncoderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        tokio::fs::write(output, format!("{} frames", seqs.len()))
            .await
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.clips.lock().unwrap().push(RecordedClip {
            path: output.to_path_buf(),
            seqs,
        });
        Ok(FinishedClip {
            frame_count: frames.len() as u32,
            size_bytes: 0,
        })
    }
}

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const PART_END: &[u8] = b"\r\n";

enum DecodeState {
    /// Before the first `--frame` line.
    Preamble,
    /// Inside a part's headers.
    Headers,
    /// Inside a JPEG body, which ends at the next boundary.
    Body,
}

/// Splits the `/video_feed` body back into JPEG payloads.
///
/// Bytes may arrive in arbitrary chunks. A part is complete once the next
/// boundary is seen, or when [`MultipartDecoder::finish`] is called.
pub struct MultipartDecoder {
    buffer: BytesMut,
    state: DecodeState,
    scanned: usize,
}

impl MultipartDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecodeState::Preamble,
            scanned: 0,
        }
    }

    /// Feed bytes and return every part completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        loop {
            match self.state {
                DecodeState::Preamble => match find(&self.buffer, BOUNDARY) {
                    Some(pos) => {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = DecodeState::Headers;
                    }
                    None => break,
                },
                DecodeState::Headers => match find(&self.buffer, HEADER_END) {
                    Some(pos) => {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.scanned = 0;
                        self.state = DecodeState::Body;
                    }
                    None => break,
                },
                DecodeState::Body => match find(&self.buffer[self.scanned..], BOUNDARY) {
                    Some(pos) => {
                        let body_end = self.scanned + pos;
                        let body = self.buffer.split_to(body_end);
                        let _ = self.buffer.split_to(BOUNDARY.len());
                        parts.push(trim_part_end(&body).to_vec());
                        self.state = DecodeState::Headers;
                    }
                    None => {
                        self.scanned = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    }
                },
            }
        }

        parts
    }

    /// Return the trailing part once the stream has ended.
    pub fn finish(self) -> Option<Vec<u8>> {
        match self.state {
            DecodeState::Body => Some(trim_part_end(&self.buffer).to_vec()),
            _ => None,
        }
    }
}

fn trim_part_end(body: &[u8]) -> &[u8] {
    body.strip_suffix(PART_END).unwrap_or(body)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_cam_common::mjpeg::encode_part;

    #[test]
    fn decoder_splits_consecutive_parts() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_part(b"first"));
        wire.extend_from_slice(&encode_part(b"second"));
        wire.extend_from_slice(&encode_part(b"third"));

        let mut decoder = MultipartDecoder::new();
        let parts = decoder.push(&wire);
        assert_eq!(parts, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(decoder.finish(), Some(b"third".to_vec()));
    }

    #[test]
    fn decoder_handles_boundary_split_across_chunks() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_part(b"alpha"));
        wire.extend_from_slice(&encode_part(b"beta"));

        let mut decoder = MultipartDecoder::new();
        let mut parts = Vec::new();
        for chunk in wire.chunks(3) {
            parts.extend(decoder.push(chunk));
        }
        assert_eq!(parts, vec![b"alpha".to_vec()]);
        assert_eq!(decoder.finish(), Some(b"beta".to_vec()));
    }

    #[test]
    fn decoder_keeps_crlf_inside_payload() {
        let payload = b"a\r\nb\r\n\r\nc";
        let mut wire = encode_part(payload).to_vec();
        wire.extend_from_slice(&encode_part(b"next"));

        let mut decoder = MultipartDecoder::new();
        assert_eq!(decoder.push(&wire), vec![payload.to_vec()]);
    }
}
