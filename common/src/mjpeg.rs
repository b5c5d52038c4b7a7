//! `multipart/x-mixed-replace` framing for the live JPEG stream.
//!
//! Each part on the wire:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Value of the `Content-Type` header on the streaming response.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const BOUNDARY: &[u8] = b"--frame\r\n";
const PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";
const PART_END: &[u8] = b"\r\n";

/// Wrap one JPEG payload as a multipart part.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(BOUNDARY.len() + PART_HEADER.len() + jpeg.len() + PART_END.len());
    buf.put_slice(BOUNDARY);
    buf.put_slice(PART_HEADER);
    buf.put_slice(jpeg);
    buf.put_slice(PART_END);
    buf.freeze()
}
