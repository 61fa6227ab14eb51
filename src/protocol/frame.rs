//! Stream framing for SMB2 over direct TCP.
//!
//! Each message on the wire is preceded by a 4-byte big-endian length. The
//! high byte is always zero in practice (the length field is 24 bits plus a
//! zero type octet), so anything above [`MAX_FRAME_SIZE`] is rejected as a
//! framing error rather than trusted.

use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Length-prefix size
pub const FRAME_HEADER_SIZE: usize = 4;

/// Upper bound on a single frame's payload. Matches the largest transact
/// size the client ever advertises, plus header room.
pub const MAX_FRAME_SIZE: usize = 0x0100_0000;

/// Prepend the 4-byte big-endian length prefix to a message.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::Wire(format!(
            "frame payload {} exceeds maximum {}",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

/// Read the declared payload length out of a frame header.
///
/// Rejects declared lengths beyond [`MAX_FRAME_SIZE`]; the caller checks the
/// declared length against what was actually received.
pub fn decode_frame_header(header: &[u8; FRAME_HEADER_SIZE]) -> Result<usize> {
    let len = u32::from_be_bytes(*header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Wire(format!(
            "declared frame length {} exceeds maximum {}",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(len)
}

/// Split one complete frame off the front of `buf`, if present.
///
/// Returns `None` when more bytes are needed. A declared length larger than
/// the buffer is not an error here; it just means the frame is incomplete.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Vec<u8>>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
    let len = decode_frame_header(&header)?;
    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }
    let frame = buf.split_to(FRAME_HEADER_SIZE + len);
    Ok(Some(frame[FRAME_HEADER_SIZE..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"framed message".to_vec();
        let bytes = encode_frame(&payload).unwrap();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE + payload.len());

        let mut buf = BytesMut::from(&bytes[..]);
        let out = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(out, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let bytes = encode_frame(b"abcdef").unwrap();
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert!(split_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_declared_length() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00][..]);
        assert!(split_frame(&mut buf).is_err());
    }

    #[test]
    fn test_two_frames_in_buffer() {
        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());
        let mut buf = BytesMut::from(&bytes[..]);
        assert_eq!(split_frame(&mut buf).unwrap().unwrap(), b"one");
        assert_eq!(split_frame(&mut buf).unwrap().unwrap(), b"two");
        assert!(split_frame(&mut buf).unwrap().is_none());
    }
}
