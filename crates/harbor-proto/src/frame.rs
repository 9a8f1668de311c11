//! Binary pane-output frames.
//!
//! Layout: `[id_len: u8][pane id: id_len bytes, UTF-8][raw output ...]`.
//! The id length must be in `1..=255` and fit inside the frame.

use bytes::{BufMut, Bytes, BytesMut};

pub const MAX_PANE_ID_LEN: usize = u8::MAX as usize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("pane id length is zero")]
    EmptyPaneId,
    #[error("pane id too long: {0} bytes")]
    PaneIdTooLong(usize),
    #[error("pane id length {declared} exceeds frame payload of {available} bytes")]
    Truncated { declared: usize, available: usize },
    #[error("pane id is not valid UTF-8")]
    InvalidPaneId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneFrame<'a> {
    pub pane_id: &'a str,
    pub payload: &'a [u8],
}

pub fn encode_frame(pane_id: &str, payload: &[u8]) -> Result<Bytes, FrameError> {
    let id = pane_id.as_bytes();
    if id.is_empty() {
        return Err(FrameError::EmptyPaneId);
    }
    if id.len() > MAX_PANE_ID_LEN {
        return Err(FrameError::PaneIdTooLong(id.len()));
    }
    let mut buf = BytesMut::with_capacity(1 + id.len() + payload.len());
    buf.put_u8(id.len() as u8);
    buf.put_slice(id);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn decode_frame(frame: &[u8]) -> Result<PaneFrame<'_>, FrameError> {
    let (&len, rest) = frame.split_first().ok_or(FrameError::Empty)?;
    let len = len as usize;
    if len == 0 {
        return Err(FrameError::EmptyPaneId);
    }
    if len > rest.len() {
        return Err(FrameError::Truncated {
            declared: len,
            available: rest.len(),
        });
    }
    let (id, payload) = rest.split_at(len);
    let pane_id = std::str::from_utf8(id).map_err(|_| FrameError::InvalidPaneId)?;
    Ok(PaneFrame { pane_id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_length_prefixed() {
        let frame = encode_frame("%12", b"ls\r\n").expect("encode");
        assert_eq!(&frame[..], b"\x03%12ls\r\n");

        let decoded = decode_frame(&frame).expect("decode");
        assert_eq!(decoded.pane_id, "%12");
        assert_eq!(decoded.payload, b"ls\r\n");
    }

    #[test]
    fn empty_payload_is_valid() {
        let decoded = decode_frame(b"\x02%1").expect("decode");
        assert_eq!(decoded.pane_id, "%1");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(decode_frame(b""), Err(FrameError::Empty));
        assert_eq!(decode_frame(b"\x00abc"), Err(FrameError::EmptyPaneId));
        assert_eq!(
            decode_frame(b"\x09%1"),
            Err(FrameError::Truncated {
                declared: 9,
                available: 2
            })
        );
        assert_eq!(decode_frame(b"\x02\xff\xfe"), Err(FrameError::InvalidPaneId));
    }

    #[test]
    fn pane_id_bounds_are_enforced_on_encode() {
        assert_eq!(encode_frame("", b"x"), Err(FrameError::EmptyPaneId));
        let long = "p".repeat(MAX_PANE_ID_LEN + 1);
        assert_eq!(
            encode_frame(&long, b"x"),
            Err(FrameError::PaneIdTooLong(MAX_PANE_ID_LEN + 1))
        );
        let max = "p".repeat(MAX_PANE_ID_LEN);
        let frame = encode_frame(&max, b"x").expect("255-byte id fits");
        assert_eq!(frame[0], 255);
    }
}
