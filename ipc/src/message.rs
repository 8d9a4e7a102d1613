//! Wire unit and codec for the message channel.
//!
//! ```text
//! [u32 LE length] [u8 kind] [u32 LE seq] [u32 LE header length] [header] [body]
//! ```
//!
//! `length` counts everything after itself. Header and body are UTF-8.
//! Responses echo the sequence number of the request they answer, so a
//! pushed message can never be taken for a response.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::IpcError;

/// Maximum frame length (after the length prefix).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// kind + seq + header length.
const FIXED_LEN: usize = 1 + 4 + 4;

/// Header carried by every response frame.
pub const RESPONSE_HEADER: &str = "Response";

/// A `(header, body)` pair, the unit exchanged on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: String,
    pub body: String,
}

impl Message {
    pub fn new(header: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
        }
    }

    /// ASCII case-insensitive header comparison.
    pub fn header_is(&self, header: &str) -> bool {
        self.header.eq_ignore_ascii_case(header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client → server, expects exactly one response.
    Request = 0x01,
    /// Server → client answer to a request.
    Response = 0x02,
    /// One-way message, no response.
    Push = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = IpcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Request),
            0x02 => Ok(FrameKind::Response),
            0x03 => Ok(FrameKind::Push),
            other => Err(IpcError::UnknownFrameKind(other)),
        }
    }
}

/// A message plus its framing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u32,
    pub message: Message,
}

impl Frame {
    pub fn request(seq: u32, message: Message) -> Self {
        Self { kind: FrameKind::Request, seq, message }
    }

    pub fn response(seq: u32, body: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Response,
            seq,
            message: Message::new(RESPONSE_HEADER, body),
        }
    }

    pub fn push(seq: u32, message: Message) -> Self {
        Self { kind: FrameKind::Push, seq, message }
    }
}

/// Length-delimited codec for [`Frame`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, IpcError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge(length));
        }
        if length < FIXED_LEN {
            return Err(IpcError::MalformedFrame("frame shorter than its fixed fields"));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut payload = src.split_to(length);

        let kind = FrameKind::try_from(payload.get_u8())?;
        let seq = payload.get_u32_le();
        let header_len = payload.get_u32_le() as usize;
        if header_len > payload.len() {
            return Err(IpcError::MalformedFrame("header length past end of frame"));
        }

        let header = String::from_utf8(payload.split_to(header_len).to_vec())
            .map_err(|_| IpcError::MalformedFrame("header is not UTF-8"))?;
        let body = String::from_utf8(payload.to_vec())
            .map_err(|_| IpcError::MalformedFrame("body is not UTF-8"))?;

        Ok(Some(Frame {
            kind,
            seq,
            message: Message { header, body },
        }))
    }
}

impl Encoder<Frame> for MessageCodec {
    type Error = IpcError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), IpcError> {
        let header = frame.message.header.as_bytes();
        let body = frame.message.body.as_bytes();
        let length = FIXED_LEN + header.len() + body.len();
        if length > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge(length));
        }

        dst.reserve(4 + length);
        dst.put_u32_le(length as u32);
        dst.put_u8(frame.kind as u8);
        dst.put_u32_le(frame.seq);
        dst.put_u32_le(header.len() as u32);
        dst.put_slice(header);
        dst.put_slice(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        MessageCodec.encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_request_decodes_with_free_form_text() {
        let frame = Frame::request(7, Message::new("Log", "line one\nline two: ünïcode"));
        let mut buf = encode(frame.clone());
        let decoded = MessageCodec.decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_response_carries_response_header() {
        let mut buf = encode(Frame::response(3, "ok"));
        let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.kind, FrameKind::Response);
        assert_eq!(decoded.seq, 3);
        assert_eq!(decoded.message.header, RESPONSE_HEADER);
        assert_eq!(decoded.message.body, "ok");
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let full = encode(Frame::push(1, Message::new("Command", "Start")));
        let mut buf = BytesMut::from(&full[..full.len() - 3]);
        assert_eq!(MessageCodec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&full[full.len() - 3..]);
        let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.kind, FrameKind::Push);
        assert_eq!(decoded.message, Message::new("Command", "Start"));
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = encode(Frame::request(1, Message::new("FT", "16.6")));
        buf.extend_from_slice(&encode(Frame::request(2, Message::new("Dir", ""))));

        let first = MessageCodec.decode(&mut buf).unwrap().unwrap();
        let second = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.message.header, "FT");
        assert_eq!(second.message.header, "Dir");
        assert_eq!(second.message.body, "");
        assert_eq!(MessageCodec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le((MAX_FRAME_LEN + 1) as u32);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(IpcError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut buf = BytesMut::from(&[0u8; 4][..]);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(IpcError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut buf = encode(Frame::request(1, Message::new("Log", "x")));
        buf[4] = 0x7f;
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(IpcError::UnknownFrameKind(0x7f))
        ));
    }

    #[test]
    fn test_header_length_past_end_rejected() {
        let mut buf = encode(Frame::request(1, Message::new("Log", "x")));
        // header length field starts after length(4) + kind(1) + seq(4)
        buf[9..13].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(IpcError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_header_match_ignores_ascii_case() {
        let message = Message::new("command", "start");
        assert!(message.header_is("Command"));
        assert!(!message.header_is("Commands"));
    }
}
