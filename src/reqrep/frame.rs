use std::fmt::{Debug, Formatter};

use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The first byte of every request / reply frame
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    /// must be replied to, resent until a reply or error arrives or the retry budget is used up
    Request = 1,
    /// sent once, never resent, and never reported as timed out
    LossyRequest = 2,
    Reply = 3,
    Error = 6,
}
impl FrameKind {
    pub fn is_request(&self) -> bool {
        matches!(self, FrameKind::Request | FrameKind::LossyRequest)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    /// no request handler is bound to the request's protocol tag on the receiving node
    NoHandler = 1,
    /// the request handler failed
    HandlerFailure = 2,
    /// no reply before the retry budget was used up. This is synthesized locally and never
    ///  sent on the wire.
    Timeout = 3,
}

/// Correlates replies and errors with requests. Ids are chosen by the requester and are unique
///  among its outstanding requests.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RequestId(pub u32);
impl Debug for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

/// Wire format - all numbers in network byte order (BE):
///
/// ```ascii
/// 0: frame kind (u8)
/// 1: request id (u32)
/// 5: Request / LossyRequest / Reply:
///      protocol tag length (u16), protocol tag (UTF-8), payload (rest of the buffer)
///    Error:
///      error code (u8)
/// ```
///
/// A protocol tag must not be longer than [Frame::MAX_TAG_LEN] bytes to be encodable. The
///  manager rejects longer tags before it builds a frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Frame {
    Request(DataFrame),
    LossyRequest(DataFrame),
    Reply(DataFrame),
    Error(ErrorFrame),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DataFrame {
    pub id: RequestId,
    pub tag: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorFrame {
    pub id: RequestId,
    pub code: ErrorCode,
}

impl Frame {
    pub const MAX_TAG_LEN: usize = u16::MAX as usize;

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request(_) => FrameKind::Request,
            Frame::LossyRequest(_) => FrameKind::LossyRequest,
            Frame::Reply(_) => FrameKind::Reply,
            Frame::Error(_) => FrameKind::Error,
        }
    }

    pub fn id(&self) -> RequestId {
        match self {
            Frame::Request(data) | Frame::LossyRequest(data) | Frame::Reply(data) => data.id,
            Frame::Error(err) => err.id,
        }
    }

    /// Panics in debug builds if a protocol tag is longer than [Frame::MAX_TAG_LEN].
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind().into());
        buf.put_u32(self.id().0);

        match self {
            Frame::Request(data) | Frame::LossyRequest(data) | Frame::Reply(data) => {
                debug_assert!(data.tag.len() <= Self::MAX_TAG_LEN, "protocol tag of {} bytes does not fit the frame", data.tag.len());
                buf.put_u16(data.tag.len() as u16);
                buf.put_slice(data.tag.as_bytes());
                buf.put_slice(&data.payload);
            }
            Frame::Error(err) => {
                buf.put_u8(err.code.into());
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    /// The returned frame's payload shares the buffer's memory.
    pub fn deser(buf: &Bytes) -> anyhow::Result<Frame> {
        let mut buf = buf.clone();

        let kind = FrameKind::try_from(buf.try_get_u8()?)
            .map_err(|e| anyhow!("invalid frame kind: {}", e.number))?;
        let id = RequestId(buf.try_get_u32()?);

        match kind {
            FrameKind::Request => Ok(Frame::Request(Self::deser_data(id, buf)?)),
            FrameKind::LossyRequest => Ok(Frame::LossyRequest(Self::deser_data(id, buf)?)),
            FrameKind::Reply => Ok(Frame::Reply(Self::deser_data(id, buf)?)),
            FrameKind::Error => Ok(Frame::Error(Self::deser_error(id, buf)?)),
        }
    }

    fn deser_data(id: RequestId, mut buf: Bytes) -> anyhow::Result<DataFrame> {
        let tag_len = buf.try_get_u16()? as usize;
        if tag_len > buf.remaining() {
            return Err(anyhow!("protocol tag length {} exceeds remaining buffer of {} bytes", tag_len, buf.remaining()));
        }
        let tag = String::from_utf8(buf.split_to(tag_len).to_vec())?;

        Ok(DataFrame {
            id,
            tag,
            payload: buf,
        })
    }

    fn deser_error(id: RequestId, mut buf: Bytes) -> anyhow::Result<ErrorFrame> {
        let code = ErrorCode::try_from(buf.try_get_u8()?)
            .map_err(|e| anyhow!("invalid error code: {}", e.number))?;
        if code == ErrorCode::Timeout {
            return Err(anyhow!("error code {:?} is local only and must not be on the wire", code));
        }

        Ok(ErrorFrame {
            id,
            code,
        })
    }
}

#[cfg(test)]
impl Frame {
    /// creates a frame of a kind that carries data, i.e. anything except [FrameKind::Error]
    pub fn data(kind: FrameKind, id: RequestId, tag: &str, payload: Bytes) -> anyhow::Result<Frame> {
        let data = DataFrame {
            id,
            tag: tag.to_string(),
            payload,
        };
        match kind {
            FrameKind::Request => Ok(Frame::Request(data)),
            FrameKind::LossyRequest => Ok(Frame::LossyRequest(data)),
            FrameKind::Reply => Ok(Frame::Reply(data)),
            FrameKind::Error => Err(anyhow!("error frames carry no data")),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn data(id: u32, tag: &str, payload: &[u8]) -> DataFrame {
        DataFrame {
            id: RequestId(id),
            tag: tag.to_string(),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[rstest]
    #[case::request(Frame::Request(data(0x01020304, "echo", b"ping")), b"\x01\x01\x02\x03\x04\0\x04echoping")]
    #[case::lossy(Frame::LossyRequest(data(7, "ab", b"")), b"\x02\0\0\0\x07\0\x02ab")]
    #[case::reply(Frame::Reply(data(0xffffffff, "echo", b"pong")), b"\x03\xff\xff\xff\xff\0\x04echopong")]
    #[case::empty_tag(Frame::Reply(data(1, "", b"x")), b"\x03\0\0\0\x01\0\0x")]
    #[case::no_handler(Frame::Error(ErrorFrame { id: RequestId(9), code: ErrorCode::NoHandler }), b"\x06\0\0\0\x09\x01")]
    #[case::handler_failure(Frame::Error(ErrorFrame { id: RequestId(9), code: ErrorCode::HandlerFailure }), b"\x06\0\0\0\x09\x02")]
    fn test_ser(#[case] frame: Frame, #[case] expected: &[u8]) {
        assert_eq!(frame.to_bytes().as_ref(), expected);
        assert_eq!(Frame::deser(&Bytes::copy_from_slice(expected)).unwrap(), frame);
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::truncated_id(b"\x01\0\0\0")]
    #[case::missing_tag_len(b"\x01\0\0\0\x01\0")]
    #[case::tag_len_exceeds_buffer(b"\x01\0\0\0\x01\0\x05echo")]
    #[case::unknown_kind(b"\x04\0\0\0\x01\0\0")]
    #[case::kind_zero(b"\0\0\0\0\x01\0\0")]
    #[case::missing_error_code(b"\x06\0\0\0\x01")]
    #[case::unknown_error_code(b"\x06\0\0\0\x01\x09")]
    #[case::timeout_on_wire(b"\x06\0\0\0\x01\x03")]
    #[case::tag_not_utf8(b"\x03\0\0\0\x01\0\x02\xff\xfe")]
    fn test_deser_invalid(#[case] buf: &[u8]) {
        assert!(Frame::deser(&Bytes::copy_from_slice(buf)).is_err());
    }

    #[test]
    fn test_deser_payload_is_not_mistaken_for_tag() {
        // payload bytes that look like a tag are still payload
        let buf = Bytes::from_static(b"\x01\0\0\0\x01\0\x03tagtag\0\x03tag");
        let frame = Frame::deser(&buf).unwrap();
        assert_eq!(frame, Frame::Request(data(1, "tag", b"tag\0\x03tag")));
    }

    #[test]
    fn test_data_rejects_error_kind() {
        assert!(Frame::data(FrameKind::Error, RequestId(1), "x", Bytes::new()).is_err());
        assert_eq!(Frame::data(FrameKind::LossyRequest, RequestId(1), "x", Bytes::new()).unwrap().kind(), FrameKind::LossyRequest);
    }

    #[test]
    fn test_longest_tag() {
        let tag = "t".repeat(Frame::MAX_TAG_LEN);
        let frame = Frame::Reply(data(1, &tag, b"p"));
        let buf = frame.to_bytes();
        assert_eq!(&buf[5..7], &[0xff, 0xff]);
        assert_eq!(Frame::deser(&buf).unwrap(), frame);
    }

    #[test]
    #[should_panic(expected = "does not fit the frame")]
    fn test_ser_tag_too_long() {
        let tag = "t".repeat(Frame::MAX_TAG_LEN + 1);
        Frame::Request(data(1, &tag, b"")).to_bytes();
    }

    #[test]
    fn test_request_id_debug() {
        assert_eq!(format!("{:?}", RequestId(0xabc)), "#00000abc");
    }
}
