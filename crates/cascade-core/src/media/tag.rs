//! Tagged media frame parsing (panic-free).
//!
//! Tag layout (11-byte header, big-endian):
//! `type:u8 | size:u24 | ts:u24 | ts_ext:u8 | stream_id:u24 | payload[size]`
//! optionally followed by a 4-byte previous-tag-size trailer, which parsing
//! ignores.
//!
//! Parsing rules:
//! - Never index (`buf[0]`); always use `Buf` and `remaining()` checks.
//! - The declared size is validated against the available bytes, never trusted.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CascadeError, Result};

/// Fixed tag header length.
pub const TAG_HEADER_LEN: usize = 11;
/// Stream header length including the leading previous-tag-size field.
pub const STREAM_HEADER_LEN: usize = 13;
/// Stream header magic.
pub const STREAM_MAGIC: [u8; 3] = *b"FLV";

const STREAM_VERSION: u8 = 0x01;
const STREAM_BODY_OFFSET: u32 = 9;
const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;
const MAX_TAG_PAYLOAD: usize = 0x00FF_FFFF;

/// Tag type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Audio,
    Video,
    Script,
    Other(u8),
}

impl TagKind {
    pub fn from_u8(v: u8) -> Self {
        match v {
            8 => TagKind::Audio,
            9 => TagKind::Video,
            18 => TagKind::Script,
            other => TagKind::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TagKind::Audio => 8,
            TagKind::Video => 9,
            TagKind::Script => 18,
            TagKind::Other(v) => v,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Audio => "audio",
            TagKind::Video => "video",
            TagKind::Script => "script",
            TagKind::Other(_) => "other",
        }
    }
}

/// Parsed media tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTag {
    pub kind: TagKind,
    /// 32-bit timestamp (24-bit base + extension byte as the high bits).
    pub timestamp: u32,
    /// Opaque payload (zero-copy).
    pub payload: Bytes,
}

/// Decode one tag from a binary frame.
pub fn parse_tag(mut buf: Bytes) -> Result<MediaTag> {
    if buf.remaining() < TAG_HEADER_LEN {
        return Err(CascadeError::FrameTooShort);
    }

    let kind = TagKind::from_u8(buf.get_u8());
    let size = buf.get_uint(3) as usize;
    let base = buf.get_uint(3) as u32;
    let ext = buf.get_u8() as u32;
    let _stream_id = buf.get_uint(3);

    if buf.remaining() < size {
        return Err(CascadeError::FrameTooShort);
    }

    Ok(MediaTag {
        kind,
        timestamp: (ext << 24) | base,
        payload: buf.copy_to_bytes(size),
    })
}

/// Build one tag (header + payload + previous-tag-size trailer).
pub fn build_tag(kind: TagKind, timestamp: u32, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_TAG_PAYLOAD {
        return Err(CascadeError::Internal(format!(
            "tag payload too large: {} bytes",
            payload.len()
        )));
    }

    let mut out = BytesMut::with_capacity(TAG_HEADER_LEN + payload.len() + 4);
    out.put_u8(kind.as_u8());
    out.put_uint(payload.len() as u64, 3);
    out.put_uint((timestamp & 0x00FF_FFFF) as u64, 3);
    out.put_u8((timestamp >> 24) as u8);
    out.put_uint(0, 3);
    out.put_slice(payload);
    out.put_u32((TAG_HEADER_LEN + payload.len()) as u32);
    Ok(out.freeze())
}

/// Track presence flags announced by the stream header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamHeader {
    pub has_audio: bool,
    pub has_video: bool,
}

/// Build the 13-byte stream header (magic, version, flags, body offset,
/// zero previous-tag-size).
pub fn build_stream_header(header: StreamHeader) -> [u8; STREAM_HEADER_LEN] {
    let mut flags = 0u8;
    if header.has_audio {
        flags |= FLAG_AUDIO;
    }
    if header.has_video {
        flags |= FLAG_VIDEO;
    }
    let off = STREAM_BODY_OFFSET.to_be_bytes();
    [
        STREAM_MAGIC[0],
        STREAM_MAGIC[1],
        STREAM_MAGIC[2],
        STREAM_VERSION,
        flags,
        off[0],
        off[1],
        off[2],
        off[3],
        0,
        0,
        0,
        0,
    ]
}

/// Validate a stream header and read its track flags.
pub fn parse_stream_header(raw: &[u8]) -> Result<StreamHeader> {
    let mut buf = raw;
    if buf.remaining() < STREAM_BODY_OFFSET as usize {
        return Err(CascadeError::Protocol("stream header too short".into()));
    }

    let mut magic = [0u8; 3];
    buf.copy_to_slice(&mut magic);
    if magic != STREAM_MAGIC {
        return Err(CascadeError::Protocol("bad stream header magic".into()));
    }

    let _version = buf.get_u8();
    let flags = buf.get_u8();

    Ok(StreamHeader {
        has_audio: flags & FLAG_AUDIO != 0,
        has_video: flags & FLAG_VIDEO != 0,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn extension_byte_is_the_high_timestamp_byte() {
        let raw = build_tag(TagKind::Video, 0x0123_4567, b"abc").unwrap();
        let tag = parse_tag(raw).unwrap();
        assert_eq!(tag.kind, TagKind::Video);
        assert_eq!(tag.timestamp, 0x0123_4567);
        assert_eq!(&tag.payload[..], b"abc");
    }

    #[test]
    fn every_short_prefix_is_rejected() {
        let raw = build_tag(TagKind::Audio, 40, &[7u8; 32]).unwrap();
        for n in 0..TAG_HEADER_LEN + 32 {
            let err = parse_tag(raw.slice(..n)).unwrap_err();
            assert!(matches!(err, CascadeError::FrameTooShort), "len={n}");
        }
    }

    #[test]
    fn header_flags_round_trip() {
        let h = StreamHeader { has_audio: true, has_video: false };
        let raw = build_stream_header(h);
        assert_eq!(&raw[..5], &[b'F', b'L', b'V', 1, 0x04]);
        assert_eq!(parse_stream_header(&raw).unwrap(), h);
    }
}
