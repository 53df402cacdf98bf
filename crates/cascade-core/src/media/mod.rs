//! Media relay wire formats.
//!
//! A relay connection carries one stream header, one metadata script tag,
//! then a sequence of tagged audio/video/script frames, each in its own
//! binary WebSocket message. Payloads are opaque: no codec work happens here.

pub mod amf;
pub mod rebase;
pub mod tag;

pub use amf::{AmfValue, AudioParams, MediaMetadata, VideoParams};
pub use rebase::TimestampRebaser;
pub use tag::{
    build_stream_header, build_tag, parse_stream_header, parse_tag, MediaTag, StreamHeader,
    TagKind, STREAM_HEADER_LEN, STREAM_MAGIC, TAG_HEADER_LEN,
};
