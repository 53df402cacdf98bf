//! AMF0 subset for the relay's `onMetaData` script tag.
//!
//! Supported markers: number, boolean, string, long string, object, null,
//! undefined (read as null) and ECMA array. Decoding is depth-limited and
//! panic-free.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CascadeError, Result};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_LONG_STRING: u8 = 0x0C;

const MAX_DEPTH: usize = 16;
const METADATA_NAME: &str = "onMetaData";

/// One AMF0 value. Property lists keep wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, AmfValue)>),
    EcmaArray(Vec<(String, AmfValue)>),
    Null,
}

impl AmfValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn properties(&self) -> Option<&[(String, AmfValue)]> {
        match self {
            AmfValue::Object(p) | AmfValue::EcmaArray(p) => Some(p),
            _ => None,
        }
    }
}

pub fn encode_value(v: &AmfValue, out: &mut BytesMut) -> Result<()> {
    match v {
        AmfValue::Number(n) => {
            out.put_u8(MARKER_NUMBER);
            out.put_f64(*n);
        }
        AmfValue::Boolean(b) => {
            out.put_u8(MARKER_BOOLEAN);
            out.put_u8(u8::from(*b));
        }
        AmfValue::String(s) => {
            if s.len() > u16::MAX as usize {
                out.put_u8(MARKER_LONG_STRING);
                out.put_u32(s.len() as u32);
                out.put_slice(s.as_bytes());
            } else {
                out.put_u8(MARKER_STRING);
                put_short_string(s, out)?;
            }
        }
        AmfValue::Object(props) => {
            out.put_u8(MARKER_OBJECT);
            put_properties(props, out)?;
        }
        AmfValue::EcmaArray(props) => {
            out.put_u8(MARKER_ECMA_ARRAY);
            out.put_u32(props.len() as u32);
            put_properties(props, out)?;
        }
        AmfValue::Null => out.put_u8(MARKER_NULL),
    }
    Ok(())
}

fn put_short_string(s: &str, out: &mut BytesMut) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| CascadeError::Internal(format!("amf key too long: {} bytes", s.len())))?;
    out.put_u16(len);
    out.put_slice(s.as_bytes());
    Ok(())
}

fn put_properties(props: &[(String, AmfValue)], out: &mut BytesMut) -> Result<()> {
    for (k, v) in props {
        put_short_string(k, out)?;
        encode_value(v, out)?;
    }
    out.put_u16(0);
    out.put_u8(MARKER_OBJECT_END);
    Ok(())
}

pub fn decode_value(buf: &mut Bytes) -> Result<AmfValue> {
    decode_at(buf, 0)
}

fn short(what: &str) -> CascadeError {
    CascadeError::Decode(format!("amf {what} truncated"))
}

fn decode_at(buf: &mut Bytes, depth: usize) -> Result<AmfValue> {
    if depth > MAX_DEPTH {
        return Err(CascadeError::Decode("amf nesting too deep".into()));
    }
    if !buf.has_remaining() {
        return Err(short("marker"));
    }

    match buf.get_u8() {
        MARKER_NUMBER => {
            if buf.remaining() < 8 {
                return Err(short("number"));
            }
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            if !buf.has_remaining() {
                return Err(short("boolean"));
            }
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(get_short_string(buf)?)),
        MARKER_LONG_STRING => {
            if buf.remaining() < 4 {
                return Err(short("long string"));
            }
            let len = buf.get_u32() as usize;
            Ok(AmfValue::String(get_utf8(buf, len)?))
        }
        MARKER_OBJECT => Ok(AmfValue::Object(get_properties(buf, depth)?)),
        MARKER_ECMA_ARRAY => {
            if buf.remaining() < 4 {
                return Err(short("ecma array"));
            }
            let _count_hint = buf.get_u32();
            Ok(AmfValue::EcmaArray(get_properties(buf, depth)?))
        }
        MARKER_NULL | MARKER_UNDEFINED => Ok(AmfValue::Null),
        other => Err(CascadeError::Decode(format!("unsupported amf marker: {other:#04x}"))),
    }
}

fn get_short_string(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(short("string length"));
    }
    let len = buf.get_u16() as usize;
    get_utf8(buf, len)
}

fn get_utf8(buf: &mut Bytes, len: usize) -> Result<String> {
    if buf.remaining() < len {
        return Err(short("string"));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| CascadeError::Decode(format!("amf string not utf8: {e}")))
}

fn get_properties(buf: &mut Bytes, depth: usize) -> Result<Vec<(String, AmfValue)>> {
    let mut props = Vec::new();
    loop {
        let key = get_short_string(buf)?;
        if key.is_empty() {
            if buf.has_remaining() && buf.chunk().first() == Some(&MARKER_OBJECT_END) {
                buf.advance(1);
                return Ok(props);
            }
            return Err(short("object end"));
        }
        let value = decode_at(buf, depth + 1)?;
        props.push((key, value));
    }
}

/// Audio track parameters announced in metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParams {
    pub codec_id: u8,
    pub sample_rate: u32,
    pub sample_size: u32,
    pub stereo: bool,
}

/// Video track parameters announced in metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoParams {
    pub codec_id: u8,
    pub width: u32,
    pub height: u32,
}

/// Codec description carried by the first script tag of a relay.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaMetadata {
    pub creator: String,
    pub audio: Option<AudioParams>,
    pub video: Option<VideoParams>,
}

impl MediaMetadata {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Encode as `"onMetaData"` followed by an ECMA array.
    pub fn to_script_payload(&self) -> Result<Bytes> {
        let mut props = vec![
            ("MetaDataCreator".to_string(), AmfValue::String(self.creator.clone())),
            ("hasVideo".to_string(), AmfValue::Boolean(self.has_video())),
            ("hasAudio".to_string(), AmfValue::Boolean(self.has_audio())),
            ("hasMatadata".to_string(), AmfValue::Boolean(true)),
            ("canSeekToEnd".to_string(), AmfValue::Boolean(false)),
            ("duration".to_string(), AmfValue::Number(0.0)),
            ("hasKeyFrames".to_string(), AmfValue::Number(0.0)),
            ("framerate".to_string(), AmfValue::Number(0.0)),
            ("videodatarate".to_string(), AmfValue::Number(0.0)),
            ("filesize".to_string(), AmfValue::Number(0.0)),
        ];
        if let Some(a) = self.audio {
            props.push(("audiocodecid".into(), AmfValue::Number(a.codec_id as f64)));
            props.push(("audiosamplerate".into(), AmfValue::Number(a.sample_rate as f64)));
            props.push(("audiosamplesize".into(), AmfValue::Number(a.sample_size as f64)));
            props.push(("stereo".into(), AmfValue::Boolean(a.stereo)));
        }
        if let Some(v) = self.video {
            props.push(("videocodecid".into(), AmfValue::Number(v.codec_id as f64)));
            props.push(("width".into(), AmfValue::Number(v.width as f64)));
            props.push(("height".into(), AmfValue::Number(v.height as f64)));
        }

        let mut out = BytesMut::new();
        encode_value(&AmfValue::String(METADATA_NAME.into()), &mut out)?;
        encode_value(&AmfValue::EcmaArray(props), &mut out)?;
        Ok(out.freeze())
    }

    /// Decode a script tag payload. Missing fields fall back to zero/false.
    pub fn from_script_payload(mut payload: Bytes) -> Result<Self> {
        let name = decode_value(&mut payload)?;
        if name.as_str() != Some(METADATA_NAME) {
            return Err(CascadeError::Decode("script tag is not onMetaData".into()));
        }
        let body = decode_value(&mut payload)?;
        let props = body
            .properties()
            .ok_or_else(|| CascadeError::Decode("onMetaData body is not an object".into()))?;

        let get = |k: &str| props.iter().find(|(name, _)| name == k).map(|(_, v)| v);
        let num = |k: &str| get(k).and_then(AmfValue::as_f64).unwrap_or(0.0);
        let flag = |k: &str| get(k).and_then(AmfValue::as_bool).unwrap_or(false);

        let audio = flag("hasAudio").then(|| AudioParams {
            codec_id: num("audiocodecid") as u8,
            sample_rate: num("audiosamplerate") as u32,
            sample_size: num("audiosamplesize") as u32,
            stereo: flag("stereo"),
        });
        let video = flag("hasVideo").then(|| VideoParams {
            codec_id: num("videocodecid") as u8,
            width: num("width") as u32,
            height: num("height") as u32,
        });

        Ok(Self {
            creator: get("MetaDataCreator")
                .and_then(AmfValue::as_str)
                .unwrap_or_default()
                .to_string(),
            audio,
            video,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn metadata_survives_encoding() {
        let meta = MediaMetadata {
            creator: "cascade".into(),
            audio: Some(AudioParams { codec_id: 10, sample_rate: 44100, sample_size: 16, stereo: true }),
            video: Some(VideoParams { codec_id: 7, width: 1280, height: 720 }),
        };
        let back = MediaMetadata::from_script_payload(meta.to_script_payload().unwrap()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn video_only_metadata_has_no_audio() {
        let meta = MediaMetadata {
            creator: String::new(),
            audio: None,
            video: Some(VideoParams { codec_id: 12, width: 640, height: 360 }),
        };
        let back = MediaMetadata::from_script_payload(meta.to_script_payload().unwrap()).unwrap();
        assert!(!back.has_audio());
        assert!(back.has_video());
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let meta = MediaMetadata::default().to_script_payload().unwrap();
        for n in 0..meta.len() {
            assert!(MediaMetadata::from_script_payload(meta.slice(..n)).is_err(), "len={n}");
        }
    }

    #[test]
    fn nesting_is_bounded() {
        let mut raw = BytesMut::new();
        for _ in 0..64 {
            raw.put_u8(MARKER_OBJECT);
            raw.put_u16(1);
            raw.put_u8(b'k');
        }
        let err = decode_value(&mut raw.freeze()).unwrap_err();
        assert!(matches!(err, CascadeError::Decode(_)));
    }
}
