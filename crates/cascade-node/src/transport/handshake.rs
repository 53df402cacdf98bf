//! Upgrade-time parameter extraction.
//!
//! Some clients escape the whole query into the path
//! (`.../register%3Fcid%3Dc1`), so the raw path-and-query is percent-decoded
//! once before the query is split off and parsed.

use std::borrow::Cow;
use std::collections::HashMap;

use axum::http::Uri;

use cascade_core::error::{CascadeError, Result};

/// Decode `%XX` escapes. Malformed escapes are kept verbatim.
pub fn percent_decode(raw: &str) -> Cow<'_, str> {
    percent_encoding::percent_decode_str(raw).decode_utf8_lossy()
}

/// Path and query parameters of an upgrade request after unescaping.
#[derive(Debug, Default)]
pub struct RequestTarget {
    pub path: String,
    pub params: HashMap<String, String>,
}

impl RequestTarget {
    pub fn from_uri(uri: &Uri) -> Self {
        let raw = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        let decoded = percent_decode(raw);
        let (path, query) = match decoded.split_once('?') {
            Some((p, q)) => (p, q),
            None => (decoded.as_ref(), ""),
        };

        let mut params = HashMap::new();
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            // First occurrence wins.
            params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }
        Self {
            path: path.to_string(),
            params,
        }
    }

    /// Non-empty parameter value.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Registration request: `<prefix>/erwscascade/wsocket/register?cid=<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterParams {
    pub cid: String,
}

impl RegisterParams {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let target = RequestTarget::from_uri(uri);
        if !target.path.contains("register") {
            return Err(CascadeError::Protocol(format!(
                "not a registration path: {}",
                target.path
            )));
        }
        let cid = target
            .param("cid")
            .ok_or_else(|| CascadeError::Protocol("invalid cid refuse connect".into()))?;
        Ok(Self {
            cid: cid.to_string(),
        })
    }
}

/// Media push request: `.../erwscascade/wspush/on?cid=<id>&streamPath=<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushParams {
    pub cid: String,
    pub stream_path: String,
}

impl PushParams {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let target = RequestTarget::from_uri(uri);
        let cid = target
            .param("cid")
            .ok_or_else(|| CascadeError::Protocol("invalid cid refuse connect".into()))?;
        let stream_path = target
            .param("streamPath")
            .ok_or_else(|| CascadeError::Protocol("invalid streamPath refuse connect".into()))?;
        Ok(Self {
            cid: cid.to_string(),
            stream_path: stream_path.to_string(),
        })
    }

    /// Key the pushed stream is published under locally.
    pub fn stream_key(&self) -> String {
        format!("{}-{}", self.stream_path, self.cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().expect("valid uri")
    }

    #[test]
    fn register_from_plain_query() {
        let p = RegisterParams::from_uri(&uri("/erwscascade/wsocket/register?cid=c1")).expect("ok");
        assert_eq!(p.cid, "c1");
    }

    #[test]
    fn register_from_escaped_path() {
        let p = RegisterParams::from_uri(&uri("/ctx/erwscascade/wsocket/register%3Fcid=edge%2D7"))
            .expect("ok");
        assert_eq!(p.cid, "edge-7");
    }

    #[test]
    fn register_requires_marker_and_cid() {
        assert!(RegisterParams::from_uri(&uri("/erwscascade/wsocket/register")).is_err());
        assert!(RegisterParams::from_uri(&uri("/erwscascade/wsocket/register?cid=")).is_err());
        assert!(RegisterParams::from_uri(&uri("/erwscascade/wsocket/other?cid=c1")).is_err());
    }

    #[test]
    fn push_params_and_key() {
        let p = PushParams::from_uri(&uri("/erwscascade/wspush/on?cid=c1&streamPath=live%2Fcam1"))
            .expect("ok");
        assert_eq!(p.stream_key(), "live/cam1-c1");
        assert!(PushParams::from_uri(&uri("/erwscascade/wspush/on?cid=c1")).is_err());
        assert!(PushParams::from_uri(&uri("/erwscascade/wspush/on?streamPath=a")).is_err());
    }

    #[test]
    fn malformed_escape_is_kept() {
        assert_eq!(percent_decode("a%zzb%4"), "a%zzb%4");
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("tail%3F"), "tail?");
        assert_eq!(percent_decode("bad%FFbyte"), "bad\u{FFFD}byte");
    }
}
