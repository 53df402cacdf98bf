//! Envelope payloads: client identity and proxied HTTP request.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::protocol::b64;

/// Identity a subordinate presents when registering upward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Registry primary key (`cid` on the wire).
    #[serde(rename = "cid", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serial: String,
}

impl ClientIdentity {
    /// Identity known only by id, used until the peer sends its `Info`.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Multi-valued HTTP headers with case-insensitive names.
///
/// Names are stored in canonical form (`content-type` -> `Content-Type`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values of `name` with `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(canonical_name(name), vec![value.into()]);
    }

    /// Append a value to `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.entry(canonical_name(name)).or_default().push(value.into());
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&canonical_name(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut out = Headers::new();
        for (k, values) in raw {
            for v in values {
                out.append(&k, v);
            }
        }
        out
    }
}

impl From<Headers> for BTreeMap<String, Vec<String>> {
    fn from(h: Headers) -> Self {
        h.0
    }
}

/// Canonical MIME header form: first letter and every letter after `-`
/// upper-cased, the rest lower-cased.
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.trim().chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// HTTP request tunneled to a subordinate (`ProxyRequest` payload).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyMessage {
    /// Absolute URL or a path relative to the subordinate's local API.
    #[serde(rename = "url")]
    pub target: String,
    #[serde(rename = "header", default, deserialize_with = "b64::null_as_default")]
    pub headers: Headers,
    #[serde(default)]
    pub method: String,
    #[serde(with = "b64", default)]
    pub body: Bytes,
}

impl ProxyMessage {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    /// Whether `target` already names a scheme and host.
    pub fn is_absolute(&self) -> bool {
        self.target.starts_with("http:") || self.target.starts_with("https:")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let mut h = Headers::new();
        h.set("content-TYPE", "application/json");
        assert_eq!(h.get("Content-Type"), Some("application/json"));
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.iter().next().unwrap().0, "Content-Type");
    }

    #[test]
    fn null_header_and_body_decode_as_empty() {
        let m: ProxyMessage =
            serde_json::from_str(r#"{"url":"/x","header":null,"method":"GET","body":null}"#).unwrap();
        assert!(m.headers.is_empty());
        assert!(m.body.is_empty());
        assert!(!m.is_absolute());
    }

    #[test]
    fn decoded_headers_are_canonicalised() {
        let m: ProxyMessage = serde_json::from_str(
            r#"{"url":"http://h/x","header":{"set-cookie":["a=1","b=2"]},"method":"POST"}"#,
        )
        .unwrap();
        assert!(m.is_absolute());
        let (name, values) = m.headers.iter().next().unwrap();
        assert_eq!(name, "Set-Cookie");
        assert_eq!(values.len(), 2);
    }
}
