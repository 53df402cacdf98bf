use async_trait::async_trait;
use bytes::Bytes;

use cascade_core::error::{CascadeError, Result};
use cascade_core::protocol::ProxyMessage;

/// Executes a tunneled request locally and produces the response body.
#[async_trait]
pub trait ProxyHandler: Send + Sync + 'static {
    async fn handle(&self, msg: ProxyMessage) -> Result<Bytes>;
}

/// Forwards tunneled requests to the node's local HTTP API.
pub struct LocalHttpForwarder {
    client: reqwest::Client,
    base: String,
}

impl LocalHttpForwarder {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Absolute targets are used as-is; anything else is a path on `base`.
    pub fn resolve(&self, msg: &ProxyMessage) -> String {
        if msg.is_absolute() {
            msg.target.clone()
        } else {
            format!("{}{}", self.base, msg.target)
        }
    }
}

#[async_trait]
impl ProxyHandler for LocalHttpForwarder {
    async fn handle(&self, msg: ProxyMessage) -> Result<Bytes> {
        let url = self.resolve(&msg);
        let method = if msg.method.is_empty() { "GET" } else { msg.method.as_str() };
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| CascadeError::Protocol(format!("bad method {}: {e}", msg.method)))?;

        let mut req = self.client.request(method, &url);
        for (name, values) in msg.headers.iter() {
            if let Some(v) = values.first() {
                req = req.header(name, v.as_str());
            }
        }
        if !msg.body.is_empty() {
            req = req.body(msg.body.clone());
        }

        tracing::debug!(%url, "forwarding proxy request");
        let resp = req
            .send()
            .await
            .map_err(|e| CascadeError::Transport(format!("local request {url} failed: {e}")))?;
        resp.bytes()
            .await
            .map_err(|e| CascadeError::Transport(format!("local response {url} failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_targets_resolve_against_base() {
        let f = LocalHttpForwarder::new("http://127.0.0.1:8440/");
        assert_eq!(
            f.resolve(&ProxyMessage::new("GET", "/api/sysinfo")),
            "http://127.0.0.1:8440/api/sysinfo"
        );
        assert_eq!(
            f.resolve(&ProxyMessage::new("GET", "https://other:9/x")),
            "https://other:9/x"
        );
    }
}
