//! HTTP API glue: tunneled proxy calls, client/stream listings, push control.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cascade_core::protocol::{Headers, ProxyMessage};

use crate::app_state::NodeContext;
use crate::relay;
use crate::transport::handshake::percent_decode;

/// Path a superior requests to list a subordinate's streams.
pub const STREAM_LIST_PATH: &str = "/erwscascade/api/streamlist";

/// Request headers carried through the tunnel.
const FORWARDED_HEADERS: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::SET_COOKIE];

#[derive(Debug, Serialize)]
struct ApiStatus {
    code: u16,
    msg: String,
}

fn status(code: StatusCode, msg: impl Into<String>) -> Response {
    (
        code,
        Json(ApiStatus {
            code: code.as_u16(),
            msg: msg.into(),
        }),
    )
        .into_response()
}

/// Build the tunneled target: `httpPath` plus every other query parameter,
/// percent-decoded. `None` when `cid` or `httpPath` is missing.
pub fn proxy_target(raw_query: &str) -> Option<(String, String)> {
    let mut cid = None;
    let mut http_path = None;
    let mut rest = url::form_urlencoded::Serializer::new(String::new());
    let mut has_rest = false;

    for (k, v) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        match k.as_ref() {
            "cid" => {
                cid.get_or_insert_with(|| v.into_owned());
            }
            "httpPath" => {
                http_path.get_or_insert_with(|| v.into_owned());
            }
            _ => {
                rest.append_pair(&k, &v);
                has_rest = true;
            }
        }
    }

    let cid = cid.filter(|c| !c.is_empty())?;
    let mut target = http_path.filter(|p| !p.is_empty())?;
    if has_rest {
        target.push(if target.contains('?') { '&' } else { '?' });
        target.push_str(&rest.finish());
    }
    Some((cid, percent_decode(&target).into_owned()))
}

/// `ANY /erwscascade/httpproxy/?cid=..&httpPath=..`
pub async fn http_proxy(
    State(ctx): State<NodeContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((cid, target)) = proxy_target(uri.query().unwrap_or("")) else {
        return status(StatusCode::BAD_REQUEST, "invalid cid or httpPath");
    };

    let mut msg = ProxyMessage::new(method.as_str(), target);
    let mut fwd = Headers::new();
    for name in FORWARDED_HEADERS {
        if let Some(v) = headers.get(&name).and_then(|v| v.to_str().ok()) {
            fwd.set(name.as_str(), v);
        }
    }
    msg.headers = fwd;
    msg.body = body;

    match ctx.correlator().call(&cid, &msg).await {
        Ok(resp) => (StatusCode::OK, resp).into_response(),
        Err(e) => {
            tracing::error!(%cid, url = %msg.target, error = %e, "proxy call failed");
            status(StatusCode::BAD_GATEWAY, "proxy request failed")
        }
    }
}

/// `GET /erwscascade/api/clientlist`
pub async fn client_list(State(ctx): State<NodeContext>) -> Response {
    Json(ctx.registry().identities()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct StreamListQuery {
    #[serde(default)]
    pub cid: Option<String>,
}

/// `GET /erwscascade/api/streamlist[?cid=..]`
pub async fn stream_list(State(ctx): State<NodeContext>, Query(q): Query<StreamListQuery>) -> Response {
    let Some(cid) = q.cid.filter(|c| !c.is_empty()) else {
        return Json(ctx.hub().streams()).into_response();
    };

    let msg = ProxyMessage::new("GET", STREAM_LIST_PATH);
    match ctx.correlator().call(&cid, &msg).await {
        Ok(resp) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            resp,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(%cid, error = %e, "remote stream list failed");
            status(StatusCode::BAD_GATEWAY, "proxy request failed")
        }
    }
}

/// `GET /erwscascade/api/push?streamPath=..&target=..`
pub async fn push_start(
    State(ctx): State<NodeContext>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let stream_path = q.get("streamPath").map(String::as_str).unwrap_or("");
    let target = q.get("target").map(String::as_str).unwrap_or("");

    match relay::start_push(&ctx, stream_path, target) {
        Ok(_handle) => status(StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(stream = %stream_path, %target, error = %e, "push request rejected");
            status(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// `GET /erwscascade/api/stoppush?streamPath=..&target=..`
pub async fn push_stop(
    State(ctx): State<NodeContext>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let stream_path = q.get("streamPath").map(String::as_str).unwrap_or("");
    let target = q.get("target").map(String::as_str).unwrap_or("");

    if ctx.stop_push(stream_path, target) {
        status(StatusCode::OK, "ok")
    } else {
        status(StatusCode::NOT_FOUND, "no such push")
    }
}

/// `GET /erwscascade/api/pushlist`
pub async fn push_list(State(ctx): State<NodeContext>) -> Response {
    #[derive(Serialize)]
    struct Row {
        #[serde(rename = "streamPath")]
        stream_path: String,
        target: String,
    }
    let rows: Vec<Row> = ctx
        .pushes()
        .into_iter()
        .map(|(stream_path, target)| Row { stream_path, target })
        .collect();
    Json(rows).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_params_are_reappended() {
        let (cid, target) = proxy_target(
            "cid=test-c001&httpPath=/erwscascade/api/push?streamPath=njtv/glgc&target=ws://127.0.0.1:8450/erwscascade/wspush/on",
        )
        .expect("target");
        assert_eq!(cid, "test-c001");
        assert_eq!(
            target,
            "/erwscascade/api/push?streamPath=njtv/glgc&target=ws://127.0.0.1:8450/erwscascade/wspush/on"
        );
    }

    #[test]
    fn path_with_own_query_gets_ampersand() {
        let (_, target) =
            proxy_target("cid=c1&httpPath=%2Fapi%2Fx%3Fa%3D1&b=2").expect("target");
        assert_eq!(target, "/api/x?a=1&b=2");
    }

    #[test]
    fn missing_params_are_rejected() {
        assert!(proxy_target("httpPath=/x").is_none());
        assert!(proxy_target("cid=c1").is_none());
        assert!(proxy_target("cid=&httpPath=/x").is_none());
    }
}
