//! Push acceptor (superior role): `.../erwscascade/wspush/on?cid=..&streamPath=..`.

use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};

use cascade_core::error::{CascadeError, Result};
use cascade_core::media::{parse_stream_header, parse_tag, MediaMetadata, StreamHeader, TagKind};

use crate::app_state::NodeContext;
use crate::relay::{on_conn_err, RelayRole};
use crate::transport::handshake::PushParams;

/// Upper bound for receiving the stream header and the metadata tag.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn push_upgrade(
    State(ctx): State<NodeContext>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let params = match PushParams::from_uri(&uri) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "push refused");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let key = params.stream_key();
        if let Err(e) = run_pull(&ctx, params, socket).await {
            on_conn_err(&ctx.metrics(), RelayRole::Pull, &key, &e);
        }
    })
}

async fn next_binary(socket: &mut WebSocket) -> Result<Bytes> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Binary(b))) => return Ok(Bytes::from(b)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Text(_))) => {
                return Err(CascadeError::Protocol("expected a binary frame".into()))
            }
            Some(Ok(Message::Close(_))) | None => return Err(CascadeError::ConnectionClosed),
            Some(Err(e)) => return Err(CascadeError::Transport(format!("read failed: {e}"))),
        }
    }
}

async fn handshake(socket: &mut WebSocket) -> Result<(StreamHeader, MediaMetadata)> {
    let head = next_binary(socket).await?;
    let header = parse_stream_header(&head)?;

    let first = next_binary(socket).await?;
    let tag = parse_tag(first)?;
    if tag.kind != TagKind::Script {
        return Err(CascadeError::Protocol(format!(
            "first tag must be script, got {}",
            tag.kind.as_str()
        )));
    }
    let metadata = MediaMetadata::from_script_payload(tag.payload).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable stream metadata");
        MediaMetadata::default()
    });
    Ok((header, metadata))
}

async fn run_pull(ctx: &NodeContext, params: PushParams, mut socket: WebSocket) -> Result<()> {
    let key = params.stream_key();
    let metrics = ctx.metrics();

    let (header, metadata) = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut socket)).await {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            let _ = socket.send(Message::Close(None)).await;
            return Err(e);
        }
        Err(_) => {
            let _ = socket.send(Message::Close(None)).await;
            return Err(CascadeError::Timeout);
        }
    };
    tracing::info!(
        cid = %params.cid,
        stream = %key,
        has_audio = header.has_audio,
        has_video = header.has_video,
        "push accepted"
    );

    // Ownership does not transfer: a second push for a live key is read and discarded.
    let mut publisher = ctx.hub().try_publish(&key, header, metadata);
    if publisher.is_none() {
        tracing::warn!(stream = %key, "stream already published; frames will be discarded");
    }

    metrics.relays_active.inc(&[("role", "pull")]);
    let res = loop {
        let data = match next_binary(&mut socket).await {
            Ok(d) => d,
            Err(CascadeError::Protocol(_)) => continue,
            Err(e) => break Err(e),
        };
        let tag = match parse_tag(data) {
            Ok(t) => t,
            Err(e) => {
                metrics.decode_errors.inc(&[("lane", "relay")]);
                tracing::warn!(stream = %key, error = %e, "skipping bad tag");
                continue;
            }
        };

        match tag.kind {
            TagKind::Audio | TagKind::Video => {
                metrics
                    .relay_frames
                    .inc(&[("role", "pull"), ("kind", tag.kind.as_str())]);
                if let Some(p) = publisher.as_mut() {
                    p.write(tag);
                }
            }
            TagKind::Script => {
                tracing::info!(stream = %key, bytes = tag.payload.len(), "script tag");
            }
            TagKind::Other(t) => {
                tracing::debug!(stream = %key, tag_type = t, "ignoring tag");
            }
        }
    };

    metrics.relays_active.dec(&[("role", "pull")]);
    drop(publisher);
    res
}
