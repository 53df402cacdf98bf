//! Registration endpoint (superior role).
//!
//! A subordinate upgrades `<prefix>/erwscascade/wsocket/register?cid=<id>`.
//! The connection is registered under its cid for as long as the read loop
//! runs. Envelopes are demultiplexed by kind: `Info` refreshes the
//! identity, `ProxyResponse` completes the waiting correlator call.

use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use cascade_core::error::{CascadeError, Result};
use cascade_core::protocol::{Envelope, EnvelopeKind};

use crate::app_state::NodeContext;
use crate::registry::{ConnectionEntry, PendingReplies};
use crate::transport::codec::{decode_tunnel, server_message, Inbound};
use crate::transport::handshake::RegisterParams;

const OUTBOUND_QUEUE: usize = 256;

pub async fn register_upgrade(
    State(ctx): State<NodeContext>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let params = match RegisterParams::from_uri(&uri) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "registration refused");
            ctx.metrics()
                .registrations
                .inc(&[("result", "refused")]);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let cid = params.cid.clone();
        if let Err(e) = run_session(ctx, params, socket).await {
            tracing::info!(%cid, error = %e, code = e.code().as_str(), "registration session ended");
        }
    })
}

async fn run_session(ctx: NodeContext, params: RegisterParams, socket: WebSocket) -> Result<()> {
    let cid = params.cid;
    let conn_id = ctx.next_conn_id();
    let registry = ctx.registry();
    let metrics = ctx.metrics();

    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
    let entry = Arc::new(ConnectionEntry::new(cid.clone(), conn_id, out_tx));
    let pending: Arc<PendingReplies> = Arc::clone(entry.pending());

    if let Some(old) = registry.register(entry) {
        tracing::warn!(%cid, old_conn = old.conn_id, conn_id, "cid re-registered, replacing previous connection");
        old.pending().close();
        metrics.registrations.inc(&[("result", "replaced")]);
    } else {
        metrics.registrations.inc(&[("result", "accepted")]);
    }
    metrics.clients_active.inc(&[]);
    tracing::info!(%cid, conn_id, "subordinate registered");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // A stalled socket write must not block inbound reads.
    let mut writer = tokio::spawn(async move {
        let res: Result<()> = async {
            // Channel closes once this entry is replaced and no call holds it.
            while let Some(env) = out_rx.recv().await {
                let msg = server_message(&env)?;
                ws_tx
                    .send(msg)
                    .await
                    .map_err(|e| CascadeError::Transport(format!("write failed: {e}")))?;
            }
            Err(CascadeError::ConnectionClosed)
        }
        .await;
        let _ = ws_tx.send(Message::Close(None)).await;
        res
    });

    let res: Result<()> = async {
        loop {
            tokio::select! {
                done = &mut writer => {
                    return match done {
                        Ok(res) => res,
                        Err(e) => Err(CascadeError::Internal(format!("writer task failed: {e}"))),
                    };
                }

                incoming = ws_rx.next() => {
                    let msg = match incoming {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => return Err(CascadeError::Transport(format!("read failed: {e}"))),
                        None => return Err(CascadeError::ConnectionClosed),
                    };

                    match decode_tunnel(msg.into()) {
                        Ok(Inbound::Envelope(env)) => {
                            metrics.envelopes_in.inc(&[("role", "downstream"), ("kind", env.kind.as_str())]);
                            handle_envelope(&ctx, &cid, conn_id, &pending, env);
                        }
                        Ok(Inbound::Ping(_)) | Ok(Inbound::Pong) => {}
                        Ok(Inbound::Close) => return Ok(()),
                        Err(e) => {
                            metrics.decode_errors.inc(&[("lane", "tunnel")]);
                            tracing::warn!(%cid, error = %e, "skipping malformed envelope");
                        }
                    }
                }
            }
        }
    }
    .await;

    writer.abort();
    registry.remove(&cid, conn_id);
    pending.close();
    metrics.clients_active.dec(&[]);
    tracing::info!(%cid, conn_id, "subordinate unregistered");
    res
}

fn handle_envelope(
    ctx: &NodeContext,
    cid: &str,
    conn_id: u64,
    pending: &PendingReplies,
    env: Envelope,
) {
    match env.kind {
        EnvelopeKind::Info => match env.identity() {
            Ok(identity) => {
                tracing::info!(%cid, name = %identity.name, serial = %identity.serial, "client info");
                if !ctx.registry().update_identity(cid, conn_id, identity) {
                    tracing::debug!(%cid, conn_id, "client info for a superseded connection");
                }
            }
            Err(e) => tracing::warn!(%cid, seq = env.sequence, error = %e, "bad client info"),
        },
        EnvelopeKind::ProxyResponse => {
            let seq = env.sequence;
            if !pending.complete(env) {
                tracing::warn!(%cid, seq, "proxy response with no waiting call dropped");
            }
        }
        other => {
            tracing::warn!(%cid, seq = env.sequence, kind = ?other, "unexpected envelope kind dropped");
        }
    }
}
