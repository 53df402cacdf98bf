use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use cascade_core::error::{CascadeError, Result};
use cascade_core::media::{build_stream_header, build_tag, parse_tag, TagKind};

use crate::app_state::NodeContext;
use crate::relay::{on_conn_err, RelayRole};

/// Target url with `cid` and `streamPath` added unless already present.
pub fn push_url(target: &str, cid: &str, stream_path: &str) -> Result<Url> {
    let mut url = Url::parse(target)
        .map_err(|e| CascadeError::Config(format!("bad push target {target}: {e}")))?;
    let (has_cid, has_path) = url.query_pairs().fold((false, false), |(c, p), (k, _)| {
        (c || k == "cid", p || k == "streamPath")
    });
    {
        let mut q = url.query_pairs_mut();
        if !has_cid {
            q.append_pair("cid", cid);
        }
        if !has_path {
            q.append_pair("streamPath", stream_path);
        }
    }
    Ok(url)
}

/// Relay local stream `stream_path` to `target` until the connection or the
/// source fails, or `cancel` fires (which returns `Ok`).
pub async fn push(
    ctx: &NodeContext,
    stream_path: &str,
    target: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut sub = ctx
        .hub()
        .subscribe(stream_path)
        .ok_or_else(|| CascadeError::NotFound(format!("stream {stream_path} is not live")))?;
    let url = push_url(target, &ctx.identity().id, stream_path)?;
    let metrics = ctx.metrics();

    tracing::info!(stream = %stream_path, %url, "push connecting");
    let (ws, _resp) = connect_async(url.as_str())
        .await
        .map_err(|e| CascadeError::Transport(format!("connect {url}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let header = build_stream_header(sub.header());
    let script = build_tag(TagKind::Script, 0, &sub.metadata().to_script_payload()?)?;
    for frame in [header.to_vec(), script.to_vec()] {
        ws_tx
            .send(Message::Binary(frame))
            .await
            .map_err(|e| CascadeError::Transport(format!("write header: {e}")))?;
    }

    metrics.relays_active.inc(&[("role", "push")]);
    tracing::info!(stream = %stream_path, %url, "push started");

    let mut health = tokio::time::interval(ctx.cfg().relay.health_interval());
    health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    health.tick().await;

    let res: Result<()> = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }

                frame = sub.recv() => {
                    let Some(tag) = frame else {
                        return Err(CascadeError::NotFound("stream close".into()));
                    };
                    let data = build_tag(tag.kind, tag.timestamp, &tag.payload)?;
                    ws_tx
                        .send(Message::Binary(data.to_vec()))
                        .await
                        .map_err(|e| CascadeError::Transport(format!("write failed: {e}")))?;
                    metrics.relay_frames.inc(&[("role", "push"), ("kind", tag.kind.as_str())]);
                }

                // Reserved back channel: tags from the superior are parsed and dropped.
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(b))) => match parse_tag(b.into()) {
                            Ok(tag) => tracing::trace!(kind = tag.kind.as_str(), ts = tag.timestamp, "back-channel tag dropped"),
                            Err(e) => {
                                metrics.decode_errors.inc(&[("lane", "relay")]);
                                tracing::debug!(error = %e, "bad back-channel tag");
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => return Err(CascadeError::ConnectionClosed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(CascadeError::Transport(format!("read failed: {e}"))),
                    }
                }

                _ = health.tick() => {
                    if sub.source_closed() {
                        return Err(CascadeError::NotFound("stream close".into()));
                    }
                    if !sub.is_playing() {
                        return Err(CascadeError::Internal("stream sub not playing".into()));
                    }
                }
            }
        }
    }
    .await;

    metrics.relays_active.dec(&[("role", "push")]);
    res
}

/// Re-invoke `push` at the reconnect interval until cancelled.
pub async fn run_push(ctx: NodeContext, stream_path: String, target: String, cancel: CancellationToken) {
    let interval = ctx.cfg().reconnect.interval();
    let metrics = ctx.metrics();
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        tracing::info!(stream = %stream_path, %target, attempt, "push attempt");
        match push(&ctx, &stream_path, &target, &cancel).await {
            Ok(()) => {}
            Err(e) => on_conn_err(&metrics, RelayRole::Push, &stream_path, &e),
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    ctx.finish_push(&stream_path, &target);
    tracing::info!(stream = %stream_path, %target, "push stopped");
}

/// Start a supervised push unless the same one is already running.
pub fn start_push(ctx: &NodeContext, stream_path: &str, target: &str) -> Result<JoinHandle<()>> {
    if stream_path.is_empty() {
        return Err(CascadeError::Protocol("streamPath is required".into()));
    }
    push_url(target, &ctx.identity().id, stream_path)?;
    let cancel = ctx.begin_push(stream_path, target).ok_or_else(|| {
        CascadeError::Protocol(format!("push {stream_path} -> {target} already running"))
    })?;
    Ok(tokio::spawn(run_push(
        ctx.clone(),
        stream_path.to_string(),
        target.to_string(),
        cancel,
    )))
}

/// Start every push listed in the config.
pub fn spawn_configured(ctx: &NodeContext) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for (stream_path, target) in &ctx.cfg().push {
        match start_push(ctx, stream_path, target) {
            Ok(h) => handles.push(h),
            Err(e) => tracing::error!(stream = %stream_path, %target, error = %e, "push not started"),
        }
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_appends_missing_params() {
        let u = push_url("ws://up:8450/erwscascade/wspush/on", "c1", "live/a").expect("url");
        assert_eq!(
            u.as_str(),
            "ws://up:8450/erwscascade/wspush/on?cid=c1&streamPath=live%2Fa"
        );

        let u = push_url("ws://up/erwscascade/wspush/on?cid=other", "c1", "s").expect("url");
        assert_eq!(u.as_str(), "ws://up/erwscascade/wspush/on?cid=other&streamPath=s");
    }

    #[test]
    fn push_url_rejects_garbage() {
        assert!(push_url("not a url", "c1", "s").is_err());
    }
}
