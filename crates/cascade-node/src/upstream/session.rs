//! One outbound registration tunnel.
//!
//! `Disconnected -> Connecting -> Registered -> Disconnected`, observable
//! through a watch channel. The read loop owns the socket's read half; the
//! write half is shared behind a lock so proxy handlers can answer from their
//! own tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use cascade_core::error::{CascadeError, Result};
use cascade_core::protocol::{ClientIdentity, Envelope, EnvelopeKind};

use crate::app_state::SequenceCounter;
use crate::obs::CascadeMetrics;
use crate::transport::codec::{client_message, decode_tunnel, Inbound};
use crate::upstream::ProxyHandler;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registered,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Registered => "registered",
        }
    }
}

#[derive(Default)]
struct Link {
    sink: Option<Arc<Mutex<WsSink>>>,
    source: Option<WsSource>,
}

pub struct UpstreamSession {
    target: Url,
    identity: ClientIdentity,
    sequence: Arc<SequenceCounter>,
    handler: Arc<dyn ProxyHandler>,
    metrics: Arc<CascadeMetrics>,
    state: watch::Sender<SessionState>,
    link: Mutex<Link>,
    reading: AtomicBool,
}

impl UpstreamSession {
    pub fn new(
        target: Url,
        identity: ClientIdentity,
        sequence: Arc<SequenceCounter>,
        handler: Arc<dyn ProxyHandler>,
        metrics: Arc<CascadeMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            target,
            identity,
            sequence,
            handler,
            metrics,
            state,
            link: Mutex::new(Link::default()),
            reading: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_replace(next);
    }

    /// Dial the superior. On failure the session stays `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(SessionState::Connecting);
        tracing::info!(url = %self.target, "connecting upstream");

        let ws = match connect_async(self.target.as_str()).await {
            Ok((ws, _resp)) => ws,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                self.metrics
                    .upstream_connects
                    .inc(&[("result", "failed")]);
                tracing::warn!(url = %self.target, error = %e, "upstream connect failed");
                return Err(CascadeError::Transport(format!("connect {}: {e}", self.target)));
            }
        };

        let (sink, source) = ws.split();
        let mut link = self.link.lock().await;
        link.sink = Some(Arc::new(Mutex::new(sink)));
        link.source = Some(source);
        self.metrics.upstream_connects.inc(&[("result", "ok")]);
        Ok(())
    }

    /// Announce this node's identity on a fresh connection.
    pub async fn send_identity(&self) -> Result<()> {
        let sink = self.sink().await?;
        let seq = self.sequence.next();
        let env = Envelope::info(seq, &self.identity)?;
        if let Err(e) = send_envelope(&sink, &env).await {
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        self.set_state(SessionState::Registered);
        tracing::info!(url = %self.target, cid = %self.identity.id, seq, "registered upstream");
        Ok(())
    }

    async fn sink(&self) -> Result<Arc<Mutex<WsSink>>> {
        self.link
            .lock()
            .await
            .sink
            .clone()
            .ok_or(CascadeError::ConnectionClosed)
    }

    /// Read envelopes until the connection fails. Only one read loop runs
    /// per session at a time; a second concurrent call returns immediately.
    pub async fn read_loop(&self) -> Result<()> {
        if self
            .reading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(url = %self.target, "read loop already running");
            return Ok(());
        }

        let _running = ReadingGuard(&self.reading);

        let res = self.read_until_error().await;
        self.close().await;
        res
    }

    async fn read_until_error(&self) -> Result<()> {
        let (mut source, sink) = {
            let mut link = self.link.lock().await;
            let source = link.source.take().ok_or(CascadeError::ConnectionClosed)?;
            let sink = link.sink.clone().ok_or(CascadeError::ConnectionClosed)?;
            (source, sink)
        };

        loop {
            let msg = match source.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    tracing::warn!(url = %self.target, error = %e, "upstream read failed");
                    return Err(CascadeError::Transport(format!("read failed: {e}")));
                }
                None => return Err(CascadeError::ConnectionClosed),
            };

            match decode_tunnel(msg.into()) {
                Ok(Inbound::Envelope(env)) => {
                    self.metrics
                        .envelopes_in
                        .inc(&[("role", "upstream"), ("kind", env.kind.as_str())]);
                    self.dispatch(env, &sink);
                }
                Ok(Inbound::Ping(_)) | Ok(Inbound::Pong) => {}
                Ok(Inbound::Close) => {
                    tracing::info!(url = %self.target, "superior closed the tunnel");
                    return Err(CascadeError::ConnectionClosed);
                }
                Err(e) => {
                    self.metrics.decode_errors.inc(&[("lane", "tunnel")]);
                    tracing::warn!(url = %self.target, error = %e, "skipping malformed envelope");
                }
            }
        }
    }

    fn dispatch(&self, env: Envelope, sink: &Arc<Mutex<WsSink>>) {
        if env.kind != EnvelopeKind::ProxyRequest {
            tracing::info!(seq = env.sequence, kind = ?env.kind, "ignoring envelope");
            return;
        }
        let msg = match env.proxy_message() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(seq = env.sequence, error = %e, "bad proxy request");
                return;
            }
        };

        let seq = env.sequence;
        let handler = Arc::clone(&self.handler);
        let sink = Arc::clone(sink);
        tokio::spawn(async move {
            tracing::debug!(seq, method = %msg.method, url = %msg.target, "proxy request received");
            match handler.handle(msg).await {
                Ok(body) => {
                    let resp = Envelope::proxy_response(seq, body);
                    if let Err(e) = send_envelope(&sink, &resp).await {
                        tracing::warn!(seq, error = %e, "failed to send proxy response");
                    }
                }
                // No response; the caller's own deadline reports it.
                Err(e) => tracing::warn!(seq, error = %e, "proxy handler failed"),
            }
        });
    }

    /// Drop the connection and go back to `Disconnected`.
    pub async fn close(&self) {
        let sink = {
            let mut link = self.link.lock().await;
            link.source = None;
            link.sink.take()
        };
        if let Some(sink) = sink {
            let _ = sink.lock().await.close().await;
        }
        if self.state() != SessionState::Disconnected {
            tracing::info!(url = %self.target, "upstream disconnected");
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Re-establish a closed session: connect and announce identity.
    /// A session that is already up is left alone.
    pub async fn reconnect(&self) -> Result<()> {
        if self.state() != SessionState::Disconnected {
            return Ok(());
        }
        self.connect().await?;
        if let Err(e) = self.send_identity().await {
            self.close().await;
            return Err(e);
        }
        Ok(())
    }
}

/// Clears the read-loop flag even when the loop's future is dropped.
struct ReadingGuard<'a>(&'a AtomicBool);

impl Drop for ReadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn send_envelope(sink: &Mutex<WsSink>, env: &Envelope) -> Result<()> {
    let msg = client_message(env)?;
    sink.lock()
        .await
        .send(msg)
        .await
        .map_err(|e| CascadeError::Transport(format!("write failed: {e}")))
}
