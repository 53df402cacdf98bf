//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 once shutdown started)
//! - `/metrics` : Prometheus text format

use std::fmt::Write;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::app_state::NodeContext;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(ctx): State<NodeContext>) -> impl IntoResponse {
    if ctx.shutdown_token().is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn metrics(State(ctx): State<NodeContext>) -> Response {
    let mut body = ctx.metrics().render();

    let live = ctx.hub().streams().iter().filter(|s| s.live).count();
    let _ = writeln!(body, "# TYPE cascade_registry_clients gauge");
    let _ = writeln!(body, "cascade_registry_clients {}", ctx.registry().len());
    let _ = writeln!(body, "# TYPE cascade_streams_live gauge");
    let _ = writeln!(body, "cascade_streams_live {live}");
    let _ = writeln!(body, "# TYPE cascade_pushes_running gauge");
    let _ = writeln!(body, "cascade_pushes_running {}", ctx.pushes().len());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
