//! Axum router wiring.
//!
//! Tunnel and relay upgrades are matched on any suffix so that clients which
//! escape their query into the path still reach the handler.

use axum::{
    routing::{any, get},
    Router,
};

use crate::{api, app_state::NodeContext, ops, relay, transport};

pub fn build_router(ctx: NodeContext) -> Router {
    Router::new()
        .route("/erwscascade/wsocket/*rest", get(transport::register::register_upgrade))
        .route("/erwscascade/wspush/*rest", get(relay::push_upgrade))
        .route("/erwscascade/httpproxy", any(api::http_proxy))
        .route("/erwscascade/httpproxy/", any(api::http_proxy))
        .route("/erwscascade/api/clientlist", get(api::client_list))
        .route("/erwscascade/api/streamlist", get(api::stream_list))
        .route("/erwscascade/api/push", get(api::push_start))
        .route("/erwscascade/api/stoppush", get(api::push_stop))
        .route("/erwscascade/api/pushlist", get(api::push_list))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .with_state(ctx)
}
