#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use cascade_node::{config, router, NodeContext};

/// Start a node's HTTP surface on an ephemeral port.
pub async fn spawn_node(yaml: &str) -> (NodeContext, SocketAddr) {
    let cfg = config::load_from_str(yaml).expect("config");
    let ctx = NodeContext::new(cfg).expect("context");
    let app = router::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (ctx, addr)
}

/// Poll `cond` every 10ms for up to 5s.
pub async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
