//! Cascade node binary.
//!
//! Config path: first argument, else `CASCADE_CONFIG`, else `cascade.yaml`.
//! `RUST_LOG` controls verbosity.

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use cascade_core::error::{CascadeError, Result};
use cascade_node::{config, relay, router, upstream, NodeContext};

const DEFAULT_CONFIG: &str = "cascade.yaml";

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, code = e.code().as_str(), "cascade node failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CASCADE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let cfg = config::load_from_file(&path)?;
    let listen = cfg.node.listen_addr()?;

    let ctx = NodeContext::new(cfg)?;
    let forwarder = Arc::new(upstream::LocalHttpForwarder::new(ctx.cfg().node.local_api.clone()));
    let supervisors = upstream::spawn_supervisors(&ctx, forwarder);
    let pushes = relay::spawn_configured(&ctx);
    tracing::info!(
        cid = %ctx.identity().id,
        superiors = supervisors.len(),
        pushes = pushes.len(),
        "cascade node configured"
    );

    let app = router::build_router(ctx.clone());
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| CascadeError::Transport(format!("bind {listen}: {e}")))?;
    tracing::info!(%listen, config = %path, "cascade node listening");

    let shutdown = ctx.shutdown_token().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await
        .map_err(|e| CascadeError::Transport(format!("server failed: {e}")))?;

    for h in supervisors.into_iter().chain(pushes) {
        let _ = h.await;
    }
    tracing::info!("cascade node stopped");
    Ok(())
}
