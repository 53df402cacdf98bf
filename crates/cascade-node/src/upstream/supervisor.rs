use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cascade_core::error::Result;

use crate::app_state::NodeContext;
use crate::config::ReconnectSection;
use crate::upstream::{ProxyHandler, UpstreamSession};

/// Fixed retry interval plus optional random jitter. Never gives up.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub jitter: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ReconnectSection) -> Self {
        Self {
            interval: cfg.interval(),
            jitter: cfg.jitter(),
        }
    }

    pub fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.interval + Duration::from_millis(extra)
    }
}

/// Keep `session` registered until `cancel` fires.
pub async fn supervise(session: Arc<UpstreamSession>, policy: ReconnectPolicy, cancel: CancellationToken) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            res = run_once(&session) => res,
        };
        if let Err(e) = outcome {
            tracing::info!(url = %session.target(), attempt, error = %e, "upstream session ended");
        }

        let delay = policy.delay();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    session.close().await;
    tracing::info!(url = %session.target(), "upstream supervisor stopped");
}

async fn run_once(session: &UpstreamSession) -> Result<()> {
    session.reconnect().await?;
    session.read_loop().await
}

/// Start one supervised session per configured superior.
pub fn spawn_supervisors(ctx: &NodeContext, handler: Arc<dyn ProxyHandler>) -> Vec<JoinHandle<()>> {
    let policy = ReconnectPolicy::from_config(&ctx.cfg().reconnect);
    let mut handles = Vec::new();

    for server in &ctx.cfg().servers {
        let target = match server.register_url(&ctx.identity().id) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(host = %server.host, error = %e, "skipping superior");
                continue;
            }
        };
        let session = Arc::new(UpstreamSession::new(
            target,
            ctx.identity().clone(),
            ctx.sequence(),
            Arc::clone(&handler),
            ctx.metrics(),
        ));
        let cancel = ctx.shutdown_token().child_token();
        handles.push(tokio::spawn(supervise(session, policy, cancel)));
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_jitter() {
        let p = ReconnectPolicy {
            interval: Duration::from_millis(100),
            jitter: Duration::from_millis(20),
        };
        for _ in 0..50 {
            let d = p.delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(120));
        }
        let fixed = ReconnectPolicy {
            interval: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };
        assert_eq!(fixed.delay(), Duration::from_secs(5));
    }
}
