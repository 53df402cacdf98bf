//! Subordinate role: register upward and serve tunneled proxy requests.

mod forwarder;
mod session;
mod supervisor;

pub use forwarder::{LocalHttpForwarder, ProxyHandler};
pub use session::{SessionState, UpstreamSession};
pub use supervisor::{spawn_supervisors, supervise, ReconnectPolicy};
