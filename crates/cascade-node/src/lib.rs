//! Cascade node library entry.
//!
//! Wires config, the node context, both tunnel roles, the RPC correlator,
//! the media relay and the HTTP surface into one node. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod api;
pub mod app_state;
pub mod config;
pub mod obs;
pub mod ops;
pub mod registry;
pub mod relay;
pub mod router;
pub mod rpc;
pub mod transport;
pub mod upstream;

pub use app_state::NodeContext;
