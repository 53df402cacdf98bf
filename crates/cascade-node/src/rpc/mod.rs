//! Request/response correlation over registered tunnels.

mod correlator;

pub use correlator::RpcCorrelator;
