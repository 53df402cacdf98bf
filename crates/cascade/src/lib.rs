//! Top-level facade crate for cascade.
//!
//! Re-exports the wire contracts and the node runtime so users can depend on a single crate.

pub mod core {
    pub use cascade_core::*;
}

pub mod node {
    pub use cascade_node::*;
}
