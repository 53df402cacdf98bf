//! In-process metrics rendered in Prometheus text format at `/metrics`.

pub mod metrics;

pub use metrics::CascadeMetrics;
