//! Tower middleware layers for route dispatch.
//!
//! - [`metrics`]: per-call timing via `tracing` spans
//! - [`pipeline`]: composes the layers over a [`MethodRouter`](crate::service::router::MethodRouter)

pub mod metrics;
pub mod pipeline;

pub use metrics::MetricsLayer;
pub use pipeline::build_dispatch_pipeline;
