//! Pipeline composition: wraps the router in the dispatch middleware stack.

use std::convert::Infallible;

use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use crate::service::router::{MethodRouter, RoutedCall};

/// Build the dispatch pipeline around `router`.
///
/// Calls to methods named in `ignored` are not instrumented. The returned
/// service implements `tower::Service<RoutedCall>`.
#[must_use]
pub fn build_dispatch_pipeline<I, S>(
    router: MethodRouter,
    ignored: I,
) -> impl tower::Service<RoutedCall, Response = (), Error = Infallible> + Clone
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ServiceBuilder::new()
        .layer(MetricsLayer::ignoring(ignored))
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
