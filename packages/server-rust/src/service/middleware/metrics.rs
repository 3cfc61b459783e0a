//! Timing middleware for routed calls.
//!
//! Records dispatch duration and the completion outcome in an `rpc` tracing
//! span. Methods on the ignore list are dispatched without a span.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use protohost_core::{MetadataFrame, Payload, RpcError};
use tower::{Layer, Service};
use tracing::{info_span, Instrument, Span};

use crate::service::call::{IncomingCall, UnaryResponder};
use crate::service::router::RoutedCall;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps every routed call in an `rpc` span.
#[derive(Debug, Clone, Default)]
pub struct MetricsLayer {
    ignored: Arc<HashSet<String>>,
}

impl MetricsLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip instrumentation for the given method names (the last path segment).
    #[must_use]
    pub fn ignoring<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: Arc::new(methods.into_iter().map(Into::into).collect()),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            ignored: Arc::clone(&self.ignored),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    ignored: Arc<HashSet<String>>,
}

fn method_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Records the completion outcome on the call's span. Callback-style calls
/// may complete after the dispatch future resolved.
struct ObservedResponder {
    inner: Box<dyn UnaryResponder>,
    span: Span,
}

impl UnaryResponder for ObservedResponder {
    fn send_metadata(&mut self, frame: MetadataFrame) -> anyhow::Result<()> {
        self.inner.send_metadata(frame)
    }

    fn complete(&mut self, outcome: Result<Payload, RpcError>) -> anyhow::Result<()> {
        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.kind().symbol(),
        };
        self.span.record("outcome", label);
        self.inner.complete(outcome)
    }
}

impl<S> Service<RoutedCall> for MetricsService<S>
where
    S: Service<RoutedCall, Response = (), Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RoutedCall) -> Self::Future {
        if self.ignored.contains(method_of(&req.path)) {
            return self.inner.call(req).boxed();
        }

        let span = info_span!(
            "rpc",
            path = %req.path,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let RoutedCall { path, call } = req;
        let IncomingCall { request, responder } = call;
        let observed = ObservedResponder {
            inner: responder,
            span: span.clone(),
        };
        let fut = self.inner.call(RoutedCall::new(
            path.clone(),
            IncomingCall::new(request, observed),
        ));

        async move {
            let start = Instant::now();
            let result = fut.await;

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::debug!(path = %path, duration_ms, "rpc dispatched");

            result
        }
        .instrument(span)
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
