//! In-process transport: dispatches calls to bound methods by route path.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use protohost_core::{RpcError, ServiceDefinition, ServiceHandle};
use tower::Service;

use super::adapter::MethodAdapter;
use super::call::IncomingCall;
use super::host::Transport;

// ---------------------------------------------------------------------------
// RoutedCall
// ---------------------------------------------------------------------------

/// An invocation addressed by route path, e.g. `/acme.Greeter/sayHello`.
#[derive(Debug)]
pub struct RoutedCall {
    pub path: String,
    pub call: IncomingCall,
}

impl RoutedCall {
    #[must_use]
    pub fn new(path: impl Into<String>, call: IncomingCall) -> Self {
        Self {
            path: path.into(),
            call,
        }
    }
}

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes calls to the adapters registered by a host.
///
/// Clones share the same route table, so a host can own one clone while the
/// serving side dispatches through another. Unknown paths complete with
/// `Unimplemented`.
#[derive(Clone, Default)]
pub struct MethodRouter {
    routes: Arc<DashMap<String, MethodAdapter>>,
}

impl MethodRouter {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route path of `method` on `service`.
    #[must_use]
    pub fn route_path(service: &ServiceDefinition, method: &str) -> String {
        format!("/{}/{}", service.full_name(), method)
    }

    #[must_use]
    pub fn has_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Sorted list of registered paths.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.iter().map(|e| e.key().clone()).collect();
        paths.sort_unstable();
        paths
    }

    /// Deliver `call` to the adapter registered for `path`.
    pub fn dispatch(&self, path: &str, call: IncomingCall) -> BoxFuture<'static, ()> {
        let adapter = self.routes.get(path).map(|entry| entry.value().clone());
        match adapter {
            Some(adapter) => adapter.invoke(call),
            None => {
                tracing::debug!(path, "no route");
                let IncomingCall { mut responder, .. } = call;
                let err = RpcError::unimplemented(format!("method {path} is not implemented"));
                if let Err(e) = responder.complete(Err(err)) {
                    tracing::warn!(path, error = %e, "failed to reject unrouted call");
                }
                futures_util::future::ready(()).boxed()
            }
        }
    }
}

impl Transport for MethodRouter {
    fn register_methods(
        &self,
        service: &ServiceHandle,
        methods: HashMap<String, MethodAdapter>,
    ) -> anyhow::Result<()> {
        for (method, adapter) in methods {
            let path = Self::route_path(service, &method);
            if self.routes.insert(path.clone(), adapter).is_some() {
                tracing::debug!(path = %path, "route replaced");
            }
        }
        Ok(())
    }
}

impl Service<RoutedCall> for MethodRouter {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RoutedCall) -> Self::Future {
        self.dispatch(&req.path, req.call).map(Ok).boxed()
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("routes", &self.routes())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
