//! Built-in health check service.
//!
//! Bind it like any other implementation, under the service name the
//! definition file declares for it (conventionally `HealthCheck`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use protohost_core::{Payload, RpcError};
use serde_json::json;

use super::adapter::Completion;
use super::call::Call;
use super::handler::{Implementation, Reply};

/// Method name the health handler is bound under.
pub const HEALTH_METHOD: &str = "healthCheck";

/// Liveness state shared by every clone.
///
/// Once [`set_unhealthy`](Self::set_unhealthy) is called every check fails
/// with `FailedPrecondition`; there is no way back.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    unhealthy: Arc<AtomicBool>,
    started: Instant,
    version: String,
    package: String,
}

impl HealthCheck {
    #[must_use]
    pub fn new(version: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            unhealthy: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            version: version.into(),
            package: package.into(),
        }
    }

    /// Health check reporting this crate's own package name and version.
    #[must_use]
    pub fn for_this_crate() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_NAME"))
    }

    pub fn set_unhealthy(&self) {
        if !self.unhealthy.swap(true, Ordering::SeqCst) {
            tracing::warn!(package = %self.package, "health check marked unhealthy");
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }

    /// Answer one probe. The request's `isReady` flag is accepted; liveness
    /// and readiness probes get the same answer.
    ///
    /// # Errors
    ///
    /// Returns a `FailedPrecondition` error once marked unhealthy.
    pub fn check(&self, _request: &Payload) -> Result<Payload, RpcError> {
        if !self.is_healthy() {
            return Err(RpcError::failed_precondition("service is unhealthy"));
        }
        Ok(json!({
            "alive": true,
            "uptime": self.started.elapsed().as_secs_f64(),
            "version": self.version,
            "details": {
                "package": self.package,
                "runtime": "rust",
            },
        }))
    }

    /// Implementation exposing [`HEALTH_METHOD`].
    #[must_use]
    pub fn implementation(&self) -> Implementation {
        let health = self.clone();
        Implementation::new().method(
            HEALTH_METHOD,
            move |request: Payload, _call: &Call, _done: Completion| -> anyhow::Result<Reply> {
                Ok(Reply::Value(health.check(&request)?))
            },
        )
    }
}
