//! Cross-cutting call hooks.
//!
//! A [`ServerHooks`] value is consulted at three fixed points of every call:
//! before the handler runs, after the handler completed, and whenever a
//! failure has to be reported. The default methods set a cache-control header,
//! forward handler errors to `error`, and log through `tracing`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use protohost_core::Payload;

use super::call::Call;

/// Header set by the default `before_call`.
pub const CACHE_CONTROL: &str = "cache-control";

// ---------------------------------------------------------------------------
// ServerHooks trait
// ---------------------------------------------------------------------------

/// Lifecycle hooks shared by every call a host serves.
///
/// Implementations are shared across concurrent calls and must not keep
/// per-call mutable state. Override any subset of the methods.
pub trait ServerHooks: Send + Sync + 'static {
    /// Runs before the handler. An error here fails the call without running
    /// the handler.
    ///
    /// # Errors
    ///
    /// Any error is routed to the call's completion.
    fn before_call(&self, call: &Call) -> anyhow::Result<()> {
        call.set_header(CACHE_CONTROL, "no-cache");
        Ok(())
    }

    /// Runs once the handler has completed, before headers are flushed.
    ///
    /// # Errors
    ///
    /// Any error is reported to [`ServerHooks::error`] and does not affect the
    /// completion.
    fn after_call(
        &self,
        _call: &Call,
        outcome: Result<&Payload, &anyhow::Error>,
    ) -> anyhow::Result<()> {
        if let Err(err) = outcome {
            self.error(err);
        }
        Ok(())
    }

    /// Receives every failure the host observes.
    fn error(&self, err: &anyhow::Error) {
        tracing::error!(error = %format_args!("{err:#}"), "rpc error");
    }
}

impl ServerHooks for Box<dyn ServerHooks> {
    fn before_call(&self, call: &Call) -> anyhow::Result<()> {
        (**self).before_call(call)
    }

    fn after_call(
        &self,
        call: &Call,
        outcome: Result<&Payload, &anyhow::Error>,
    ) -> anyhow::Result<()> {
        (**self).after_call(call, outcome)
    }

    fn error(&self, err: &anyhow::Error) {
        (**self).error(err);
    }
}

/// The stock hook set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ServerHooks for DefaultHooks {}

// ---------------------------------------------------------------------------
// HookCell
// ---------------------------------------------------------------------------

/// Shared, replaceable hook slot.
///
/// Each call takes one snapshot at dispatch and keeps it until completion, so
/// a replacement applies to every call dispatched afterwards and never to a
/// call already in flight.
pub struct HookCell {
    current: ArcSwap<Box<dyn ServerHooks>>,
}

/// A hook snapshot held by one call.
pub type HookSnapshot = Arc<Box<dyn ServerHooks>>;

impl HookCell {
    #[must_use]
    pub fn new(hooks: impl ServerHooks) -> Self {
        Self {
            current: ArcSwap::from_pointee(Box::new(hooks) as Box<dyn ServerHooks>),
        }
    }

    /// Current hooks, for one call's lifetime.
    #[must_use]
    pub fn snapshot(&self) -> HookSnapshot {
        self.current.load_full()
    }

    /// Install `hooks` for every subsequently dispatched call.
    pub fn replace(&self, hooks: impl ServerHooks) {
        let hooks: Box<dyn ServerHooks> = Box::new(hooks);
        self.current.store(Arc::new(hooks));
    }
}

impl Default for HookCell {
    fn default() -> Self {
        Self::new(DefaultHooks)
    }
}

impl std::fmt::Debug for HookCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookCell").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
