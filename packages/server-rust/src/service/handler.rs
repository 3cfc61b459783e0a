//! Application handler contract and implementation maps.
//!
//! A handler signals completion in one of three ways:
//!
//! - returning [`Reply::Value`] with a present value (immediate success),
//! - returning [`Reply::Deferred`] with a future (deferred success or failure),
//! - returning [`Reply::Pending`] and later calling the [`Completion`] it was
//!   given (explicit callback).
//!
//! Returning `Err` (or panicking) from the synchronous body fails the call.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use protohost_core::Payload;

use super::adapter::Completion;
use super::call::Call;

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// What a handler hands back from its synchronous body.
pub enum Reply {
    /// Immediate result. A value that is not present (`null`, `false`, `0`,
    /// `""`) does not complete the call; completion is then expected through
    /// the callback.
    Value(Payload),
    /// Result produced later by a future.
    Deferred(BoxFuture<'static, anyhow::Result<Payload>>),
    /// The handler will call its `Completion` itself.
    Pending,
}

impl Reply {
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<Payload>> + Send + 'static,
    {
        Reply::Deferred(fut.boxed())
    }
}

impl From<Payload> for Reply {
    fn from(value: Payload) -> Self {
        Reply::Value(value)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
            Reply::Pending => f.write_str("Pending"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// One RPC method implementation.
pub trait Handler: Send + Sync + 'static {
    /// Handle `request` for `call`.
    ///
    /// # Errors
    ///
    /// An `Err` fails the call exactly as a failed deferred result would.
    fn handle(&self, request: Payload, call: &Call, done: Completion) -> anyhow::Result<Reply>;
}

impl<F> Handler for F
where
    F: Fn(Payload, &Call, Completion) -> anyhow::Result<Reply> + Send + Sync + 'static,
{
    fn handle(&self, request: Payload, call: &Call, done: Completion) -> anyhow::Result<Reply> {
        self(request, call, done)
    }
}

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

/// Method name -> handler map for one service.
#[derive(Clone, Default)]
pub struct Implementation {
    methods: BTreeMap<String, Arc<dyn Handler>>,
}

impl Implementation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler using the full three-convention contract.
    #[must_use]
    pub fn method<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Payload, &Call, Completion) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.handler(name, handler)
    }

    /// Bind an `async` handler. The call context is passed by value so the
    /// future can keep using it.
    #[must_use]
    pub fn method_async<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Payload, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
    {
        self.method(name, move |request, call: &Call, _done| {
            Ok(Reply::deferred(handler(request, call.clone())))
        })
    }

    /// Bind any [`Handler`] value.
    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Handler>)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}

/// Service name (unqualified) -> implementation.
pub type ImplementationMap = BTreeMap<String, Implementation>;
