//! Binds one handler to the transport's completion protocol.
//!
//! The adapter runs every invocation through the same sequence regardless of
//! how the handler signals completion:
//!
//! 1. build the [`Call`] (method name, empty headers),
//! 2. `before_call` hook,
//! 3. the handler's synchronous body,
//! 4. pick the completion path from the handler's [`Reply`],
//! 5. [`Completion::complete`]: `after_call` hook, header flush, coercion of
//!    non-taxonomy errors, transport completion.
//!
//! Every step that runs foreign code sits inside a boundary that turns errors
//! and panics into reported failures. A call completes once; a second
//! completion attempt is reported to the `error` hook and dropped.

use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use protohost_core::{coerce_unknown, is_truthy, PanicError, Payload};
use tower::Service;

use super::call::{Call, IncomingCall, UnaryResponder};
use super::handler::{Handler, Reply};
use super::hooks::{HookCell, HookSnapshot};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Defects detected by the adapter itself. Reported, never sent to callers.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("call {call_id} to \"{method}\" completed more than once; later completion dropped")]
    DuplicateCompletion { method: String, call_id: u64 },
    #[error("call {call_id} to \"{method}\" failed after it had already completed")]
    LateFailure {
        method: String,
        call_id: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("call {call_id} to \"{method}\" dropped without completion")]
    Abandoned { method: String, call_id: u64 },
    #[error("{stage} failed for \"{method}\"")]
    Stage {
        stage: &'static str,
        method: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Run `f`, turning a panic into an error.
fn contain<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PanicError::from_payload(payload.as_ref()).into()),
    }
}

/// Hand `err` to the `error` hook. A panicking hook is logged and swallowed.
fn report(hooks: &HookSnapshot, err: &anyhow::Error) {
    if panic::catch_unwind(AssertUnwindSafe(|| hooks.error(err))).is_err() {
        tracing::error!(error = %format_args!("{err:#}"), "error hook panicked while reporting");
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// The single path by which a call is completed.
///
/// Cheap to clone; handlers using the explicit-callback convention keep a
/// clone and call [`Completion::complete`] when done.
#[derive(Clone)]
pub struct Completion {
    state: Arc<CompletionState>,
}

struct CompletionState {
    call: Call,
    hooks: HookSnapshot,
    responder: Mutex<Option<Box<dyn UnaryResponder>>>,
}

impl Drop for CompletionState {
    // Last `Completion` clone gone with the responder still held: the handler
    // dropped its callback or the transport dropped the deferred future.
    fn drop(&mut self) {
        if self.responder.get_mut().is_some() {
            let err = AdapterError::Abandoned {
                method: self.call.method_name().to_string(),
                call_id: self.call.call_id(),
            };
            report(&self.hooks, &err.into());
        }
    }
}

impl Completion {
    fn new(call: Call, hooks: HookSnapshot, responder: Box<dyn UnaryResponder>) -> Self {
        Self {
            state: Arc::new(CompletionState {
                call,
                hooks,
                responder: Mutex::new(Some(responder)),
            }),
        }
    }

    /// Complete successfully with `value`.
    pub fn succeed(&self, value: Payload) {
        self.complete(Ok(value));
    }

    /// Complete with `err`. Non-taxonomy errors reach the caller as `Unknown`.
    pub fn fail(&self, err: impl Into<anyhow::Error>) {
        self.complete(Err(err.into()));
    }

    /// Whether this call has already been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.responder.lock().is_none()
    }

    /// Complete the call with `outcome`.
    pub fn complete(&self, outcome: anyhow::Result<Payload>) {
        let call = &self.state.call;
        let hooks = &self.state.hooks;

        let Some(mut responder) = self.state.responder.lock().take() else {
            let method = call.method_name().to_string();
            let call_id = call.call_id();
            let err = match outcome {
                Ok(_) => AdapterError::DuplicateCompletion { method, call_id },
                Err(source) => AdapterError::LateFailure {
                    method,
                    call_id,
                    source,
                },
            };
            report(hooks, &err.into());
            return;
        };

        if let Err(err) = contain(|| hooks.after_call(call, outcome.as_ref())) {
            report(hooks, &stage_error("after_call", call, err));
        }

        let frame = call.seal_metadata();
        if let Err(err) = contain(|| responder.send_metadata(frame)) {
            report(hooks, &stage_error("send_metadata", call, err));
        }

        let outcome = outcome.map_err(coerce_unknown);
        match &outcome {
            Ok(_) => tracing::debug!(method = call.method_name(), call_id = call.call_id(), "call succeeded"),
            Err(e) => tracing::debug!(
                method = call.method_name(),
                call_id = call.call_id(),
                kind = %e.kind(),
                "call failed"
            ),
        }

        if let Err(err) = contain(|| responder.complete(outcome)) {
            report(hooks, &stage_error("complete", call, err));
        }
    }
}

fn stage_error(stage: &'static str, call: &Call, source: anyhow::Error) -> anyhow::Error {
    AdapterError::Stage {
        stage,
        method: call.method_name().to_string(),
        source,
    }
    .into()
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("call", &self.state.call)
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MethodAdapter
// ---------------------------------------------------------------------------

/// A handler bound to one method name and to its host's hooks.
#[derive(Clone)]
pub struct MethodAdapter {
    method: Arc<str>,
    handler: Arc<dyn Handler>,
    hooks: Arc<HookCell>,
    call_ids: Arc<AtomicU64>,
}

impl MethodAdapter {
    #[must_use]
    pub fn new(
        method: impl Into<Arc<str>>,
        handler: Arc<dyn Handler>,
        hooks: Arc<HookCell>,
        call_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            method: method.into(),
            handler,
            hooks,
            call_ids,
        }
    }

    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method
    }

    /// Run one invocation.
    ///
    /// The returned future resolves once a deferred handler result has been
    /// delivered. For immediate and callback-style handlers it is already
    /// resolved; a callback-style call completes whenever the handler calls
    /// its `Completion`.
    pub fn invoke(&self, incoming: IncomingCall) -> BoxFuture<'static, ()> {
        let IncomingCall { request, responder } = incoming;
        let hooks = self.hooks.snapshot();
        let call_id = self.call_ids.fetch_add(1, Ordering::Relaxed);
        let call = Call::new(call_id, Arc::clone(&self.method), request);
        let done = Completion::new(call.clone(), Arc::clone(&hooks), responder);

        if let Err(err) = contain(|| hooks.before_call(&call)) {
            done.fail(err);
            return futures_util::future::ready(()).boxed();
        }

        let handler = Arc::clone(&self.handler);
        let reply = contain(|| handler.handle(call.request().clone(), &call, done.clone()));

        match reply {
            Err(err) => done.fail(err),
            Ok(Reply::Deferred(fut)) => {
                return async move {
                    match AssertUnwindSafe(fut).catch_unwind().await {
                        Ok(outcome) => done.complete(outcome),
                        Err(payload) => done.fail(PanicError::from_payload(payload.as_ref())),
                    }
                }
                .boxed();
            }
            Ok(Reply::Value(value)) if is_truthy(&value) => done.succeed(value),
            Ok(Reply::Value(_) | Reply::Pending) => {
                tracing::trace!(method = %self.method, call_id, "awaiting explicit completion");
            }
        }
        futures_util::future::ready(()).boxed()
    }
}

impl Service<IncomingCall> for MethodAdapter {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, incoming: IncomingCall) -> Self::Future {
        self.invoke(incoming).map(Ok).boxed()
    }
}

impl std::fmt::Debug for MethodAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodAdapter")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use protohost_core::{ErrorKind, RpcError};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::service::hooks::{ServerHooks, CACHE_CONTROL};
    use crate::service::testing::{recording_responder, ErrorLog, Recorded};

    fn adapter_with(handler: impl Handler, hooks: impl ServerHooks) -> MethodAdapter {
        MethodAdapter::new(
            "doThing",
            Arc::new(handler),
            Arc::new(HookCell::new(hooks)),
            Arc::new(AtomicU64::new(1)),
        )
    }

    fn handler<F>(f: F) -> F
    where
        F: Fn(Payload, &Call, Completion) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        f
    }

    #[tokio::test]
    async fn immediate_value_completes_once() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|req, _call, _done| Ok(Reply::Value(json!({ "echo": req })))),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!(5), responder)).await;

        let rec = rx.recv().await.unwrap();
        assert_eq!(rec.outcome.unwrap(), json!({ "echo": 5 }));
        assert_eq!(rec.metadata.get(CACHE_CONTROL), Some("no-cache"));
        assert!(rx.try_recv().is_err());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn deferred_success_completes_once() {
        let adapter = adapter_with(
            handler(|_req, _call, _done| {
                Ok(Reply::deferred(async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(json!("later"))
                }))
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!(null), responder)).await;

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!("later"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deferred_failure_passes_taxonomy_error_through() {
        let adapter = adapter_with(
            handler(|_req, _call, _done| {
                Ok(Reply::deferred(async {
                    Err(RpcError::not_found("no such widget")
                        .with_details(["widget 9"])
                        .into())
                }))
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!(9), responder)).await;

        let err = rx.recv().await.unwrap().outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.http_code(), 404);
        assert_eq!(err.message(), "no such widget");
        assert_eq!(err.details(), ["widget 9".to_string()]);
        assert!(err.diagnostics().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn callback_success_completes_once() {
        let adapter = adapter_with(
            handler(|req, _call, done| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.succeed(json!({ "got": req }));
                });
                Ok(Reply::Pending)
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!("x"), responder)).await;

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!({ "got": "x" }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn callback_failure_completes_once() {
        let adapter = adapter_with(
            handler(|_req, _call, done| {
                done.fail(RpcError::permission_denied("nope"));
                Ok(Reply::Pending)
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let err = rx.recv().await.unwrap().outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn falsy_value_waits_for_callback() {
        let adapter = adapter_with(
            handler(|_req, _call, done| {
                tokio::spawn(async move { done.succeed(json!("from callback")) });
                Ok(Reply::Value(json!(null)))
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!("from callback"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn plain_error_is_coerced_to_unknown() {
        let adapter = adapter_with(
            handler(|_req, _call, _done| {
                Err(anyhow::anyhow!("database exploded").context("loading widget"))
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let err = rx.recv().await.unwrap().outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.http_code(), 500);
        assert_eq!(err.message(), "loading widget");
        let diag = err.diagnostics().unwrap();
        assert_eq!(diag.causes, vec!["database exploded".to_string()]);
    }

    #[tokio::test]
    async fn synchronous_panic_is_coerced_to_unknown() {
        let adapter = adapter_with(
            handler(|_req, _call, _done| panic!("handler bug")),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let err = rx.recv().await.unwrap().outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.message(), "handler bug");
        assert_eq!(err.diagnostics().unwrap().name.as_deref(), Some("panic"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deferred_panic_is_coerced_to_unknown() {
        let adapter = adapter_with(
            handler(|_req, _call, _done| {
                Ok(Reply::deferred(async {
                    if true {
                        panic!("async bug");
                    }
                    Ok(json!(1))
                }))
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let err = rx.recv().await.unwrap().outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.message(), "async bug");
    }

    struct FailingBefore;

    impl ServerHooks for FailingBefore {
        fn before_call(&self, _call: &Call) -> anyhow::Result<()> {
            Err(RpcError::unauthenticated("missing token").into())
        }
        fn error(&self, _err: &anyhow::Error) {}
    }

    #[tokio::test]
    async fn before_call_failure_skips_handler() {
        let adapter = adapter_with(
            handler(|_req, _call, _done| panic!("handler must not run")),
            FailingBefore,
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let err = rx.recv().await.unwrap().outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert!(rx.try_recv().is_err());
    }

    #[derive(Clone, Default)]
    struct PanickingAfter(ErrorLog);

    impl ServerHooks for PanickingAfter {
        fn after_call(
            &self,
            call: &Call,
            _outcome: Result<&Payload, &anyhow::Error>,
        ) -> anyhow::Result<()> {
            call.set_header("x-after", "set");
            panic!("after hook bug");
        }
        fn error(&self, err: &anyhow::Error) {
            self.0.error(err);
        }
    }

    #[tokio::test]
    async fn after_call_panic_is_reported_and_completion_proceeds() {
        let hooks = PanickingAfter::default();
        let log = hooks.0.clone();
        let adapter = adapter_with(handler(|_req, _call, _done| Ok(json!("ok").into())), hooks);
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let rec = rx.recv().await.unwrap();
        assert_eq!(rec.outcome.unwrap(), json!("ok"));
        assert_eq!(rec.metadata.get("x-after"), Some("set"));
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("after_call"));
        assert!(errors[0].contains("after hook bug"));
    }

    #[tokio::test]
    async fn metadata_failure_is_reported_and_completion_proceeds() {
        let log = ErrorLog::default();
        let adapter = adapter_with(handler(|_req, _call, _done| Ok(json!(1).into())), log.clone());
        let (responder, mut rx) = recording_responder();

        adapter
            .invoke(IncomingCall::new(json!({}), responder.failing_metadata()))
            .await;

        let rec: Recorded = rx.recv().await.unwrap();
        assert_eq!(rec.outcome.unwrap(), json!(1));
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("send_metadata"));
    }

    #[tokio::test]
    async fn transport_completion_failure_is_reported() {
        let log = ErrorLog::default();
        let adapter = adapter_with(handler(|_req, _call, _done| Ok(json!(1).into())), log.clone());
        let (responder, mut rx) = recording_responder();

        adapter
            .invoke(IncomingCall::new(json!({}), responder.failing_complete()))
            .await;

        assert!(rx.recv().await.is_some());
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("complete"));
    }

    #[tokio::test]
    async fn second_completion_is_reported_not_forwarded() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|_req, _call, done| {
                done.succeed(json!("first"));
                Ok(Reply::Value(json!("second")))
            }),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!("first"));
        assert!(rx.try_recv().is_err());
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("more than once"));
    }

    #[tokio::test]
    async fn failure_after_completion_is_reported_with_cause() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|_req, _call, done| {
                done.succeed(json!("first"));
                Err(anyhow::anyhow!("db write failed after reply"))
            }),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!("first"));
        assert!(rx.try_recv().is_err());
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("failed after it had already completed"));
        assert!(errors[0].contains("db write failed after reply"));
    }

    #[tokio::test]
    async fn deferred_failure_after_callback_is_reported_with_cause() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|_req, _call, done| {
                done.succeed(json!("early"));
                Ok(Reply::deferred(async {
                    Err(RpcError::data_loss("write lost").into())
                }))
            }),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!("early"));
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("write lost"));
    }

    #[tokio::test]
    async fn dropped_callback_is_reported() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|_req, _call, done| {
                drop(done);
                Ok(Reply::Pending)
            }),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        assert!(rx.recv().await.is_none());
        let errors = log.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("dropped without completion"));
    }

    #[tokio::test]
    async fn dropped_deferred_future_is_reported() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|_req, _call, _done| {
                Ok(Reply::deferred(futures_util::future::pending()))
            }),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        let pending = adapter.invoke(IncomingCall::new(json!({}), responder));
        assert!(log.is_empty());
        drop(pending);

        assert!(rx.recv().await.is_none());
        assert_eq!(log.messages().len(), 1);
        assert!(log.messages()[0].contains("dropped without completion"));
    }

    #[tokio::test]
    async fn handler_errors_reach_error_hook_via_after_call() {
        let log = ErrorLog::default();
        let adapter = adapter_with(
            handler(|_req, _call, _done| Err(RpcError::invalid_argument("bad").into())),
            log.clone(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        assert!(rx.recv().await.unwrap().outcome.is_err());
        assert_eq!(log.messages(), vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn headers_set_by_handler_are_flushed() {
        let adapter = adapter_with(
            handler(|_req, call, _done| {
                call.set_header("x-version", "3");
                call.set_header("x-count", 3);
                Ok(Reply::Value(json!(true)))
            }),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter.invoke(IncomingCall::new(json!({}), responder)).await;

        let rec = rx.recv().await.unwrap();
        assert_eq!(rec.metadata.get("x-version"), Some("3"));
        assert!(!rec.metadata.contains_key("x-count"));
    }

    #[tokio::test]
    async fn call_ids_increase_per_invocation() {
        let adapter = adapter_with(
            handler(|_req, call, _done| Ok(json!(call.call_id()).into())),
            ErrorLog::default(),
        );

        let (r1, mut rx1) = recording_responder();
        let (r2, mut rx2) = recording_responder();
        adapter.invoke(IncomingCall::new(json!({}), r1)).await;
        adapter.invoke(IncomingCall::new(json!({}), r2)).await;

        assert_eq!(rx1.recv().await.unwrap().outcome.unwrap(), json!(1));
        assert_eq!(rx2.recv().await.unwrap().outcome.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn adapter_is_a_tower_service() {
        let adapter = adapter_with(
            handler(|_req, call, _done| Ok(json!(call.method_name()).into())),
            ErrorLog::default(),
        );
        let (responder, mut rx) = recording_responder();

        adapter
            .oneshot(IncomingCall::new(json!({}), responder))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().outcome.unwrap(), json!("doThing"));
    }
}
