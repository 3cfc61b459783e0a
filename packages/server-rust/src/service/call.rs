//! Per-invocation context and the transport side of a call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use protohost_core::{MetadataFrame, Payload, RpcError};

// ---------------------------------------------------------------------------
// Transport side
// ---------------------------------------------------------------------------

/// The transport's handle on one in-flight invocation.
///
/// The adapter calls `send_metadata` at most once and then `complete` at most
/// once. Either may fail; failures are reported through the `error` hook and
/// never reach the handler.
pub trait UnaryResponder: Send + 'static {
    /// Send the response headers for this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport could not send the frame.
    fn send_metadata(&mut self, frame: MetadataFrame) -> anyhow::Result<()>;

    /// Finish the call with a result or a taxonomy error.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport could not deliver the completion.
    fn complete(&mut self, outcome: Result<Payload, RpcError>) -> anyhow::Result<()>;
}

/// An invocation as delivered by the transport to a bound method.
pub struct IncomingCall {
    pub request: Payload,
    pub responder: Box<dyn UnaryResponder>,
}

impl IncomingCall {
    #[must_use]
    pub fn new(request: Payload, responder: impl UnaryResponder) -> Self {
        Self {
            request,
            responder: Box::new(responder),
        }
    }
}

impl std::fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCall")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Context of a single invocation, shared between hooks and the handler.
///
/// Cloning is cheap and every clone refers to the same invocation. Headers
/// stay mutable until the metadata frame is flushed; after that the call is
/// sealed and header writes are rejected.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    call_id: u64,
    method_name: Arc<str>,
    request: Payload,
    headers: Mutex<HashMap<String, Payload>>,
    sealed: AtomicBool,
}

impl Call {
    #[must_use]
    pub(crate) fn new(call_id: u64, method_name: Arc<str>, request: Payload) -> Self {
        Self {
            inner: Arc::new(CallInner {
                call_id,
                method_name,
                request,
                headers: Mutex::new(HashMap::new()),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique id of this invocation, for log correlation.
    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.inner.call_id
    }

    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.inner.method_name
    }

    #[must_use]
    pub fn request(&self) -> &Payload {
        &self.inner.request
    }

    /// Set a response header. Only string values are sent on the wire.
    ///
    /// Returns `false` if the headers were already flushed.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<Payload>) -> bool {
        let name = name.into();
        let mut headers = self.inner.headers.lock();
        if self.is_sealed() {
            tracing::warn!(
                method = %self.inner.method_name,
                call_id = self.inner.call_id,
                header = %name,
                "header set after metadata was sent; ignored"
            );
            return false;
        }
        headers.insert(name, value.into());
        true
    }

    /// Remove a response header. Returns the previous value, if any.
    pub fn remove_header(&self, name: &str) -> Option<Payload> {
        let mut headers = self.inner.headers.lock();
        if self.is_sealed() {
            return None;
        }
        headers.remove(name)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<Payload> {
        self.inner.headers.lock().get(name).cloned()
    }

    /// Snapshot of all headers, including non-string ones.
    #[must_use]
    pub fn headers(&self) -> HashMap<String, Payload> {
        self.inner.headers.lock().clone()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    /// Seal the headers and build the frame to send.
    ///
    /// Non-string entries are dropped.
    pub(crate) fn seal_metadata(&self) -> MetadataFrame {
        let headers = self.inner.headers.lock();
        self.inner.sealed.store(true, Ordering::Release);

        let mut frame = MetadataFrame::new();
        for (name, value) in headers.iter() {
            match value {
                Payload::String(s) => frame.insert(name.clone(), s.clone()),
                _ => tracing::debug!(header = %name, "dropping non-string header"),
            }
        }
        frame
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("call_id", &self.inner.call_id)
            .field("method_name", &self.inner.method_name)
            .field("request", &self.inner.request)
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn make_call() -> Call {
        Call::new(7, Arc::from("getThing"), json!({ "id": 1 }))
    }

    #[test]
    fn flush_forwards_only_string_headers() {
        let call = make_call();
        call.set_header("a", "1");
        call.set_header("b", 2);
        call.set_header("c", json!({ "nested": true }));

        let frame = call.seal_metadata();
        assert_eq!(frame.get("a"), Some("1"));
        assert!(!frame.contains_key("b"));
        assert!(!frame.contains_key("c"));
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn headers_are_sealed_after_flush() {
        let call = make_call();
        assert!(call.set_header("x-before", "yes"));
        let _ = call.seal_metadata();

        assert!(call.is_sealed());
        assert!(!call.set_header("x-after", "no"));
        assert!(call.header("x-after").is_none());
        assert!(call.remove_header("x-before").is_none());
        assert_eq!(call.header("x-before"), Some(json!("yes")));
    }

    #[test]
    fn clones_share_headers() {
        let call = make_call();
        let other = call.clone();
        other.set_header("cache-control", "no-cache");
        assert_eq!(call.header("cache-control"), Some(json!("no-cache")));
        assert_eq!(call.call_id(), 7);
        assert_eq!(call.method_name(), "getThing");
        assert_eq!(call.request()["id"], 1);
    }
}
