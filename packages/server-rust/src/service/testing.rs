//! Test doubles shared by the service modules.

use std::sync::Arc;

use parking_lot::Mutex;
use protohost_core::{MetadataFrame, Payload, RpcError};
use tokio::sync::mpsc;

use super::call::UnaryResponder;
use super::hooks::ServerHooks;

/// What a [`RecordingResponder`] saw for one call.
#[derive(Debug)]
pub struct Recorded {
    pub metadata: MetadataFrame,
    pub outcome: Result<Payload, RpcError>,
}

/// Responder that forwards every completion over a channel.
pub struct RecordingResponder {
    tx: mpsc::UnboundedSender<Recorded>,
    metadata: MetadataFrame,
    fail_metadata: bool,
    fail_complete: bool,
}

impl RecordingResponder {
    pub fn failing_metadata(mut self) -> Self {
        self.fail_metadata = true;
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }
}

pub fn recording_responder() -> (RecordingResponder, mpsc::UnboundedReceiver<Recorded>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let responder = RecordingResponder {
        tx,
        metadata: MetadataFrame::new(),
        fail_metadata: false,
        fail_complete: false,
    };
    (responder, rx)
}

impl UnaryResponder for RecordingResponder {
    fn send_metadata(&mut self, frame: MetadataFrame) -> anyhow::Result<()> {
        if self.fail_metadata {
            anyhow::bail!("metadata stream closed");
        }
        self.metadata = frame;
        Ok(())
    }

    fn complete(&mut self, outcome: Result<Payload, RpcError>) -> anyhow::Result<()> {
        let _ = self.tx.send(Recorded {
            metadata: std::mem::take(&mut self.metadata),
            outcome,
        });
        if self.fail_complete {
            anyhow::bail!("peer went away");
        }
        Ok(())
    }
}

/// Hooks that keep the default `before_call`/`after_call` and record every
/// reported error.
#[derive(Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<String>>>);

impl ErrorLog {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl ServerHooks for ErrorLog {
    fn error(&self, err: &anyhow::Error) {
        self.0.lock().push(format!("{err:#}"));
    }
}
