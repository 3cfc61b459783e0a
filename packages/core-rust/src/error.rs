//! Taxonomy errors and the coercion rule for everything else.
//!
//! An [`RpcError`] is the only error shape a caller ever sees. Handlers raise
//! one directly when they know the failure category; any other error is folded
//! into [`ErrorKind::Unknown`] by [`coerce_unknown`], keeping the original
//! diagnostics attached for logging.

use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::fmt;

use serde::Serialize;

use crate::status::ErrorKind;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Diagnostic fields carried over from a non-taxonomy error.
///
/// Never part of the wire response; kept for the `error` hook and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Short classification of the original failure, when known (e.g. `"panic"`).
    pub name: Option<String>,
    /// Human-readable message of the original error.
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    pub causes: Vec<String>,
    /// Source location, when the original failure recorded one.
    pub location: Option<String>,
    /// Captured backtrace, when one was captured.
    pub stack: Option<String>,
}

// ---------------------------------------------------------------------------
// RpcError
// ---------------------------------------------------------------------------

/// An error value instantiated from an [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    details: Vec<String>,
    #[serde(skip)]
    diagnostics: Option<Box<Diagnostics>>,
}

impl RpcError {
    /// Builds an error of `kind` with the kind's default message and details.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self::construct(kind, None, None)
    }

    /// Builds an error of `kind`, falling back to the kind's defaults for any
    /// override that is absent. An empty message counts as absent.
    #[must_use]
    pub fn construct(kind: ErrorKind, message: Option<String>, details: Option<Vec<String>>) -> Self {
        Self {
            kind,
            message: message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| kind.default_message().to_string()),
            details: details.unwrap_or_else(|| {
                kind.default_details().iter().map(ToString::to_string).collect()
            }),
            diagnostics: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.message = if message.is_empty() {
            self.kind.default_message().to_string()
        } else {
            message
        };
        self
    }

    #[must_use]
    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.details = details.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    #[must_use]
    pub fn http_code(&self) -> u16 {
        self.kind.http_code()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> &[String] {
        &self.details
    }

    /// Diagnostics preserved from the error this one was coerced from.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_deref()
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RpcError {}

/// Generate one convenience constructor per kind.
macro_rules! kind_constructors {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        impl RpcError {
            $(
                #[doc = concat!("Builds an [`ErrorKind::", stringify!($kind), "`] error with the given message.")]
                #[must_use]
                pub fn $fn_name(message: impl Into<String>) -> Self {
                    Self::new(ErrorKind::$kind).with_message(message)
                }
            )*
        }
    };
}

kind_constructors! {
    cancelled => Cancelled,
    unknown => Unknown,
    invalid_argument => InvalidArgument,
    deadline_exceeded => DeadlineExceeded,
    not_found => NotFound,
    already_exists => AlreadyExists,
    permission_denied => PermissionDenied,
    resource_exhausted => ResourceExhausted,
    failed_precondition => FailedPrecondition,
    aborted => Aborted,
    out_of_range => OutOfRange,
    unimplemented => Unimplemented,
    internal => Internal,
    unavailable => Unavailable,
    data_loss => DataLoss,
    unauthenticated => Unauthenticated,
}

// ---------------------------------------------------------------------------
// PanicError
// ---------------------------------------------------------------------------

/// A panic caught inside a protective boundary, turned into an ordinary error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    /// Extracts the panic message from a `catch_unwind` payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

// ---------------------------------------------------------------------------
// Classification and coercion
// ---------------------------------------------------------------------------

/// Returns the kind of `err` if it is a taxonomy error.
#[must_use]
pub fn classify(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<RpcError>().map(RpcError::kind)
}

/// Folds any error into a taxonomy error.
///
/// Taxonomy errors are returned unchanged. Anything else becomes
/// [`ErrorKind::Unknown`] carrying the original message, with its cause chain
/// and backtrace kept in [`RpcError::diagnostics`].
#[must_use]
pub fn coerce_unknown(err: anyhow::Error) -> RpcError {
    match err.downcast::<RpcError>() {
        Ok(rpc) => rpc,
        Err(other) => {
            let diagnostics = diagnostics_of(&other);
            let mut coerced = RpcError::new(ErrorKind::Unknown);
            if !diagnostics.message.is_empty() {
                coerced.message.clone_from(&diagnostics.message);
            }
            coerced.diagnostics = Some(Box::new(diagnostics));
            coerced
        }
    }
}

fn diagnostics_of(err: &anyhow::Error) -> Diagnostics {
    let name = err
        .downcast_ref::<PanicError>()
        .map(|_| "panic".to_string());
    let message = match err.downcast_ref::<PanicError>() {
        Some(panic) => panic.message.clone(),
        None => err.to_string(),
    };
    let backtrace = err.backtrace();
    let stack = (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

    Diagnostics {
        name,
        message,
        causes: err.chain().skip(1).map(ToString::to_string).collect(),
        location: None,
        stack,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
