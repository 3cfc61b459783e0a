//! The closed table of RPC error kinds.
//!
//! Every kind maps 1:1 to a canonical RPC status code and to an HTTP-equivalent
//! code, and carries the default message and details used when an error is
//! raised without overrides.

use serde::{Deserialize, Serialize};

/// Static description of one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    /// Symbolic name, e.g. `"NotFound"`.
    pub name: &'static str,
    /// Screaming-case symbol, e.g. `"NOT_FOUND"`. Also the default message.
    pub symbol: &'static str,
    /// Canonical RPC status code.
    pub status_code: u16,
    /// HTTP-equivalent status code.
    pub http_code: u16,
    /// Details used when none are supplied.
    pub default_details: &'static [&'static str],
}

/// One of the fixed error categories a handler may raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// HTTP/499 - Request cancelled by the client.
    Cancelled,
    /// HTTP/500 - Unknown server error. Typically a server bug.
    Unknown,
    /// HTTP/400 - Client specified an invalid argument.
    InvalidArgument,
    /// HTTP/504 - Request deadline exceeded.
    DeadlineExceeded,
    /// HTTP/404 - A specified resource is not found.
    NotFound,
    /// HTTP/409 - The resource that a client tried to create already exists.
    AlreadyExists,
    /// HTTP/403 - Client does not have sufficient permission.
    PermissionDenied,
    /// HTTP/429 - Either out of resource quota or reaching rate limiting.
    ResourceExhausted,
    /// HTTP/400 - Request can not be executed in the current system state.
    FailedPrecondition,
    /// HTTP/409 - Concurrency conflict, such as read-modify-write conflict.
    Aborted,
    /// HTTP/400 - Client specified an invalid range.
    OutOfRange,
    /// HTTP/501 - API method not implemented by the server.
    Unimplemented,
    /// HTTP/500 - Internal server error.
    Internal,
    /// HTTP/503 - Service unavailable.
    Unavailable,
    /// HTTP/500 - Unrecoverable data loss or data corruption.
    DataLoss,
    /// HTTP/401 - Request not authenticated due to missing or invalid credentials.
    Unauthenticated,
}

impl ErrorKind {
    /// All kinds, in status-code order.
    pub const ALL: [ErrorKind; 16] = [
        ErrorKind::Cancelled,
        ErrorKind::Unknown,
        ErrorKind::InvalidArgument,
        ErrorKind::DeadlineExceeded,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::PermissionDenied,
        ErrorKind::ResourceExhausted,
        ErrorKind::FailedPrecondition,
        ErrorKind::Aborted,
        ErrorKind::OutOfRange,
        ErrorKind::Unimplemented,
        ErrorKind::Internal,
        ErrorKind::Unavailable,
        ErrorKind::DataLoss,
        ErrorKind::Unauthenticated,
    ];

    /// Returns the static table entry for this kind.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub const fn info(self) -> &'static KindInfo {
        match self {
            ErrorKind::Cancelled => &KindInfo {
                name: "Cancelled",
                symbol: "CANCELLED",
                status_code: 1,
                http_code: 499,
                default_details: &["Request cancelled by the client."],
            },
            ErrorKind::Unknown => &KindInfo {
                name: "Unknown",
                symbol: "UNKNOWN",
                status_code: 2,
                http_code: 500,
                default_details: &["Unknown server error."],
            },
            ErrorKind::InvalidArgument => &KindInfo {
                name: "InvalidArgument",
                symbol: "INVALID_ARGUMENT",
                status_code: 3,
                http_code: 400,
                default_details: &["Client specified an invalid argument."],
            },
            ErrorKind::DeadlineExceeded => &KindInfo {
                name: "DeadlineExceeded",
                symbol: "DEADLINE_EXCEEDED",
                status_code: 4,
                http_code: 504,
                default_details: &["Request deadline exceeded or request too large."],
            },
            ErrorKind::NotFound => &KindInfo {
                name: "NotFound",
                symbol: "NOT_FOUND",
                status_code: 5,
                http_code: 404,
                default_details: &["The specified resource requested was not found."],
            },
            ErrorKind::AlreadyExists => &KindInfo {
                name: "AlreadyExists",
                symbol: "ALREADY_EXISTS",
                status_code: 6,
                http_code: 409,
                default_details: &["The resource that the client tried to create already exists."],
            },
            ErrorKind::PermissionDenied => &KindInfo {
                name: "PermissionDenied",
                symbol: "PERMISSION_DENIED",
                status_code: 7,
                http_code: 403,
                default_details: &["Client does not have sufficient permission."],
            },
            ErrorKind::ResourceExhausted => &KindInfo {
                name: "ResourceExhausted",
                symbol: "RESOURCE_EXHAUSTED",
                status_code: 8,
                http_code: 429,
                default_details: &["Exhausted resource quota, please try again."],
            },
            ErrorKind::FailedPrecondition => &KindInfo {
                name: "FailedPrecondition",
                symbol: "FAILED_PRECONDITION",
                status_code: 9,
                http_code: 400,
                default_details: &["Request can not be executed in the current system state."],
            },
            ErrorKind::Aborted => &KindInfo {
                name: "Aborted",
                symbol: "ABORTED",
                status_code: 10,
                http_code: 409,
                default_details: &["The operation was aborted due to a conflicting change."],
            },
            ErrorKind::OutOfRange => &KindInfo {
                name: "OutOfRange",
                symbol: "OUT_OF_RANGE",
                status_code: 11,
                http_code: 400,
                default_details: &["Client specified a value out of range."],
            },
            ErrorKind::Unimplemented => &KindInfo {
                name: "Unimplemented",
                symbol: "UNIMPLEMENTED",
                status_code: 12,
                http_code: 501,
                default_details: &["API method not implemented by the server."],
            },
            ErrorKind::Internal => &KindInfo {
                name: "Internal",
                symbol: "INTERNAL",
                status_code: 13,
                http_code: 500,
                default_details: &["Internal server error."],
            },
            ErrorKind::Unavailable => &KindInfo {
                name: "Unavailable",
                symbol: "UNAVAILABLE",
                status_code: 14,
                http_code: 503,
                default_details: &["Service temporarily unavailable."],
            },
            ErrorKind::DataLoss => &KindInfo {
                name: "DataLoss",
                symbol: "DATA_LOSS",
                status_code: 15,
                http_code: 500,
                default_details: &["Unrecoverable data loss or data corruption."],
            },
            ErrorKind::Unauthenticated => &KindInfo {
                name: "Unauthenticated",
                symbol: "UNAUTHENTICATED",
                status_code: 16,
                http_code: 401,
                default_details: &[
                    "Request not authenticated due to missing/invalid/expired credentials.",
                ],
            },
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.info().name
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        self.info().symbol
    }

    #[must_use]
    pub const fn status_code(self) -> u16 {
        self.info().status_code
    }

    #[must_use]
    pub const fn http_code(self) -> u16 {
        self.info().http_code
    }

    /// Message used when an error of this kind is raised without one.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        self.info().symbol
    }

    #[must_use]
    pub const fn default_details(self) -> &'static [&'static str] {
        self.info().default_details
    }

    /// Reverse lookup by canonical status code.
    #[must_use]
    pub fn from_status_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.status_code() == code)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
