//! `protohost` Server: binds RPC handlers to definition files behind a transport.

pub mod service;
pub mod telemetry;

pub use service::{
    start, Call, Completion, ErrorReporter, HealthCheck, HostConfig, HostError, Implementation,
    ImplementationMap, IncomingCall, MethodRouter, Reply, ServerHooks, ServerHost, Transport,
    UnaryResponder,
};
