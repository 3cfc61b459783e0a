//! Handler hosting and dispatch.
//!
//! 1. **Discovery** (`registry`): definition trees -> name-keyed service descriptors
//! 2. **Binding** (`host`): implementations validated against the registry and
//!    registered with a [`Transport`]
//! 3. **Adaptation** (`adapter`): one handler invocation driven through hooks,
//!    metadata flush and exactly-once completion
//! 4. **Routing** (`router`, `middleware`): in-process transport with a tower
//!    tracing layer
//! 5. **Starter** (`config`, `starter`, `health`): config-driven host assembly

pub mod adapter;
pub mod call;
pub mod config;
pub mod handler;
pub mod health;
pub mod hooks;
pub mod host;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod starter;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenient access.
pub use adapter::{AdapterError, Completion, MethodAdapter};
pub use call::{Call, IncomingCall, UnaryResponder};
pub use config::{ConfigError, HostConfig, ReportingContext};
pub use handler::{Handler, Implementation, ImplementationMap, Reply};
pub use health::{HealthCheck, HEALTH_METHOD};
pub use hooks::{DefaultHooks, HookCell, HookSnapshot, ServerHooks};
pub use host::{HostBuilder, HostError, ServerHost, ServiceTarget, Transport, TransportOptions};
pub use middleware::build_dispatch_pipeline;
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use router::{MethodRouter, RoutedCall};
pub use starter::{start, ErrorReporter, StarterHooks};
