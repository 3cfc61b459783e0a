//! Starter wiring: a [`ServerHost`] assembled from a [`HostConfig`].
//!
//! The transport receives the bind address and its options through
//! [`Transport::configure`] before any service is registered. Starting the
//! listener stays with the transport.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use protohost_core::DefinitionLoader;

use super::call::Call;
use super::config::{HostConfig, ReportingContext};
use super::handler::ImplementationMap;
use super::hooks::ServerHooks;
use super::host::{HostError, ServerHost, Transport};

/// External sink for errors, e.g. a hosted error-reporting service.
pub trait ErrorReporter: Send + Sync + 'static {
    /// Deliver `err` tagged with `context`.
    ///
    /// # Errors
    ///
    /// Failures are logged by the caller and never reach the RPC caller.
    fn report(&self, context: &ReportingContext, err: &anyhow::Error) -> anyhow::Result<()>;
}

/// Hooks installed by [`start`].
///
/// `before_call` stamps the configured headers onto every call and logs the
/// request unless the method is ignored. `error` logs and forwards to the
/// reporter when reporting is configured.
pub struct StarterHooks {
    headers: BTreeMap<String, String>,
    ignored: HashSet<String>,
    reporting: Option<(ReportingContext, Arc<dyn ErrorReporter>)>,
}

impl StarterHooks {
    #[must_use]
    pub fn new(config: &HostConfig, reporter: Option<Arc<dyn ErrorReporter>>) -> Self {
        let reporting = match (config.reporting_context(), reporter) {
            (Some(context), Some(reporter)) => Some((context, reporter)),
            (None, Some(_)) => {
                tracing::info!("error reporter supplied without project name and endpoint version; reporting disabled");
                None
            }
            _ => None,
        };
        Self {
            headers: config.http_headers.clone(),
            ignored: config.logging_ignore_methods.iter().cloned().collect(),
            reporting,
        }
    }

    #[must_use]
    pub fn reports_errors(&self) -> bool {
        self.reporting.is_some()
    }
}

impl ServerHooks for StarterHooks {
    fn before_call(&self, call: &Call) -> anyhow::Result<()> {
        for (name, value) in &self.headers {
            call.set_header(name.as_str(), value.as_str());
        }
        if !self.ignored.contains(call.method_name()) {
            tracing::info!(
                method = call.method_name(),
                request = %call.request(),
                "rpc request"
            );
        }
        Ok(())
    }

    fn error(&self, err: &anyhow::Error) {
        tracing::error!(error = %format_args!("{err:#}"), "rpc error");
        if let Some((context, reporter)) = &self.reporting {
            if let Err(report_err) = reporter.report(context, err) {
                tracing::error!(error = %format_args!("{report_err:#}"), "error reporting failed");
            }
        }
    }
}

impl std::fmt::Debug for StarterHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarterHooks")
            .field("headers", &self.headers)
            .field("ignored", &self.ignored)
            .field("reporting", &self.reporting.as_ref().map(|(ctx, _)| ctx))
            .finish()
    }
}

/// Build a host from `config`: hand the bind address and transport options to
/// `transport`, then bind `implementations` with [`StarterHooks`] installed.
///
/// # Errors
///
/// `HostError::Configure` if the transport rejects its settings, otherwise any
/// [`HostError`] from loading definitions or binding implementations.
pub fn start<T: Transport>(
    config: &HostConfig,
    transport: T,
    loader: &dyn DefinitionLoader,
    implementations: ImplementationMap,
    reporter: Option<Arc<dyn ErrorReporter>>,
) -> Result<ServerHost<T>, HostError> {
    let address = config.bind_address();
    transport
        .configure(&address, &config.transport_options)
        .map_err(|source| HostError::Configure {
            address: address.clone(),
            source,
        })?;

    let hooks = StarterHooks::new(config, reporter);
    let reporting = hooks.reports_errors();

    let host = ServerHost::builder(transport)
        .root(config.definitions_root.clone())
        .definitions(config.definition_files.iter().cloned())
        .implementations(implementations)
        .hooks(hooks)
        .build(loader)?;

    tracing::info!(
        address = %address,
        services = host.registry().len(),
        reporting,
        "host ready"
    );
    Ok(host)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
