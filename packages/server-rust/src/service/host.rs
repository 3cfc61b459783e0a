//! Server host: loads definitions, validates and binds implementations.
//!
//! Construction is fail-fast. A definition file that is missing or does not
//! load, or an implementation naming a service no file declares, aborts
//! construction before any traffic is served.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use protohost_core::{DefinitionLoader, LoadError, Payload, ServiceHandle};

use super::adapter::MethodAdapter;
use super::handler::{Implementation, ImplementationMap};
use super::hooks::{DefaultHooks, HookCell, HookSnapshot, ServerHooks};
use super::registry::{ServiceDescriptor, ServiceRegistry};

// ---------------------------------------------------------------------------
// Transport boundary
// ---------------------------------------------------------------------------

/// Opaque transport settings, passed through from configuration.
pub type TransportOptions = BTreeMap<String, Payload>;

/// The wire-level server the host registers bound methods with.
pub trait Transport: Send + Sync {
    /// Receive the listen address (`host:port`) and transport options before
    /// any service is registered. Transports that do not listen ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot accept the settings.
    fn configure(&self, _address: &str, _options: &TransportOptions) -> anyhow::Result<()> {
        Ok(())
    }

    /// Register `methods` (method name -> adapter) for `service`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport refuses the registration.
    fn register_methods(
        &self,
        service: &ServiceHandle,
        methods: HashMap<String, MethodAdapter>,
    ) -> anyhow::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn configure(&self, address: &str, options: &TransportOptions) -> anyhow::Result<()> {
        (**self).configure(address, options)
    }

    fn register_methods(
        &self,
        service: &ServiceHandle,
        methods: HashMap<String, MethodAdapter>,
    ) -> anyhow::Result<()> {
        (**self).register_methods(service, methods)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Host construction and registration failures.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("unable to locate \"{name}\" in any definition file")]
    ServiceNotFound { name: String },
    #[error("at least one definition file is required")]
    NoDefinitions,
    #[error("transport rejected its configuration for {address}")]
    Configure {
        address: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("transport rejected service \"{service}\"")]
    Transport {
        service: String,
        #[source]
        source: anyhow::Error,
    },
}

// ---------------------------------------------------------------------------
// ServiceTarget
// ---------------------------------------------------------------------------

/// What `add_service` registers against: a discovered descriptor or a raw
/// transport handle.
#[derive(Debug, Clone)]
pub enum ServiceTarget {
    Descriptor(ServiceDescriptor),
    Raw(ServiceHandle),
}

impl ServiceTarget {
    fn into_raw(self) -> ServiceHandle {
        match self {
            ServiceTarget::Descriptor(descriptor) => Arc::clone(descriptor.raw()),
            ServiceTarget::Raw(raw) => raw,
        }
    }
}

impl From<ServiceDescriptor> for ServiceTarget {
    fn from(descriptor: ServiceDescriptor) -> Self {
        ServiceTarget::Descriptor(descriptor)
    }
}

impl From<&ServiceDescriptor> for ServiceTarget {
    fn from(descriptor: &ServiceDescriptor) -> Self {
        ServiceTarget::Descriptor(descriptor.clone())
    }
}

impl From<ServiceHandle> for ServiceTarget {
    fn from(raw: ServiceHandle) -> Self {
        ServiceTarget::Raw(raw)
    }
}

// ---------------------------------------------------------------------------
// ServerHost
// ---------------------------------------------------------------------------

/// Hosts application handlers on a [`Transport`].
pub struct ServerHost<T> {
    transport: T,
    registry: ServiceRegistry,
    hooks: Arc<HookCell>,
    call_ids: Arc<AtomicU64>,
}

impl<T: Transport> ServerHost<T> {
    /// A host with no services and the default hooks.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_hooks(transport, DefaultHooks)
    }

    #[must_use]
    pub fn with_hooks(transport: T, hooks: impl ServerHooks) -> Self {
        Self {
            transport,
            registry: ServiceRegistry::new(),
            hooks: Arc::new(HookCell::new(hooks)),
            call_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start configuring a host that loads definitions from files.
    #[must_use]
    pub fn builder(transport: T) -> HostBuilder<T> {
        HostBuilder {
            transport,
            hooks: None,
            root: PathBuf::new(),
            files: Vec::new(),
            implementations: ImplementationMap::new(),
        }
    }

    /// Bind every method of `implementation` and register them for `service`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Transport` if the transport rejects the methods.
    pub fn add_service(
        &self,
        service: impl Into<ServiceTarget>,
        implementation: &Implementation,
    ) -> Result<(), HostError> {
        let raw = service.into().into_raw();

        let mut methods = HashMap::with_capacity(implementation.len());
        for (name, handler) in implementation.iter() {
            if !raw.methods.iter().any(|m| m.name == name) {
                tracing::warn!(
                    service = %raw.full_name(),
                    method = name,
                    "implementation method is not declared by the service"
                );
            }
            let adapter = MethodAdapter::new(
                name,
                Arc::clone(handler),
                Arc::clone(&self.hooks),
                Arc::clone(&self.call_ids),
            );
            methods.insert(name.to_string(), adapter);
        }

        let count = methods.len();
        self.transport
            .register_methods(&raw, methods)
            .map_err(|source| HostError::Transport {
                service: raw.full_name(),
                source,
            })?;
        tracing::info!(service = %raw.full_name(), methods = count, "service bound");
        Ok(())
    }

    /// Replace the hooks for every call dispatched from now on.
    pub fn set_hooks(&self, hooks: impl ServerHooks) {
        self.hooks.replace(hooks);
    }

    /// The hooks new calls will use.
    #[must_use]
    pub fn hooks(&self) -> HookSnapshot {
        self.hooks.snapshot()
    }

    /// Services discovered from the loaded definition files.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T> std::fmt::Debug for ServerHost<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHost")
            .field("services", &self.registry.names())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HostBuilder
// ---------------------------------------------------------------------------

/// Configuration for a host built from definition files.
pub struct HostBuilder<T> {
    transport: T,
    hooks: Option<Box<dyn ServerHooks>>,
    root: PathBuf,
    files: Vec<String>,
    implementations: ImplementationMap,
}

impl<T: Transport> HostBuilder<T> {
    /// Directory the definition files are resolved against.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Append a definition file. Files are processed in the order added.
    #[must_use]
    pub fn definition(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    #[must_use]
    pub fn definitions<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Implementation for the service with unqualified name `service`.
    #[must_use]
    pub fn implementation(mut self, service: impl Into<String>, implementation: Implementation) -> Self {
        self.implementations.insert(service.into(), implementation);
        self
    }

    #[must_use]
    pub fn implementations(mut self, implementations: ImplementationMap) -> Self {
        self.implementations.extend(implementations);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: impl ServerHooks) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    /// Load every definition file through `loader`, then bind each
    /// implementation to its discovered service.
    ///
    /// # Errors
    ///
    /// - `HostError::NoDefinitions` if no definition file was added
    /// - `HostError::Load` if a file is missing or fails to load
    /// - `HostError::ServiceNotFound` if an implementation names an unknown service
    /// - `HostError::Transport` if the transport rejects a service
    pub fn build(self, loader: &dyn DefinitionLoader) -> Result<ServerHost<T>, HostError> {
        if self.files.is_empty() {
            return Err(HostError::NoDefinitions);
        }

        let mut registry = ServiceRegistry::new();
        for file in &self.files {
            let tree = load_definition(loader, &self.root, file)?;
            registry.discover(&tree);
        }

        let mut host = match self.hooks {
            Some(hooks) => ServerHost::with_hooks(self.transport, hooks),
            None => ServerHost::new(self.transport),
        };

        for name in self.implementations.keys() {
            registry.require(name)?;
        }
        for (name, implementation) in &self.implementations {
            let descriptor = registry.require(name)?;
            host.add_service(descriptor, implementation)?;
        }

        host.registry = registry;
        Ok(host)
    }
}

fn load_definition(
    loader: &dyn DefinitionLoader,
    root: &Path,
    file: &str,
) -> Result<protohost_core::DefinitionTree, LoadError> {
    let path = root.join(file);
    if !path.exists() {
        return Err(LoadError::new(&path, format!("file not found: {}", path.display())));
    }
    loader.load(root, file)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
