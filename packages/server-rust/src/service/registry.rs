//! Service discovery: flattens definition trees into a name-keyed registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use protohost_core::{DefinitionNode, DefinitionTree, Namespace, ServiceDefinition, ServiceHandle};

use super::host::HostError;

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// A callable service found in a definition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    method_names: BTreeSet<String>,
    raw: ServiceHandle,
}

impl ServiceDescriptor {
    #[must_use]
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            method_names: definition.methods.iter().map(|m| m.name.clone()).collect(),
            raw: Arc::new(definition),
        }
    }

    /// Unqualified service name, the key implementations are matched by.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method_names(&self) -> &BTreeSet<String> {
        &self.method_names
    }

    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.method_names.contains(method)
    }

    /// The handle the transport registers methods against.
    #[must_use]
    pub fn raw(&self) -> &ServiceHandle {
        &self.raw
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Flat name -> descriptor map built from one or more definition trees.
///
/// Trees are walked depth-first. A service node is recorded and not descended
/// into; every other node is descended into. When two services share a name the
/// one discovered last replaces the earlier one without error.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `trees`, processed in order.
    #[must_use]
    pub fn from_trees<'a>(trees: impl IntoIterator<Item = &'a DefinitionTree>) -> Self {
        let mut registry = Self::new();
        for tree in trees {
            registry.discover(tree);
        }
        registry
    }

    /// Record every service in `tree`. Returns the number of services found.
    pub fn discover(&mut self, tree: &DefinitionTree) -> usize {
        let found = self.walk(&tree.root);
        tracing::info!(
            file = %tree.source.display(),
            services = found,
            "definitions loaded"
        );
        found
    }

    fn walk(&mut self, namespace: &Namespace) -> usize {
        let mut found = 0;
        for node in &namespace.nested {
            match node {
                DefinitionNode::Service(definition) => {
                    self.insert(ServiceDescriptor::new(definition.clone()));
                    found += 1;
                }
                DefinitionNode::Namespace(inner) => found += self.walk(inner),
            }
        }
        found
    }

    /// Register a descriptor directly. Replaces any descriptor of the same name.
    pub fn insert(&mut self, descriptor: ServiceDescriptor) {
        if let Some(previous) = self.services.insert(descriptor.name.clone(), descriptor) {
            tracing::debug!(
                service = %previous.name,
                replaced = %previous.raw.full_name(),
                "service name redefined; later definition wins"
            );
        }
    }

    /// Retrieve a descriptor by its unqualified name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    /// Retrieve a descriptor, failing when it was never discovered.
    ///
    /// # Errors
    ///
    /// Returns `HostError::ServiceNotFound` if `name` is absent.
    pub fn require(&self, name: &str) -> Result<&ServiceDescriptor, HostError> {
        self.get(name).ok_or_else(|| HostError::ServiceNotFound {
            name: name.to_string(),
        })
    }

    /// Sorted names of all registered services.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
