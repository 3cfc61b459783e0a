//! Loaded definition trees and the loader boundary.
//!
//! A loader turns one definition file into a [`DefinitionTree`]: nested
//! namespaces whose leaves are tagged [`ServiceDefinition`]s. Discovery
//! dispatches on the node tag, never on the shape of the node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tree model
// ---------------------------------------------------------------------------

/// One node of a loaded definition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefinitionNode {
    Namespace(Namespace),
    Service(ServiceDefinition),
}

/// A named grouping of nested nodes (a package or a message scope).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nested: Vec<DefinitionNode>,
}

/// A callable service as declared by a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Unqualified service name, e.g. `"Greeter"`.
    pub name: String,
    /// Dotted package the service lives in, e.g. `"acme.greeting.v1"`.
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub methods: Vec<MethodDefinition>,
}

impl ServiceDefinition {
    /// Fully qualified name, `package.Name`, or just `Name` without a package.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }
}

/// A single RPC method of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDefinition {
    pub name: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_streaming: bool,
    #[serde(default)]
    pub server_streaming: bool,
}

/// Opaque handle the transport registers methods against.
pub type ServiceHandle = Arc<ServiceDefinition>;

/// Everything one definition file produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionTree {
    /// Path of the file the tree was loaded from.
    pub source: PathBuf,
    pub root: Namespace,
}

// ---------------------------------------------------------------------------
// Loader boundary
// ---------------------------------------------------------------------------

/// Failure to load a definition file. Fatal to host construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unable to load \"{}\", reason: {reason}", .file.display())]
pub struct LoadError {
    /// The path that was attempted.
    pub file: PathBuf,
    /// Why loading failed.
    pub reason: String,
}

impl LoadError {
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Turns a definition file into a namespace tree.
pub trait DefinitionLoader: Send + Sync {
    /// Load `file` relative to `root`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` when the file cannot be read or parsed.
    fn load(&self, root: &Path, file: &str) -> Result<DefinitionTree, LoadError>;
}

/// Loads trees that were serialized as JSON, one root namespace per file.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDefinitionLoader;

impl DefinitionLoader for JsonDefinitionLoader {
    fn load(&self, root: &Path, file: &str) -> Result<DefinitionTree, LoadError> {
        let path = root.join(file);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| LoadError::new(&path, e.to_string()))?;
        let root: Namespace =
            serde_json::from_str(&text).map_err(|e| LoadError::new(&path, e.to_string()))?;
        tracing::debug!(file = %path.display(), "definition tree parsed");
        Ok(DefinitionTree { source: path, root })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GREETER: &str = r#"{
        "name": "acme",
        "nested": [
            {
                "kind": "namespace",
                "name": "greeting",
                "nested": [
                    {
                        "kind": "service",
                        "name": "Greeter",
                        "package": "acme.greeting",
                        "methods": [
                            { "name": "sayHello", "request_type": "HelloRequest", "response_type": "HelloReply" }
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn json_loader_reads_nested_services() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeter.json"), GREETER).unwrap();

        let tree = JsonDefinitionLoader.load(dir.path(), "greeter.json").unwrap();
        assert_eq!(tree.source, dir.path().join("greeter.json"));
        assert_eq!(tree.root.name, "acme");

        let DefinitionNode::Namespace(ns) = &tree.root.nested[0] else {
            panic!("expected namespace");
        };
        let DefinitionNode::Service(svc) = &ns.nested[0] else {
            panic!("expected service");
        };
        assert_eq!(svc.full_name(), "acme.greeting.Greeter");
        assert_eq!(svc.methods[0].name, "sayHello");
        assert!(!svc.methods[0].server_streaming);
    }

    #[test]
    fn json_loader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonDefinitionLoader.load(dir.path(), "absent.json").unwrap_err();
        assert_eq!(err.file, dir.path().join("absent.json"));
        assert!(!err.reason.is_empty());
        assert!(err.to_string().starts_with("unable to load"));
    }

    #[test]
    fn json_loader_reports_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let err = JsonDefinitionLoader.load(dir.path(), "broken.json").unwrap_err();
        assert_eq!(err.file, dir.path().join("broken.json"));
    }

    #[test]
    fn full_name_without_package() {
        let svc = ServiceDefinition {
            name: "Health".to_string(),
            package: String::new(),
            methods: Vec::new(),
        };
        assert_eq!(svc.full_name(), "Health");
    }
}
