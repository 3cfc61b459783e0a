//! Host configuration: JSON documents, environment overlay, reporting identity.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use super::host::TransportOptions;

/// Environment variable overriding [`HostConfig::endpoint_name`].
pub const ENDPOINT_NAME_VAR: &str = "ENDPOINT_NAME";
/// Environment variable overriding [`HostConfig::endpoint_version`].
pub const ENDPOINT_VERSION_VAR: &str = "ENDPOINT_VERSION";

/// Failure to read or parse a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config \"{}\": {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Host-level configuration consumed by [`start`](crate::service::starter::start).
///
/// Every field has a default, so a partial JSON document is accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    /// Bind host handed to the transport.
    pub binding: String,
    /// Bind port.
    pub port: u16,
    /// Opaque options forwarded to the transport untouched.
    pub transport_options: TransportOptions,
    /// Headers injected into every call.
    pub http_headers: BTreeMap<String, String>,
    /// Directory definition files are resolved against.
    pub definitions_root: PathBuf,
    /// Definition files, loaded in order.
    pub definition_files: Vec<String>,
    /// Method names excluded from request logging.
    pub logging_ignore_methods: Vec<String>,
    /// Error-reporting project. Reporting is enabled only together with
    /// `endpoint_version`.
    pub project_name: Option<String>,
    pub endpoint_name: Option<String>,
    pub endpoint_version: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            binding: "0.0.0.0".to_string(),
            port: 50051,
            transport_options: BTreeMap::new(),
            http_headers: BTreeMap::new(),
            definitions_root: PathBuf::from("proto"),
            definition_files: Vec::new(),
            logging_ignore_methods: Vec::new(),
            project_name: None,
            endpoint_name: None,
            endpoint_version: None,
        }
    }
}

/// Identity attached to reported errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingContext {
    pub project: String,
    /// Service parsed from the endpoint name, when it has the managed-endpoint
    /// shape.
    pub service: Option<String>,
    pub version: String,
}

fn endpoint_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^([^.]+)\.endpoints\.[^.]+\.cloud\.goog$").ok())
        .as_ref()
}

impl HostConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed JSON or mistyped fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read and
    /// `ConfigError::Parse` if it is not a valid config.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Overlay `ENDPOINT_NAME` and `ENDPOINT_VERSION` from the process
    /// environment. Unset or empty variables leave the field untouched.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(name) = read(ENDPOINT_NAME_VAR) {
            self.endpoint_name = Some(name);
        }
        if let Some(version) = read(ENDPOINT_VERSION_VAR) {
            self.endpoint_version = Some(version);
        }
        self
    }

    /// `host:port` for the transport listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.binding, self.port)
    }

    /// Reporting identity, present only when both a project and an endpoint
    /// version are configured.
    #[must_use]
    pub fn reporting_context(&self) -> Option<ReportingContext> {
        let project = self.project_name.as_ref()?;
        let version = self.endpoint_version.as_ref()?;
        let service = self.endpoint_name.as_deref().and_then(|name| {
            endpoint_pattern()?
                .captures(name)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        });
        Some(ReportingContext {
            project: project.clone(),
            service,
            version: version.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
