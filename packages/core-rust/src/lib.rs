//! `protohost` Core: RPC error taxonomy, definition trees, and payload types.

pub mod definition;
pub mod error;
pub mod status;
pub mod types;

pub use definition::{
    DefinitionLoader, DefinitionNode, DefinitionTree, JsonDefinitionLoader, LoadError,
    MethodDefinition, Namespace, ServiceDefinition, ServiceHandle,
};
pub use error::{classify, coerce_unknown, Diagnostics, PanicError, RpcError};
pub use status::{ErrorKind, KindInfo};
pub use types::{is_truthy, MetadataFrame, Payload};
