//! Tool abstractions, the namespaced registry, parameter validation,
//! built-in tools and runtime discovery.

pub mod builtin;
pub mod discovery;
pub mod error;
pub mod execution_context;
pub mod path_guard;
pub mod registry;
pub mod traits;
pub mod validation;

pub use builtin::register_builtin_tools;
pub use discovery::{DiscoveredTool, DiscoveryService, ToolDefinition, ToolHandler};
pub use error::DiscoveryError;
pub use execution_context::ExecutionContext;
pub use registry::ToolRegistry;
pub use traits::Tool;
pub use validation::{CustomValidator, SchemaValidator, ValidationResult, ValidationService};
