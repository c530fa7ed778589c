//! Agent tools: trait, schemas, validation, streamed arguments, registry.

pub mod arguments;
pub mod builtin;
pub mod partial_json;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use registry::ToolRegistry;
pub use tool::{AgentTool, ClientTool, Tool, ToolContext, ToolExecution};
pub use types::ToolParameters;
pub use validation::validate_arguments;
