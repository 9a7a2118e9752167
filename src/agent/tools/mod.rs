pub mod base;
pub mod capability;
pub mod http;
pub mod pipeline;
pub mod registry;
pub mod shell;
pub mod web;

pub use base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolMiddleware,
    ToolResult, ToolVersion,
};
pub use capability::ToolCapability;
pub use pipeline::{PipelineOutcome, ToolPipeline};
pub use registry::ToolRegistry;
