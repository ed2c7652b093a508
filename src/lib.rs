//! Safety-gated autonomous desktop control core: an LLM planner proposes one
//! action at a time, a local policy gate authorizes it, a native adapter
//! executes it over a line-delimited IPC channel, and the control loop
//! verifies the effect and recovers from failure within fixed budgets.

pub mod adapter;
pub mod audit;
pub mod backend;
pub mod config;
pub mod context_pruning;
pub mod controller;
pub mod error;
pub mod executor;
pub mod ipc;
pub mod llm_gateway;
pub mod observer;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod security;
pub mod shell_analysis;
pub mod tool_policy;

#[cfg(target_os = "macos")]
pub mod macos;

pub use error::AgentError;
pub use schema::{AgentAction, IpcRequest, IpcResponse, RetryContext, UiNode};
