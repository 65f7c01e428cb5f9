//! Shared data model for the lattice workspace.
//!
//! This crate defines the task, agent, and LLM routing types used by the
//! orchestrator, router, and gateway crates. It contains no I/O.

pub mod agent;
pub mod llm;
pub mod task;

pub use agent::{AgentSpec, AgentState, ResourceFootprint};
pub use llm::{
    Capability, LlmModel, LlmRequest, LlmResponse, ParseStrategyError, Provider,
    RoutingStrategy, TokenUsage,
};
pub use task::{ParsePriorityError, Task, TaskPriority, TaskStatus};
