//! AgentOS: a local system-administration agent.
//!
//! The same capabilities ("skills") are reachable two ways: directly through
//! the CLI, or through a natural-language chat where an LLM maps intent to
//! schema-validated tool calls dispatched against the shared skill context.

pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod llm;
pub mod sanitize;
pub mod skills;
pub mod tools;
