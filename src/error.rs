//! Cross-cutting error taxonomy.
//!
//! The split that matters at runtime is [`AgentError::is_engine_fatal`]:
//! errors a model can plausibly recover from are folded back into the
//! conversation as tool results, everything else aborts the turn.

use thiserror::Error;

/// Errors produced anywhere in the agent stack.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Bad wiring detected at startup (missing skill role, malformed URL, bad config file).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A dynamic lookup asked the dependency context for a role it does not hold.
    #[error("unknown skill role '{0}'")]
    UnknownRole(String),

    /// Two tools were registered under the same name.
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    /// The model requested a tool that is not in the registry.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Tool arguments failed schema validation. Recoverable: reported back
    /// into the conversation so the model can retry with corrected arguments.
    #[error("invalid arguments for tool '{tool}': {fields:?}")]
    InvalidArguments { tool: String, fields: Vec<String> },

    /// A handler returned a value violating its own declared output schema.
    #[error("tool '{tool}' violated its output contract: {detail}")]
    ContractViolation { tool: String, detail: String },

    /// The inference provider failed (network, HTTP error, malformed reply).
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider round-trip exceeded the caller's timeout.
    #[error("provider request timed out")]
    ProviderTimeout,

    /// A single turn exceeded the configured number of tool-call cycles.
    #[error("step limit of {0} tool calls exceeded")]
    StepLimitExceeded(usize),

    /// A record could not be safely redacted and was rejected rather than
    /// stored in raw form.
    #[error("sanitization rejected record: {0}")]
    Sanitization(String),

    /// The persistence layer failed. Surfaced to the caller, never swallowed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AgentError {
    /// True for errors that indicate a registry misconfiguration rather than
    /// a bad model request. The engine aborts the turn on these instead of
    /// letting the model retry.
    pub fn is_engine_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_) | Self::ContractViolation { .. }
        )
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
