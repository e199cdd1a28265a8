//! Agent engine: builds chat sessions from the current configuration and
//! drives one conversational turn at a time.
//!
//! A turn is a sequential loop: send the conversation, and either get a
//! final answer or a tool-call request. Tool results are folded back into
//! the conversation and the loop resubmits, up to a step limit. Errors a
//! model can recover from become tool-result content; registry
//! misconfigurations abort the turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, ConfigStore};
use crate::deps::SkillContext;
use crate::error::{AgentError, Result};
use crate::llm::{
    ChatMessage, FunctionCall, HttpProvider, Provider, ProviderReply, ToolCallRecord,
};
use crate::tools::{default_registry, ToolRegistry};

/// Maximum tool-call cycles per turn unless overridden.
pub const DEFAULT_STEP_LIMIT: usize = 10;

const SYSTEM_PROMPT: &str = "You are AgentOS, a system administration assistant. \
You have access to tools to manage the Disk, Memory (Notes/History), and System. \
Use these tools to answer user requests. \
When a tool returns data, summarize it concisely in natural language.";

/// Why a turn ended without a final answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    StepLimitExceeded(usize),
    UnknownTool(String),
    ContractViolation(String),
    Provider(String),
    ProviderTimeout,
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepLimitExceeded(limit) => write!(f, "step limit of {} exceeded", limit),
            Self::UnknownTool(name) => write!(f, "unknown tool '{}'", name),
            Self::ContractViolation(detail) => write!(f, "output contract violated: {}", detail),
            Self::Provider(msg) => write!(f, "provider error: {}", msg),
            Self::ProviderTimeout => write!(f, "provider timed out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<AgentError> for AbortReason {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::StepLimitExceeded(limit) => Self::StepLimitExceeded(limit),
            AgentError::UnknownTool(tool) => Self::UnknownTool(tool),
            AgentError::ContractViolation { tool, detail } => {
                Self::ContractViolation(format!("{}: {}", tool, detail))
            }
            AgentError::ProviderTimeout => Self::ProviderTimeout,
            other => Self::Provider(other.to_string()),
        }
    }
}

/// Terminal state of one turn.
#[derive(Debug)]
pub enum TurnOutcome {
    Final(String),
    Aborted(AbortReason),
}

/// Caller-held cancellation handle. Takes effect at the next provider
/// round-trip or tool dispatch boundary, never mid-dispatch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds sessions. Holds the config store and the shared skill context;
/// every `session()` call re-reads configuration so a model switch takes
/// effect on the next session without restarting the process.
pub struct Engine {
    config_store: ConfigStore,
    context: Arc<SkillContext>,
    step_limit: usize,
    timeout: Duration,
}

impl Engine {
    pub fn new(config_store: ConfigStore, context: Arc<SkillContext>) -> Self {
        Self {
            config_store,
            context,
            step_limit: DEFAULT_STEP_LIMIT,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    /// Build a session from a fresh configuration read. The session keeps
    /// the snapshot; configuration changes apply to the next session.
    pub fn session(&self) -> Result<ChatSession> {
        let config = self.config_store.load()?;
        let provider = HttpProvider::new(&config, self.timeout)?;
        let registry = default_registry(Arc::clone(&self.context))?;
        info!(model = %config.model, base_url = %config.base_url, "session built");
        Ok(ChatSession::new(
            config,
            Box::new(provider),
            registry,
            self.step_limit,
        ))
    }

    /// Model identifiers the configured endpoint offers.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let config = self.config_store.load()?;
        let provider = HttpProvider::new(&config, self.timeout)?;
        provider.list_models().await
    }
}

/// One chat session: an immutable configuration snapshot, a provider, the
/// tool registry, and the running conversation.
pub struct ChatSession {
    pub id: String,
    config: AgentConfig,
    provider: Box<dyn Provider>,
    registry: ToolRegistry,
    messages: Vec<ChatMessage>,
    step_limit: usize,
}

impl ChatSession {
    pub fn new(
        config: AgentConfig,
        provider: Box<dyn Provider>,
        registry: ToolRegistry,
        step_limit: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            provider,
            registry,
            messages: vec![ChatMessage::system(SYSTEM_PROMPT)],
            step_limit,
        }
    }

    /// The configuration snapshot this session was built from.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one turn to completion. Never panics; every failure mode maps to
    /// an [`AbortReason`] and the session remains usable for the next turn.
    pub async fn run_turn(&mut self, input: &str, cancel: &CancelToken) -> TurnOutcome {
        self.messages.push(ChatMessage::user(input));
        let definitions = self.registry.definitions();
        let mut steps = 0usize;

        loop {
            if cancel.is_cancelled() {
                return TurnOutcome::Aborted(AbortReason::Cancelled);
            }

            let reply = match self
                .provider
                .chat(self.messages.clone(), definitions.clone())
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    error!(session = %self.id, error = %e, "provider failure");
                    return TurnOutcome::Aborted(AbortReason::from(e));
                }
            };

            let (call_id, name, arguments) = match reply {
                ProviderReply::Final(text) => {
                    self.messages.push(ChatMessage::assistant(text.clone()));
                    return TurnOutcome::Final(text);
                }
                ProviderReply::ToolCall {
                    id,
                    name,
                    arguments,
                } => (id, name, arguments),
            };

            self.messages
                .push(ChatMessage::assistant_tool_call(ToolCallRecord {
                    id: call_id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: arguments.to_string(),
                    },
                }));

            if steps >= self.step_limit {
                warn!(session = %self.id, limit = self.step_limit, "step limit exceeded");
                return TurnOutcome::Aborted(AbortReason::from(AgentError::StepLimitExceeded(
                    self.step_limit,
                )));
            }
            if cancel.is_cancelled() {
                return TurnOutcome::Aborted(AbortReason::Cancelled);
            }

            match self.registry.dispatch(&name, &arguments) {
                Ok(value) => {
                    steps += 1;
                    self.messages
                        .push(ChatMessage::tool_result(call_id, value.to_string()));
                }
                Err(e) if e.is_engine_fatal() => {
                    error!(session = %self.id, tool = %name, error = %e, "registry misconfiguration");
                    return TurnOutcome::Aborted(AbortReason::from(e));
                }
                Err(e) => {
                    // Recoverable: report the failure to the model and let it
                    // retry or explain.
                    steps += 1;
                    warn!(session = %self.id, tool = %name, error = %e, "tool failed, folding back");
                    let failure = serde_json::json!({ "error": e.to_string() });
                    self.messages
                        .push(ChatMessage::tool_result(call_id, failure.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::skills::{DiskSkill, MemorySkill, SystemSkill};
    use crate::tools::ToolDescriptor;
    use mockall::Sequence;
    use serde_json::json;

    fn test_context(dir: &tempfile::TempDir) -> Arc<SkillContext> {
        Arc::new(
            SkillContext::builder()
                .with_disk(DiskSkill::new())
                .unwrap()
                .with_memory(MemorySkill::new(dir.path().join("agent.db")))
                .unwrap()
                .with_system(SystemSkill::new())
                .unwrap()
                .build()
                .unwrap(),
        )
    }

    fn echo_registry(dir: &tempfile::TempDir) -> ToolRegistry {
        let mut registry = ToolRegistry::new(test_context(dir));
        registry
            .register(ToolDescriptor::new(
                "echo",
                "echo text back",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
                json!({"type": "object", "required": ["text"]}),
                Arc::new(|_ctx, args| Ok(json!({"text": args["text"]}))),
            ))
            .unwrap();
        registry
    }

    fn session_with(provider: MockProvider, registry: ToolRegistry) -> ChatSession {
        ChatSession::new(
            AgentConfig::default(),
            Box::new(provider),
            registry,
            DEFAULT_STEP_LIMIT,
        )
    }

    fn tool_call(name: &str, arguments: serde_json::Value) -> ProviderReply {
        ProviderReply::ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_plain_answer_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockProvider::new();
        provider
            .expect_chat()
            .times(1)
            .returning(|_, _| Ok(ProviderReply::Final("All good.".to_string())));

        let mut session = session_with(provider, echo_registry(&dir));
        match session.run_turn("how are things?", &CancelToken::new()).await {
            TurnOutcome::Final(text) => assert_eq!(text, "All good."),
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_call_then_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(tool_call("echo", json!({"text": "ping"}))));
        provider
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|messages, _| {
                // The tool result was folded back before resubmitting.
                messages
                    .last()
                    .map(|m| m.role == "tool" && m.content.as_deref() == Some(r#"{"text":"ping"}"#))
                    .unwrap_or(false)
            })
            .returning(|_, _| Ok(ProviderReply::Final("pong".to_string())));

        let mut session = session_with(provider, echo_registry(&dir));
        match session.run_turn("echo ping", &CancelToken::new()).await {
            TurnOutcome::Final(text) => assert_eq!(text, "pong"),
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockProvider::new();
        provider
            .expect_chat()
            .times(1)
            .returning(|_, _| Ok(tool_call("delete_everything", json!({}))));

        let mut session = session_with(provider, echo_registry(&dir));
        match session.run_turn("wipe it", &CancelToken::new()).await {
            TurnOutcome::Aborted(AbortReason::UnknownTool(name)) => {
                assert_eq!(name, "delete_everything");
            }
            other => panic!("expected UnknownTool abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_arguments_folded_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(tool_call("echo", json!({"wrong": true}))));
        provider
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|messages, _| {
                messages
                    .last()
                    .and_then(|m| m.content.as_deref())
                    .map(|c| c.contains("error") && c.contains("invalid arguments"))
                    .unwrap_or(false)
            })
            .returning(|_, _| Ok(ProviderReply::Final("sorry, retried".to_string())));

        let mut session = session_with(provider, echo_registry(&dir));
        match session.run_turn("echo", &CancelToken::new()).await {
            TurnOutcome::Final(text) => assert_eq!(text, "sorry, retried"),
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_step_limit_aborts_after_limit_executions() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockProvider::new();
        // 11 consecutive tool-call requests with a limit of 10: the engine
        // executes 10, then aborts on the 11th request.
        provider
            .expect_chat()
            .times(11)
            .returning(|_, _| Ok(tool_call("echo", json!({"text": "again"}))));

        let mut session = session_with(provider, echo_registry(&dir));
        match session.run_turn("loop forever", &CancelToken::new()).await {
            TurnOutcome::Aborted(AbortReason::StepLimitExceeded(limit)) => {
                assert_eq!(limit, DEFAULT_STEP_LIMIT);
            }
            other => panic!("expected StepLimitExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_timeout_aborts_turn() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockProvider::new();
        provider
            .expect_chat()
            .times(1)
            .returning(|_, _| Err(AgentError::ProviderTimeout));

        let mut session = session_with(provider, echo_registry(&dir));
        match session.run_turn("hello?", &CancelToken::new()).await {
            TurnOutcome::Aborted(AbortReason::ProviderTimeout) => {}
            other => panic!("expected ProviderTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_before_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        // No chat expectation: a cancelled turn must not reach the provider.
        let provider = MockProvider::new();
        let mut session = session_with(provider, echo_registry(&dir));

        let cancel = CancelToken::new();
        cancel.cancel();
        match tokio_test::block_on(session.run_turn("never mind", &cancel)) {
            TurnOutcome::Aborted(AbortReason::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_keeps_config_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        store
            .set_config(Some("model-a".to_string()), None)
            .unwrap();

        let engine = Engine::new(
            ConfigStore::new(dir.path().join("config.toml")),
            test_context(&dir),
        );
        let old_session = engine.session().unwrap();
        assert_eq!(old_session.config().model, "model-a");

        store
            .set_config(Some("model-b".to_string()), None)
            .unwrap();

        // Already-built session keeps its snapshot; a new build sees the change.
        assert_eq!(old_session.config().model, "model-a");
        let new_session = engine.session().unwrap();
        assert_eq!(new_session.config().model, "model-b");
    }
}
