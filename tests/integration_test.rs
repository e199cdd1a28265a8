use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;

use agentos::config::AgentConfig;
use agentos::deps::SkillContext;
use agentos::engine::{AbortReason, CancelToken, ChatSession, TurnOutcome};
use agentos::error::{AgentError, Result};
use agentos::llm::{ChatMessage, Provider, ProviderReply};
use agentos::sanitize::REDACTION_MARKER;
use agentos::skills::{DiskSkill, MemorySkill, SystemSkill};
use agentos::tools::{default_registry, ToolDefinition};

/// Provider that replays a fixed script of replies.
struct ScriptedProvider {
    replies: Mutex<VecDeque<ProviderReply>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<ProviderReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    async fn chat(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Vec<ToolDefinition>,
    ) -> Result<ProviderReply> {
        self.replies
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| AgentError::Provider("script exhausted".to_string()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }
}

fn build_context(dir: &tempfile::TempDir) -> Arc<SkillContext> {
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

fn tool_call(name: &str, arguments: serde_json::Value) -> ProviderReply {
    ProviderReply::ToolCall {
        id: "call_1".to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Full chat flow: the model asks for a tool, the result is folded back,
/// and the follow-up round-trip produces the final answer.
#[tokio::test]
async fn test_chat_turn_with_tool_execution() {
    let dir = tempfile::tempdir().unwrap();
    let context = build_context(&dir);
    let registry = default_registry(Arc::clone(&context)).unwrap();

    let provider = ScriptedProvider::new(vec![
        tool_call("add_note", json!({"content": "renew certs in March", "tags": ["ops"]})),
        ProviderReply::Final("Noted.".to_string()),
    ]);

    let mut session = ChatSession::new(AgentConfig::default(), Box::new(provider), registry, 10);
    match session.run_turn("remember to renew certs", &CancelToken::new()).await {
        TurnOutcome::Final(text) => assert_eq!(text, "Noted."),
        other => panic!("expected Final, got {:?}", other),
    }

    // The tool really ran against the shared context.
    let notes = context.memory().get_notes(None).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "renew certs in March");
}

/// An unknown tool is a registry bug: the turn aborts gracefully and the
/// session stays usable for the next turn.
#[tokio::test]
async fn test_unknown_tool_aborts_session_survives() {
    let dir = tempfile::tempdir().unwrap();
    let context = build_context(&dir);
    let registry = default_registry(Arc::clone(&context)).unwrap();

    let provider = ScriptedProvider::new(vec![
        tool_call("delete_everything", json!({})),
        ProviderReply::Final("Still here.".to_string()),
    ]);

    let mut session = ChatSession::new(AgentConfig::default(), Box::new(provider), registry, 10);
    match session.run_turn("nuke it", &CancelToken::new()).await {
        TurnOutcome::Aborted(AbortReason::UnknownTool(name)) => {
            assert_eq!(name, "delete_everything");
        }
        other => panic!("expected UnknownTool abort, got {:?}", other),
    }

    // Next turn on the same session works.
    match session.run_turn("are you ok?", &CancelToken::new()).await {
        TurnOutcome::Final(text) => assert_eq!(text, "Still here."),
        other => panic!("expected Final, got {:?}", other),
    }
}

/// Secrets ingested into the second brain never come back out of a tool.
#[tokio::test]
async fn test_redacted_history_through_tool_surface() {
    let dir = tempfile::tempdir().unwrap();
    let context = build_context(&dir);
    let registry = default_registry(Arc::clone(&context)).unwrap();

    let entry = context
        .memory()
        .ingest(
            "curl -H 'Authorization: Bearer sk-12345' https://api.example.com",
            "~",
        )
        .unwrap();
    assert!(entry.was_redacted);

    let hits = registry
        .dispatch("search_history", &json!({"query": "curl"}))
        .unwrap();
    let rendered = hits.to_string();
    assert!(!rendered.contains("sk-12345"));
    assert!(rendered.contains(REDACTION_MARKER));

    let hits = registry
        .dispatch("search_memory", &json!({"query": "api.example.com"}))
        .unwrap();
    assert!(!hits.to_string().contains("sk-12345"));
}

/// A scripted runaway model hits the step limit instead of looping forever.
#[tokio::test]
async fn test_runaway_tool_loop_hits_step_limit() {
    let dir = tempfile::tempdir().unwrap();
    let context = build_context(&dir);
    let registry = default_registry(Arc::clone(&context)).unwrap();

    let replies: Vec<ProviderReply> = (0..12)
        .map(|_| tool_call("system_status", json!({})))
        .collect();
    let provider = ScriptedProvider::new(replies);

    let mut session = ChatSession::new(AgentConfig::default(), Box::new(provider), registry, 3);
    match session.run_turn("status, forever", &CancelToken::new()).await {
        TurnOutcome::Aborted(AbortReason::StepLimitExceeded(limit)) => assert_eq!(limit, 3),
        other => panic!("expected StepLimitExceeded, got {:?}", other),
    }
}
