//! Tool registry: named, schema-validated operations exposed to the
//! inference provider for structured invocation.
//!
//! Arguments are validated against each tool's input schema before the
//! handler runs, and the handler's return value is validated against its
//! declared output schema before it is returned. A handler breaking its own
//! contract fails loudly instead of being silently coerced.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::deps::SkillContext;
use crate::error::{AgentError, Result};

/// Handler bound to the shared skill context. Receives validated arguments.
pub type ToolHandler = Arc<dyn Fn(&SkillContext, &Value) -> Result<Value> + Send + Sync>;

/// A registered tool: identity, schemas, and handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub output: Value,
    handler: ToolHandler,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        output: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            output,
            handler,
        }
    }
}

/// Tool identity as advertised to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Maps tool names to descriptors, bound to one skill context. Stateless
/// with respect to domain data; handlers mutate skill-owned state only.
pub struct ToolRegistry {
    context: Arc<SkillContext>,
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new(context: Arc<SkillContext>) -> Self {
        Self {
            context,
            tools: BTreeMap::new(),
        }
    }

    /// Add a tool. Name collisions are a configuration error caught here,
    /// at registry build time, not at call time.
    pub fn register(&mut self, tool: ToolDescriptor) -> Result<()> {
        if self.tools.contains_key(&tool.name) {
            return Err(AgentError::DuplicateTool(tool.name));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Definitions for the provider, in stable (name) order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate, execute, validate: the full dispatch path.
    pub fn dispatch(&self, name: &str, raw_args: &Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        let violations = validate(&tool.parameters, raw_args);
        if !violations.is_empty() {
            return Err(AgentError::InvalidArguments {
                tool: name.to_string(),
                fields: violations,
            });
        }

        info!(tool = %name, "dispatching tool");
        let output = (tool.handler)(&self.context, raw_args)?;

        let violations = validate(&tool.output, &output);
        if !violations.is_empty() {
            return Err(AgentError::ContractViolation {
                tool: name.to_string(),
                detail: violations.join("; "),
            });
        }
        Ok(output)
    }
}

/// Check `value` against a JSON schema subset: `type` (object/array/string/
/// integer/number/boolean), object `properties` + `required`, array `items`,
/// and `enum`. Returns the list of violations, empty when valid.
pub fn validate(schema: &Value, value: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    check(schema, value, "$", &mut violations);
    violations
}

fn check(schema: &Value, value: &Value, path: &str, out: &mut Vec<String>) {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            out.push(format!("{}: not one of the allowed values", path));
            return;
        }
    }

    let Some(ty) = schema.get("type").and_then(Value::as_str) else {
        return;
    };

    match ty {
        "object" => {
            let Some(map) = value.as_object() else {
                out.push(format!("{}: expected object", path));
                return;
            };
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(name) {
                        out.push(format!("{}.{}: required", path, name));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, subschema) in props {
                    if let Some(sub) = map.get(name) {
                        check(subschema, sub, &format!("{}.{}", path, name), out);
                    }
                }
            }
        }
        "array" => {
            let Some(items) = value.as_array() else {
                out.push(format!("{}: expected array", path));
                return;
            };
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{}[{}]", path, i), out);
                }
            }
        }
        "string" => {
            if !value.is_string() {
                out.push(format!("{}: expected string", path));
            }
        }
        "integer" => {
            if !value.is_i64() && !value.is_u64() {
                out.push(format!("{}: expected integer", path));
            }
        }
        "number" => {
            if !value.is_number() {
                out.push(format!("{}: expected number", path));
            }
        }
        "boolean" => {
            if !value.is_boolean() {
                out.push(format!("{}: expected boolean", path));
            }
        }
        _ => {}
    }
}

fn to_value<T: Serialize>(v: T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| AgentError::Storage(format!("serialize result: {}", e)))
}

fn action_outcome_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "success": {"type": "boolean"},
            "message": {"type": "string"}
        },
        "required": ["success", "message"]
    })
}

fn no_args_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn string_tags(args: &Value) -> Vec<String> {
    args.get("tags")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build the registry with the full tool set bound to `context`.
pub fn default_registry(context: Arc<SkillContext>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new(context);

    // ── Disk tools ───────────────────────────────────────────────────
    registry.register(ToolDescriptor::new(
        "list_caches",
        "Scan and list all development caches (pip, npm, conda, docker, ...) and their sizes.",
        no_args_schema(),
        json!({"type": "array", "items": {"type": "object"}}),
        Arc::new(|ctx, _args| to_value(ctx.disk().scan_caches())),
    ))?;

    registry.register(ToolDescriptor::new(
        "clean_cache",
        "Clean a specific cache by its ID (e.g. 'pip', 'npm', 'docker').",
        json!({
            "type": "object",
            "properties": {
                "cache_id": {"type": "string", "description": "ID of the cache to clean"}
            },
            "required": ["cache_id"]
        }),
        action_outcome_schema(),
        Arc::new(|ctx, args| {
            let cache_id = args.get("cache_id").and_then(Value::as_str).unwrap_or("");
            to_value(ctx.disk().clean_cache(cache_id))
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "explore_folder",
        "List the sizes of subfolders in a specific directory.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to explore (default '~')"}
            }
        }),
        json!({"type": "array", "items": {"type": "object"}}),
        Arc::new(|ctx, args| {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("~");
            to_value(ctx.disk().explore_folder(path))
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "scan_large_files",
        "Find files larger than the threshold (e.g. '500M', '1G').",
        json!({
            "type": "object",
            "properties": {
                "threshold": {"type": "string", "description": "Size threshold like '500M'"}
            }
        }),
        json!({
            "type": "object",
            "properties": {
                "files": {"type": "array", "items": {"type": "object"}},
                "threshold_used": {"type": "string"}
            },
            "required": ["files", "threshold_used"]
        }),
        Arc::new(|ctx, args| {
            let threshold = args.get("threshold").and_then(Value::as_str).unwrap_or("500M");
            to_value(ctx.disk().large_files(threshold))
        }),
    ))?;

    // ── Memory tools ─────────────────────────────────────────────────
    registry.register(ToolDescriptor::new(
        "add_note",
        "Save a note to the user's second brain.",
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Note text"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["content"]
        }),
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "content": {"type": "string"}
            },
            "required": ["id", "content"]
        }),
        Arc::new(|ctx, args| {
            let content = args.get("content").and_then(Value::as_str).unwrap_or("");
            to_value(ctx.memory().add_note(content, &string_tags(args))?)
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "search_notes",
        "Get notes, optionally filtering by a tag.",
        json!({
            "type": "object",
            "properties": {
                "tag": {"type": "string", "description": "Tag to filter by"}
            }
        }),
        json!({"type": "array", "items": {"type": "object"}}),
        Arc::new(|ctx, args| {
            let tag = args.get("tag").and_then(Value::as_str);
            to_value(ctx.memory().get_notes(tag)?)
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "sync_history",
        "Import and sanitize shell history from .bash_history/.zsh_history.",
        no_args_schema(),
        action_outcome_schema(),
        Arc::new(|ctx, _args| to_value(ctx.memory().ingest_shell_history()?)),
    ))?;

    registry.register(ToolDescriptor::new(
        "search_history",
        "Search for past commands executed by the user.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Substring to search for"}
            },
            "required": ["query"]
        }),
        json!({"type": "array", "items": {"type": "object"}}),
        Arc::new(|ctx, args| {
            let query = args.get("query").and_then(Value::as_str).unwrap_or("");
            to_value(ctx.memory().search_history(query)?)
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "search_memory",
        "Ranked search across command history and notes together.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"}
            },
            "required": ["query"]
        }),
        json!({"type": "array", "items": {"type": "object"}}),
        Arc::new(|ctx, args| {
            let query = args.get("query").and_then(Value::as_str).unwrap_or("");
            to_value(ctx.memory().search(query)?)
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "scrub_history",
        "Permanently delete history items containing a pattern.",
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Substring to wipe"}
            },
            "required": ["pattern"]
        }),
        action_outcome_schema(),
        Arc::new(|ctx, args| {
            let pattern = args.get("pattern").and_then(Value::as_str).unwrap_or("");
            to_value(ctx.memory().scrub_history(pattern)?)
        }),
    ))?;

    // ── System tools ─────────────────────────────────────────────────
    registry.register(ToolDescriptor::new(
        "system_status",
        "Get status/sizes of Trash, Logs, and Apt cache.",
        no_args_schema(),
        json!({
            "type": "object",
            "properties": {
                "trash": {"type": "string"},
                "apt": {"type": "string"},
                "journal": {"type": "string"}
            },
            "required": ["trash", "apt", "journal"]
        }),
        Arc::new(|ctx, _args| to_value(ctx.system().status())),
    ))?;

    registry.register(ToolDescriptor::new(
        "docker_prune",
        "Remove stopped containers and dangling images.",
        no_args_schema(),
        action_outcome_schema(),
        Arc::new(|ctx, _args| to_value(ctx.system().docker_prune())),
    ))?;

    registry.register(ToolDescriptor::new(
        "vacuum_logs",
        "Vacuum systemd journals to free space.",
        json!({
            "type": "object",
            "properties": {
                "retention": {"type": "string", "description": "Retention window (default '2weeks')"}
            }
        }),
        action_outcome_schema(),
        Arc::new(|ctx, args| {
            let retention = args.get("retention").and_then(Value::as_str).unwrap_or("2weeks");
            to_value(ctx.system().vacuum_logs(retention))
        }),
    ))?;

    registry.register(ToolDescriptor::new(
        "apt_clean",
        "Clean the apt package cache.",
        no_args_schema(),
        action_outcome_schema(),
        Arc::new(|ctx, _args| to_value(ctx.system().apt_clean())),
    ))?;

    registry.register(ToolDescriptor::new(
        "empty_trash",
        "Permanently empty the user's Trash.",
        no_args_schema(),
        action_outcome_schema(),
        Arc::new(|ctx, _args| to_value(ctx.system().empty_trash())),
    ))?;

    Ok(registry)
}
