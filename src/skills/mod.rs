//! Capability modules ("skills").
//!
//! Each skill is a long-lived struct exposing typed operations; the tool
//! registry and the CLI front end call those operations and nothing else.
//! Construction is cheap; any state that needs I/O (a store handle, a shell
//! probe) is acquired lazily on first real use, so listing capabilities never
//! touches the system.

use std::process::Command;

use serde::{Deserialize, Serialize};

pub mod disk;
pub mod memory;
pub mod system;

pub use disk::DiskSkill;
pub use memory::MemorySkill;
pub use system::SystemSkill;

/// Identity and capability metadata for a skill.
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Vec<String>;
}

/// Standard response for any modification action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_path: Option<String>,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            affected_path: None,
        }
    }

    pub fn ok_at(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            affected_path: Some(path.into()),
            ..Self::ok(message)
        }
    }

    pub fn fail(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            affected_path: None,
        }
    }
}

/// Run a shell pipeline, capturing stdout/stderr and the exit code.
pub(crate) fn run_shell(cmd: &str) -> (String, String, i32) {
    match Command::new("sh").arg("-c").arg(cmd).output() {
        Ok(out) => (
            String::from_utf8_lossy(&out.stdout).trim().to_string(),
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
            out.status.code().unwrap_or(-1),
        ),
        Err(e) => (String::new(), e.to_string(), 1),
    }
}

/// Size of a path in bytes via `du -sk`, 0 when absent.
pub(crate) fn path_size_bytes(path: &str) -> u64 {
    let expanded = expand_home(path);
    if !std::path::Path::new(&expanded).exists() {
        return 0;
    }
    let (out, _, _) = run_shell(&format!("du -sk '{}' | cut -f1", expanded));
    out.parse::<u64>().map(|kb| kb * 1024).unwrap_or(0)
}

/// Human-readable size, binary units.
pub(crate) fn format_size(mut size: f64) -> String {
    if size == 0.0 {
        return "0B".to_string();
    }
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1}{}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1}TB", size)
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_outcome_constructors() {
        let ok = ActionOutcome::ok("done");
        assert!(ok.success);
        assert!(ok.error.is_none());

        let fail = ActionOutcome::fail("nope", "because");
        assert!(!fail.success);
        assert_eq!(fail.error.as_deref(), Some("because"));

        let at = ActionOutcome::ok_at("cleaned", "/tmp/x");
        assert_eq!(at.affected_path.as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn test_action_outcome_serialization_skips_none() {
        let json = serde_json::to_string(&ActionOutcome::ok("fine")).unwrap();
        assert!(!json.contains("error"));
        assert!(!json.contains("affected_path"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0.0), "0B");
        assert_eq!(format_size(512.0), "512.0B");
        assert_eq!(format_size(2048.0), "2.0KB");
        assert_eq!(format_size(1_610_612_736.0), "1.5GB");
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/x");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/x"));
        assert_eq!(expand_home("/var/log"), "/var/log");
    }

    #[test]
    fn test_run_shell_captures_exit_code() {
        let (out, _, code) = run_shell("echo $((40 + 2))");
        assert_eq!(out, "42");
        assert_eq!(code, 0);

        let (_, _, code) = run_shell("exit 3");
        assert_eq!(code, 3);
    }

    #[test]
    fn test_path_size_absent_is_zero() {
        assert_eq!(path_size_bytes("/definitely/not/a/path/xyz"), 0);
    }
}
