//! System skill: Docker pruning, journal vacuuming, apt cache, trash.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{expand_home, format_size, path_size_bytes, run_shell, ActionOutcome, Skill};

/// Sizes of the maintenance targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub trash: String,
    pub apt: String,
    pub journal: String,
}

/// System-level maintenance. Every operation shells out to the respective
/// tool; a missing binary is a failure outcome, never a crash.
#[derive(Default)]
pub struct SystemSkill;

impl SystemSkill {
    pub fn new() -> Self {
        Self
    }

    /// Sizes of trash, apt cache, and the systemd journal.
    pub fn status(&self) -> SystemStatus {
        let trash = format_size(path_size_bytes("~/.local/share/Trash") as f64);
        let apt = format_size(path_size_bytes("/var/cache/apt/archives") as f64);

        // journalctl reports "... journals take up 56.0M in the file system."
        let (out, _, _) = run_shell("journalctl --disk-usage");
        let journal = out
            .split_whitespace()
            .skip_while(|w| *w != "up")
            .nth(1)
            .filter(|_| out.contains("journals"))
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".to_string());

        SystemStatus { trash, apt, journal }
    }

    /// Remove stopped containers, dangling images, and build cache.
    pub fn docker_prune(&self) -> ActionOutcome {
        let (_, _, probe) = run_shell("command -v docker");
        if probe != 0 {
            return ActionOutcome::fail("Docker not found on this system", "missing binary");
        }
        info!("pruning docker system");
        let (out, err, code) = run_shell("docker system prune -f");
        if code == 0 {
            ActionOutcome::ok_at("Docker system pruned", "Docker")
        } else {
            ActionOutcome::fail("Docker prune failed", if err.is_empty() { out } else { err })
        }
    }

    /// Vacuum systemd journals to the given retention window.
    pub fn vacuum_logs(&self, retention: &str) -> ActionOutcome {
        let (out, err, code) = run_shell(&format!("journalctl --vacuum-time={}", retention));
        // journalctl reports progress on stderr and may exit non-zero without sudo.
        if code == 0 || err.contains("Vacuuming done") || out.contains("Vacuuming done") {
            ActionOutcome::ok(format!("Logs vacuumed ({})", retention))
        } else {
            ActionOutcome::fail("Vacuum failed (needs privileges?)", err)
        }
    }

    /// Clean the apt package cache.
    pub fn apt_clean(&self) -> ActionOutcome {
        let (out, err, code) = run_shell("apt-get clean");
        if code == 0 {
            ActionOutcome::ok("Apt cache cleaned")
        } else {
            ActionOutcome::fail("Apt clean failed", if err.is_empty() { out } else { err })
        }
    }

    /// Permanently empty `~/.local/share/Trash`.
    pub fn empty_trash(&self) -> ActionOutcome {
        let trash = expand_home("~/.local/share/Trash");
        if !std::path::Path::new(&trash).exists() {
            return ActionOutcome::ok("Trash is already empty");
        }
        for sub in ["files", "info"] {
            let p = format!("{}/{}", trash, sub);
            if std::path::Path::new(&p).exists() {
                if let Err(e) = std::fs::remove_dir_all(&p) {
                    return ActionOutcome::fail("Failed to empty trash", e.to_string());
                }
                if let Err(e) = std::fs::create_dir_all(&p) {
                    return ActionOutcome::fail("Failed to recreate trash dir", e.to_string());
                }
            }
        }
        ActionOutcome::ok_at("Trash emptied", trash)
    }
}

impl Skill for SystemSkill {
    fn name(&self) -> &str {
        "system"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "system.status".to_string(),
            "system.docker_prune".to_string(),
            "system.vacuum_logs".to_string(),
            "system.apt_clean".to_string(),
            "system.empty_trash".to_string(),
        ]
    }
}
