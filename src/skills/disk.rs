//! Disk skill: development cache management and storage analysis.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{expand_home, format_size, path_size_bytes, run_shell, ActionOutcome, Skill};

/// A file or directory with its measured size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub size_human: String,
}

/// A known system or application cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub description: String,
}

/// Result of a large-file scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileScanResult {
    pub files: Vec<DiskUsage>,
    pub threshold_used: String,
}

struct CacheDef {
    id: &'static str,
    name: &'static str,
    path: &'static str,
    cmd: &'static str,
    desc: &'static str,
}

/// Known caches and the command that cleans each one.
const KNOWN_CACHES: &[CacheDef] = &[
    CacheDef {
        id: "pip",
        name: "Pip Cache",
        path: "~/.cache/pip",
        cmd: "pip cache purge",
        desc: "Python wheel downloads",
    },
    CacheDef {
        id: "uv",
        name: "UV Cache",
        path: "~/.cache/uv",
        cmd: "uv cache clean",
        desc: "UV package downloads",
    },
    CacheDef {
        id: "npm",
        name: "NPM Cache",
        path: "~/.npm",
        cmd: "npm cache clean --force",
        desc: "Node modules cache",
    },
    CacheDef {
        id: "conda_pkgs",
        name: "Conda Pkgs",
        path: "~/miniconda3/pkgs",
        cmd: "conda clean --all -y",
        desc: "Unused Conda packages",
    },
    CacheDef {
        id: "docker",
        name: "Docker System",
        path: "/var/lib/docker",
        cmd: "docker system prune -f",
        desc: "Dangling images & stopped containers",
    },
    CacheDef {
        id: "trash",
        name: "Trash Can",
        path: "~/.local/share/Trash",
        cmd: "rm -rf ~/.local/share/Trash/files/* ~/.local/share/Trash/info/*",
        desc: "Deleted files",
    },
];

/// Manages disk space: cache scanning/cleaning, folder exploration,
/// large-file scans. Holds no open resources; every operation shells out.
#[derive(Default)]
pub struct DiskSkill;

impl DiskSkill {
    pub fn new() -> Self {
        Self
    }

    /// Measure every known cache.
    pub fn scan_caches(&self) -> Vec<CacheItem> {
        KNOWN_CACHES
            .iter()
            .map(|c| {
                let size = path_size_bytes(c.path);
                CacheItem {
                    id: c.id.to_string(),
                    name: c.name.to_string(),
                    path: expand_home(c.path),
                    size_bytes: size,
                    size_human: format_size(size as f64),
                    description: c.desc.to_string(),
                }
            })
            .collect()
    }

    /// Run the clean command for one cache by id.
    pub fn clean_cache(&self, cache_id: &str) -> ActionOutcome {
        let Some(target) = KNOWN_CACHES.iter().find(|c| c.id == cache_id) else {
            return ActionOutcome::fail(
                format!("cache id '{}' not found", cache_id),
                "invalid id",
            );
        };
        info!(cache = %cache_id, "cleaning cache");
        let (out, err, code) = run_shell(target.cmd);
        if code == 0 {
            ActionOutcome::ok_at(format!("Cleaned {}", target.name), expand_home(target.path))
        } else {
            ActionOutcome::fail(
                format!("clean command for '{}' failed", cache_id),
                if err.is_empty() { out } else { err },
            )
        }
    }

    /// List immediate subdirectories of a path, sized and sorted largest first.
    pub fn explore_folder(&self, path: &str) -> Vec<DiskUsage> {
        let start = expand_home(path);
        let Ok(entries) = std::fs::read_dir(&start) else {
            return Vec::new();
        };
        let mut items: Vec<DiskUsage> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| {
                let full = e.path().display().to_string();
                let size = path_size_bytes(&full);
                DiskUsage {
                    name: e.file_name().to_string_lossy().to_string(),
                    path: full,
                    size_bytes: size,
                    size_human: format_size(size as f64),
                }
            })
            .collect();
        items.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then(a.name.cmp(&b.name)));
        items
    }

    /// Find files in the home directory larger than the threshold ("500M", "1G").
    pub fn large_files(&self, threshold: &str) -> FileScanResult {
        // Hidden paths are skipped to keep the noise down.
        let cmd = format!(
            "find ~ -type f -size +{} -not -path '*/.*' -exec du -k {{}} + 2>/dev/null | sort -rn | head -n 20",
            threshold
        );
        let (out, _, _) = run_shell(&cmd);

        let files = out
            .lines()
            .filter_map(|line| {
                let (kb, path) = line.split_once('\t')?;
                let size = kb.trim().parse::<u64>().ok()? * 1024;
                Some(DiskUsage {
                    name: std::path::Path::new(path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.to_string()),
                    path: path.to_string(),
                    size_bytes: size,
                    size_human: format_size(size as f64),
                })
            })
            .collect();

        FileScanResult {
            files,
            threshold_used: threshold.to_string(),
        }
    }
}

impl Skill for DiskSkill {
    fn name(&self) -> &str {
        "disk"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "disk.scan_caches".to_string(),
            "disk.clean_cache".to_string(),
            "disk.explore_folder".to_string(),
            "disk.large_files".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_caches_covers_known_table() {
        let skill = DiskSkill::new();
        let caches = skill.scan_caches();
        assert_eq!(caches.len(), KNOWN_CACHES.len());
        assert!(caches.iter().any(|c| c.id == "pip"));
        assert!(caches.iter().any(|c| c.id == "docker"));
        // Paths come out expanded.
        assert!(caches.iter().all(|c| !c.path.starts_with('~')));
    }

    #[test]
    fn test_clean_unknown_cache_fails() {
        let skill = DiskSkill::new();
        let outcome = skill.clean_cache("floppy");
        assert!(!outcome.success);
        assert!(outcome.message.contains("floppy"));
    }

    #[test]
    fn test_explore_folder_sorts_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big");
        let small = dir.path().join("small");
        std::fs::create_dir(&big).unwrap();
        std::fs::create_dir(&small).unwrap();
        std::fs::write(big.join("data"), vec![0u8; 64 * 1024]).unwrap();
        std::fs::write(small.join("data"), b"tiny").unwrap();
        // A plain file must not show up.
        std::fs::write(dir.path().join("file.txt"), b"x").unwrap();

        let skill = DiskSkill::new();
        let items = skill.explore_folder(&dir.path().display().to_string());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "big");
        assert!(items[0].size_bytes >= items[1].size_bytes);
    }

    #[test]
    fn test_explore_missing_folder_is_empty() {
        let skill = DiskSkill::new();
        assert!(skill.explore_folder("/no/such/dir").is_empty());
    }

    #[test]
    fn test_skill_metadata() {
        let skill = DiskSkill::new();
        assert_eq!(skill.name(), "disk");
        assert_eq!(skill.capabilities().len(), 4);
    }
}
