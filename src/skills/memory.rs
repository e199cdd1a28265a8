//! Memory skill, the "Second Brain": sanitized command history and notes,
//! persisted in SQLite, with a deterministic ranked search over both.
//!
//! Raw captured text never reaches the database: every history write goes
//! through [`crate::sanitize::sanitize`] first, and a record that cannot be
//! made safe is rejected outright. Notes are authored, not captured, and are
//! stored verbatim.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{expand_home, ActionOutcome, Skill};
use crate::error::{AgentError, Result};
use crate::sanitize::sanitize;

/// A stored, sanitized command record. Immutable once written; removed only
/// by an explicit delete or scrub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub command: String,
    pub context: String,
    pub timestamp: String,
    pub was_redacted: bool,
}

/// A user-authored note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchHit {
    History(HistoryEntry),
    Note(Note),
}

impl SearchHit {
    fn text(&self) -> &str {
        match self {
            Self::History(h) => &h.command,
            Self::Note(n) => &n.content,
        }
    }

    fn timestamp(&self) -> &str {
        match self {
            Self::History(h) => &h.timestamp,
            Self::Note(n) => &n.updated_at,
        }
    }

    fn row_id(&self) -> i64 {
        match self {
            Self::History(h) => h.id,
            Self::Note(n) => n.id,
        }
    }
}

/// The Second Brain store. The connection is opened lazily on the first real
/// operation so that constructing the skill (or listing its capabilities)
/// performs no I/O.
pub struct MemorySkill {
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl MemorySkill {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            conn: Mutex::new(None),
        }
    }

    /// Run `f` with the open connection, opening and migrating the database
    /// on first use. The mutex serializes writers; entries are appended or
    /// deleted, never updated in place, so no finer locking is needed.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| AgentError::Storage("memory store lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(AgentError::Storage("memory store unavailable".to_string())),
        }
    }

    fn open(&self) -> Result<Connection> {
        if let Some(dir) = self.db_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| AgentError::Storage(format!("create {}: {}", dir.display(), e)))?;
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY,
                command TEXT NOT NULL UNIQUE,
                context TEXT NOT NULL DEFAULT '~',
                timestamp TEXT NOT NULL,
                was_redacted INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        // Owner-only: the store holds operational history.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&self.db_path, std::fs::Permissions::from_mode(0o600))
            {
                warn!(error = %e, "failed to restrict store permissions");
            }
        }
        info!(path = %self.db_path.display(), "memory store opened");
        Ok(conn)
    }

    // ── History ──────────────────────────────────────────────────────

    /// Sanitize and store one captured command. The raw text exists only for
    /// the duration of this call and is never logged. Duplicate commands
    /// (post-sanitization) collapse onto the existing record.
    pub fn ingest(&self, raw: &str, context: &str) -> Result<HistoryEntry> {
        self.ingest_at(raw, context, &Utc::now().to_rfc3339())
    }

    fn ingest_at(&self, raw: &str, context: &str, timestamp: &str) -> Result<HistoryEntry> {
        let safe = sanitize(raw)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO history (command, context, timestamp, was_redacted)
                 VALUES (?1, ?2, ?3, ?4)",
                params![safe.text, context, timestamp, safe.redacted],
            )?;
            let entry = conn.query_row(
                "SELECT id, command, context, timestamp, was_redacted
                 FROM history WHERE command = ?1",
                params![safe.text],
                row_to_history,
            )?;
            Ok(entry)
        })
    }

    /// Import `~/.bash_history` and `~/.zsh_history`, sanitizing every line.
    /// Lines the sanitizer rejects are skipped (fail-closed), never stored raw.
    pub fn ingest_shell_history(&self) -> Result<ActionOutcome> {
        let mut imported = 0usize;
        let mut rejected = 0usize;

        for shell_file in [".bash_history", ".zsh_history"] {
            let path = expand_home(&format!("~/{}", shell_file));
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for line in content.lines() {
                let cmd = strip_zsh_prefix(line.trim());
                if cmd.len() <= 2 {
                    continue;
                }
                match self.ingest(cmd, "shell_import") {
                    Ok(_) => imported += 1,
                    Err(AgentError::Sanitization(_)) => rejected += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        let message = if rejected > 0 {
            format!("Imported {} commands ({} rejected)", imported, rejected)
        } else {
            format!("Imported {} commands", imported)
        };
        Ok(ActionOutcome::ok(message))
    }

    /// Substring search over stored commands, newest first.
    pub fn search_history(&self, term: &str) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, command, context, timestamp, was_redacted FROM history
                 WHERE command LIKE ?1 ORDER BY id DESC LIMIT 50",
            )?;
            let rows = stmt
                .query_map(params![format!("%{}%", term)], row_to_history)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_history_item(&self, id: i64) -> Result<ActionOutcome> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
            Ok(if n > 0 {
                ActionOutcome::ok("Deleted")
            } else {
                ActionOutcome::fail(format!("no history item {}", id), "not found")
            })
        })
    }

    /// Permanently delete history records containing `pattern`.
    pub fn scrub_history(&self, pattern: &str) -> Result<ActionOutcome> {
        if pattern.is_empty() {
            return Ok(ActionOutcome::fail(
                "refusing to scrub with an empty pattern",
                "empty pattern",
            ));
        }
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM history WHERE command LIKE ?1",
                params![format!("%{}%", pattern)],
            )?;
            Ok(if n > 0 {
                ActionOutcome::ok(format!("Scrubbed {} records matching '{}'", n, pattern))
            } else {
                ActionOutcome::ok("No matches found")
            })
        })
    }

    // ── Notes ────────────────────────────────────────────────────────

    pub fn add_note(&self, content: &str, tags: &[String]) -> Result<Note> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notes (content, tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![content, tags.join(","), now],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Note {
                id,
                content: content.to_string(),
                tags: tags.to_vec(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// List notes, newest first, optionally filtered by tag.
    pub fn get_notes(&self, tag_filter: Option<&str>) -> Result<Vec<Note>> {
        self.with_conn(|conn| {
            let mut stmt;
            let rows = match tag_filter {
                Some(tag) => {
                    stmt = conn.prepare(
                        "SELECT id, content, tags, created_at, updated_at FROM notes
                         WHERE tags LIKE ?1 ORDER BY id DESC",
                    )?;
                    stmt.query_map(params![format!("%{}%", tag)], row_to_note)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    stmt = conn.prepare(
                        "SELECT id, content, tags, created_at, updated_at FROM notes
                         ORDER BY id DESC",
                    )?;
                    stmt.query_map([], row_to_note)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    pub fn update_note(&self, id: i64, content: &str) -> Result<ActionOutcome> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notes SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![content, now, id],
            )?;
            Ok(if n > 0 {
                ActionOutcome::ok("Note updated")
            } else {
                ActionOutcome::fail(format!("no note {}", id), "not found")
            })
        })
    }

    pub fn delete_note(&self, id: i64) -> Result<ActionOutcome> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
            Ok(if n > 0 {
                ActionOutcome::ok("Note deleted")
            } else {
                ActionOutcome::fail(format!("no note {}", id), "not found")
            })
        })
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Ranked search over history and notes. Exact substring matches rank
    /// above token-overlap matches; ties break by recency, newest first.
    /// The ranking is computed from the primary store on every call, so
    /// results are identical for identical store state.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<SearchHit> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, command, context, timestamp, was_redacted FROM history",
                )?;
                let history = stmt
                    .query_map([], row_to_history)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let mut stmt =
                    conn.prepare("SELECT id, content, tags, created_at, updated_at FROM notes")?;
                let notes = stmt
                    .query_map([], row_to_note)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok((history, notes))
            })
            .map(|(history, notes)| {
                history
                    .into_iter()
                    .map(SearchHit::History)
                    .chain(notes.into_iter().map(SearchHit::Note))
                    .collect()
            })?;

        let needle = query.to_lowercase();
        let query_tokens = tokenize(&needle);

        let mut scored: Vec<(u8, usize, SearchHit)> = candidates
            .drain(..)
            .filter_map(|hit| {
                let text = hit.text().to_lowercase();
                if text.contains(&needle) {
                    return Some((2, query_tokens.len(), hit));
                }
                let overlap = tokenize(&text)
                    .iter()
                    .filter(|t| query_tokens.contains(*t))
                    .count();
                if overlap > 0 {
                    Some((1, overlap, hit))
                } else {
                    None
                }
            })
            .collect();

        // RFC 3339 timestamps compare correctly as strings.
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| b.2.timestamp().cmp(a.2.timestamp()))
                .then_with(|| b.2.row_id().cmp(&a.2.row_id()))
        });

        Ok(scored.into_iter().take(50).map(|(_, _, hit)| hit).collect())
    }
}

impl Skill for MemorySkill {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "memory.ingest".to_string(),
            "memory.sync_history".to_string(),
            "memory.search".to_string(),
            "memory.scrub".to_string(),
            "memory.notes".to_string(),
        ]
    }
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        command: row.get(1)?,
        context: row.get(2)?,
        timestamp: row.get(3)?,
        was_redacted: row.get(4)?,
    })
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let tags: String = row.get(2)?;
    Ok(Note {
        id: row.get(0)?,
        content: row.get(1)?,
        tags: if tags.is_empty() {
            Vec::new()
        } else {
            tags.split(',').map(str::to_string).collect()
        },
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Zsh extended history lines look like `: 1699999999:0;git push`.
fn strip_zsh_prefix(line: &str) -> &str {
    if line.starts_with(": ") {
        if let Some((_, cmd)) = line.split_once(';') {
            return cmd;
        }
    }
    line
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
