//! Workspace adapter — persona and memory files under the bot's home
//! directory.
//!
//! Each persona file has a fixed name in the workspace root and a per-file
//! soft limit; files that get truncated are listed in the snapshot so the
//! model knows to `read_file` for the rest. Snapshots are cached for up to
//! 60 seconds. Memory writes append markdown with a timestamped heading to
//! a per-day file.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, warn};

/// Per-file soft limit (characters).
const MAX_FILE_CHARS: usize = 12_000;
/// Snapshot cache lifetime.
const SNAPSHOT_TTL: Duration = Duration::from_secs(60);
/// How many recent daily memory files feed the prompt.
const RECENT_DAILY_FILES: usize = 2;

/// Persona files in their fixed load order.
pub const IDENTITY_FILE: &str = "IDENTITY.md";
pub const SOUL_FILE: &str = "SOUL.md";
pub const USER_FILE: &str = "USER.md";
pub const AGENTS_FILE: &str = "AGENTS.md";
pub const MEMORY_FILE: &str = "MEMORY.md";
pub const BOOTSTRAP_FILE: &str = "BOOTSTRAP.md";
pub const TOOLS_FILE: &str = "TOOLS.md";

#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    pub identity: String,
    pub soul: String,
    pub user: String,
    pub agents: String,
    pub memory: String,
    pub bootstrap: String,
    pub recent_daily: String,
    /// Names of files that were cut at the soft limit.
    pub truncated: Vec<String>,
    pub tool_notes: String,
}

pub struct Workspace {
    root: PathBuf,
    cache: Mutex<Option<(Instant, WorkspaceSnapshot)>>,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    /// Load the workspace snapshot, serving the cached copy when fresh.
    pub fn load(&self) -> WorkspaceSnapshot {
        {
            let cache = self.cache.lock().unwrap();
            if let Some((at, snapshot)) = cache.as_ref() {
                if at.elapsed() < SNAPSHOT_TTL {
                    return snapshot.clone();
                }
            }
        }

        let snapshot = self.load_uncached();
        *self.cache.lock().unwrap() = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    /// Drop the cached snapshot so the next `load` re-reads from disk.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    fn load_uncached(&self) -> WorkspaceSnapshot {
        let mut truncated = Vec::new();
        let mut read = |name: &str| -> String {
            let path = self.root.join(name);
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => return String::new(),
            };
            if content.len() > MAX_FILE_CHARS {
                truncated.push(name.to_string());
                let mut cut = MAX_FILE_CHARS;
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                content[..cut].to_string()
            } else {
                content
            }
        };

        let identity = read(IDENTITY_FILE);
        let soul = read(SOUL_FILE);
        let user = read(USER_FILE);
        let agents = read(AGENTS_FILE);
        let memory = read(MEMORY_FILE);
        let bootstrap = read(BOOTSTRAP_FILE);
        let tool_notes = read(TOOLS_FILE);
        let recent_daily = self.load_recent_daily();

        debug!(truncated = truncated.len(), "workspace snapshot loaded");
        WorkspaceSnapshot {
            identity,
            soul,
            user,
            agents,
            memory,
            bootstrap,
            recent_daily,
            truncated,
            tool_notes,
        }
    }

    /// Concatenate the newest daily memory files, newest last.
    fn load_recent_daily(&self) -> String {
        let dir = self.memory_dir();
        let mut files: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.extension().and_then(|e| e.to_str()) == Some("md")
                })
                .collect(),
            Err(_) => return String::new(),
        };
        files.sort();

        let recent = files.split_off(files.len().saturating_sub(RECENT_DAILY_FILES));
        let mut out = String::new();
        for path in recent {
            if let Ok(content) = std::fs::read_to_string(&path) {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(&content);
            }
        }
        out
    }

    /// True when an onboarding bootstrap file is present and non-empty —
    /// the prompt assembler short-circuits to onboarding mode.
    pub fn bootstrap_active(&self) -> bool {
        std::fs::metadata(self.root.join(BOOTSTRAP_FILE))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Append a snippet to today's memory file under a timestamped heading.
    /// A new day's file starts with a date heading.
    pub fn append_memory(&self, snippet: &str) -> std::io::Result<()> {
        let dir = self.memory_dir();
        std::fs::create_dir_all(&dir)?;

        let today = Local::now();
        let path = dir.join(format!("{}.md", today.format("%Y-%m-%d")));
        let is_new = !path.exists();

        let mut body = String::new();
        if is_new {
            body.push_str(&format!("# {}\n", today.format("%Y-%m-%d")));
        }
        body.push_str(&format!("\n### {}\n{}\n", today.format("%H:%M"), snippet.trim()));

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(body.as_bytes())?;

        self.invalidate();
        Ok(())
    }

    /// All memory documents as `(source, content)` pairs for reindexing:
    /// the long-term MEMORY.md plus every daily file.
    pub fn memory_documents(&self) -> Vec<(String, String)> {
        let mut docs = Vec::new();

        let memory_path = self.root.join(MEMORY_FILE);
        if let Ok(content) = std::fs::read_to_string(&memory_path) {
            docs.push((MEMORY_FILE.to_string(), content));
        }

        if let Ok(entries) = std::fs::read_dir(self.memory_dir()) {
            let mut paths: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
                .collect();
            paths.sort();
            for path in paths {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match std::fs::read_to_string(&path) {
                    Ok(content) => docs.push((format!("memory/{name}"), content)),
                    Err(e) => warn!(file = %name, error = %e, "unreadable memory file"),
                }
            }
        }

        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().to_path_buf());
        (dir, ws)
    }

    #[test]
    fn missing_files_load_as_empty() {
        let (_dir, ws) = workspace();
        let snap = ws.load();
        assert!(snap.identity.is_empty());
        assert!(snap.truncated.is_empty());
        assert!(!ws.bootstrap_active());
    }

    #[test]
    fn files_load_and_oversized_are_truncated() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join(SOUL_FILE), "warm and curious").unwrap();
        std::fs::write(dir.path().join(USER_FILE), "x".repeat(MAX_FILE_CHARS + 100)).unwrap();

        let snap = ws.load();
        assert_eq!(snap.soul, "warm and curious");
        assert_eq!(snap.user.len(), MAX_FILE_CHARS);
        assert_eq!(snap.truncated, vec![USER_FILE.to_string()]);
    }

    #[test]
    fn snapshot_is_cached_until_invalidated() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join(SOUL_FILE), "v1").unwrap();
        assert_eq!(ws.load().soul, "v1");

        std::fs::write(dir.path().join(SOUL_FILE), "v2").unwrap();
        // Still cached.
        assert_eq!(ws.load().soul, "v1");

        ws.invalidate();
        assert_eq!(ws.load().soul, "v2");
    }

    #[test]
    fn append_memory_creates_dated_file_with_heading() {
        let (dir, ws) = workspace();
        ws.append_memory("[preference] likes tea").unwrap();

        let today = Local::now().format("%Y-%m-%d").to_string();
        let path = dir.path().join("memory").join(format!("{today}.md"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&format!("# {today}")));
        assert!(content.contains("[preference] likes tea"));

        // Second append reuses the file without a second date heading.
        ws.append_memory("[fact] lives in Seoul").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches(&format!("# {today}")).count(), 1);
        assert!(content.contains("[fact] lives in Seoul"));
    }

    #[test]
    fn memory_documents_cover_long_term_and_daily() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join(MEMORY_FILE), "## Facts\nlikes tea").unwrap();
        ws.append_memory("daily note").unwrap();

        let docs = ws.memory_documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].0, MEMORY_FILE);
        assert!(docs[1].0.starts_with("memory/"));
    }

    #[test]
    fn bootstrap_file_activates_onboarding() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join(BOOTSTRAP_FILE), "welcome flow").unwrap();
        assert!(ws.bootstrap_active());
    }
}
