//! JSONL append log — one file per chat under the sessions directory.
//!
//! The log is a cache of the conversation, not the system of record: appends
//! are best-effort and never fail the turn, and a corrupt line forfeits only
//! itself. No fsync per write.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use companion_core::types::{ChatId, ChatMessage, Role};

pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, chat_id: ChatId) -> PathBuf {
        self.dir.join(format!("{chat_id}.jsonl"))
    }

    /// Append one message. I/O errors are logged and swallowed — the
    /// in-memory session remains authoritative for the current turn.
    pub fn append(&self, chat_id: ChatId, role: Role, content: &str) {
        let msg = ChatMessage::new(role, content);
        if let Err(e) = self.try_append(chat_id, &msg) {
            warn!(chat_id, error = %e, "session log append failed");
        }
    }

    fn try_append(&self, chat_id: ChatId, msg: &ChatMessage) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(chat_id))?;
        let line = serde_json::to_string(msg).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")
    }

    /// Load the last `limit` entries (all entries when `limit == 0`),
    /// skipping malformed lines with a warning.
    pub fn load_tail(&self, chat_id: ChatId, limit: usize) -> Vec<ChatMessage> {
        let path = self.path_for(chat_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut messages: Vec<ChatMessage> = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(chat_id, lineno, error = %e, "unreadable session log line");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(&line) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    warn!(chat_id, lineno, error = %e, "skipping malformed session log line");
                }
            }
        }

        if limit > 0 && messages.len() > limit {
            messages.split_off(messages.len() - limit)
        } else {
            messages
        }
    }

    /// Total number of parseable entries in the log.
    pub fn count(&self, chat_id: ChatId) -> usize {
        self.load_tail(chat_id, 0).len()
    }

    /// Case-insensitive substring search over message content.
    pub fn search(&self, chat_id: ChatId, needle: &str) -> Vec<ChatMessage> {
        let needle = needle.to_lowercase();
        self.load_tail(chat_id, 0)
            .into_iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .collect()
    }

    /// Delete the log file for a chat. Missing file is not an error.
    pub fn delete(&self, chat_id: ChatId) {
        let path = self.path_for(chat_id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(chat_id, "session log deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(chat_id, error = %e, "session log delete failed"),
        }
    }
}
