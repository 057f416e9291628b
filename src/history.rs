use anyhow::{anyhow, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use crate::message::Role;

pub const SYSTEM_MESSAGE: &str = include_str!("system-message.txt");

/// Keep only the newest N entries when loading history for a prompt.
pub const MAX_HISTORY_LENGTH: usize = 12;

const HISTORY_FILE: &str = "history.json";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct History {
    pub id: Uuid,
    pub history: Vec<HistoryMessage>,
}

impl History {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: vec![HistoryMessage::new(Role::System, SYSTEM_MESSAGE)],
        }
    }
}

/// Conversation history persisted as JSON in a single directory. The
/// directory doubles as the backup location for cleared sessions.
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Default store under `~/.coding-assistant-history`.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Home directory not found"))?
            .join(".coding-assistant-history");
        Ok(Self::new(dir))
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Load the history, truncated to the newest `MAX_HISTORY_LENGTH`
    /// entries and always starting with the system message. A missing file
    /// yields a fresh seeded history.
    pub fn read(&self) -> Result<History> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(History::new());
        }

        let content = fs::read_to_string(&path)?;
        let mut history: History = serde_json::from_str(&content)?;

        if history.history.len() > MAX_HISTORY_LENGTH {
            history.history = history
                .history
                .split_off(history.history.len() - MAX_HISTORY_LENGTH);
        }

        if history.history.first().map(|m| m.role) != Some(Role::System) {
            history
                .history
                .insert(0, HistoryMessage::new(Role::System, SYSTEM_MESSAGE));
        }

        Ok(history)
    }

    pub fn write(&self, history: &History) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string(history)?;
        fs::write(self.history_path(), content)?;
        Ok(())
    }

    /// Clear the current session. The old file is copied to a timestamped
    /// backup next to it before a fresh seeded history is written.
    pub fn clear(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.history_path();

        if path.exists() {
            let stamp = Local::now().format("%Y%m%d%H%M%S");
            let backup = self.dir.join(format!("{}_{}.json", HISTORY_FILE, stamp));
            fs::copy(&path, &backup)?;
            fs::remove_file(&path)?;
        }

        self.write(&History::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn missing_file_yields_seeded_history() {
        let (_dir, store) = store();
        let history = store.read().unwrap();
        assert_eq!(history.history.len(), 1);
        assert_eq!(history.history[0].role, Role::System);
        assert_eq!(history.history[0].content, SYSTEM_MESSAGE);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, store) = store();
        let mut history = History::new();
        history
            .history
            .push(HistoryMessage::new(Role::User, "hello"));
        store.write(&history).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[1].content, "hello");
    }

    #[test]
    fn read_truncates_to_newest_entries() {
        let (_dir, store) = store();
        let mut history = History::new();
        for i in 0..MAX_HISTORY_LENGTH + 5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            history
                .history
                .push(HistoryMessage::new(role, format!("msg {i}")));
        }
        store.write(&history).unwrap();

        let loaded = store.read().unwrap();
        // Truncated to the max, then re-seeded with the system message
        assert_eq!(loaded.history.len(), MAX_HISTORY_LENGTH + 1);
        assert_eq!(loaded.history[0].role, Role::System);
        assert_eq!(
            loaded.history.last().unwrap().content,
            format!("msg {}", MAX_HISTORY_LENGTH + 4)
        );
    }

    #[test]
    fn system_message_is_prepended_when_missing() {
        let (_dir, store) = store();
        let history = History {
            id: Uuid::new_v4(),
            history: vec![HistoryMessage::new(Role::User, "no system here")],
        };
        store.write(&history).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.history[0].role, Role::System);
        assert_eq!(loaded.history[1].content, "no system here");
    }

    #[test]
    fn clear_backs_up_previous_session() {
        let (dir, store) = store();
        let mut history = History::new();
        history
            .history
            .push(HistoryMessage::new(Role::User, "keep a copy of me"));
        store.write(&history).unwrap();

        store.clear().unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with(HISTORY_FILE) && name != HISTORY_FILE
            })
            .collect();
        assert_eq!(backups.len(), 1);

        let fresh = store.read().unwrap();
        assert_eq!(fresh.history.len(), 1);
        assert_eq!(fresh.history[0].role, Role::System);
    }

    #[test]
    fn clear_on_empty_store_still_seeds() {
        let (_dir, store) = store();
        store.clear().unwrap();
        let history = store.read().unwrap();
        assert_eq!(history.history.len(), 1);
    }
}
