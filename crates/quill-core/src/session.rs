// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use quill_model::{Message, Role};

const PREVIEW_LIMIT: usize = 200;

/// The in-memory conversation.  Owned exclusively by the orchestrator;
/// everything else sees read-only views.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub initial_user_question: Option<String>,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            initial_user_question: None,
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        if self.initial_user_question.is_none() && msg.role == Role::User {
            self.initial_user_question = msg.as_text().map(str::to_string);
        }
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    fn last_user_message_preview(&self) -> String {
        let text = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.as_text())
            .unwrap_or("");
        if text.len() <= PREVIEW_LIMIT {
            text.to_string()
        } else {
            let mut cut = PREVIEW_LIMIT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...({} chars)", &text[..cut], text.len())
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Preview metadata for the resume picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub initial_user_question: Option<String>,
    pub message_count: usize,
    pub last_user_message_preview: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    id: String,
    initial_user_question: Option<String>,
    message_count: usize,
    last_user_message_preview: String,
    updated_at: DateTime<Utc>,
    messages: Vec<Message>,
}

/// One JSON file per session in the workspace state directory.  Writes are
/// atomic (write-to-temp, rename); sessions are never deleted here.
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            sessions_dir: workspace_dir.join(quill_config::STATE_DIR).join("sessions"),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    /// Flush the session to disk.  Failures are logged, not raised — losing
    /// one flush must never abort a turn.
    pub fn save(&self, session: &Session) {
        if let Err(e) = self.try_save(session) {
            warn!(session_id = %session.id, "saving session failed: {e}");
        }
    }

    fn try_save(&self, session: &Session) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)?;
        let file = SessionFile {
            id: session.id.clone(),
            initial_user_question: session.initial_user_question.clone(),
            message_count: session.messages.len(),
            last_user_message_preview: session.last_user_message_preview(),
            updated_at: session.updated_at,
            messages: session.messages.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let path = self.session_path(&session.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
    }

    /// Load a previously flushed session for `resume`.
    pub fn load(&self, session_id: &str) -> Option<Session> {
        let path = self.session_path(session_id);
        let text = std::fs::read_to_string(&path).ok()?;
        let file: SessionFile = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(session_id, "session file corrupt: {e}");
                return None;
            }
        };
        Some(Session {
            id: file.id,
            initial_user_question: file.initial_user_question,
            messages: file.messages,
            updated_at: file.updated_at,
        })
    }

    /// Recent sessions, newest first by file mtime.
    pub fn list_recent(&self, limit: usize) -> Vec<SessionSummary> {
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return Vec::new();
        };
        let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .filter_map(|e| {
                let mtime = e.metadata().ok()?.modified().ok()?;
                Some((mtime, e.path()))
            })
            .collect();
        files.sort_by(|a, b| b.0.cmp(&a.0));

        files
            .into_iter()
            .take(limit)
            .filter_map(|(_, path)| {
                let text = std::fs::read_to_string(&path).ok()?;
                let file: SessionFile = serde_json::from_str(&text).ok()?;
                Some(SessionSummary {
                    id: file.id,
                    initial_user_question: file.initial_user_question,
                    message_count: file.message_count,
                    last_user_message_preview: file.last_user_message_preview,
                    updated_at: file.updated_at,
                })
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_have_unique_ids() {
        assert_ne!(Session::new().id, Session::new().id);
    }

    #[test]
    fn first_user_message_becomes_initial_question() {
        let mut s = Session::new();
        s.push(Message::system("sys"));
        s.push(Message::user("what is this repo?"));
        s.push(Message::user("second question"));
        assert_eq!(s.initial_user_question.as_deref(), Some("what is this repo?"));
    }

    #[test]
    fn preview_truncates_to_200_chars() {
        let mut s = Session::new();
        s.push(Message::user("x".repeat(500)));
        let preview = s.last_user_message_preview();
        assert!(preview.starts_with(&"x".repeat(200)));
        assert!(preview.contains("500 chars"));
    }

    #[test]
    fn save_then_load_round_trips_the_transcript() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = Session::new();
        session.push(Message::user("remember X"));
        session.push(Message::assistant("noted"));
        store.save(&session);

        let loaded = store.load(&session.id).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].as_text(), Some("remember X"));
        assert_eq!(loaded.initial_user_question.as_deref(), Some("remember X"));
    }

    #[test]
    fn resumed_session_appends_without_gap() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = Session::new();
        session.push(Message::user("remember X"));
        store.save(&session);

        // Process B: resume, append, flush.
        let mut resumed = store.load(&session.id).unwrap();
        resumed.push(Message::user("what did I say?"));
        store.save(&resumed);

        let reloaded = store.load(&session.id).unwrap();
        assert_eq!(reloaded.messages.len(), 2);
    }

    #[test]
    fn list_recent_sorts_by_mtime_and_limits() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut s = Session::new();
            s.push(Message::user(format!("question {i}")));
            store.save(&s);
            ids.push(s.id.clone());
            // mtime granularity on some filesystems is coarse
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        let recent = store.list_recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[2], "newest first");
        assert_eq!(recent[0].message_count, 1);
    }

    #[test]
    fn load_missing_session_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(store.load("no-such-id").is_none());
    }
}
