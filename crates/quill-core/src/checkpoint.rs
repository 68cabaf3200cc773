// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Workspace checkpoints in a shadow git repository.
//!
//! The shadow repo lives under `~/.quill/history/<sha256(workspace)>` with
//! `GIT_DIR` pointing at it and `GIT_WORK_TREE` pointing at the user's
//! workspace, so the workspace is tracked without a `.git` directory of
//! its own.  Keying by the hashed absolute path keeps concurrent use of
//! different workspaces apart.  All git invocations run with
//! `GIT_CONFIG_GLOBAL=/dev/null` and `GIT_CONFIG_SYSTEM=/dev/null` so user
//! config (signing, hooks, templates) cannot interfere.
//!
//! Snapshot failures are never fatal to a turn: the caller logs and moves
//! on without a checkpoint.  Restore failures are surfaced to the user.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("git is not installed or not runnable")]
    GitUnavailable,
    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },
    #[error("invalid checkpoint reference: {0}")]
    InvalidReference(String),
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sidecar record linking a snapshot commit to the tool call that
/// triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub commit_hash: Option<String>,
    pub tool_call: CheckpointToolCall,
    pub message_id: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointToolCall {
    pub name: String,
    pub args: serde_json::Value,
}

pub struct CheckpointStore {
    workspace_dir: PathBuf,
    history_dir: PathBuf,
    git_dir: PathBuf,
    checkpoints_dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at the user's home state directory.
    pub fn new(workspace_dir: &Path) -> Option<Self> {
        let home = dirs::home_dir()?;
        Some(Self::with_state_root(workspace_dir, &home.join(quill_config::STATE_DIR)))
    }

    /// Store rooted at an explicit state directory.  Tests use a tempdir.
    pub fn with_state_root(workspace_dir: &Path, state_root: &Path) -> Self {
        let workspace_dir =
            workspace_dir.canonicalize().unwrap_or_else(|_| workspace_dir.to_path_buf());
        let key = hash_path(&workspace_dir);
        let history_dir = state_root.join("history").join(&key);
        let checkpoints_dir = state_root.join("tmp").join(&key).join("checkpoints");
        Self {
            git_dir: history_dir.join(".git"),
            workspace_dir,
            history_dir,
            checkpoints_dir,
        }
    }

    async fn run_git(&self, args: &[&str]) -> Result<std::process::Output, CheckpointError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace_dir)
            .env("GIT_DIR", &self.git_dir)
            .env("GIT_WORK_TREE", &self.workspace_dir)
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_CONFIG_SYSTEM", "/dev/null")
            .output()
            .await
            .map_err(|_| CheckpointError::GitUnavailable)?;
        Ok(output)
    }

    async fn run_git_checked(&self, args: &[&str]) -> Result<String, CheckpointError> {
        let output = self.run_git(args).await?;
        if !output.status.success() {
            return Err(CheckpointError::GitFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Lazy, idempotent shadow-repo init.
    async fn initialize(&self) -> Result<(), CheckpointError> {
        if self.git_dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.history_dir)?;
        let output = Command::new("git")
            .arg("init")
            .current_dir(&self.history_dir)
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_CONFIG_SYSTEM", "/dev/null")
            .output()
            .await
            .map_err(|_| CheckpointError::GitUnavailable)?;
        if !output.status.success() {
            return Err(CheckpointError::GitFailed {
                command: "init".into(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        self.run_git_checked(&["config", "user.name", "quill-checkpoint"]).await?;
        self.run_git_checked(&["config", "user.email", "checkpoint@quill.local"]).await?;
        self.run_git_checked(&["config", "commit.gpgsign", "false"]).await?;
        Ok(())
    }

    async fn current_head(&self) -> Option<String> {
        self.run_git_checked(&["rev-parse", "HEAD"]).await.ok()
    }

    /// Snapshot the workspace.  Returns the commit hash — the current HEAD
    /// when nothing changed, a fresh commit otherwise.
    pub async fn snapshot(&self, tool_name: &str) -> Result<String, CheckpointError> {
        self.initialize().await?;
        self.run_git_checked(&["add", "-A"]).await?;

        // Exit code 1 = staged changes present, 0 = nothing staged.
        let status = self.run_git(&["diff", "--cached", "--quiet"]).await?;
        if status.status.success() {
            return self
                .current_head()
                .await
                .ok_or_else(|| CheckpointError::InvalidReference("empty repository".into()));
        }

        let message = format!("Snapshot for {tool_name}");
        self.run_git_checked(&["commit", "-m", &message]).await?;
        debug!(tool = tool_name, "workspace snapshot committed");
        self.current_head()
            .await
            .ok_or_else(|| CheckpointError::InvalidReference("HEAD missing after commit".into()))
    }

    /// Restore the workspace to `commit_hash`: tracked files are reset and
    /// files created since the snapshot are cleaned away.
    pub async fn restore(&self, commit_hash: &str) -> Result<(), CheckpointError> {
        if commit_hash.is_empty() {
            return Err(CheckpointError::InvalidReference("empty hash".into()));
        }
        self.initialize().await?;
        self.run_git_checked(&["restore", "--source", commit_hash, "."]).await?;
        self.run_git_checked(&["clean", "-fd"]).await?;
        Ok(())
    }

    /// Write the JSON sidecar for a snapshot.  Best-effort: returns the
    /// path on success, `None` on any failure.
    pub fn write_sidecar(
        &self,
        commit_hash: Option<&str>,
        tool_name: &str,
        tool_args: &serde_json::Value,
        message_id: Option<&str>,
    ) -> Option<PathBuf> {
        let checkpoint = Checkpoint {
            commit_hash: commit_hash.map(str::to_string),
            tool_call: CheckpointToolCall {
                name: tool_name.to_string(),
                args: tool_args.clone(),
            },
            message_id: message_id.map(str::to_string),
            created_at: Utc::now(),
        };

        let target = tool_args
            .get("path")
            .or_else(|| tool_args.get("file_path"))
            .and_then(|v| v.as_str())
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let filename = format!("{timestamp}-{target}-{tool_name}.json");

        std::fs::create_dir_all(&self.checkpoints_dir).ok()?;
        let path = self.checkpoints_dir.join(filename);
        let json = serde_json::to_string_pretty(&checkpoint).ok()?;
        std::fs::write(&path, json).ok()?;
        Some(path)
    }

    /// Checkpoint sidecars, newest first by filename (timestamps sort).
    pub fn list_checkpoints(&self) -> Vec<(String, Checkpoint)> {
        let Ok(entries) = std::fs::read_dir(&self.checkpoints_dir) else {
            return Vec::new();
        };
        let mut result: Vec<(String, Checkpoint)> = entries
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let text = std::fs::read_to_string(e.path()).ok()?;
                let cp: Checkpoint = serde_json::from_str(&text).ok()?;
                Some((name, cp))
            })
            .collect();
        result.sort_by(|a, b| b.0.cmp(&a.0));
        result
    }
}

fn hash_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
