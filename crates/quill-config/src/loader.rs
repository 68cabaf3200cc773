// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{schema::Config, STATE_DIR};

/// Malformed or unreadable configuration on disk.  Fatal at startup: the
/// caller reports path and cause to stderr and exits.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("parsing {path}: {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Locate the effective config file for `workspace_dir`.
///
/// Searches `<dir>/.quill/config.yaml` in the workspace and up to two
/// parent levels, then falls back to `~/.quill/config.yaml`.  Returns
/// `None` when no file exists anywhere (defaults apply).
pub fn find_config_file(workspace_dir: &Path) -> Option<PathBuf> {
    let mut dir = Some(workspace_dir);
    for _ in 0..3 {
        let d = dir?;
        let candidate = d.join(STATE_DIR).join("config.yaml");
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    let home = dirs::home_dir()?;
    let candidate = home.join(STATE_DIR).join("config.yaml");
    candidate.is_file().then_some(candidate)
}

/// Load the configuration for `workspace_dir`, falling back to defaults
/// when no config file is found.
pub fn load(workspace_dir: &Path) -> Result<Config, ConfigError> {
    let Some(path) = find_config_file(workspace_dir) else {
        debug!("no config file found, using defaults");
        return Ok(Config::default());
    };
    load_file(&path)
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, yaml: &str) {
        let state = dir.join(STATE_DIR);
        std::fs::create_dir_all(&state).unwrap();
        std::fs::write(state.join("config.yaml"), yaml).unwrap();
    }

    #[test]
    fn finds_config_in_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "model:\n  name: m1\n  base_url: http://x/v1\n");
        let found = find_config_file(tmp.path()).unwrap();
        assert!(found.ends_with(".quill/config.yaml"));
    }

    #[test]
    fn finds_config_two_levels_up() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "{}");
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert!(find_config_file(&nested).is_some());
    }

    #[test]
    fn does_not_search_beyond_two_levels() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "{}");
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        // Three levels below the config: the upward walk must stop short.
        // (Home fallback may still find a real user config on dev machines,
        // so only assert the workspace copy is not what was found.)
        if let Some(p) = find_config_file(&nested) {
            assert!(!p.starts_with(tmp.path()));
        }
    }

    #[test]
    fn load_parses_model_section() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            "model:\n  name: local\n  base_url: http://127.0.0.1:8080/v1\n",
        );
        let cfg = load(tmp.path()).unwrap();
        assert_eq!(cfg.model.name, "local");
    }

    #[test]
    fn load_surfaces_parse_error_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "model: [not, a, mapping\n");
        let err = load(tmp.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("config.yaml"), "error should name the file: {msg}");
    }
}
