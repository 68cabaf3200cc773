// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery and the on-disk manifest.
//!
//! A skill is a markdown file with YAML front-matter carrying at least a
//! `description`.  User skills live in `~/.quill/skills/`, project skills
//! in `./.quill/skills/`; a project skill overrides the user skill of the
//! same name.  The manifest (`~/.quill/skills.json`) remembers `disabled`
//! flags across rescans and is the baseline for change detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSource {
    User,
    Project,
}

/// A discovered skill with its parsed body.
#[derive(Debug, Clone)]
pub struct SkillMetadata {
    /// File stem of the skill file.
    pub name: String,
    /// From the front-matter `description` field.
    pub description: String,
    /// Markdown body after the closing front-matter fence.
    pub content: String,
    pub file_path: PathBuf,
    pub source: SkillSource,
    pub disabled: bool,
    /// Modification time (seconds since epoch) used for change detection.
    pub mtime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub description: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub disabled: bool,
    pub mtime: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillManifest {
    #[serde(default)]
    pub skills: HashMap<String, ManifestEntry>,
}

impl SkillManifest {
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), "skill manifest corrupt, starting fresh: {e}");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(self)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, path)
        };
        if let Err(e) = write() {
            warn!(path = %path.display(), "skill manifest write failed: {e}");
        }
    }
}

/// Scan report: what changed relative to the previous manifest.
#[derive(Debug, Default)]
pub struct SkillChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl SkillChanges {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }
}

/// Split front-matter from body.  Returns `(yaml, body)` or `None` when
/// the file has no front-matter or the YAML is not a mapping.
pub fn parse_front_matter(content: &str) -> Option<(serde_yaml::Value, String)> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"\A---\r?\n([\s\S]*?)\r?\n?---\r?\n([\s\S]*)").expect("front-matter regex")
    });
    let caps = fence.captures(content)?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(caps.get(1)?.as_str()).ok()?;
    match yaml {
        serde_yaml::Value::Mapping(_) | serde_yaml::Value::Null => {}
        _ => return None,
    }
    Some((yaml, caps.get(2)?.as_str().trim().to_string()))
}

pub struct SkillsManager {
    user_skills_dir: Option<PathBuf>,
    project_skills_dir: Option<PathBuf>,
    manifest_path: PathBuf,
    skills: Mutex<HashMap<String, SkillMetadata>>,
    manifest: Mutex<SkillManifest>,
}

impl SkillsManager {
    pub fn new(
        user_skills_dir: Option<PathBuf>,
        project_skills_dir: Option<PathBuf>,
        manifest_path: PathBuf,
    ) -> Self {
        let manifest = SkillManifest::load(&manifest_path);
        Self {
            user_skills_dir,
            project_skills_dir,
            manifest_path,
            skills: Mutex::new(HashMap::new()),
            manifest: Mutex::new(manifest),
        }
    }

    /// Standard directories for a workspace: `./.quill/skills` and
    /// `~/.quill/skills`, manifest at `~/.quill/skills.json`.
    pub fn for_workspace(workspace_dir: &Path) -> Self {
        let home_state = dirs::home_dir().map(|h| h.join(quill_config::STATE_DIR));
        Self::new(
            home_state.as_ref().map(|s| s.join("skills")),
            Some(workspace_dir.join(quill_config::STATE_DIR).join("skills")),
            home_state
                .map(|s| s.join("skills.json"))
                .unwrap_or_else(|| PathBuf::from(".quill-skills.json")),
        )
    }

    fn scan_directory(dir: &Path, source: SkillSource) -> Vec<SkillMetadata> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut skills = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|x| x != "md").unwrap_or(true) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                warn!(path = %path.display(), "unreadable skill file, skipping");
                continue;
            };
            let Some((front, body)) = parse_front_matter(&content) else {
                warn!(path = %path.display(), "skill file has no front-matter, skipping");
                continue;
            };
            let description = front
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|d| !d.is_empty());
            let Some(description) = description else {
                warn!(path = %path.display(), "skill file missing description, skipping");
                continue;
            };
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            skills.push(SkillMetadata {
                name: stem,
                description: description.to_string(),
                content: body,
                file_path: path,
                source,
                disabled: false,
                mtime,
            });
        }
        skills
    }

    /// Walk both skill directories, merge (project wins), diff against the
    /// manifest, persist the updated manifest and return the change report.
    /// `disabled` flags survive the rescan.
    pub fn scan(&self) -> SkillChanges {
        let mut merged: HashMap<String, SkillMetadata> = HashMap::new();
        if let Some(dir) = &self.user_skills_dir {
            for skill in Self::scan_directory(dir, SkillSource::User) {
                merged.insert(skill.name.clone(), skill);
            }
        }
        if let Some(dir) = &self.project_skills_dir {
            for skill in Self::scan_directory(dir, SkillSource::Project) {
                if merged.contains_key(&skill.name) {
                    debug!(skill = %skill.name, "project skill overrides user skill");
                }
                merged.insert(skill.name.clone(), skill);
            }
        }

        let mut manifest = self.manifest.lock().expect("manifest lock");
        let mut changes = SkillChanges::default();

        for (name, skill) in merged.iter_mut() {
            match manifest.skills.get(name) {
                None => changes.added.push(name.clone()),
                Some(old) => {
                    skill.disabled = old.disabled;
                    if old.mtime != skill.mtime || old.description != skill.description {
                        changes.modified.push(name.clone());
                    }
                }
            }
        }
        for name in manifest.skills.keys() {
            if !merged.contains_key(name) {
                changes.removed.push(name.clone());
            }
        }

        manifest.skills = merged
            .values()
            .map(|s| {
                (
                    s.name.clone(),
                    ManifestEntry {
                        name: s.name.clone(),
                        description: s.description.clone(),
                        file_path: s.file_path.clone(),
                        disabled: s.disabled,
                        mtime: s.mtime,
                    },
                )
            })
            .collect();
        manifest.save(&self.manifest_path);
        drop(manifest);

        *self.skills.lock().expect("skills lock") = merged;
        changes
    }

    /// Skills the model may activate, sorted by name for a stable enum.
    pub fn enabled_skills(&self) -> Vec<SkillMetadata> {
        let mut skills: Vec<SkillMetadata> = self
            .skills
            .lock()
            .expect("skills lock")
            .values()
            .filter(|s| !s.disabled)
            .cloned()
            .collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    pub fn get(&self, name: &str) -> Option<SkillMetadata> {
        self.skills.lock().expect("skills lock").get(name).cloned()
    }

    /// Flip a skill's disabled flag and persist it to the manifest.
    pub fn set_disabled(&self, name: &str, disabled: bool) -> bool {
        let mut skills = self.skills.lock().expect("skills lock");
        let Some(skill) = skills.get_mut(name) else { return false };
        skill.disabled = disabled;
        let mut manifest = self.manifest.lock().expect("manifest lock");
        if let Some(entry) = manifest.skills.get_mut(name) {
            entry.disabled = disabled;
        }
        manifest.save(&self.manifest_path);
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, name: &str, description: &str, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(format!("{name}.md")),
            format!("---\ndescription: {description}\n---\n{body}\n"),
        )
        .unwrap();
    }

    fn manager(tmp: &Path) -> SkillsManager {
        SkillsManager::new(
            Some(tmp.join("user")),
            Some(tmp.join("project")),
            tmp.join("skills.json"),
        )
    }

    // ── Front-matter parsing ──────────────────────────────────────────────────

    #[test]
    fn front_matter_parses_description_and_body() {
        let (front, body) =
            parse_front_matter("---\ndescription: does things\n---\n# Title\nbody text").unwrap();
        assert_eq!(front.get("description").unwrap().as_str(), Some("does things"));
        assert_eq!(body, "# Title\nbody text");
    }

    #[test]
    fn missing_front_matter_is_none() {
        assert!(parse_front_matter("# just markdown").is_none());
    }

    #[test]
    fn non_mapping_front_matter_is_none() {
        assert!(parse_front_matter("---\n- a\n- b\n---\nbody").is_none());
    }

    // ── Scanning ──────────────────────────────────────────────────────────────

    #[test]
    fn first_scan_reports_all_as_added() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(&tmp.path().join("user"), "review", "review code", "Review steps");
        let mgr = manager(tmp.path());
        let changes = mgr.scan();
        assert_eq!(changes.added, vec!["review"]);
        assert!(changes.modified.is_empty());
        assert_eq!(mgr.enabled_skills().len(), 1);
    }

    #[test]
    fn project_skill_overrides_user_skill() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(&tmp.path().join("user"), "deploy", "user deploy", "user body");
        write_skill(&tmp.path().join("project"), "deploy", "project deploy", "project body");
        let mgr = manager(tmp.path());
        mgr.scan();
        let skill = mgr.get("deploy").unwrap();
        assert_eq!(skill.source, SkillSource::Project);
        assert_eq!(skill.description, "project deploy");
    }

    #[test]
    fn skill_without_description_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("user");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.md"), "---\nname: bad\n---\nbody").unwrap();
        let mgr = manager(tmp.path());
        let changes = mgr.scan();
        assert!(!changes.has_changes());
        assert!(mgr.get("bad").is_none());
    }

    #[test]
    fn removed_file_shows_up_in_changes() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(&tmp.path().join("user"), "gone", "temporary", "body");
        let mgr = manager(tmp.path());
        mgr.scan();
        std::fs::remove_file(tmp.path().join("user/gone.md")).unwrap();
        let changes = mgr.scan();
        assert_eq!(changes.removed, vec!["gone"]);
        assert!(mgr.get("gone").is_none());
    }

    #[test]
    fn disabled_flag_survives_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(&tmp.path().join("user"), "risky", "be careful", "body");
        let mgr = manager(tmp.path());
        mgr.scan();
        assert!(mgr.set_disabled("risky", true));
        mgr.scan();
        assert!(mgr.get("risky").unwrap().disabled);
        assert!(mgr.enabled_skills().is_empty());

        // A brand-new manager reading the same manifest sees it too.
        let mgr2 = manager(tmp.path());
        mgr2.scan();
        assert!(mgr2.get("risky").unwrap().disabled);
    }

    #[test]
    fn description_change_is_reported_as_modified() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(&tmp.path().join("user"), "evolve", "v1", "body");
        let mgr = manager(tmp.path());
        mgr.scan();
        write_skill(&tmp.path().join("user"), "evolve", "v2", "body");
        let changes = mgr.scan();
        assert_eq!(changes.modified, vec!["evolve"]);
    }
}
