// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod activate_skill;
mod commands;
mod skills;
mod skills_advisor;

pub use activate_skill::{ActivateSkillTool, ACTIVATE_SKILL_TOOL};
pub use commands::{CommandHandler, CommandRegistry, ModelCommand};
pub use skills::{
    parse_front_matter, SkillChanges, SkillManifest, SkillMetadata, SkillSource, SkillsManager,
};
pub use skills_advisor::SkillsAdvisor;
