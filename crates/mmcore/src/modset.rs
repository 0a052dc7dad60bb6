//! Mod-set resolution.
//!
//! A mod set is a named, ordered list of members; each member is either a
//! mod directory under the mod root or another set referenced by name. The
//! configuration is treated as a named-node graph and walked depth-first
//! with an ancestor check, so cyclic references fail with a recursion error
//! instead of recursing without bound.
//!
//! Declaration order defines overlay priority: earlier members are
//! higher-priority lower directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::command::Command;
use crate::config::{self, GameConfig};
use crate::error::{Error, Result};

/// One resolved member, in declaration order.
#[derive(Debug, Clone)]
pub enum Member {
    /// A mod directory, verified to exist under the mod root.
    Mod(PathBuf),
    /// A nested, fully resolved set.
    Set(ModSet),
}

/// A resolved, acyclic mod set.
#[derive(Debug, Clone)]
pub struct ModSet {
    /// Name of the `[<name>]` table this set was resolved from.
    pub name: String,
    members: Vec<Member>,
    writable: bool,
    run_pre_commands: bool,
    command: Option<Command>,
    environment: BTreeMap<String, String>,
}

impl ModSet {
    /// Resolve the set `name` against the configuration.
    pub fn resolve(name: &str, config: &GameConfig, mod_root: &Path) -> Result<Self> {
        resolve_inner(name, config, mod_root, &mut Vec::new())
    }

    /// Members in declaration order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Effective writable flag: the set's own, or any transitively included
    /// set's.
    pub fn writable(&self) -> bool {
        self.writable
            || self
                .members
                .iter()
                .any(|m| matches!(m, Member::Set(set) if set.writable()))
    }

    /// Effective run-pre-commands flag, folded over the subtree the same
    /// way.
    pub fn should_run_pre_commands(&self) -> bool {
        self.run_pre_commands
            || self
                .members
                .iter()
                .any(|m| matches!(m, Member::Set(set) if set.should_run_pre_commands()))
    }

    /// Environment map attached to this set. Reserved for the wrap caller;
    /// resolution itself never reads it.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// All commands attached in the subtree, deduplicated by id, own
    /// command first, then members in declaration order.
    pub fn commands(&self) -> Vec<&Command> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        self.collect_commands(&mut seen, &mut out);
        out
    }

    fn collect_commands<'a>(&'a self, seen: &mut Vec<&'a str>, out: &mut Vec<&'a Command>) {
        if let Some(command) = &self.command {
            if !seen.contains(&command.id.as_str()) {
                seen.push(&command.id);
                out.push(command);
            }
        }
        for member in &self.members {
            if let Member::Set(set) = member {
                set.collect_commands(seen, out);
            }
        }
    }

    /// Ordered lower-dir stack: leaves in declaration order, nested sets
    /// spliced in place, duplicates removed keeping the first occurrence.
    pub fn lower_dirs(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.push_lower_dirs(&mut out);
        out
    }

    fn push_lower_dirs(&self, out: &mut Vec<PathBuf>) {
        for member in &self.members {
            match member {
                Member::Mod(path) => {
                    if !out.contains(path) {
                        out.push(path.clone());
                    }
                }
                Member::Set(set) => set.push_lower_dirs(out),
            }
        }
    }
}

fn resolve_inner(
    name: &str,
    game_config: &GameConfig,
    mod_root: &Path,
    ancestors: &mut Vec<String>,
) -> Result<ModSet> {
    let table = game_config
        .table(name)
        .ok_or_else(|| Error::KeyMissing(name.to_string()))?;

    let mods = table
        .get("mods")
        .ok_or_else(|| Error::KeyMissing(format!("{name}.mods")))?
        .as_array()
        .ok_or_else(|| Error::Value(format!("`{name}.mods` must be an array")))?;
    if mods.is_empty() {
        return Err(Error::ArrayEmpty(format!("{name}.mods")));
    }

    ancestors.push(name.to_string());
    let mut members = Vec::with_capacity(mods.len());
    for value in mods {
        let member = value
            .as_str()
            .ok_or_else(|| Error::Value(format!("`{name}.mods` entries must be strings")))?;
        if game_config.table(member).is_some() {
            // member names a table: a nested set
            if ancestors.iter().any(|ancestor| ancestor == member) {
                return Err(Error::Recursion(member.to_string()));
            }
            members.push(Member::Set(resolve_inner(member, game_config, mod_root, ancestors)?));
        } else {
            let path = mod_root.join(member);
            if !path.is_dir() {
                return Err(Error::FolderMissing(path));
            }
            members.push(Member::Mod(path));
        }
    }
    ancestors.pop();

    let command = match table.get("command") {
        None => None,
        Some(value) => {
            let command_name = value
                .as_str()
                .ok_or_else(|| Error::Value(format!("`{name}.command` must be a string")))?;
            match game_config.table(command_name) {
                Some(command_table) => Some(Command::from_table(command_name, command_table)?),
                None => {
                    tracing::warn!("set `{name}` references unknown command `{command_name}`");
                    None
                }
            }
        }
    };

    let environment = match table.get("environment") {
        None => BTreeMap::new(),
        Some(value) => value
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| {
                Error::Value(format!("`{name}.environment`: {}", e.message()))
            })?,
    };

    Ok(ModSet {
        name: name.to_string(),
        members,
        writable: config::bool_key(table, "writable")?,
        run_pre_commands: config::flag_either(table, "run_pre_command", "run_pre_commands")?,
        command,
        environment,
    })
}
