//! Typed projection of a per-game TOML configuration file.
//!
//! A config file is identified by its game id (the file stem) and parsed
//! once per invocation. Fixed top-level fields are validated eagerly; the
//! full document is retained so `[<setName>]` tables, `[<commandName>]`
//! tables, and the `[[pre_command]]` array can be looked up by name during
//! resolution. Unknown keys are ignored.

use std::path::PathBuf;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::paths::BaseDirs;

/// A per-game configuration.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Stem of the configuration file name.
    pub game_id: String,
    /// Original game directory (absolute).
    pub path: PathBuf,
    /// Default mod-set name.
    pub active: Option<String>,
    /// Root directory mod folders are searched under.
    pub mod_root_path: PathBuf,
    /// Mount writable by default.
    pub writable: bool,
    /// Run the global `[[pre_command]]` list on activation.
    pub run_pre_commands: bool,
    table: toml::Table,
}

impl GameConfig {
    /// Load and validate `<configHome>/mod-manager/<game_id>.toml`.
    pub fn load(base: &BaseDirs, game_id: &str) -> Result<Self> {
        let file = base.config_file(game_id);
        let text = std::fs::read_to_string(&file)?;
        Self::parse(game_id, &text, base.default_mod_root(game_id))
    }

    /// Parse a configuration document. `default_mod_root` is used when the
    /// file does not set `mod_root_path`.
    pub fn parse(game_id: &str, text: &str, default_mod_root: PathBuf) -> Result<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| Error::Value(format!("{game_id}.toml: {}", e.message())))?;

        let path = match table.get("path") {
            Some(value) => PathBuf::from(string_value(value, "path")?),
            None => return Err(Error::KeyMissing("path".into())),
        };
        if !path.is_absolute() {
            return Err(Error::Value(format!("`path` must be absolute, got {}", path.display())));
        }

        let active = table
            .get("active")
            .map(|value| string_value(value, "active").map(str::to_string))
            .transpose()?;

        let mod_root_path = match table.get("mod_root_path") {
            Some(value) => PathBuf::from(string_value(value, "mod_root_path")?),
            None => default_mod_root,
        };

        Ok(GameConfig {
            game_id: game_id.to_string(),
            path,
            active,
            writable: bool_key(&table, "writable")?,
            run_pre_commands: flag_either(&table, "run_pre_command", "run_pre_commands")?,
            mod_root_path,
            table,
        })
    }

    /// Look up a `[<name>]` table (a mod set or a named command).
    pub fn table(&self, name: &str) -> Option<&toml::Table> {
        self.table.get(name).and_then(toml::Value::as_table)
    }

    /// The global `[[pre_command]]` list, in declaration order.
    pub fn pre_commands(&self) -> Result<Vec<Command>> {
        let Some(value) = self.table.get("pre_command") else {
            return Ok(Vec::new());
        };
        let entries = value
            .as_array()
            .ok_or_else(|| Error::Value("`pre_command` must be an array of tables".into()))?;
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let table = entry
                    .as_table()
                    .ok_or_else(|| Error::Value("`pre_command` entries must be tables".into()))?;
                Command::from_table(&format!("pre_command.{index}"), table)
            })
            .collect()
    }
}

fn string_value<'a>(value: &'a toml::Value, key: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::Value(format!("`{key}` must be a string")))
}

/// Optional boolean key, absent means false.
pub(crate) fn bool_key(table: &toml::Table, key: &str) -> Result<bool> {
    match table.get(key) {
        None => Ok(false),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| Error::Value(format!("`{key}` must be a boolean"))),
    }
}

/// Boolean flag accepted under two spellings; the first one present wins.
pub(crate) fn flag_either(table: &toml::Table, key: &str, alias: &str) -> Result<bool> {
    if table.contains_key(key) {
        bool_key(table, key)
    } else {
        bool_key(table, alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<GameConfig> {
        GameConfig::parse("g", text, PathBuf::from("/data/mod-manager/g"))
    }

    #[test]
    fn test_minimal_config() {
        let config = parse(r#"path = "/games/skyrim""#).unwrap();
        assert_eq!(config.path, PathBuf::from("/games/skyrim"));
        assert_eq!(config.active, None);
        assert_eq!(config.mod_root_path, PathBuf::from("/data/mod-manager/g"));
        assert!(!config.writable);
        assert!(!config.run_pre_commands);
    }

    #[test]
    fn test_full_top_level() {
        let config = parse(
            r#"
            path = "/games/skyrim"
            active = "vanilla_plus"
            mod_root_path = "/mods"
            writable = true
            run_pre_command = true
            "#,
        )
        .unwrap();
        assert_eq!(config.active.as_deref(), Some("vanilla_plus"));
        assert_eq!(config.mod_root_path, PathBuf::from("/mods"));
        assert!(config.writable);
        assert!(config.run_pre_commands);
    }

    #[test]
    fn test_missing_path_is_key_missing() {
        assert!(matches!(
            parse(r#"active = "s""#),
            Err(Error::KeyMissing(key)) if key == "path"
        ));
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(matches!(parse(r#"path = "games/skyrim""#), Err(Error::Value(_))));
    }

    #[test]
    fn test_both_flag_spellings_accepted() {
        let old = parse("path = \"/g\"\nrun_pre_command = true").unwrap();
        let new = parse("path = \"/g\"\nrun_pre_commands = true").unwrap();
        assert!(old.run_pre_commands);
        assert!(new.run_pre_commands);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        assert!(parse("path = \"/g\"\nfuture_knob = 7").is_ok());
    }

    #[test]
    fn test_table_lookup() {
        let config = parse(
            r#"
            path = "/g"
            [vanilla_plus]
            mods = ["a"]
            "#,
        )
        .unwrap();
        assert!(config.table("vanilla_plus").is_some());
        assert!(config.table("missing").is_none());
        // scalar keys are not tables
        assert!(config.table("path").is_none());
    }

    #[test]
    fn test_pre_commands_in_order() {
        let config = parse(
            r#"
            path = "/g"

            [[pre_command]]
            command = ["first"]

            [[pre_command]]
            command = ["second"]
            wait_for_exit = false
            "#,
        )
        .unwrap();
        let commands = config.pre_commands().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].argv, vec!["first"]);
        assert_eq!(commands[1].argv, vec!["second"]);
        assert!(!commands[1].wait_for_exit);
    }

    #[test]
    fn test_pre_commands_absent_is_empty() {
        let config = parse(r#"path = "/g""#).unwrap();
        assert!(config.pre_commands().unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file_is_io() {
        let tmp = tempfile::tempdir().unwrap();
        let base = BaseDirs::from_paths(tmp.path(), tmp.path(), tmp.path(), tmp.path());
        assert!(matches!(GameConfig::load(&base, "absent"), Err(Error::Io(_))));
    }

    #[test]
    fn test_load_reads_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let base = BaseDirs::from_paths(tmp.path(), tmp.path(), tmp.path(), tmp.path());
        std::fs::create_dir_all(base.config_dir()).unwrap();
        std::fs::write(base.config_file("g"), "path = \"/games/g\"\n").unwrap();
        let config = GameConfig::load(&base, "g").unwrap();
        assert_eq!(config.path, PathBuf::from("/games/g"));
        assert_eq!(config.mod_root_path, base.default_mod_root("g"));
    }
}
