//! Multi-game dispatch.
//!
//! Actions without an explicit game id apply to every configuration file
//! found under the config directory, with per-game error isolation: one
//! broken game logs and the rest proceed.

use std::path::Path;

use anyhow::{Context, Result};
use mmcore::command::Command;
use mmcore::config::GameConfig;
use mmcore::paths::BaseDirs;
use mmmount::{Game, PkexecHelper};

/// Reserved name never treated as a per-game configuration.
const RESERVED_CONFIG: &str = "config.toml";

pub struct Driver {
    base: BaseDirs,
}

impl Driver {
    pub fn new(base: BaseDirs) -> Self {
        Driver { base }
    }

    /// Activate one game, or every configured game. Returns the number of
    /// games that failed.
    pub fn activate(&self, game: Option<&str>, set: Option<&str>, writable: bool) -> Result<usize> {
        self.for_each(game, set, |game| game.activate(writable, false))
    }

    /// Deactivate one game, or every configured game.
    pub fn deactivate(&self, game: Option<&str>) -> Result<usize> {
        // deactivation never consults the set, so resolution is skipped: a
        // broken set definition must not block restoring a game directory
        self.for_each(game, Some(""), |game| game.deactivate())
    }

    /// Activate, run the command, deactivate.
    pub fn wrap(
        &self,
        game_id: &str,
        set: Option<&str>,
        writable: bool,
        argv: Vec<String>,
    ) -> Result<()> {
        let game = self.load_game(game_id, set, None)?;
        let environment = game
            .mod_set()
            .map(|set| set.environment().clone())
            .unwrap_or_default();
        let command = Command::wrap(argv, environment)?;
        game.wrap(&command, writable)?;
        Ok(())
    }

    /// Capture an interactive install session as a new mod folder.
    pub fn setup(
        &self,
        game_id: &str,
        mod_id: &str,
        path: Option<&Path>,
        set: Option<&str>,
    ) -> Result<()> {
        let game = self.load_game(game_id, set, path)?;
        game.setup(mod_id)?;
        Ok(())
    }

    /// Open the per-game configuration in the user's editor, seeding a
    /// fresh template when the file does not exist yet.
    pub fn edit(&self, game_id: &str, path: Option<&Path>) -> Result<()> {
        let file = self.base.config_file(game_id);
        if !file.exists() {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file, config_template(game_id, path))?;
            tracing::info!("created {}", file.display());
        }
        let editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string());
        let status = std::process::Command::new(&editor)
            .arg(&file)
            .status()
            .with_context(|| format!("Failed to launch editor `{editor}`"))?;
        if !status.success() {
            anyhow::bail!("Editor exited with {status}");
        }
        Ok(())
    }

    fn load_game(
        &self,
        id: &str,
        set: Option<&str>,
        path_override: Option<&Path>,
    ) -> mmcore::error::Result<Game> {
        let mut config = GameConfig::load(&self.base, id)?;
        if let Some(path) = path_override {
            config.path = path.to_path_buf();
        }
        Game::new(&self.base, config, set, Box::new(PkexecHelper))
    }

    fn for_each(
        &self,
        game: Option<&str>,
        set: Option<&str>,
        op: impl Fn(&Game) -> mmcore::error::Result<()>,
    ) -> Result<usize> {
        match game {
            Some(id) => {
                let game = self
                    .load_game(id, set, None)
                    .with_context(|| format!("Failed to load game `{id}`"))?;
                op(&game).with_context(|| format!("Game `{id}`"))?;
                Ok(0)
            }
            None => {
                let mut failures = 0;
                for id in self.game_ids()? {
                    let game = match self.load_game(&id, set, None) {
                        Ok(game) => game,
                        Err(err) => {
                            tracing::warn!("skipping `{id}`: {err}");
                            continue;
                        }
                    };
                    if let Err(err) = op(&game) {
                        tracing::error!("game `{id}`: {err}");
                        failures += 1;
                    }
                }
                Ok(failures)
            }
        }
    }

    /// IDs of every configured game: the stems of `*.toml` files under the
    /// config directory, the reserved `config.toml` excluded.
    fn game_ids(&self) -> Result<Vec<String>> {
        let dir = self.base.config_dir();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("No configuration directory at {}", dir.display()))?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(RESERVED_CONFIG) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn config_template(game_id: &str, path: Option<&Path>) -> String {
    let path = path.map(|p| p.display().to_string()).unwrap_or_default();
    format!(
        r#"# mod-manager configuration for `{game_id}`.

# Original game directory. An overlay is mounted here while active.
path = "{path}"

# Mod set mounted by `activate` when no --set is given.
#active = "default"

# Where mod folders live. Defaults to the user data directory.
#mod_root_path = ""

# Mount writable even when no set asks for it.
#writable = false

# Run the [[pre_command]] list on every activation.
#run_pre_command = false

#[default]
#mods = ["some_mod"]

#[[pre_command]]
#command = ["some-tool", "--flag"]
"#
    )
}
