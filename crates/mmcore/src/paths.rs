//! Path derivation under the user base directories.
//!
//! Everything the manager writes lives under the standard config, data,
//! cache, and runtime bases, in a `mod-manager/<gameID>/` subtree. The base
//! directories are captured once at startup; all per-game locations are
//! derived from the game id and the configured game directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The program name. Names the subdirectory under every base directory and
/// suffixes the moved-aside game directory.
pub const PROGRAM_NAME: &str = "mod-manager";

/// User base directories, captured once at startup.
#[derive(Debug, Clone)]
pub struct BaseDirs {
    config: PathBuf,
    data: PathBuf,
    cache: PathBuf,
    runtime: PathBuf,
}

impl Default for BaseDirs {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseDirs {
    /// Capture the user base directories, honoring the usual environment
    /// overrides. The runtime base falls back to the cache base on systems
    /// that provide none.
    pub fn new() -> Self {
        let cache = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("~/.cache"));
        BaseDirs {
            config: dirs::config_dir().unwrap_or_else(|| PathBuf::from("~/.config")),
            data: dirs::data_dir().unwrap_or_else(|| PathBuf::from("~/.local/share")),
            runtime: dirs::runtime_dir().unwrap_or_else(|| cache.clone()),
            cache,
        }
    }

    /// Build from explicit base paths (sandboxed tests, overrides).
    pub fn from_paths(
        config: impl Into<PathBuf>,
        data: impl Into<PathBuf>,
        cache: impl Into<PathBuf>,
        runtime: impl Into<PathBuf>,
    ) -> Self {
        BaseDirs {
            config: config.into(),
            data: data.into(),
            cache: cache.into(),
            runtime: runtime.into(),
        }
    }

    /// Configuration directory: `<configHome>/mod-manager/`.
    pub fn config_dir(&self) -> PathBuf {
        self.config.join(PROGRAM_NAME)
    }

    /// Per-game configuration file: `<configHome>/mod-manager/<game_id>.toml`.
    pub fn config_file(&self, game_id: &str) -> PathBuf {
        self.config_dir().join(format!("{game_id}.toml"))
    }

    /// Default mod root: `<dataHome>/mod-manager/<game_id>/`.
    pub fn default_mod_root(&self, game_id: &str) -> PathBuf {
        self.data.join(PROGRAM_NAME).join(game_id)
    }

    /// Per-game cache directory: `<cacheHome>/mod-manager/<game_id>/`.
    pub fn cache_dir(&self, game_id: &str) -> PathBuf {
        self.cache.join(PROGRAM_NAME).join(game_id)
    }

    /// Per-game registry of live child PIDs: `<runtimeDir>/mod-manager/<game_id>/`.
    pub fn runtime_dir(&self, game_id: &str) -> PathBuf {
        self.runtime.join(PROGRAM_NAME).join(game_id)
    }
}

/// Derived filesystem locations for one game.
#[derive(Debug, Clone)]
pub struct GamePaths {
    /// The original game directory from the configuration.
    pub path: PathBuf,
    /// Sibling the original is renamed to while an overlay occupies `path`.
    pub moved_path: PathBuf,
    /// Per-game cache directory holding upper, work, and dummy directories.
    pub cache_dir: PathBuf,
    /// Per-game registry of live child PIDs (zero-byte marker files).
    pub runtime_dir: PathBuf,
}

impl GamePaths {
    pub fn new(base: &BaseDirs, game_id: &str, game_path: &Path) -> Result<Self> {
        Ok(GamePaths {
            path: game_path.to_path_buf(),
            moved_path: moved_sibling(game_path)?,
            cache_dir: base.cache_dir(game_id),
            runtime_dir: base.runtime_dir(game_id),
        })
    }

    /// Upper directory for an activation: `<set>_persistent` for a named
    /// set, `persistent_modless` without one, `persistent_setup` during the
    /// setup flow.
    pub fn upper_dir(&self, set_name: Option<&str>, is_setup: bool) -> PathBuf {
        let name = if is_setup {
            "persistent_setup".to_string()
        } else if let Some(set) = set_name {
            format!("{set}_persistent")
        } else {
            "persistent_modless".to_string()
        };
        self.cache_dir.join(name)
    }

    /// Overlay scratch directory. The helper expects exactly the `index/`
    /// and `work/` entries inside.
    pub fn workdir(&self) -> PathBuf {
        self.cache_dir.join("workdir")
    }

    /// Empty directory mixed in as a second lower layer when no set is
    /// active, since an overlay needs at least two lower directories.
    pub fn dummy_dir(&self) -> PathBuf {
        self.cache_dir.join(format!("{PROGRAM_NAME}_empty_dummy"))
    }
}

/// `<path>_mod-manager`, next to the original.
fn moved_sibling(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Value(format!("game path {} has no directory name", path.display())))?;
    Ok(path.with_file_name(format!("{name}_{PROGRAM_NAME}")))
}
