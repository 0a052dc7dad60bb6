//! Game activation lifecycle.
//!
//! Activation moves the pristine game directory aside, recreates an empty
//! directory in its place, and overlay-mounts the resolved mod stack over
//! it, so launchers and game binaries transparently see the combined view.
//! Deactivation reverses the sequence. The on-disk state is classified
//! fresh on every call (see [`crate::state`]), which is also how a crash
//! between the move and the mount is recovered: the next activation finds
//! MOVED and continues from there.

use std::io::BufRead;
use std::time::Duration;

use mmcore::command::Command;
use mmcore::config::GameConfig;
use mmcore::error::{Error, Result};
use mmcore::modset::ModSet;
use mmcore::paths::{BaseDirs, GamePaths};

use crate::helper::{MountBackend, WORKDIR_ENTRIES};
use crate::options::OverlayOptions;
use crate::state::{self, GameState};

/// Settling interval after unmount and after wrapped execution. Gives the
/// kernel and exiting children time to finalize; part of the contract.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// One configured game and its activation state machine.
pub struct Game {
    id: String,
    config: GameConfig,
    paths: GamePaths,
    /// Resolved active set. `None` is ignore_overlays mode: the mount shows
    /// only the moved-aside original.
    mod_set: Option<ModSet>,
    backend: Box<dyn MountBackend>,
}

impl Game {
    /// Construct a game from its configuration, resolving the active set.
    ///
    /// `set_override` replaces the configured `active` name for this
    /// invocation; an explicitly empty override selects ignore_overlays
    /// mode.
    pub fn new(
        base: &BaseDirs,
        config: GameConfig,
        set_override: Option<&str>,
        backend: Box<dyn MountBackend>,
    ) -> Result<Self> {
        let set_name = match set_override {
            Some("") => None,
            Some(name) => Some(name.to_string()),
            None => config.active.clone(),
        };
        let mod_set = set_name
            .map(|name| ModSet::resolve(&name, &config, &config.mod_root_path))
            .transpose()?;
        let paths = GamePaths::new(base, &config.game_id, &config.path)?;
        Ok(Game {
            id: config.game_id.clone(),
            config,
            paths,
            mod_set,
            backend,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn paths(&self) -> &GamePaths {
        &self.paths
    }

    pub fn mod_set(&self) -> Option<&ModSet> {
        self.mod_set.as_ref()
    }

    /// Classify the current on-disk state.
    pub fn classify(&self) -> Result<GameState> {
        state::classify(&self.paths.path, &self.paths.moved_path, &|p| {
            self.backend.is_mounted(p)
        })
    }

    /// Move the original aside and mount the overlay in its place.
    ///
    /// Re-activation from MOUNTED unmounts first and mounts with fresh
    /// options; activation from MOVED is crash recovery. Any failure
    /// triggers a best-effort deactivate so a half-built mount is not
    /// leaked.
    pub fn activate(&self, writable: bool, is_setup: bool) -> Result<()> {
        if let Err(err) = self.try_activate(writable, is_setup) {
            tracing::error!("activation of `{}` failed: {err}", self.id);
            if let Err(cleanup) = self.deactivate() {
                tracing::error!("cleanup after failed activation also failed: {cleanup}");
            }
            return Err(err);
        }
        Ok(())
    }

    fn try_activate(&self, writable: bool, is_setup: bool) -> Result<()> {
        let mut current = self.classify()?;
        if current == GameState::Mounted {
            self.deactivate()?;
            current = self.classify()?;
        }
        match current {
            GameState::Normal => {
                std::fs::rename(&self.paths.path, &self.paths.moved_path)?;
                self.expect_state(GameState::Moved)?;
            }
            GameState::Moved => {
                tracing::info!("`{}` is already moved aside, recovering", self.id);
            }
            GameState::Mounted => {
                return Err(Error::StateInvalid(format!(
                    "`{}` is still mounted after deactivation",
                    self.id
                )));
            }
            GameState::Invalid(reason) => return Err(Error::StateInvalid(reason)),
        }

        // fresh, empty mount root
        std::fs::create_dir(&self.paths.path)?;

        // resolver output first (highest priority), the moved-aside
        // original always last
        let mut options = OverlayOptions::new(match &self.mod_set {
            Some(set) => set.lower_dirs(),
            None => Vec::new(),
        });
        options.push_lower(&self.paths.moved_path);

        let set_writable = self.mod_set.as_ref().is_some_and(|set| set.writable());
        if writable || self.config.writable || set_writable || is_setup {
            let set_name = self.mod_set.as_ref().map(|set| set.name.as_str());
            let upper = self.paths.upper_dir(set_name, is_setup);
            let workdir = self.paths.workdir();
            std::fs::create_dir_all(&self.paths.cache_dir)?;
            std::fs::create_dir_all(&upper)?;
            for entry in WORKDIR_ENTRIES {
                std::fs::create_dir_all(workdir.join(entry))?;
            }
            // leftovers from the previous mount; failure here is fatal
            self.backend.clean_workdir(&self.id, &workdir)?;
            options.set_upper(upper, workdir);
        } else if self.mod_set.is_none() {
            // an overlay needs at least two lower layers
            let dummy = self.paths.dummy_dir();
            std::fs::create_dir_all(&dummy)?;
            options.push_lower(dummy);
        }

        let rendered = options.render();
        tracing::info!("mounting `{}`: {rendered}", self.id);
        self.with_cwd_outside(|| self.backend.mount(&self.id, &rendered, &self.paths.path))?;

        if !self.backend.is_mounted(&self.paths.path) {
            return Err(Error::StateInvalid(format!(
                "{} is not a mountpoint after mounting",
                self.paths.path.display()
            )));
        }
        self.expect_state(GameState::Mounted)?;

        self.run_pre_commands()
    }

    /// Terminate recorded children, unmount, and restore the original
    /// directory layout. A no-op from NORMAL.
    pub fn deactivate(&self) -> Result<()> {
        self.terminate_children();
        match self.classify()? {
            GameState::Normal => return Ok(()),
            GameState::Mounted => {
                self.with_cwd_outside(|| self.backend.unmount(&self.id))?;
                // let the kernel finish tearing the mount down
                std::thread::sleep(SETTLE_DELAY);
            }
            GameState::Moved => {}
            GameState::Invalid(reason) => return Err(Error::StateInvalid(reason)),
        }
        // drop the now-empty mount root and put the original back
        if self.paths.path.exists() {
            std::fs::remove_dir(&self.paths.path)?;
        }
        std::fs::rename(&self.paths.moved_path, &self.paths.path)?;
        Ok(())
    }

    /// Activate, run `command` inside the mounted view, deactivate.
    ///
    /// Errors from the wrapped command are logged, never fatal;
    /// deactivation is always attempted.
    pub fn wrap(&self, command: &Command, writable: bool) -> Result<()> {
        self.activate(writable, false)?;
        match command.run() {
            Ok(Some(mut child)) => {
                if let Err(err) = child.wait() {
                    tracing::warn!("waiting for wrapped command failed: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::error!("wrapped command failed: {err}"),
        }
        std::thread::sleep(SETTLE_DELAY);
        self.deactivate()
    }

    /// Capture an interactive install session as a new mod folder.
    ///
    /// Mounts a writable setup layer over the game, blocks until the user
    /// confirms on standard input, then turns the captured upper directory
    /// into `mod_root/<new_mod_id>`.
    pub fn setup(&self, new_mod_id: &str) -> Result<()> {
        let target = self.config.mod_root_path.join(new_mod_id);
        if target.exists() {
            return Err(Error::Value(format!(
                "mod folder {} already exists",
                target.display()
            )));
        }

        self.activate(true, true)?;
        if let Err(err) = self.setup_session() {
            if let Err(cleanup) = self.deactivate() {
                tracing::error!("cleanup after failed setup also failed: {cleanup}");
            }
            return Err(err);
        }
        self.deactivate()?;

        std::fs::create_dir_all(&self.config.mod_root_path)?;
        std::fs::rename(self.paths.upper_dir(None, true), &target)?;
        tracing::info!("captured new mod at {}", target.display());
        Ok(())
    }

    fn setup_session(&self) -> Result<()> {
        println!(
            "`{}` is mounted with a setup layer on top of {}.",
            self.id,
            self.paths.path.display()
        );
        println!("Install the mod there now, then press Enter to finish.");
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(())
    }

    /// Launch the collected pre-commands and record the still-running ones.
    ///
    /// The list is the global `[[pre_command]]` array (when the effective
    /// run-pre-commands flag is set) followed by the set tree's attached
    /// commands. A command that fails to start is logged and skipped.
    fn run_pre_commands(&self) -> Result<()> {
        let should_run = self.config.run_pre_commands
            || self
                .mod_set
                .as_ref()
                .is_some_and(|set| set.should_run_pre_commands());

        let mut commands: Vec<Command> = Vec::new();
        if should_run {
            commands.extend(self.config.pre_commands()?);
        }
        if let Some(set) = &self.mod_set {
            commands.extend(set.commands().into_iter().cloned());
        }
        if commands.is_empty() {
            return Ok(());
        }

        let mut running = Vec::new();
        for command in &commands {
            match command.run() {
                Ok(Some(child)) => running.push(child),
                Ok(None) => {}
                Err(err) => tracing::warn!("command `{}` failed to start: {err}", command.id),
            }
            if command.delay_after > 0 {
                std::thread::sleep(Duration::from_secs(command.delay_after));
            }
        }

        if !running.is_empty() {
            std::fs::create_dir_all(&self.paths.runtime_dir)?;
            for child in &running {
                std::fs::File::create(self.paths.runtime_dir.join(child.id().to_string()))?;
            }
        }
        Ok(())
    }

    /// Send SIGTERM to every child recorded in the runtime directory and
    /// drop the markers. Children that ignore the signal may keep the
    /// mount busy and fail the subsequent unmount.
    fn terminate_children(&self) {
        let Ok(entries) = std::fs::read_dir(&self.paths.runtime_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            match name.to_string_lossy().parse::<i32>() {
                Ok(pid) => {
                    tracing::debug!("terminating child {pid}");
                    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
                    if rc != 0 {
                        tracing::warn!(
                            "failed to signal pid {pid}: {}",
                            std::io::Error::last_os_error()
                        );
                    }
                }
                Err(_) => tracing::warn!("ignoring stray runtime entry {name:?}"),
            }
            if let Err(err) = std::fs::remove_file(entry.path()) {
                tracing::warn!("failed to remove marker {name:?}: {err}");
            }
        }
    }

    /// Run `f` with the working directory moved outside the mount target,
    /// so this process itself does not hold the mountpoint open.
    fn with_cwd_outside<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let previous = std::env::current_dir().ok();
        std::env::set_current_dir("/")?;
        let result = f();
        if let Some(previous) = previous {
            if let Err(err) = std::env::set_current_dir(&previous) {
                tracing::debug!("could not return to {}: {err}", previous.display());
            }
        }
        result
    }

    fn expect_state(&self, want: GameState) -> Result<()> {
        let state = self.classify()?;
        if state == want {
            Ok(())
        } else {
            Err(Error::StateInvalid(format!("expected {want} but found {state}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    /// In-memory mount boundary: mount/unmount track targets by overlay id,
    /// nothing touches the kernel.
    #[derive(Default)]
    struct FakeState {
        mounted: BTreeMap<String, PathBuf>,
        options: Vec<String>,
        cleaned_workdirs: Vec<PathBuf>,
    }

    #[derive(Clone, Default)]
    struct FakeBackend(Rc<RefCell<FakeState>>);

    impl MountBackend for FakeBackend {
        fn mount(&self, overlay_id: &str, options: &str, target: &Path) -> Result<()> {
            let mut state = self.0.borrow_mut();
            state.options.push(options.to_string());
            state.mounted.insert(overlay_id.to_string(), target.to_path_buf());
            Ok(())
        }

        fn unmount(&self, overlay_id: &str) -> Result<()> {
            self.0.borrow_mut().mounted.remove(overlay_id);
            Ok(())
        }

        fn clean_workdir(&self, _overlay_id: &str, workdir: &Path) -> Result<()> {
            self.0.borrow_mut().cleaned_workdirs.push(workdir.to_path_buf());
            Ok(())
        }

        fn is_mounted(&self, path: &Path) -> bool {
            self.0.borrow().mounted.values().any(|target| target == path)
        }
    }

    struct Fixture {
        tmp: tempfile::TempDir,
        base: BaseDirs,
        backend: FakeBackend,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let base = BaseDirs::from_paths(
                tmp.path().join("config"),
                tmp.path().join("data"),
                tmp.path().join("cache"),
                tmp.path().join("runtime"),
            );
            Fixture {
                tmp,
                base,
                backend: FakeBackend::default(),
            }
        }

        /// Game dir with one file, a mods root, and the listed mod folders.
        fn install(&self, mods: &[&str]) -> (PathBuf, PathBuf) {
            let game_dir = self.tmp.path().join("game");
            std::fs::create_dir_all(&game_dir).unwrap();
            std::fs::write(game_dir.join("game.bin"), "original").unwrap();
            let mod_root = self.tmp.path().join("mods");
            for name in mods {
                std::fs::create_dir_all(mod_root.join(name)).unwrap();
            }
            (game_dir, mod_root)
        }

        fn game(&self, text: &str, set_override: Option<&str>) -> Game {
            let config = GameConfig::parse("g", text, self.tmp.path().join("unused")).unwrap();
            Game::new(
                &self.base,
                config,
                set_override,
                Box::new(self.backend.clone()),
            )
            .unwrap()
        }

        fn last_options(&self) -> String {
            self.backend.0.borrow().options.last().unwrap().clone()
        }
    }

    fn tree_of(dir: &Path) -> Vec<(PathBuf, Option<String>)> {
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(dir).min_depth(1) {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(dir).unwrap().to_path_buf();
            let content = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read_to_string(entry.path()).unwrap());
            entries.push((relative, content));
        }
        entries.sort();
        entries
    }

    #[test]
    fn test_activate_then_deactivate_round_trips() {
        let f = Fixture::new();
        let (game_dir, mod_root) = f.install(&["m"]);
        let original = tree_of(&game_dir);
        let game = f.game(
            &format!(
                "path = \"{}\"\nactive = \"s\"\nmod_root_path = \"{}\"\n[s]\nmods = [\"m\"]\n",
                game_dir.display(),
                mod_root.display()
            ),
            None,
        );

        game.activate(false, false).unwrap();
        assert_eq!(game.classify().unwrap(), GameState::Mounted);
        let moved = game_dir.with_file_name("game_mod-manager");
        assert!(moved.join("game.bin").exists());
        let options = f.last_options();
        assert_eq!(
            options,
            format!(
                "x-gvfs-hide,comment=x-gvfs-hide,lowerdir={}:{}",
                mod_root.join("m").display(),
                moved.display()
            )
        );

        game.deactivate().unwrap();
        assert_eq!(game.classify().unwrap(), GameState::Normal);
        assert!(!moved.exists());
        assert_eq!(tree_of(&game_dir), original);
    }

    #[test]
    fn test_deactivate_from_normal_is_idempotent() {
        let f = Fixture::new();
        let (game_dir, _) = f.install(&[]);
        let game = f.game(&format!("path = \"{}\"\n", game_dir.display()), Some(""));
        game.deactivate().unwrap();
        game.deactivate().unwrap();
        assert_eq!(game.classify().unwrap(), GameState::Normal);
    }

    #[test]
    fn test_reactivate_remounts_with_new_set() {
        let f = Fixture::new();
        let (game_dir, mod_root) = f.install(&["m1", "m2"]);
        let text = format!(
            "path = \"{}\"\nmod_root_path = \"{}\"\n[one]\nmods = [\"m1\"]\n[two]\nmods = [\"m2\"]\n",
            game_dir.display(),
            mod_root.display()
        );
        let first = f.game(&text, Some("one"));
        first.activate(false, false).unwrap();

        let second = f.game(&text, Some("two"));
        second.activate(false, false).unwrap();
        assert_eq!(second.classify().unwrap(), GameState::Mounted);
        assert!(f.last_options().contains(&format!("lowerdir={}", mod_root.join("m2").display())));

        second.deactivate().unwrap();
        assert_eq!(second.classify().unwrap(), GameState::Normal);
    }

    #[test]
    fn test_activation_recovers_from_moved() {
        let f = Fixture::new();
        let (game_dir, mod_root) = f.install(&["m"]);
        let text = format!(
            "path = \"{}\"\nactive = \"s\"\nmod_root_path = \"{}\"\n[s]\nmods = [\"m\"]\n",
            game_dir.display(),
            mod_root.display()
        );
        // simulate a crash between move and mount
        std::fs::rename(&game_dir, game_dir.with_file_name("game_mod-manager")).unwrap();

        let game = f.game(&text, None);
        assert_eq!(game.classify().unwrap(), GameState::Moved);
        game.activate(false, false).unwrap();
        assert_eq!(game.classify().unwrap(), GameState::Mounted);
        game.deactivate().unwrap();
        assert_eq!(game.classify().unwrap(), GameState::Normal);
        assert!(game_dir.join("game.bin").exists());
    }

    #[test]
    fn test_nested_writable_set_induces_writable_mount() {
        let f = Fixture::new();
        let (game_dir, mod_root) = f.install(&["a", "b"]);
        let game = f.game(
            &format!(
                "path = \"{}\"\nmod_root_path = \"{}\"\n\
                 [top]\nmods = [\"a\", \"inner\"]\n\
                 [inner]\nmods = [\"b\"]\nwritable = true\n",
                game_dir.display(),
                mod_root.display()
            ),
            Some("top"),
        );

        game.activate(false, false).unwrap();
        let options = f.last_options();
        let upper = game.paths().cache_dir.join("top_persistent");
        let workdir = game.paths().workdir();
        assert!(options.contains(&format!("upperdir={}", upper.display())));
        assert!(options.contains(&format!("workdir={}", workdir.display())));
        assert!(upper.is_dir());
        assert!(workdir.join("index").is_dir());
        assert!(workdir.join("work").is_dir());
        assert_eq!(f.backend.0.borrow().cleaned_workdirs, vec![workdir]);

        game.deactivate().unwrap();
    }

    #[test]
    fn test_empty_set_mounts_moved_and_dummy_only() {
        let f = Fixture::new();
        let (game_dir, _) = f.install(&[]);
        let game = f.game(
            &format!("path = \"{}\"\nactive = \"missing_is_fine\"\n", game_dir.display()),
            Some(""),
        );

        game.activate(false, false).unwrap();
        let moved = game_dir.with_file_name("game_mod-manager");
        assert_eq!(
            f.last_options(),
            format!(
                "x-gvfs-hide,comment=x-gvfs-hide,lowerdir={}:{}",
                moved.display(),
                game.paths().dummy_dir().display()
            )
        );
        assert!(game.paths().dummy_dir().is_dir());

        game.deactivate().unwrap();
    }

    #[test]
    fn test_activate_from_invalid_fails() {
        let f = Fixture::new();
        let (game_dir, _) = f.install(&[]);
        // both non-empty: unrecoverable by design
        let moved = game_dir.with_file_name("game_mod-manager");
        std::fs::create_dir_all(&moved).unwrap();
        std::fs::write(moved.join("stale.bin"), "x").unwrap();

        let game = f.game(&format!("path = \"{}\"\n", game_dir.display()), Some(""));
        assert!(matches!(
            game.activate(false, false),
            Err(Error::StateInvalid(_))
        ));
    }

    #[test]
    fn test_wrap_restores_normal_layout() {
        let f = Fixture::new();
        let (game_dir, _) = f.install(&[]);
        let game = f.game(&format!("path = \"{}\"\n", game_dir.display()), Some(""));
        let command = Command::wrap(vec!["true".into()], BTreeMap::new()).unwrap();
        game.wrap(&command, false).unwrap();
        assert_eq!(game.classify().unwrap(), GameState::Normal);
        assert!(game_dir.join("game.bin").exists());
    }

    #[test]
    fn test_pre_commands_record_running_children() {
        let f = Fixture::new();
        let (game_dir, mod_root) = f.install(&["m"]);
        let game = f.game(
            &format!(
                "path = \"{}\"\nmod_root_path = \"{}\"\n\
                 [s]\nmods = [\"m\"]\ncommand = \"idle\"\n\
                 [idle]\ncommand = [\"sleep\", \"60\"]\nwait_for_exit = false\n",
                game_dir.display(),
                mod_root.display()
            ),
            Some("s"),
        );

        game.activate(false, false).unwrap();
        let markers: Vec<_> = std::fs::read_dir(&game.paths().runtime_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(markers.len(), 1);
        // deactivate terminates the child and clears the registry
        game.deactivate().unwrap();
        let leftover = std::fs::read_dir(&game.paths().runtime_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
        assert_eq!(game.classify().unwrap(), GameState::Normal);
    }

    #[test]
    fn test_setup_rejects_existing_mod_folder() {
        let f = Fixture::new();
        let (game_dir, mod_root) = f.install(&["taken"]);
        let game = f.game(
            &format!(
                "path = \"{}\"\nmod_root_path = \"{}\"\n",
                game_dir.display(),
                mod_root.display()
            ),
            Some(""),
        );
        assert!(matches!(game.setup("taken"), Err(Error::Value(_))));
        // nothing was mounted or moved
        assert_eq!(game.classify().unwrap(), GameState::Normal);
    }
}
