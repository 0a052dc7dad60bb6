//! On-disk game state classification.
//!
//! The state is reconstructed from the filesystem on every invocation and
//! never persisted. After a crash the next run classifies whatever is on
//! disk and recovers from there, so no state file can drift from reality.

use std::fmt;
use std::path::Path;

use mmcore::error::Result;

/// Externally observable state of a game directory pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameState {
    /// Original directory in place, nothing moved aside.
    Normal,
    /// Original moved aside, no overlay mounted (mid-activation, or a
    /// crash between move and mount).
    Moved,
    /// An overlay is mounted at the original path.
    Mounted,
    /// Any other combination, with a diagnostic.
    Invalid(String),
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameState::Normal => write!(f, "NORMAL"),
            GameState::Moved => write!(f, "MOVED"),
            GameState::Mounted => write!(f, "MOUNTED"),
            GameState::Invalid(reason) => write!(f, "INVALID ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirState {
    Absent,
    Empty,
    NonEmpty,
}

fn dir_state(path: &Path) -> Result<DirState> {
    if !path.exists() {
        return Ok(DirState::Absent);
    }
    let mut entries = std::fs::read_dir(path)?;
    Ok(if entries.next().is_none() {
        DirState::Empty
    } else {
        DirState::NonEmpty
    })
}

/// Classify the (original, moved-aside) directory pair.
///
/// Side-effect-free except for one documented cleanup: an empty original
/// directory next to a non-empty moved copy is a leftover mount root from
/// an interrupted activation; it is removed and the state reported as
/// [`GameState::Moved`].
pub fn classify(
    path: &Path,
    moved_path: &Path,
    is_mounted: &dyn Fn(&Path) -> bool,
) -> Result<GameState> {
    let moved = dir_state(moved_path)?;

    match dir_state(path)? {
        DirState::Absent => Ok(match moved {
            DirState::NonEmpty => GameState::Moved,
            DirState::Absent => GameState::Invalid(format!(
                "both {} and {} are absent",
                path.display(),
                moved_path.display()
            )),
            DirState::Empty => GameState::Invalid(format!(
                "{} is absent and {} is empty",
                path.display(),
                moved_path.display()
            )),
        }),
        _ if is_mounted(path) => Ok(match moved {
            DirState::NonEmpty => GameState::Mounted,
            _ => GameState::Invalid(format!(
                "{} is a mountpoint but {} holds no game files",
                path.display(),
                moved_path.display()
            )),
        }),
        DirState::Empty => match moved {
            DirState::NonEmpty => {
                std::fs::remove_dir(path)?;
                Ok(GameState::Moved)
            }
            _ => Ok(GameState::Invalid(format!(
                "{} is empty and {} holds no game files",
                path.display(),
                moved_path.display()
            ))),
        },
        DirState::NonEmpty => Ok(match moved {
            DirState::NonEmpty => GameState::Invalid(format!(
                "both {} and {} are non-empty",
                path.display(),
                moved_path.display()
            )),
            _ => GameState::Normal,
        }),
    }
}
