//! Domain error kinds shared across the workspace.

use std::path::PathBuf;

/// Errors surfaced by configuration loading, mod-set resolution, and the
/// activation state machine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required TOML key, or a table referenced by name, is absent.
    #[error("missing key `{0}` in game configuration")]
    KeyMissing(String),

    /// A list that must have at least one element is empty.
    #[error("`{0}` must not be empty")]
    ArrayEmpty(String),

    /// A value has the wrong type or an impossible content.
    #[error("invalid value: {0}")]
    Value(String),

    /// A leaf mod directory does not exist under the mod root.
    #[error("mod folder not found: {0}")]
    FolderMissing(PathBuf),

    /// A mod set includes itself, directly or transitively.
    #[error("mod set `{0}` includes itself")]
    Recursion(String),

    /// The on-disk layout matches no valid state, or the privileged helper
    /// failed at the mount boundary.
    #[error("invalid game state: {0}")]
    StateInvalid(String),

    /// Underlying filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
