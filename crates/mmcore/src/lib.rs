//! Domain core for mod-manager.
//!
//! Holds everything that does not touch the mount boundary:
//! - per-game TOML configuration ([`config`])
//! - mod-set resolution into ordered overlay layers ([`modset`])
//! - the pre/custom command model ([`command`])
//! - path derivation under the user base directories ([`paths`])
//! - the shared domain error kinds ([`error`])

pub mod command;
pub mod config;
pub mod error;
pub mod modset;
pub mod paths;

pub use command::Command;
pub use config::GameConfig;
pub use error::Error;
pub use modset::ModSet;
pub use paths::{BaseDirs, GamePaths, PROGRAM_NAME};
