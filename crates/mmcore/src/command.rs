//! Pre/custom command model.
//!
//! A command is an argv vector launched after mount and before the main
//! consumer, with an environment overlay and simple wait/delay semantics.
//! The argv is passed to the spawn primitive verbatim; there is no shell
//! expansion.

use std::collections::BTreeMap;
use std::process::{self, Child};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Id given to the ad-hoc command built for `wrap`.
pub const WRAP_COMMAND_ID: &str = "wrap";

fn default_wait() -> bool {
    true
}

/// Declarative shape of a `[<commandName>]` table or one `[[pre_command]]`
/// entry. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct CommandSpec {
    command: Vec<String>,
    #[serde(default = "default_wait")]
    wait_for_exit: bool,
    #[serde(default)]
    delay_after: u64,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

/// An auxiliary process to launch while the overlay is mounted.
#[derive(Debug, Clone)]
pub struct Command {
    /// Config key the command was declared under, or [`WRAP_COMMAND_ID`].
    pub id: String,
    /// Argv, passed verbatim.
    pub argv: Vec<String>,
    /// Block until the child exits instead of handing the handle back.
    pub wait_for_exit: bool,
    /// Seconds to sleep after launching, before the next command.
    pub delay_after: u64,
    /// Environment overlaid onto the parent environment.
    pub environment: BTreeMap<String, String>,
}

impl Command {
    /// Build a command from its config table.
    pub fn from_table(id: &str, table: &toml::Table) -> Result<Self> {
        if !table.contains_key("command") {
            return Err(Error::KeyMissing(format!("{id}.command")));
        }
        let spec: CommandSpec = table
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| Error::Value(format!("command `{id}`: {}", e.message())))?;
        if spec.command.is_empty() {
            return Err(Error::ArrayEmpty(format!("{id}.command")));
        }
        if spec.command.iter().any(String::is_empty) {
            return Err(Error::Value(format!("command `{id}` contains an empty argument")));
        }
        Ok(Command {
            id: id.to_string(),
            argv: spec.command,
            wait_for_exit: spec.wait_for_exit,
            delay_after: spec.delay_after,
            environment: spec.environment,
        })
    }

    /// Build the ad-hoc command for `wrap` from a raw argv.
    pub fn wrap(argv: Vec<String>, environment: BTreeMap<String, String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::ArrayEmpty("wrapped command".into()));
        }
        Ok(Command {
            id: WRAP_COMMAND_ID.to_string(),
            argv,
            wait_for_exit: true,
            delay_after: 0,
            environment,
        })
    }

    /// Spawn the argv with the environment overlay.
    ///
    /// Blocks until exit and returns no handle when `wait_for_exit` is set;
    /// otherwise hands the live child back to the caller. A failure to
    /// spawn is returned, the caller decides whether it is fatal.
    pub fn run(&self) -> Result<Option<Child>> {
        tracing::debug!("running `{}`: {:?}", self.id, self.argv);
        let mut cmd = process::Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        for (key, value) in &self.environment {
            cmd.env(key, value);
        }
        let mut child = cmd.spawn()?;
        if self.wait_for_exit {
            let status = child.wait()?;
            if !status.success() {
                tracing::warn!("command `{}` exited with {status}", self.id);
            }
            Ok(None)
        } else {
            Ok(Some(child))
        }
    }
}
