//! Privileged helper contract.
//!
//! Everything that needs root goes through one narrow boundary: an external
//! root-only helper executable invoked through pkexec, keyed by a stable
//! overlay id (the game id). The trait exists so the activation state
//! machine can be driven against a fake in tests; [`PkexecHelper`] is the
//! production client. Arguments are validated on both sides of the
//! boundary, so the client repeats the helper's own checks before paying
//! for an elevation prompt.

use std::path::Path;
use std::process;

use mmcore::error::{Error, Result};

use crate::probe;

/// Name of the root-only helper executable, resolved through `PATH`.
pub const HELPER_PROGRAM: &str = "mod-manager-helper";

/// Helper exit codes for `cleanworkdir` (the client half of the ABI).
const EXIT_STILL_MOUNTED: i32 = 2;
const EXIT_PRECONDITION: i32 = 3;
const EXIT_REMOVAL_FAILED: i32 = 4;

/// The two entries the helper removes from a workdir.
pub const WORKDIR_ENTRIES: [&str; 2] = ["index", "work"];

/// The mount boundary.
///
/// `mount`, `unmount`, and `clean_workdir` execute with elevated privileges
/// in the external helper. `is_mounted` is the unprivileged probe, grouped
/// here so the whole boundary swaps out as one seam.
pub trait MountBackend {
    /// Overlay-mount at `target` using `options`, which must contain
    /// `lowerdir=` and may contain `upperdir=…,workdir=…`.
    fn mount(&self, overlay_id: &str, options: &str, target: &Path) -> Result<()>;

    /// Unmount the overlay registered under `overlay_id`.
    fn unmount(&self, overlay_id: &str) -> Result<()>;

    /// Recursively remove the `index` and `work` entries inside `workdir`.
    ///
    /// The helper refuses while the overlay is mounted, and when `workdir`
    /// is not named `workdir`, its parent basename differs from
    /// `overlay_id`, or it contains anything besides `index` and `work`.
    /// An empty workdir succeeds trivially.
    fn clean_workdir(&self, overlay_id: &str, workdir: &Path) -> Result<()>;

    /// Whether a filesystem is currently mounted exactly at `path`.
    fn is_mounted(&self, path: &Path) -> bool {
        probe::is_mountpoint(path)
    }
}

/// Production client: `pkexec mod-manager-helper <verb> <args…>`.
#[derive(Debug, Clone, Default)]
pub struct PkexecHelper;

impl PkexecHelper {
    fn invoke(&self, args: &[&str]) -> Result<process::ExitStatus> {
        tracing::debug!("pkexec {HELPER_PROGRAM} {}", args.join(" "));
        let status = process::Command::new("pkexec")
            .arg(HELPER_PROGRAM)
            .args(args)
            .status()?;
        Ok(status)
    }
}

impl MountBackend for PkexecHelper {
    fn mount(&self, overlay_id: &str, options: &str, target: &Path) -> Result<()> {
        if !options.contains("lowerdir=") {
            return Err(Error::Value(format!("mount options carry no lowerdir: {options}")));
        }
        let target = target
            .to_str()
            .ok_or_else(|| Error::Value(format!("mount target {} is not valid UTF-8", target.display())))?;
        let status = self.invoke(&["mount", overlay_id, options, target])?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::StateInvalid(format!(
                "helper failed to mount `{overlay_id}` at {target} ({status})"
            )))
        }
    }

    fn unmount(&self, overlay_id: &str) -> Result<()> {
        let status = self.invoke(&["umount", overlay_id])?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::StateInvalid(format!(
                "helper failed to unmount `{overlay_id}` ({status})"
            )))
        }
    }

    fn clean_workdir(&self, overlay_id: &str, workdir: &Path) -> Result<()> {
        validate_workdir(overlay_id, workdir)?;
        let workdir_str = workdir
            .to_str()
            .ok_or_else(|| Error::Value(format!("workdir {} is not valid UTF-8", workdir.display())))?;
        let status = self.invoke(&["cleanworkdir", overlay_id, workdir_str])?;
        if status.success() {
            return Ok(());
        }
        let reason = match status.code() {
            Some(EXIT_STILL_MOUNTED) => "the overlay is still mounted".to_string(),
            Some(EXIT_PRECONDITION) => "the workdir violates the helper's preconditions".to_string(),
            Some(EXIT_REMOVAL_FAILED) => "removal of index/work failed".to_string(),
            _ => format!("{status}"),
        };
        Err(Error::StateInvalid(format!(
            "helper refused to clean workdir of `{overlay_id}`: {reason}"
        )))
    }
}

/// Client half of the workdir precondition checks: `workdir` must be named
/// `workdir` and live directly under a directory named after the overlay.
fn validate_workdir(overlay_id: &str, workdir: &Path) -> Result<()> {
    if workdir.file_name().and_then(|n| n.to_str()) != Some("workdir") {
        return Err(Error::Value(format!(
            "refusing to clean {}: not named `workdir`",
            workdir.display()
        )));
    }
    let parent_name = workdir
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());
    if parent_name != Some(overlay_id) {
        return Err(Error::Value(format!(
            "refusing to clean {}: parent is not `{overlay_id}`",
            workdir.display()
        )));
    }
    Ok(())
}
