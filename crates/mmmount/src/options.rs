//! Overlay mount option string assembly.
//!
//! The option string is the ABI with the privileged helper:
//! `x-gvfs-hide,comment=x-gvfs-hide,lowerdir=<A>:<B>…[,upperdir=<U>,workdir=<W>]`.
//! Lower directories are listed highest-priority first; the caller appends
//! the moved-aside original as the last (lowest) layer.

use std::path::PathBuf;

const BASE_OPTIONS: &str = "x-gvfs-hide,comment=x-gvfs-hide";

/// Builder for one overlay mount invocation.
#[derive(Debug, Clone, Default)]
pub struct OverlayOptions {
    lower_dirs: Vec<PathBuf>,
    upper: Option<(PathBuf, PathBuf)>,
}

impl OverlayOptions {
    pub fn new(lower_dirs: Vec<PathBuf>) -> Self {
        OverlayOptions {
            lower_dirs,
            upper: None,
        }
    }

    /// Append a lower directory below everything added so far.
    pub fn push_lower(&mut self, dir: impl Into<PathBuf>) {
        self.lower_dirs.push(dir.into());
    }

    /// Make the mount writable through `upper`, with `workdir` as the
    /// overlay scratch area (must be on the same filesystem).
    pub fn set_upper(&mut self, upper: impl Into<PathBuf>, workdir: impl Into<PathBuf>) {
        self.upper = Some((upper.into(), workdir.into()));
    }

    pub fn is_writable(&self) -> bool {
        self.upper.is_some()
    }

    /// Render the helper option string.
    pub fn render(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        let mut options = format!("{BASE_OPTIONS},lowerdir={lowers}");
        if let Some((upper, workdir)) = &self.upper {
            options.push_str(&format!(
                ",upperdir={},workdir={}",
                upper.display(),
                workdir.display()
            ));
        }
        options
    }
}
