//! Root filesystem entry.

use crate::error::{Error, Result};
use nix::unistd::{chdir, chroot};
use std::path::Path;

/// Enters a chroot at `root` and resets the working directory to `/`.
///
/// Requires CAP_SYS_CHROOT, granted to in-namespace root when a user
/// namespace owns the mount namespace, or via host root.
pub fn enter_chroot(root: &Path) -> Result<()> {
    chroot(root).map_err(|e| Error::kernel("chroot", e))?;
    chdir("/").map_err(|e| Error::kernel("chdir", e))?;
    Ok(())
}
