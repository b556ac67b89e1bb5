//! User-command execution with exit-code passthrough.

use crate::error::{Error, Result};
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

/// Runs the user command with inherited stdio and the host environment plus
/// `KEY=VAL` overrides, returning its exit code. Termination by signal maps
/// to the shell convention `128 + signo`; failure to start is an error the
/// caller reports as exit 1.
pub fn exec_passthrough(command: &str, args: &[String], env_overrides: &[String]) -> Result<i32> {
    let mut child = Command::new(command);
    child.args(args);
    for pair in env_overrides {
        if let Some((key, value)) = pair.split_once('=') {
            child.env(key, value);
        }
    }

    let status = child.status().map_err(|e| Error::SpawnFailed {
        command: command.to_string(),
        reason: e.to_string(),
    })?;

    Ok(status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
}
