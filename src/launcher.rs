//! Two-phase namespace launcher.
//!
//! New namespaces cannot be applied to the current process because several
//! side-effects (private `/proc`, chroot, cgroup join) must happen *inside*
//! them. The launcher therefore re-executes itself:
//!
//! - **Phase 1 (parent)**: encode the [`LaunchConfig`] as argv behind a
//!   sentinel subcommand, then `clone(2)` with the union of the requested
//!   `CLONE_NEW*` flags and exec `/proc/self/exe` in the child. Carrying the
//!   configuration as argv is deliberate: it survives the exec and is
//!   auditable in `ps` output.
//! - **Phase 2 (child)**: dispatch on the sentinel and apply side-effects in
//!   a strictly ordered sequence (hostname, chroot, workdir, mount
//!   privatisation, `/proc`, cgroup) before running the user command.
//!   Reordering produces either a kernel refusal or leakage to the host
//!   (mounting `/proc` before privatising `/` pollutes the host mount table).
//!
//! For a user namespace the child writes its own id maps before the re-exec:
//! `setgroups` must be denied before `gid_map` is written, and both maps pin
//! in-namespace uid/gid 0 to the invoking user, which is what makes the
//! container rootless-but-root-inside.
//!
//! If the configuration is entirely empty the parent skips the re-exec and
//! runs the command directly, keeping the runtime usable as a transparent
//! shell.

use crate::constants::{CHILD_SENTINEL, CHILD_STACK_SIZE};
use crate::error::{Error, Result};
use crate::{cgroup, exec, rootfs};
use nix::mount::{MsFlags, mount, umount};
use nix::sched::{CloneFlags, clone};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Gid, Uid, getgid, getuid, sethostname, setgid, setuid};
use std::env;
use std::ffi::CString;
use std::fs;
use std::path::Path;
use tracing::debug;

// =============================================================================
// Launch Configuration
// =============================================================================

/// Isolation and resource configuration for one launch.
///
/// Empty strings, `false`, and non-positive numbers all mean "do not apply".
/// A non-empty hostname implies the UTS namespace; a positive memory or CPU
/// limit implies a cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    pub hostname: String,
    pub use_uts: bool,
    pub rootfs: String,
    pub use_pid: bool,
    pub use_mnt: bool,
    pub use_user: bool,
    /// Memory limit in bytes (0 = unlimited).
    pub mem_bytes: i64,
    /// CPU limit in percent (0 or >= 100 = unlimited).
    pub cpu_percent: u32,
    pub workdir: String,
    /// `KEY=VAL` overrides appended to the inherited environment.
    pub env: Vec<String>,
}

impl LaunchConfig {
    /// True when nothing is requested, enabling the direct fast path.
    pub fn is_empty(&self) -> bool {
        self.hostname.is_empty()
            && self.rootfs.is_empty()
            && !self.use_pid
            && !self.use_mnt
            && !self.use_user
            && self.mem_bytes == 0
            && self.cpu_percent == 0
            && self.workdir.is_empty()
            && self.env.is_empty()
    }

    /// Union of the requested `CLONE_NEW*` flags.
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.use_uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if self.use_pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.use_mnt {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.use_user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        flags
    }

    // =========================================================================
    // Sentinel argv codec
    // =========================================================================

    /// Encodes the configuration and user command as sentinel argv:
    /// `[__ccrun_child__, <flags>, --, <cmd>, <args>...]`.
    pub fn to_sentinel_args(&self, command: &str, args: &[String]) -> Vec<String> {
        let mut argv = vec![CHILD_SENTINEL.to_string()];
        if self.use_uts {
            argv.push("--uts".to_string());
            argv.push("--hostname".to_string());
            argv.push(self.hostname.clone());
        }
        if !self.rootfs.is_empty() {
            argv.push("--rootfs".to_string());
            argv.push(self.rootfs.clone());
        }
        if self.use_pid {
            argv.push("--pidns".to_string());
        }
        if self.use_mnt {
            argv.push("--mntns".to_string());
        }
        if self.use_user {
            argv.push("--userns".to_string());
        }
        if self.mem_bytes > 0 {
            argv.push("--mem".to_string());
            argv.push((self.mem_bytes / 1024 / 1024).to_string());
        }
        if self.cpu_percent > 0 {
            argv.push("--cpu".to_string());
            argv.push(self.cpu_percent.to_string());
        }
        if !self.workdir.is_empty() {
            argv.push("--workdir".to_string());
            argv.push(self.workdir.clone());
        }
        for pair in &self.env {
            argv.push("--env".to_string());
            argv.push(pair.clone());
        }
        argv.push("--".to_string());
        argv.push(command.to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Parses sentinel argv (everything after the sentinel itself) back into
    /// a configuration, user command, and arguments.
    pub fn parse_sentinel_args(args: &[String]) -> Result<(LaunchConfig, String, Vec<String>)> {
        let mut cfg = LaunchConfig::default();
        let mut rest: Vec<String> = Vec::new();
        let mut i = 0;

        let value = |args: &[String], i: usize, flag: &str| -> Result<String> {
            args.get(i + 1)
                .cloned()
                .ok_or_else(|| Error::Usage(format!("{} requires a value", flag)))
        };

        while i < args.len() {
            match args[i].as_str() {
                "--uts" => {
                    cfg.use_uts = true;
                    i += 1;
                }
                "--hostname" => {
                    cfg.hostname = value(args, i, "--hostname")?;
                    i += 2;
                }
                "--rootfs" => {
                    cfg.rootfs = value(args, i, "--rootfs")?;
                    i += 2;
                }
                "--pidns" => {
                    cfg.use_pid = true;
                    i += 1;
                }
                "--mntns" => {
                    cfg.use_mnt = true;
                    i += 1;
                }
                "--userns" => {
                    cfg.use_user = true;
                    i += 1;
                }
                "--mem" => {
                    let mb: i64 = value(args, i, "--mem")?
                        .parse()
                        .map_err(|_| Error::Usage("--mem expects a number".to_string()))?;
                    cfg.mem_bytes = mb * 1024 * 1024;
                    i += 2;
                }
                "--cpu" => {
                    cfg.cpu_percent = value(args, i, "--cpu")?
                        .parse()
                        .map_err(|_| Error::Usage("--cpu expects a number".to_string()))?;
                    i += 2;
                }
                "--workdir" => {
                    cfg.workdir = value(args, i, "--workdir")?;
                    i += 2;
                }
                "--env" => {
                    cfg.env.push(value(args, i, "--env")?);
                    i += 2;
                }
                "--" => {
                    rest = args[i + 1..].to_vec();
                    break;
                }
                other => {
                    return Err(Error::Usage(format!("child: unknown flag '{}'", other)));
                }
            }
        }

        if rest.is_empty() {
            return Err(Error::Usage("child: missing <cmd>".to_string()));
        }

        let command = rest.remove(0);
        Ok((cfg, command, rest))
    }
}

// =============================================================================
// Phase 1: Parent
// =============================================================================

/// Clones a child with the requested namespace flags and re-executes this
/// binary into the sentinel path. Returns the child's exit code.
pub fn spawn_child(cfg: &LaunchConfig, command: &str, args: &[String]) -> Result<i32> {
    let exe = env::current_exe()?;
    let exe_c = CString::new(exe.into_os_string().into_encoded_bytes()).map_err(|_| {
        Error::SpawnFailed {
            command: command.to_string(),
            reason: "executable path contains NUL".to_string(),
        }
    })?;

    let mut argv_c = vec![exe_c.clone()];
    for arg in cfg.to_sentinel_args(command, args) {
        argv_c.push(CString::new(arg).map_err(|_| Error::SpawnFailed {
            command: command.to_string(),
            reason: "argument contains NUL".to_string(),
        })?);
    }

    let flags = cfg.clone_flags();
    let use_user = cfg.use_user;
    // Captured before the clone: inside a new user namespace getuid() reports
    // the overflow id until the maps are written.
    let host_uid = getuid();
    let host_gid = getgid();

    debug!("Cloning child with flags {:?}", flags);

    let child_body = move || -> isize {
        if use_user {
            if let Err(e) = become_namespace_root(host_uid, host_gid) {
                eprintln!("ccrun: user namespace setup: {}", e);
                return 1;
            }
        }
        match nix::unistd::execv(&exe_c, &argv_c) {
            Ok(infallible) => match infallible {},
            Err(e) => {
                eprintln!("ccrun: re-exec: {}", e);
                1
            }
        }
    };

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    // SAFETY: the child body only execs or exits; it does not touch parent
    // state beyond the moved captures, and the stack outlives the clone call
    // because we immediately block in waitpid.
    let pid = unsafe { clone(Box::new(child_body), &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| Error::kernel("clone", e))?;

    match waitpid(pid, None).map_err(|e| Error::kernel("waitpid", e))? {
        WaitStatus::Exited(_, code) => Ok(code),
        WaitStatus::Signaled(_, signal, _) => Ok(128 + signal as i32),
        _ => Ok(1),
    }
}

/// Maps in-namespace uid/gid 0 to the invoking user and assumes it.
///
/// Order is kernel-mandated: `setgroups` must be denied before `gid_map`
/// is written, and a process may only map its own ids once it has done so.
fn become_namespace_root(host_uid: Uid, host_gid: Gid) -> Result<()> {
    fs::write("/proc/self/setgroups", "deny")?;
    fs::write("/proc/self/gid_map", format!("0 {} 1", host_gid.as_raw()))?;
    fs::write("/proc/self/uid_map", format!("0 {} 1", host_uid.as_raw()))?;
    setgid(Gid::from_raw(0)).map_err(|e| Error::kernel("setgid", e))?;
    setuid(Uid::from_raw(0)).map_err(|e| Error::kernel("setuid", e))?;
    Ok(())
}

// =============================================================================
// Phase 2: Child
// =============================================================================

/// Sentinel entry point: applies the configured side-effects in order, runs
/// the user command, and tears down what it set up.
pub fn child_main(cfg: &LaunchConfig, command: &str, args: &[String]) -> Result<i32> {
    // 1. Hostname, only meaningful inside the UTS namespace.
    if cfg.use_uts && !cfg.hostname.is_empty() {
        sethostname(&cfg.hostname).map_err(|e| Error::kernel("sethostname", e))?;
    }

    // 2. Root filesystem.
    if !cfg.rootfs.is_empty() {
        rootfs::enter_chroot(Path::new(&cfg.rootfs))?;
    }

    // 3. Working directory.
    if !cfg.workdir.is_empty() {
        nix::unistd::chdir(Path::new(&cfg.workdir)).map_err(|e| Error::kernel("chdir", e))?;
    }

    // 4. Privatise mount propagation. The recursive bind of / onto itself
    //    must come first: marking / private directly fails on some kernels.
    if cfg.use_mnt {
        mount(
            Some("/"),
            "/",
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| Error::kernel("bind mount /", e))?;
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_PRIVATE | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| Error::kernel("mount private /", e))?;
    }

    // 5. A fresh procfs so process listings reflect the PID namespace.
    let mut proc_mounted = false;
    if cfg.use_pid {
        mount(
            Some("proc"),
            "/proc",
            Some("proc"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| Error::kernel("mount /proc", e))?;
        proc_mounted = true;
    }

    // 6. Resource limits.
    let mut cgroup_path = None;
    if cfg.mem_bytes > 0 || cfg.cpu_percent > 0 {
        cgroup_path = Some(cgroup::setup_and_enter(cfg.mem_bytes, cfg.cpu_percent)?);
    }

    // 7-8. Environment union and the user command itself.
    let run_result = exec::exec_passthrough(command, args, &cfg.env);

    // Teardown is best-effort: the kernel may still be draining.
    if proc_mounted {
        let _ = umount("/proc");
    }
    if let Some(path) = cgroup_path {
        cgroup::cleanup(&path);
    }

    run_result
}
