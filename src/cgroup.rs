//! Cgroup v2 resource limits.
//!
//! Detects the unified hierarchy by filesystem magic, mounting it if absent,
//! then creates a per-container group `ccrun-<pid>`, writes `memory.max` and
//! `cpu.max`, and joins by writing the current PID to `cgroup.procs`.
//!
//! Cleanup is best-effort: a group that still has draining members is removed
//! by the kernel once empty, so removal errors are swallowed.

use crate::constants::{
    CGROUP_NAME_PREFIX, CGROUP_ROOT, CPU_PERIOD_USEC, MIN_CPU_QUOTA_USEC,
};
use crate::error::{Error, Result};
use nix::mount::{MsFlags, mount};
use nix::sys::statfs::{CGROUP2_SUPER_MAGIC, statfs};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;

/// Reports whether `/sys/fs/cgroup` is a cgroup-v2 mount.
pub fn is_cgroup_v2() -> bool {
    statfs(CGROUP_ROOT)
        .map(|stat| stat.filesystem_type() == CGROUP2_SUPER_MAGIC)
        .unwrap_or(false)
}

/// Ensures the unified hierarchy is mounted at [`CGROUP_ROOT`].
pub fn ensure_mounted() -> Result<()> {
    if is_cgroup_v2() {
        return Ok(());
    }
    mount(
        Some("none"),
        CGROUP_ROOT,
        Some("cgroup2"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| Error::kernel("mount cgroup2", e))
}

/// Encodes `memory.max`: integer bytes, or `max` for no limit.
pub fn memory_max_value(mem_bytes: i64) -> String {
    if mem_bytes <= 0 {
        "max".to_string()
    } else {
        mem_bytes.to_string()
    }
}

/// Encodes `cpu.max` as `<quota> <period>` microseconds, clamping the quota
/// to the kernel minimum; 0 or >= 100 percent means unlimited.
pub fn cpu_max_value(cpu_percent: u32) -> String {
    if cpu_percent == 0 || cpu_percent >= 100 {
        return "max".to_string();
    }
    let quota = (CPU_PERIOD_USEC * u64::from(cpu_percent) / 100).max(MIN_CPU_QUOTA_USEC);
    format!("{} {}", quota, CPU_PERIOD_USEC)
}

/// Creates `ccrun-<pid>`, writes the limits, and joins the current process.
/// Returns the group path for later cleanup.
pub fn setup_and_enter(mem_bytes: i64, cpu_percent: u32) -> Result<PathBuf> {
    ensure_mounted()?;

    let path = Path::new(CGROUP_ROOT).join(format!("{}{}", CGROUP_NAME_PREFIX, process::id()));
    fs::create_dir_all(&path).map_err(|e| Error::CgroupSetup {
        path: path.clone(),
        reason: format!("mkdir: {}", e),
    })?;

    write_control(&path, "memory.max", &memory_max_value(mem_bytes))?;
    write_control(&path, "cpu.max", &cpu_max_value(cpu_percent))?;
    write_control(&path, "cgroup.procs", &process::id().to_string())?;

    debug!("Joined cgroup {}", path.display());
    Ok(path)
}

/// Best-effort removal of the per-container group. The kernel may still be
/// draining members; failures are ignored.
pub fn cleanup(path: &Path) {
    let _ = fs::remove_dir(path);
}

fn write_control(group: &Path, file: &str, value: &str) -> Result<()> {
    let target = group.join(file);
    fs::write(&target, value).map_err(|e| Error::CgroupSetup {
        path: target,
        reason: e.to_string(),
    })
}
