//! Cgroup v2 resource limits

use crate::errors::RuntimeError;
use std::{
    fs,
    io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Root of the unified cgroup v2 hierarchy
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// A cgroup directory owned by one supervisor invocation
///
/// The directory is deliberately not removed on drop; limit files stay
/// readable for post-mortem inspection after the container exits.
#[derive(Debug)]
pub struct CgroupHandle {
    path: PathBuf,
}

/// Create a cgroup under the v2 hierarchy and write the requested limits
///
/// Either limit may be absent. Values are written verbatim, so anything the
/// kernel accepts for `cpu.max` (`"100000 100000"`, `"max"`) or `memory.max`
/// (`"100M"`, `"max"`) passes straight through.
pub fn create(
    name: &str,
    cpu_max: Option<&str>,
    memory_max: Option<&str>,
) -> Result<CgroupHandle, RuntimeError> {
    let base = Path::new(CGROUP_ROOT);
    if !base.is_dir() {
        return Err(RuntimeError::CgroupUnavailable(base.to_path_buf()));
    }
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let path = base.join(unique_name(name, unix));

    // plain create, not create_all: a same-second name collision must fail
    // rather than share the directory
    fs::DirBuilder::new()
        .mode(0o755)
        .create(&path)
        .map_err(|source| RuntimeError::CgroupSetup {
            path: path.clone(),
            source,
        })?;

    if let Some(cpu) = cpu_max {
        write_limit(&path, "cpu.max", cpu)?;
    }
    if let Some(memory) = memory_max {
        write_limit(&path, "memory.max", memory)?;
    }
    Ok(CgroupHandle { path })
}

fn unique_name(name: &str, unix_seconds: u64) -> String {
    format!("myruntime-{}-{}", name, unix_seconds)
}

fn write_limit(path: &Path, file: &str, value: &str) -> Result<(), RuntimeError> {
    let limit_path = path.join(file);
    fs::write(&limit_path, value).map_err(|source| RuntimeError::CgroupSetup {
        path: limit_path,
        source,
    })
}

impl CgroupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move `pid` into this cgroup
    ///
    /// Writing a pid to `cgroup.procs` is idempotent, so the supervisor
    /// attaching the child and the child re-attaching itself may both run.
    pub fn attach(&self, pid: i32) -> io::Result<()> {
        attach_pid(&self.path, pid)
    }
}

/// Write `pid` into the `cgroup.procs` of an arbitrary cgroup directory
pub fn attach_pid(path: &Path, pid: i32) -> io::Result<()> {
    fs::write(path.join("cgroup.procs"), pid.to_string())
}
