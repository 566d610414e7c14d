//! The init path: what this binary does when re-entered inside the new
//! namespaces
//!
//! The supervisor re-execs `/proc/self/exe` with [IS_CHILD] set; the CLI
//! checks [is_child] before any argument parsing and hands over to
//! [main_child], which never returns to the supervisor code path.

use crate::{capabilities::CapabilitySpec, cgroup, errors::RuntimeError};
use nix::{
    mount::{mount, MsFlags},
    unistd,
};
use std::{env, ffi::CString, path::Path, process};

/// Environment contract between supervisor and init. Private to this binary;
/// the names only have to be consistent on both sides.
pub const IS_CHILD: &str = "MYRUNTIME_IS_CHILD";
pub const ROOTFS: &str = "MYRUNTIME_ROOTFS";
pub const CMD: &str = "MYRUNTIME_CMD";
pub const CGROUP: &str = "MYRUNTIME_CGROUP";
pub const CAP_ADD: &str = "MYRUNTIME_CAP_ADD";
pub const CAP_DROP: &str = "MYRUNTIME_CAP_DROP";
pub const HOSTNAME: &str = "MYRUNTIME_HOSTNAME";
pub const BRIDGE: &str = "MYRUNTIME_BRIDGE";
pub const BRIDGE_CIDR: &str = "MYRUNTIME_BRIDGE_CIDR";

/// True when this process is the re-exec'd container init
pub fn is_child() -> bool {
    env::var(IS_CHILD).map(|value| value == "1").unwrap_or(false)
}

/// Run the init sequence and leave the process
///
/// On the happy path this execs the user command and never comes back. An
/// empty command exits 0 without an exec attempt; any fatal init error exits
/// non-zero.
pub fn main_child() -> ! {
    match run_child() {
        Ok(code) => process::exit(code),
        Err(err) => {
            log::error!("container init failed: {}", err);
            process::exit(1);
        }
    }
}

fn run_child() -> Result<i32, RuntimeError> {
    let rootfs = env::var(ROOTFS).map_err(|_| RuntimeError::MissingInitEnv(ROOTFS))?;
    let cmdline = env::var(CMD).unwrap_or_default();
    let cgroup_path = env::var(CGROUP).ok();
    let cap_add = env::var(CAP_ADD).ok();
    let cap_drop = env::var(CAP_DROP).ok();
    let hostname = env::var(HOSTNAME).ok();

    if let (Ok(bridge), Ok(cidr)) = (env::var(BRIDGE), env::var(BRIDGE_CIDR)) {
        // the veth peer shows up in our namespace whenever the host gets
        // around to moving it; nothing to wait for here
        log::debug!("expecting network on bridge {} ({})", bridge, cidr);
    }

    let proc_target = Path::new(&rootfs).join("proc");
    if let Err(err) = mount(
        Some("proc"),
        &proc_target,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    ) {
        log::warn!("mount proc: {}", err);
    }

    if let Some(hostname) = &hostname {
        if let Err(err) = unistd::sethostname(hostname) {
            log::warn!("sethostname: {}", err);
        }
    }

    unistd::chroot(rootfs.as_str()).map_err(RuntimeError::Chroot)?;
    unistd::chdir("/").map_err(RuntimeError::Chdir)?;

    if let Some(path) = &cgroup_path {
        if let Err(err) = cgroup::attach_pid(Path::new(path), process::id() as i32) {
            log::warn!("join cgroup: {}", err);
        }
    }

    if cap_add.is_some() || cap_drop.is_some() {
        let spec = CapabilitySpec::parse(
            cap_add.as_deref().unwrap_or(""),
            cap_drop.as_deref().unwrap_or(""),
        );
        spec.apply()?;
    }

    let argv = split_command(&cmdline);
    if argv.is_empty() {
        return Ok(0);
    }
    let argv: Vec<CString> = argv
        .into_iter()
        .map(CString::new)
        .collect::<Result<_, _>>()?;
    let argv_refs: Vec<&std::ffi::CStr> = argv.iter().map(|arg| arg.as_c_str()).collect();

    // environment is inherited through execv
    match unistd::execv(argv_refs[0], &argv_refs) {
        Err(err) => Err(RuntimeError::Exec(err)),
        Ok(_) => unreachable!(),
    }
}

/// Whitespace-split command line, as the `--cmd` flag documents
pub fn split_command(cmdline: &str) -> Vec<String> {
    cmdline
        .split_whitespace()
        .map(|part| part.to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_split_on_whitespace() {
        assert_eq!(
            split_command("/bin/sh -c 'echo hi'"),
            vec!["/bin/sh", "-c", "'echo", "hi'"]
        );
        assert_eq!(split_command("/bin/true"), vec!["/bin/true"]);
    }

    #[test]
    fn empty_command_means_no_exec() {
        assert!(split_command("").is_empty());
        assert!(split_command("   \t ").is_empty());
    }
}
