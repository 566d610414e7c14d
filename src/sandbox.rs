//! Sandbox supervision: one container, run to completion
//!
//! The supervisor prepares everything on the host (rootfs, overlay, cgroup,
//! bridge), then clones this binary into fresh namespaces. The re-entered
//! binary takes the init path (see [crate::init]) and execs the user
//! command; the supervisor waits for it and tears down.

use crate::{
    cgroup::{self, CgroupHandle},
    errors::RuntimeError,
    image::{self, ImageName},
    init,
    network::{self, PortMap},
    overlay::OverlayFs,
};
use nix::{
    sched::{self, CloneFlags},
    sys::signal::Signal,
    sys::wait::{waitpid, WaitStatus},
    unistd::{self, Pid},
};
use std::{env, ffi::CString, fs, path::Path};

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Everything needed to run one container
///
/// Optional strings distinguish "flag unset" from "flag set to empty"; only
/// a set flag reaches the child environment.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub name: String,
    pub image: String,
    pub command: String,
    pub cpu_max: Option<String>,
    pub memory_max: Option<String>,
    pub cap_add: Option<String>,
    pub cap_drop: Option<String>,
    pub publish: Vec<String>,
    pub bridge: String,
    pub bridge_cidr: String,
}

/// Status of an exited container, analogous to [std::process::ExitStatus]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ExitStatus {
    pub(crate) code: i32,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

/// Run one container to completion and return its exit status
///
/// Setup failures before the clone are fatal and leave no child behind.
/// After the clone, cgroup attach and per-mapping network failures only
/// degrade the container; it runs on without them.
pub fn run(config: &SandboxConfig) -> Result<ExitStatus, RuntimeError> {
    let image: ImageName = config.image.parse()?;

    let work_root = env::temp_dir().join("myruntime").join(&config.name);
    let lower = work_root.join("lower");
    let upper = work_root.join("upper");
    let work = work_root.join("work");
    let rootfs = work_root.join("rootfs");

    log::info!("pulling image {}", image);
    image::export_rootfs(&image, &lower)?;

    log::info!("mounting overlay rootfs at {:?}", rootfs);
    let overlay = OverlayFs::new(lower, upper, work, rootfs.clone());
    let mount_guard = overlay.mount()?;

    let cgroup = if config.cpu_max.is_some() || config.memory_max.is_some() {
        let handle = cgroup::create(
            &config.name,
            config.cpu_max.as_deref(),
            config.memory_max.as_deref(),
        )?;
        log::info!("created cgroup {:?}", handle.path());
        Some(handle)
    } else {
        None
    };

    let port_maps = parse_port_maps(&config.publish)?;

    network::ensure_bridge(&config.bridge, &config.bridge_cidr)?;

    log::info!("running sandbox");
    let child = spawn_init(config, &rootfs, cgroup.as_ref())?;
    log::debug!("sandbox child started, pid {}", child);

    // the child may already be past its own init stages here; both attach
    // and veth setup tolerate that
    if let Some(handle) = &cgroup {
        if let Err(err) = handle.attach(child.as_raw()) {
            log::warn!("adding pid {} to cgroup: {}", child, err);
        }
    }
    for map in &port_maps {
        match network::setup_veth_and_port_binding(
            child.as_raw(),
            &config.bridge,
            &config.bridge_cidr,
            map,
        ) {
            Ok(address) => {
                log::info!(
                    "port {} forwarded to container {}:{}",
                    map.host,
                    address,
                    map.container
                )
            }
            Err(err) => log::warn!("network setup failed for publish {}: {}", map, err),
        }
    }

    let status = wait_for_exit(child)?;
    log::info!("container exited with code {}", status.code());

    drop(mount_guard);
    if let Err(err) = fs::remove_dir_all(&work_root) {
        log::debug!("cleanup of {:?} failed: {}", work_root, err);
    }
    Ok(status)
}

fn parse_port_maps(publish: &[String]) -> Result<Vec<PortMap>, RuntimeError> {
    publish
        .iter()
        .map(|mapping| mapping.trim())
        .filter(|mapping| !mapping.is_empty())
        .map(|mapping| mapping.parse().map_err(RuntimeError::from))
        .collect()
}

/// Clone the init child into its new namespaces
///
/// The child re-execs `/proc/self/exe` with the init contract appended to
/// the inherited environment and stdio left alone. UTS, PID, mount, network
/// and IPC namespaces are requested at clone time; user namespaces are
/// deliberately not.
fn spawn_init(
    config: &SandboxConfig,
    rootfs: &Path,
    cgroup: Option<&CgroupHandle>,
) -> Result<Pid, RuntimeError> {
    let exe = CString::new("/proc/self/exe")?;

    let mut env_block: Vec<CString> = Vec::new();
    for (key, value) in env::vars() {
        env_block.push(CString::new(format!("{}={}", key, value))?);
    }
    let mut contract = vec![
        (init::IS_CHILD, "1".to_owned()),
        (init::ROOTFS, rootfs.display().to_string()),
        (init::CMD, config.command.clone()),
        (init::HOSTNAME, config.name.clone()),
        (init::BRIDGE, config.bridge.clone()),
        (init::BRIDGE_CIDR, config.bridge_cidr.clone()),
    ];
    if let Some(handle) = cgroup {
        contract.push((init::CGROUP, handle.path().display().to_string()));
    }
    if let Some(add) = &config.cap_add {
        if !add.is_empty() {
            contract.push((init::CAP_ADD, add.clone()));
        }
    }
    if let Some(drop) = &config.cap_drop {
        if !drop.is_empty() {
            contract.push((init::CAP_DROP, drop.clone()));
        }
    }
    for (key, value) in contract {
        env_block.push(CString::new(format!("{}={}", key, value))?);
    }

    let argv = [exe.clone()];
    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let flags = CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWIPC;

    sched::clone(
        Box::new(|| {
            let argv: Vec<&std::ffi::CStr> = argv.iter().map(|arg| arg.as_c_str()).collect();
            let envp: Vec<&std::ffi::CStr> =
                env_block.iter().map(|var| var.as_c_str()).collect();
            let _ = unistd::execve(&exe, &argv, &envp);
            // only reachable when the exec itself failed
            127
        }),
        &mut stack,
        flags,
        Some(Signal::SIGCHLD as libc::c_int),
    )
    .map_err(RuntimeError::CloneNamespaces)
}

fn wait_for_exit(child: Pid) -> Result<ExitStatus, RuntimeError> {
    loop {
        match waitpid(child, None).map_err(RuntimeError::Wait)? {
            WaitStatus::Exited(_, code) => return Ok(ExitStatus { code }),
            WaitStatus::Signaled(_, signal, _) => {
                return Ok(ExitStatus {
                    code: 128 + signal as i32,
                })
            }
            other => log::trace!("intermediate wait status {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_maps_parse_up_front() {
        let maps = parse_port_maps(&["8080:80".to_owned(), " 4443:443 ".to_owned()]).unwrap();
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0], PortMap { host: 8080, container: 80 });
    }

    #[test]
    fn empty_mappings_are_skipped() {
        let maps = parse_port_maps(&["".to_owned(), "  ".to_owned()]).unwrap();
        assert!(maps.is_empty());
    }

    #[test]
    fn bad_mapping_is_fatal_config() {
        assert!(parse_port_maps(&["nope".to_owned()]).is_err());
    }
}
