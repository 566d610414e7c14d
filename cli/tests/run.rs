//! End-to-end scenarios for the myruntime binary
//!
//! Everything beyond the surface checks needs root, a kernel with overlay
//! support, and registry access, so those tests are opt-in via
//! `cargo test -- --ignored`.

use std::process::Command;

fn myruntime() -> Command {
    Command::new(env!("CARGO_BIN_EXE_myruntime"))
}

#[test]
fn help_lists_the_runtime_flags() {
    let output = myruntime().arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--image",
        "--cmd",
        "--name",
        "--cpu",
        "--memory",
        "--cap-add",
        "--cap-drop",
        "--publish",
        "--bridge",
        "--bridge-cidr",
    ] {
        assert!(help.contains(flag), "missing {} in --help output", flag);
    }
}

#[test]
fn unknown_flags_are_rejected() {
    let output = myruntime().arg("--no-such-flag").output().unwrap();
    assert!(!output.status.success());
}

#[test]
#[ignore = "requires root and kernel namespace support"]
fn empty_command_exits_zero_without_exec() {
    let rootfs = tempfile::tempdir().unwrap();
    let output = myruntime()
        .env("MYRUNTIME_IS_CHILD", "1")
        .env("MYRUNTIME_ROOTFS", rootfs.path())
        .env("MYRUNTIME_CMD", "")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[test]
#[ignore = "requires root, kernel namespaces, and registry access"]
fn busybox_true_exits_zero() {
    let output = myruntime()
        .args(["--image", "busybox", "--cmd", "/bin/true", "--name", "e2e-true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[test]
#[ignore = "requires root, kernel namespaces, and registry access"]
fn busybox_false_propagates_the_exit_code() {
    let output = myruntime()
        .args(["--image", "busybox", "--cmd", "/bin/false", "--name", "e2e-false"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
#[ignore = "requires root, kernel namespaces, and registry access"]
fn busybox_echo_reaches_stdout() {
    let output = myruntime()
        .args([
            "--image", "busybox",
            "--cmd", "/bin/echo hi",
            "--name", "e2e-echo",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("hi"));
}

#[test]
#[ignore = "requires root, cgroup v2, kernel namespaces, and registry access"]
fn memory_limit_is_visible_in_the_cgroup() {
    let output = myruntime()
        .args([
            "--image", "busybox",
            "--cmd", "/bin/true",
            "--name", "e2e-mem",
            "--memory", "100M",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    // the cgroup directory is retained after exit for inspection
    let retained = std::fs::read_dir("/sys/fs/cgroup")
        .unwrap()
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("myruntime-e2e-mem-")
        })
        .expect("cgroup directory should be retained");
    let memory_max = std::fs::read_to_string(retained.path().join("memory.max")).unwrap();
    assert_eq!(memory_max.trim(), "104857600");
}
