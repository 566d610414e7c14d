use myruntime::network;
use std::process::Command;

fn ip(args: &[&str]) -> String {
    let output = Command::new("ip").args(args).output().unwrap();
    assert!(output.status.success(), "ip {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
#[ignore = "requires root and the ip binary"]
fn ensure_bridge_is_idempotent() {
    let _ = env_logger::builder().is_test(true).try_init();
    let name = "mrt-test0";
    let _ = Command::new("ip").args(["link", "del", name]).output();

    for _ in 0..3 {
        network::ensure_bridge(name, "10.42.0.0/24").unwrap();
    }

    // one bridge, one address
    let addresses = ip(&["-o", "-4", "addr", "show", "dev", name]);
    let count = addresses
        .lines()
        .filter(|line| line.contains("10.42.0.1/24"))
        .count();
    assert_eq!(count, 1, "expected exactly one gateway address:\n{}", addresses);

    let _ = Command::new("ip").args(["link", "del", name]).output();
}

#[test]
#[ignore = "requires root and the ip binary"]
fn non_bridge_link_of_the_same_name_conflicts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let name = "mrt-dummy0";
    let _ = Command::new("ip").args(["link", "del", name]).output();
    ip(&["link", "add", name, "type", "dummy"]);

    assert!(matches!(
        network::ensure_bridge(name, "10.43.0.0/24"),
        Err(myruntime::NetworkError::BridgeConflict(_))
    ));

    let _ = Command::new("ip").args(["link", "del", name]).output();
}
