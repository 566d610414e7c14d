//! Host-side network plumbing: bridge, veth pairs, DNAT port publishing
//!
//! All link and address operations go through the `ip`, `nsenter` and
//! `iptables` binaries, which are part of the host contract.

use crate::errors::NetworkError;
use std::{fmt, net::Ipv4Addr, process::Command, str::FromStr};

/// One published port: connections to `host` on the host are DNAT'd to
/// `container` at the container's address
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PortMap {
    pub host: u16,
    pub container: u16,
}

impl FromStr for PortMap {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || NetworkError::InvalidPortMapping(s.to_owned());
        let (host, container) = s.split_once(':').ok_or_else(err)?;
        if container.contains(':') {
            return Err(err());
        }
        let host: u16 = host.trim().parse().map_err(|_| err())?;
        let container: u16 = container.trim().parse().map_err(|_| err())?;
        if host == 0 || container == 0 {
            return Err(err());
        }
        Ok(PortMap { host, container })
    }
}

impl fmt::Display for PortMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Parse an IPv4 CIDR into its network address and prefix length
///
/// Prefixes above /30 leave no room for a gateway plus a container and are
/// rejected up front.
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), NetworkError> {
    let err = || NetworkError::InvalidCidr(cidr.to_owned());
    let (addr, prefix) = cidr.trim().split_once('/').ok_or_else(err)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| err())?;
    let prefix: u8 = prefix.parse().map_err(|_| err())?;
    if prefix > 30 {
        return Err(err());
    }
    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix))
}

/// Gateway address of a bridge network: the first usable host address
pub fn gateway_ip(network: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(network) | 1)
}

/// Container address: the bridge network with its last octet replaced by
/// `(pid % 250) + 2`
///
/// Pids exactly 250 apart collide; the duplicate address add then fails
/// through the command error path and only that mapping is lost.
pub fn container_ip(network: Ipv4Addr, pid: i32) -> Ipv4Addr {
    let mut octets = network.octets();
    octets[3] = ((pid % 250) + 2) as u8;
    Ipv4Addr::from(octets)
}

/// Make sure the host bridge exists, addressed and up
///
/// Idempotent: an existing bridge of this name is reused as-is. A non-bridge
/// link squatting on the name is an error.
pub fn ensure_bridge(name: &str, cidr: &str) -> Result<(), NetworkError> {
    let (network, prefix) = parse_cidr(cidr)?;

    if run("ip", &["link", "show", name]).is_ok() {
        if !link_is_bridge(name)? {
            return Err(NetworkError::BridgeConflict(name.to_owned()));
        }
        log::debug!("bridge {} already present", name);
        return Ok(());
    }

    run("ip", &["link", "add", "name", name, "type", "bridge"])?;
    let gateway = format!("{}/{}", gateway_ip(network), prefix);
    run("ip", &["addr", "add", &gateway, "dev", name])?;
    run("ip", &["link", "set", name, "up"])?;
    log::info!("created bridge {} with gateway {}", name, gateway);
    Ok(())
}

fn link_is_bridge(name: &str) -> Result<bool, NetworkError> {
    let bridges = run("ip", &["-o", "link", "show", "type", "bridge"])?;
    Ok(bridges.lines().any(|line| {
        line.split(':')
            .nth(1)
            .map(|field| {
                let field = field.trim();
                // veth-style names show as "name@peer"
                field.split('@').next().unwrap_or(field) == name
            })
            .unwrap_or(false)
    }))
}

/// Wire one published port into a freshly cloned container
///
/// Builds the per-container veth pair, attaches the host end to the bridge,
/// pushes the peer into the child's network namespace, addresses it, routes
/// it, and installs the DNAT plus MASQUERADE rules. Returns the container
/// address. A failure here loses the mapping, not the container.
pub fn setup_veth_and_port_binding(
    pid: i32,
    bridge: &str,
    cidr: &str,
    map: &PortMap,
) -> Result<Ipv4Addr, NetworkError> {
    let host_if = format!("vethh{}", pid);
    let peer_if = format!("vethc{}", pid);
    let pid_str = pid.to_string();

    run(
        "ip",
        &["link", "add", &host_if, "type", "veth", "peer", "name", &peer_if],
    )?;
    run("ip", &["link", "set", &host_if, "master", bridge])?;
    run("ip", &["link", "set", &host_if, "up"])?;

    // the kernel resolves the pid to /proc/<pid>/ns/net
    run("ip", &["link", "set", &peer_if, "netns", &pid_str])?;

    let (network, prefix) = parse_cidr(cidr)?;
    let address = container_ip(network, pid);
    let gateway = gateway_ip(network);
    let address_with_prefix = format!("{}/{}", address, prefix);

    in_netns(pid, &["ip", "link", "set", &peer_if, "up"])?;
    in_netns(pid, &["ip", "addr", "add", &address_with_prefix, "dev", &peer_if])?;
    in_netns(pid, &["ip", "route", "add", "default", "via", &gateway.to_string()])?;

    let destination = format!("{}:{}", address, map.container);
    run(
        "iptables",
        &[
            "-t", "nat", "-A", "PREROUTING", "-p", "tcp", "--dport",
            &map.host.to_string(), "-j", "DNAT", "--to-destination", &destination,
        ],
    )?;
    run(
        "iptables",
        &["-t", "nat", "-A", "POSTROUTING", "-j", "MASQUERADE"],
    )?;

    Ok(address)
}

/// Run a command inside the network namespace of `pid`
fn in_netns(pid: i32, command: &[&str]) -> Result<String, NetworkError> {
    let pid_str = pid.to_string();
    let mut args: Vec<&str> = vec!["-t", pid_str.as_str(), "-n", "--"];
    args.extend_from_slice(command);
    run("nsenter", &args)
}

fn run(program: &str, args: &[&str]) -> Result<String, NetworkError> {
    log::debug!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| NetworkError::Spawn {
            command: program.to_owned(),
            source,
        })?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(NetworkError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_map_accepts_the_full_range() {
        for (input, host, container) in
            [("1:1", 1, 1), ("8080:80", 8080, 80), ("65535:65535", 65535, 65535)]
        {
            let map: PortMap = input.parse().unwrap();
            assert_eq!((map.host, map.container), (host, container));
        }
        assert_eq!(" 8080 : 80 ".parse::<PortMap>().unwrap().host, 8080);
    }

    #[test]
    fn port_map_rejects_everything_else() {
        for bad in [
            "", ":", "80", "80:", ":80", "0:80", "80:0", "a:80", "80:b", "1:2:3",
            "65536:80", "80:65536", "-1:80",
        ] {
            assert!(
                matches!(
                    bad.parse::<PortMap>(),
                    Err(NetworkError::InvalidPortMapping(_))
                ),
                "{:?} should not parse",
                bad
            );
        }
    }

    #[test]
    fn cidr_parses_to_network_and_prefix() {
        let (network, prefix) = parse_cidr("172.25.0.0/16").unwrap();
        assert_eq!(network, Ipv4Addr::new(172, 25, 0, 0));
        assert_eq!(prefix, 16);

        // host bits are masked away
        let (network, prefix) = parse_cidr("10.0.0.57/24").unwrap();
        assert_eq!(network, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(prefix, 24);
    }

    #[test]
    fn cidr_rejects_bad_input() {
        for bad in ["", "10.0.0.0", "10.0.0.0/33", "10.0.0.0/31", "x/8", "10.0.0.0/y"] {
            assert!(matches!(
                parse_cidr(bad),
                Err(NetworkError::InvalidCidr(_))
            ));
        }
    }

    #[test]
    fn gateway_is_network_plus_one() {
        let (network, _) = parse_cidr("172.25.0.0/16").unwrap();
        assert_eq!(gateway_ip(network), Ipv4Addr::new(172, 25, 0, 1));
        let (network, _) = parse_cidr("10.0.0.0/24").unwrap();
        assert_eq!(gateway_ip(network), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn container_ip_substitutes_the_last_octet() {
        let (network, _) = parse_cidr("172.25.0.0/16").unwrap();
        assert_eq!(container_ip(network, 1234), Ipv4Addr::new(172, 25, 0, 236));
        assert_eq!(container_ip(network, 1), Ipv4Addr::new(172, 25, 0, 3));
        // the documented pigeonhole: pids 250 apart collide
        assert_eq!(container_ip(network, 7), container_ip(network, 257));
    }
}
