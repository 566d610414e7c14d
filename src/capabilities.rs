//! Capability token parsing and thread capability reduction

use caps::{errors::CapsError, CapSet, Capability, CapsHashSet};

/// Add/drop capability lists for a container
///
/// Tokens are case-insensitive and the `CAP_` prefix is optional. Unknown
/// tokens warn and are skipped; duplicates collapse. The final thread state
/// after [CapabilitySpec::apply] is `adds \ drops` across the effective,
/// permitted and inheritable sets, with the bounding set shrunk to match.
#[derive(Debug, Default, Clone)]
pub struct CapabilitySpec {
    add: Vec<Capability>,
    drop: Vec<Capability>,
}

impl CapabilitySpec {
    pub fn parse(add: &str, drop: &str) -> Self {
        CapabilitySpec {
            add: parse_cap_list(add),
            drop: parse_cap_list(drop),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.drop.is_empty()
    }

    /// The capability set the container thread ends up holding
    pub fn final_set(&self) -> CapsHashSet {
        let mut set: CapsHashSet = self.add.iter().copied().collect();
        for cap in &self.drop {
            set.remove(cap);
        }
        set
    }

    /// Reduce this thread's capabilities to [CapabilitySpec::final_set]
    ///
    /// The bounding-set drops go first while CAP_SETPCAP is still effective;
    /// they are the irreversible part. Permitted is lowered last so the
    /// intermediate states keep effective a subset of permitted.
    pub fn apply(&self) -> Result<(), CapsError> {
        let target = self.final_set();
        for cap in caps::read(None, CapSet::Bounding)? {
            if !target.contains(&cap) {
                caps::drop(None, CapSet::Bounding, cap)?;
            }
        }
        caps::set(None, CapSet::Inheritable, &target)?;
        caps::set(None, CapSet::Effective, &target)?;
        caps::set(None, CapSet::Permitted, &target)?;
        Ok(())
    }
}

fn parse_cap_list(list: &str) -> Vec<Capability> {
    let mut out = Vec::new();
    for token in list.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let mut normalized = token.to_ascii_uppercase();
        if !normalized.starts_with("CAP_") {
            normalized = format!("CAP_{}", normalized);
        }
        match lookup(&normalized) {
            Some(cap) if !out.contains(&cap) => out.push(cap),
            Some(_) => {}
            None => log::warn!("unknown capability {}", normalized),
        }
    }
    out
}

/// Closed lookup over every capability token the kernel defines
fn lookup(token: &str) -> Option<Capability> {
    use Capability::*;
    Some(match token {
        "CAP_CHOWN" => CAP_CHOWN,
        "CAP_DAC_OVERRIDE" => CAP_DAC_OVERRIDE,
        "CAP_DAC_READ_SEARCH" => CAP_DAC_READ_SEARCH,
        "CAP_FOWNER" => CAP_FOWNER,
        "CAP_FSETID" => CAP_FSETID,
        "CAP_KILL" => CAP_KILL,
        "CAP_SETGID" => CAP_SETGID,
        "CAP_SETUID" => CAP_SETUID,
        "CAP_SETPCAP" => CAP_SETPCAP,
        "CAP_LINUX_IMMUTABLE" => CAP_LINUX_IMMUTABLE,
        "CAP_NET_BIND_SERVICE" => CAP_NET_BIND_SERVICE,
        "CAP_NET_BROADCAST" => CAP_NET_BROADCAST,
        "CAP_NET_ADMIN" => CAP_NET_ADMIN,
        "CAP_NET_RAW" => CAP_NET_RAW,
        "CAP_IPC_LOCK" => CAP_IPC_LOCK,
        "CAP_IPC_OWNER" => CAP_IPC_OWNER,
        "CAP_SYS_MODULE" => CAP_SYS_MODULE,
        "CAP_SYS_RAWIO" => CAP_SYS_RAWIO,
        "CAP_SYS_CHROOT" => CAP_SYS_CHROOT,
        "CAP_SYS_PTRACE" => CAP_SYS_PTRACE,
        "CAP_SYS_PACCT" => CAP_SYS_PACCT,
        "CAP_SYS_ADMIN" => CAP_SYS_ADMIN,
        "CAP_SYS_BOOT" => CAP_SYS_BOOT,
        "CAP_SYS_NICE" => CAP_SYS_NICE,
        "CAP_SYS_RESOURCE" => CAP_SYS_RESOURCE,
        "CAP_SYS_TIME" => CAP_SYS_TIME,
        "CAP_SYS_TTY_CONFIG" => CAP_SYS_TTY_CONFIG,
        "CAP_MKNOD" => CAP_MKNOD,
        "CAP_LEASE" => CAP_LEASE,
        "CAP_AUDIT_WRITE" => CAP_AUDIT_WRITE,
        "CAP_AUDIT_CONTROL" => CAP_AUDIT_CONTROL,
        "CAP_SETFCAP" => CAP_SETFCAP,
        "CAP_MAC_OVERRIDE" => CAP_MAC_OVERRIDE,
        "CAP_MAC_ADMIN" => CAP_MAC_ADMIN,
        "CAP_SYSLOG" => CAP_SYSLOG,
        "CAP_WAKE_ALARM" => CAP_WAKE_ALARM,
        "CAP_BLOCK_SUSPEND" => CAP_BLOCK_SUSPEND,
        "CAP_AUDIT_READ" => CAP_AUDIT_READ,
        "CAP_PERFMON" => CAP_PERFMON,
        "CAP_BPF" => CAP_BPF,
        "CAP_CHECKPOINT_RESTORE" => CAP_CHECKPOINT_RESTORE,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_case_and_prefix_insensitive() {
        let spec = CapabilitySpec::parse("net_admin, CAP_SYS_ADMIN, sys_chroot", "");
        assert_eq!(
            spec.add,
            vec![
                Capability::CAP_NET_ADMIN,
                Capability::CAP_SYS_ADMIN,
                Capability::CAP_SYS_CHROOT
            ]
        );
    }

    #[test]
    fn duplicates_collapse() {
        let spec = CapabilitySpec::parse("CAP_KILL,kill,KILL", "");
        assert_eq!(spec.add, vec![Capability::CAP_KILL]);
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let spec = CapabilitySpec::parse("CAP_NOT_A_THING,CAP_CHOWN", "");
        assert_eq!(spec.add, vec![Capability::CAP_CHOWN]);
    }

    #[test]
    fn final_set_is_adds_minus_drops() {
        let spec = CapabilitySpec::parse("CAP_NET_ADMIN,CAP_SETUID,CAP_KILL", "CAP_SETUID");
        let target = spec.final_set();
        assert_eq!(target.len(), 2);
        assert!(target.contains(&Capability::CAP_NET_ADMIN));
        assert!(target.contains(&Capability::CAP_KILL));
        assert!(!target.contains(&Capability::CAP_SETUID));
    }

    #[test]
    fn drop_only_spec_ends_empty() {
        let spec = CapabilitySpec::parse("", "CAP_SETUID");
        assert!(!spec.is_empty());
        assert!(spec.final_set().is_empty());
    }

    #[test]
    fn empty_lists_are_empty() {
        assert!(CapabilitySpec::parse("", "").is_empty());
        assert!(CapabilitySpec::parse(" , ,", "").is_empty());
    }
}
