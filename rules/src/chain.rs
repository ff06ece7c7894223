// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chains: the per-workload custom chains and the built-in chains they hang off.

use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::net::IpAddr;
use tracing::debug;

/// All rules live in the NAT table.
pub const NAT_TABLE: &str = "nat";

/// Longest chain name the kernel accepts.
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// Whether the host is the destination or the source of the translated traffic.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Direction {
    /// Traffic addressed to the host, diverted to the workload by DNAT.
    Dst,
    /// Loopback-originated traffic to the workload, masqueraded so that replies come back
    /// through the host.
    Src,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Dst, Direction::Src];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Dst => "dst",
            Direction::Src => "src",
        }
    }

    /// Built-in chains the hooks of this direction are inserted into.
    ///
    /// Dst chains are also hooked from `OUTPUT` when loopback forwarding is enabled, since
    /// connections opened on the host itself never traverse `PREROUTING`.
    #[must_use]
    pub fn entry_chains(self, loopback: bool) -> &'static [EntryChain] {
        match (self, loopback) {
            (Direction::Dst, false) => &[EntryChain::Prerouting],
            (Direction::Dst, true) => &[EntryChain::Prerouting, EntryChain::Output],
            (Direction::Src, _) => &[EntryChain::Postrouting],
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    #[must_use]
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// The loopback network, as a packet filter source/destination match.
    #[must_use]
    pub fn loopback(self) -> &'static str {
        match self {
            IpVersion::V4 => "127.0.0.0/8",
            IpVersion::V6 => "::1",
        }
    }
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("IPv4"),
            IpVersion::V6 => f.write_str("IPv6"),
        }
    }
}

/// Built-in NAT chains that hook rules are inserted into.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum EntryChain {
    Prerouting,
    Output,
    Postrouting,
}

impl EntryChain {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntryChain::Prerouting => "PREROUTING",
            EntryChain::Output => "OUTPUT",
            EntryChain::Postrouting => "POSTROUTING",
        }
    }
}

impl Display for EntryChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the custom chain owned by a workload for one direction.
///
/// The name is a pure function of the workload name and the direction, so teardown can
/// recompute it without any stored state:
///
///  * `LXD-<workload>-<dir>` when it fits in [`MAX_CHAIN_NAME_LEN`],
///  * `LXH-<80 bits of sha256(workload) in hex>-<dir>` otherwise.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChainName(String);

impl ChainName {
    #[must_use]
    pub fn new(workload: &str, direction: Direction) -> Self {
        let name = format!("LXD-{workload}-{direction}");
        if name.len() <= MAX_CHAIN_NAME_LEN {
            return Self(name);
        }
        let digest = Sha256::digest(workload.as_bytes());
        let hex: String = digest.iter().take(10).map(|b| format!("{b:02x}")).collect();
        let hashed = format!("LXH-{hex}-{direction}");
        debug!("Chain name {name} is too long, using {hashed}");
        Self(hashed)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for ChainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use tracing_test::traced_test;

    #[test]
    fn short_chain_names() {
        assert_eq!(ChainName::new("web", Direction::Dst).as_str(), "LXD-web-dst");
        assert_eq!(ChainName::new("web", Direction::Src).as_str(), "LXD-web-src");
    }

    #[test]
    #[traced_test]
    fn long_chain_names_fit() {
        let workload = "a-rather-long-container-name-for-testing";
        let dst = ChainName::new(workload, Direction::Dst);
        let src = ChainName::new(workload, Direction::Src);
        assert!(dst.as_str().starts_with("LXH-"));
        assert_eq!(dst.as_str().len(), MAX_CHAIN_NAME_LEN);
        assert!(src.as_str().len() <= MAX_CHAIN_NAME_LEN);
        assert_ne!(dst, src);
        assert_eq!(dst.as_str()[..24], src.as_str()[..24]);
        assert!(logs_contain(&format!(
            "Chain name LXD-{workload}-dst is too long, using {dst}"
        )));
    }

    #[test]
    fn chain_names_are_stable() {
        for workload in ["web", "a-rather-long-container-name-for-testing"] {
            for direction in Direction::ALL {
                assert_eq!(
                    ChainName::new(workload, direction),
                    ChainName::new(workload, direction)
                );
            }
        }
    }

    #[test]
    fn chain_names_are_injective() {
        let mut workloads: Vec<String> = vec![
            "a".into(),
            "a-dst".into(),
            "a-src".into(),
            "dst".into(),
            "LXD-a".into(),
            "12345678901234567890".into(),
            "123456789012345678901".into(),
        ];
        workloads.extend((0..200).map(|i| format!("container-with-a-long-name-{i}")));
        workloads.extend((0..200).map(|i| format!("c{i}")));

        let mut seen = HashSet::new();
        for workload in &workloads {
            for direction in Direction::ALL {
                let name = ChainName::new(workload, direction);
                assert!(name.as_str().len() <= MAX_CHAIN_NAME_LEN, "{name}");
                assert!(seen.insert(name), "{workload} {direction}");
            }
        }
    }

    #[test]
    fn entry_chains() {
        assert_eq!(
            Direction::Dst.entry_chains(false),
            &[EntryChain::Prerouting]
        );
        assert_eq!(
            Direction::Dst.entry_chains(true),
            &[EntryChain::Prerouting, EntryChain::Output]
        );
        assert_eq!(
            Direction::Src.entry_chains(false),
            &[EntryChain::Postrouting]
        );
    }
}
