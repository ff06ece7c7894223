// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Literal packet filter rules.

use crate::chain::{ChainName, Direction, IpVersion};
use config::Protocol;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};

/// The argument vector of a rule, without the table, chain and operation.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Rule(Vec<String>);

impl Rule {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.0
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// The rule which, inserted in a built-in entry chain, diverts the traffic of a workload into
/// its custom chain.
///
/// Dst hooks match anything addressed to a local address. Src hooks only match loopback traffic
/// leaving for a non-loopback destination; other traffic reaches workloads directly.
#[must_use]
pub fn hook_rule(workload: &str, version: IpVersion, direction: Direction) -> Rule {
    let chain = ChainName::new(workload, direction);
    match direction {
        Direction::Dst => Rule::new([
            "-m",
            "addrtype",
            "--dst-type",
            "LOCAL",
            "-j",
            chain.as_str(),
        ]),
        Direction::Src => Rule::new([
            "-s",
            version.loopback(),
            "!",
            "-d",
            version.loopback(),
            "-j",
            chain.as_str(),
        ]),
    }
}

/// The translation rule for one forwarded port and one workload address, appended to the
/// workload's custom chain. The IP version is that of `address`.
#[must_use]
pub fn port_rule(
    protocol: Protocol,
    address: IpAddr,
    workload_port: u16,
    host_port: u16,
    direction: Direction,
) -> Rule {
    match direction {
        Direction::Dst => Rule::new([
            "-p".to_string(),
            protocol.to_string(),
            "--dport".to_string(),
            host_port.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            SocketAddr::new(address, workload_port).to_string(),
        ]),
        Direction::Src => Rule::new([
            "-p".to_string(),
            protocol.to_string(),
            "-s".to_string(),
            IpVersion::of(&address).loopback().to_string(),
            "-d".to_string(),
            address.to_string(),
            "--dport".to_string(),
            workload_port.to_string(),
            "-j".to_string(),
            "MASQUERADE".to_string(),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dst_hook_rule() {
        for version in IpVersion::ALL {
            let rule = hook_rule("web", version, Direction::Dst);
            assert_eq!(
                rule.to_string(),
                "-m addrtype --dst-type LOCAL -j LXD-web-dst"
            );
        }
    }

    #[test]
    fn src_hook_rule() {
        let rule = hook_rule("web", IpVersion::V4, Direction::Src);
        assert_eq!(
            rule.args(),
            ["-s", "127.0.0.0/8", "!", "-d", "127.0.0.0/8", "-j", "LXD-web-src"]
        );
        let rule = hook_rule("web", IpVersion::V6, Direction::Src);
        assert_eq!(
            rule.args(),
            ["-s", "::1", "!", "-d", "::1", "-j", "LXD-web-src"]
        );
    }

    #[test]
    fn dnat_rule() {
        let rule = port_rule(
            Protocol::Tcp,
            "10.0.3.5".parse().unwrap(),
            80,
            8080,
            Direction::Dst,
        );
        assert_eq!(
            rule.to_string(),
            "-p tcp --dport 8080 -j DNAT --to-destination 10.0.3.5:80"
        );

        let rule = port_rule(
            Protocol::Udp,
            "fd42::5".parse().unwrap(),
            53,
            5353,
            Direction::Dst,
        );
        assert_eq!(
            rule.to_string(),
            "-p udp --dport 5353 -j DNAT --to-destination [fd42::5]:53"
        );
    }

    #[test]
    fn masquerade_rule() {
        let rule = port_rule(
            Protocol::Tcp,
            "10.0.3.5".parse().unwrap(),
            80,
            8080,
            Direction::Src,
        );
        assert_eq!(
            rule.to_string(),
            "-p tcp -s 127.0.0.0/8 -d 10.0.3.5 --dport 80 -j MASQUERADE"
        );

        let rule = port_rule(
            Protocol::Sctp,
            "fd42::5".parse().unwrap(),
            80,
            8080,
            Direction::Src,
        );
        assert_eq!(
            rule.to_string(),
            "-p sctp -s ::1 -d fd42::5 --dport 80 -j MASQUERADE"
        );
    }
}
