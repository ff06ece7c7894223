// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Complete, ordered rule sets for one workload.
//!
//! A [`Plan`] is what the forwarding engine executes against one packet filter (one per IP
//! version): the chains to create, the hooks to insert into built-in chains, and the rules to
//! append to each chain, all in the order they must be applied.

use crate::chain::{ChainName, Direction, EntryChain, IpVersion};
use crate::rule::{Rule, hook_rule, port_rule};
use config::PortMapping;
use derive_builder::Builder;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addresses currently assigned to a workload, as reported by the workload manager.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkloadAddresses {
    pub v4: BTreeSet<Ipv4Addr>,
    pub v6: BTreeSet<Ipv6Addr>,
}

impl WorkloadAddresses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: IpAddr) {
        match address {
            IpAddr::V4(a) => {
                self.v4.insert(a);
            }
            IpAddr::V6(a) => {
                self.v6.insert(a);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// The addresses of one family, in ascending order.
    #[must_use]
    pub fn of(&self, version: IpVersion) -> Vec<IpAddr> {
        match version {
            IpVersion::V4 => self.v4.iter().copied().map(IpAddr::V4).collect(),
            IpVersion::V6 => self.v6.iter().copied().map(IpAddr::V6).collect(),
        }
    }
}

impl FromIterator<IpAddr> for WorkloadAddresses {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        let mut addresses = Self::new();
        for address in iter {
            addresses.insert(address);
        }
        addresses
    }
}

/// Knobs of rule generation.
#[derive(Builder, Clone, Copy, Debug, Default, Eq, PartialEq)]
#[builder(default)]
pub struct PlanOptions {
    /// Also forward connections opened from the host's loopback addresses. This adds the Src
    /// chains and hooks the Dst chains into `OUTPUT`.
    pub loopback: bool,
    /// Create the (empty) chains and hooks of an IP version that has no workload address, as
    /// long as the workload has addresses of the other version.
    pub hook_empty_families: bool,
}

impl PlanOptions {
    #[must_use]
    pub fn directions(&self) -> &'static [Direction] {
        if self.loopback {
            &Direction::ALL
        } else {
            &[Direction::Dst]
        }
    }
}

/// A hook rule and the built-in chain it goes into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Hook {
    pub entry: EntryChain,
    pub rule: Rule,
}

/// One custom chain with its hooks and content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainPlan {
    pub chain: ChainName,
    pub direction: Direction,
    pub hooks: Vec<Hook>,
    pub rules: Vec<Rule>,
}

/// Everything to apply to the packet filter of one IP version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Plan {
    pub version: IpVersion,
    pub chains: Vec<ChainPlan>,
}

impl Plan {
    /// Number of port rules across all chains.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.chains.iter().map(|c| c.rules.len()).sum()
    }
}

fn chain_plan(
    workload: &str,
    version: IpVersion,
    direction: Direction,
    entries: &[EntryChain],
) -> ChainPlan {
    ChainPlan {
        chain: ChainName::new(workload, direction),
        direction,
        hooks: entries
            .iter()
            .map(|entry| Hook {
                entry: *entry,
                rule: hook_rule(workload, version, direction),
            })
            .collect(),
        rules: vec![],
    }
}

/// Compute the rules forwarding the ports of `mappings` to a workload with the given addresses.
///
/// Plans are returned for IPv4 then IPv6. Port rules follow the policy order: mapping, then
/// host port, then address. A workload without any address gets no plan at all.
#[must_use]
pub fn plan(
    workload: &str,
    mappings: &[PortMapping],
    addresses: &WorkloadAddresses,
    options: &PlanOptions,
) -> Vec<Plan> {
    if addresses.is_empty() {
        return vec![];
    }
    let mut plans = vec![];
    for version in IpVersion::ALL {
        let family = addresses.of(version);
        if family.is_empty() && !options.hook_empty_families {
            continue;
        }
        let mut chains = vec![];
        for direction in options.directions() {
            let entries = direction.entry_chains(options.loopback);
            let mut chain = chain_plan(workload, version, *direction, entries);
            for mapping in mappings {
                for (host_port, workload_port) in mapping.ports.ports() {
                    for address in &family {
                        let rule = port_rule(
                            mapping.protocol,
                            *address,
                            workload_port,
                            host_port,
                            *direction,
                        );
                        // distinct host ports may share a workload port: one masquerade is enough
                        if !chain.rules.contains(&rule) {
                            chain.rules.push(rule);
                        }
                    }
                }
            }
            chains.push(chain);
        }
        plans.push(Plan { version, chains });
    }
    plans
}

/// Every chain and hook a workload may own, for both IP versions, whatever the options it was
/// forwarded with. Port rules are left empty: chains are flushed as a whole.
#[must_use]
pub fn teardown(workload: &str) -> Vec<Plan> {
    IpVersion::ALL
        .into_iter()
        .map(|version| Plan {
            version,
            chains: Direction::ALL
                .into_iter()
                .map(|direction| {
                    chain_plan(workload, version, direction, direction.entry_chains(true))
                })
                .collect(),
        })
        .collect()
}
