// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The parts of `GET /1.0/instances/<name>/state` used to find workload addresses.

use rules::WorkloadAddresses;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

/// Interface name prefixes of the workload's own network devices.
const INTERFACE_PREFIXES: [&str; 2] = ["eth", "enp"];

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct NetworkAddress {
    pub family: String,
    pub address: String,
    #[serde(default)]
    pub scope: String,
}

impl NetworkAddress {
    /// The address, if it is a global address of the family it claims to be.
    #[must_use]
    pub fn global(&self) -> Option<IpAddr> {
        if self.scope != "global" {
            return None;
        }
        let address: IpAddr = match self.address.parse() {
            Ok(address) => address,
            Err(e) => {
                debug!("Ignoring address '{}': {e}", self.address);
                return None;
            }
        };
        match (self.family.as_str(), address) {
            ("inet", IpAddr::V4(_)) | ("inet6", IpAddr::V6(_)) => Some(address),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct NetworkState {
    #[serde(default)]
    pub addresses: Vec<NetworkAddress>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct InstanceState {
    #[serde(default)]
    pub status: String,
    /// Absent while the instance is stopped.
    #[serde(default)]
    pub network: Option<BTreeMap<String, NetworkState>>,
}

impl InstanceState {
    /// Global addresses of the workload's `eth*` and `enp*` interfaces.
    #[must_use]
    pub fn addresses(&self) -> WorkloadAddresses {
        self.network
            .iter()
            .flatten()
            .filter(|(name, _)| INTERFACE_PREFIXES.iter().any(|p| name.starts_with(*p)))
            .flat_map(|(_, network)| network.addresses.iter())
            .filter_map(NetworkAddress::global)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RUNNING: &str = r#"{
        "status": "Running",
        "status_code": 103,
        "pid": 4242,
        "processes": 12,
        "network": {
            "eth0": {
                "addresses": [
                    {"family": "inet", "address": "10.0.3.5", "netmask": "24", "scope": "global"},
                    {"family": "inet6", "address": "fd42:8f3a::5", "netmask": "64", "scope": "global"},
                    {"family": "inet6", "address": "fe80::216:3eff:fe12:3456", "netmask": "64", "scope": "link"}
                ],
                "hwaddr": "00:16:3e:12:34:56",
                "mtu": 1500,
                "state": "up",
                "type": "broadcast"
            },
            "enp5s0": {
                "addresses": [
                    {"family": "inet", "address": "192.168.10.7", "netmask": "24", "scope": "global"}
                ],
                "type": "broadcast"
            },
            "lo": {
                "addresses": [
                    {"family": "inet", "address": "127.0.0.1", "netmask": "8", "scope": "local"},
                    {"family": "inet6", "address": "::1", "netmask": "128", "scope": "local"}
                ],
                "type": "loopback"
            },
            "docker0": {
                "addresses": [
                    {"family": "inet", "address": "172.17.0.1", "netmask": "16", "scope": "global"}
                ],
                "type": "broadcast"
            }
        }
    }"#;

    #[test]
    fn running_instance_addresses() {
        let state: InstanceState = serde_json::from_str(RUNNING).unwrap();
        assert_eq!(state.status, "Running");
        let addresses = state.addresses();
        let v4: Vec<String> = addresses.v4.iter().map(ToString::to_string).collect();
        let v6: Vec<String> = addresses.v6.iter().map(ToString::to_string).collect();
        assert_eq!(v4, vec!["10.0.3.5", "192.168.10.7"]);
        assert_eq!(v6, vec!["fd42:8f3a::5"]);
    }

    #[test]
    fn stopped_instance_has_no_addresses() {
        let state: InstanceState =
            serde_json::from_str(r#"{"status": "Stopped", "network": null}"#).unwrap();
        assert!(state.addresses().is_empty());
        let state: InstanceState = serde_json::from_str(r#"{"status": "Stopped"}"#).unwrap();
        assert!(state.addresses().is_empty());
    }

    #[test]
    fn mislabeled_or_malformed_addresses_are_skipped() {
        let address = NetworkAddress {
            family: "inet6".to_string(),
            address: "10.0.3.5".to_string(),
            scope: "global".to_string(),
        };
        assert_eq!(address.global(), None);
        let address = NetworkAddress {
            family: "inet".to_string(),
            address: "not-an-address".to_string(),
            scope: "global".to_string(),
            ..Default::default()
        };
        assert_eq!(address.global(), None);
    }
}
