// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A fragment of forwarding policy: host ports of one protocol forwarded to one workload.

use crate::errors::ConfigError;
use ordermap::OrderMap;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport protocols that can be forwarded.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

/// Parse a host port number. Port 0 is not a valid forwarding target.
#[must_use]
pub fn parse_port(input: &str) -> Option<u16> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    input.parse::<u16>().ok().filter(|port| *port != 0)
}

/// Host port (as written in the policy) to workload port, in policy order.
///
/// Host ports are kept as strings so that validation can report them verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PortMap(OrderMap<String, u16>);

impl PortMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a forwarding, returning the previous workload port of that host port, if any.
    pub fn insert(&mut self, host: impl Into<String>, workload: u16) -> Option<u16> {
        self.0.insert(host.into(), workload)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Host ports exactly as written, with their workload ports.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.0.iter().map(|(host, workload)| (host.as_str(), *workload))
    }

    /// `(host port, workload port)` pairs. Host ports that do not parse are skipped, which
    /// never happens on a validated configuration.
    pub fn ports(&self) -> impl Iterator<Item = (u16, u16)> {
        self.iter()
            .filter_map(|(host, workload)| parse_port(host).map(|host| (host, workload)))
    }
}

impl<K: Into<String>> FromIterator<(K, u16)> for PortMap {
    fn from_iter<T: IntoIterator<Item = (K, u16)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Host port keys may be written quoted or bare in YAML.
struct HostPortKey(String);

impl<'de> Deserialize<'de> for HostPortKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;
        impl Visitor<'_> for KeyVisitor {
            type Value = HostPortKey;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a host port")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(HostPortKey(v.to_string()))
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(HostPortKey(v.to_string()))
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(HostPortKey(v.to_string()))
            }
        }
        deserializer.deserialize_any(KeyVisitor)
    }
}

impl<'de> Deserialize<'de> for PortMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PortMapVisitor;
        impl<'de> Visitor<'de> for PortMapVisitor {
            type Value = PortMap;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of host ports to workload ports")
            }
            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut ports = PortMap::new();
                while let Some((HostPortKey(host), workload)) =
                    access.next_entry::<HostPortKey, u16>()?
                {
                    if ports.0.contains_key(&host) {
                        return Err(de::Error::custom(format!("host port {host} repeated")));
                    }
                    ports.insert(host, workload);
                }
                Ok(ports)
            }
        }
        deserializer.deserialize_map(PortMapVisitor)
    }
}

/// Ports of one protocol forwarded to one workload.
///
/// In YAML the ports sit next to `protocol`:
///
/// ```yaml
/// - protocol: tcp
///   "80": 80
///   "443": 443
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Name of the workload; may be left empty in the configuration file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub protocol: Protocol,
    #[serde(flatten)]
    pub ports: PortMap,
}

impl PortMapping {
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn port(mut self, host: u16, workload: u16) -> Self {
        self.ports.insert(host.to_string(), workload);
        self
    }
}

impl FromStr for PortMapping {
    type Err = ConfigError;

    /// Parse the inline form `protocol://host:workload[,host:workload...]`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidPortList {
            input: input.to_string(),
            reason,
        };
        let Some((protocol, list)) = input.split_once("://") else {
            return Err(invalid("expected protocol://host:port,...".to_string()));
        };
        let protocol = Protocol::from_str(protocol.trim())
            .map_err(|_| invalid(format!("unknown protocol '{protocol}'")))?;
        if list.trim().is_empty() {
            return Err(invalid("no ports provided".to_string()));
        }
        let mut mapping = PortMapping::new(protocol);
        for item in list.split(',').map(str::trim) {
            let Some((host, workload)) = item.split_once(':') else {
                return Err(invalid(format!("invalid port map '{item}'")));
            };
            let host = host.trim();
            if parse_port(host).is_none() {
                return Err(invalid(format!("invalid host port '{host}'")));
            }
            let workload = parse_port(workload.trim())
                .ok_or_else(|| invalid(format!("invalid workload port '{}'", workload.trim())))?;
            if mapping.ports.insert(host, workload).is_some() {
                return Err(invalid(format!("host port {host} repeated")));
            }
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn protocol_names() {
        assert_eq!(Protocol::from_str("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::from_str("UDP").unwrap(), Protocol::Udp);
        assert_eq!(Protocol::Sctp.to_string(), "sctp");
        assert!(Protocol::from_str("icmp").is_err());
    }

    #[test]
    fn port_numbers() {
        assert_eq!(parse_port("80"), Some(80));
        assert_eq!(parse_port("080"), Some(80));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("+80"), None);
        assert_eq!(parse_port("http"), None);
        assert_eq!(parse_port(""), None);
    }

    #[test]
    fn parse_inline_mapping() {
        let mapping = PortMapping::from_str("tcp://80:8080, 443:443").unwrap();
        assert_eq!(mapping.protocol, Protocol::Tcp);
        assert_eq!(mapping.name, "");
        let ports: Vec<_> = mapping.ports.ports().collect();
        assert_eq!(ports, vec![(80, 8080), (443, 443)]);
    }

    #[test]
    fn reject_bad_inline_mappings() {
        for input in [
            "80:8080",
            "icmp://80:80",
            "udp://",
            "udp://53",
            "udp://53:53:53",
            "tcp://http:80",
            "tcp://80:0",
            "tcp://80:80,80:81",
        ] {
            let err = PortMapping::from_str(input).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidPortList { .. }),
                "{input}: {err}"
            );
        }
    }

    #[test]
    fn yaml_ports_are_inlined() {
        let yaml = "protocol: udp\n\"53\": 5353\n80: 8080\n";
        let mapping: PortMapping = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(mapping.protocol, Protocol::Udp);
        let ports: Vec<_> = mapping.ports.iter().collect();
        assert_eq!(ports, vec![("53", 5353), ("80", 8080)]);
    }

    #[test]
    fn yaml_workload_port_must_fit() {
        let yaml = "protocol: tcp\n\"80\": 70000\n";
        assert!(serde_yaml_ng::from_str::<PortMapping>(yaml).is_err());
    }
}
