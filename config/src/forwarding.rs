// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The complete forwarding policy of a host and its validation.

use crate::errors::{ConfigError, ConfigResult};
use crate::mapping::{PortMapping, Protocol, parse_port};
use ordermap::OrderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Workload name to the port mappings it receives, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForwardingConfig {
    forwards: OrderMap<String, Vec<PortMapping>>,
}

impl ForwardingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy made of a single mapping for a single workload, as given on the command line.
    #[must_use]
    pub fn single(workload: &str, mut mapping: PortMapping) -> Self {
        let mut config = Self::new();
        mapping.name = workload.to_string();
        config.forwards.insert(workload.to_string(), vec![mapping]);
        config
    }

    /// Append a mapping to a workload.
    pub fn add(&mut self, workload: &str, mut mapping: PortMapping) {
        mapping.name = workload.to_string();
        self.forwards
            .entry(workload.to_string())
            .or_default()
            .push(mapping);
    }

    #[must_use]
    pub fn get(&self, workload: &str) -> Option<&[PortMapping]> {
        self.forwards.get(workload).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, workload: &str) -> bool {
        self.forwards.contains_key(workload)
    }

    pub fn workloads(&self) -> impl Iterator<Item = &str> {
        self.forwards.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forwards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forwards.is_empty()
    }

    /// Decode a YAML policy document. The result is not validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: ForwardingConfig = serde_yaml_ng::from_str(yaml)?;
        for (workload, mappings) in &mut config.forwards {
            for mapping in mappings {
                mapping.name.clone_from(workload);
            }
        }
        Ok(config)
    }

    /// Read, decode and validate a YAML policy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading forwarding policy from {}", path.display());
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the policy for consistency, returning the first violation found:
    ///
    ///  * workload names must be usable as identifiers,
    ///  * every mapping must provide at least one port,
    ///  * every host port must be a port number,
    ///  * a host port of a given protocol may be forwarded to one workload only.
    pub fn validate(&self) -> ConfigResult {
        let mut host_ports: HashMap<(Protocol, u16), &str> = HashMap::new();

        for (workload, mappings) in &self.forwards {
            if workload.is_empty() || workload.chars().any(|c| c.is_whitespace() || c == '/') {
                return Err(ConfigError::InvalidWorkloadName(workload.clone()));
            }
            for mapping in mappings {
                if mapping.ports.is_empty() {
                    return Err(ConfigError::NoPorts {
                        workload: workload.clone(),
                    });
                }
                for (host, _) in mapping.ports.iter() {
                    let Some(port) = parse_port(host) else {
                        return Err(ConfigError::InvalidPort {
                            workload: workload.clone(),
                            port: host.to_string(),
                        });
                    };
                    let key = (mapping.protocol, port);
                    if let Some(previous) = host_ports.insert(key, workload.as_str()) {
                        return Err(ConfigError::DuplicateHostPort {
                            protocol: mapping.protocol,
                            port,
                            workload: workload.clone(),
                            previous: previous.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
