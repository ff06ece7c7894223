// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reasons a forwarding policy may be rejected. All of them are fatal at start-up.

use crate::mapping::Protocol;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid workload name '{0}'")]
    InvalidWorkloadName(String),
    #[error("No ports provided for workload {workload}")]
    NoPorts { workload: String },
    #[error("Invalid port '{port}' provided for workload {workload}")]
    InvalidPort { workload: String, port: String },
    #[error("Port {protocol}:{port} of workload {workload} is already mapped to workload {previous}")]
    DuplicateHostPort {
        protocol: Protocol,
        port: u16,
        workload: String,
        previous: String,
    },
    #[error("Invalid port list '{input}': {reason}")]
    InvalidPortList { input: String, reason: String },
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
}

/// Result-like type for validations
pub type ConfigResult = Result<(), ConfigError>;
