// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port forwarding policy: which workloads receive which host ports, per protocol.
//!
//! The policy is usually read from a YAML document mapping workload names to lists of
//! [`PortMapping`]s, or built from a single inline mapping given on the command line.
//! A [`ForwardingConfig`] is validated once and never mutated afterwards.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

pub mod errors;
pub mod forwarding;
pub mod mapping;

pub use errors::{ConfigError, ConfigResult}; // re-export
pub use forwarding::ForwardingConfig; // re-export
pub use mapping::{PortMap, PortMapping, Protocol, parse_port}; // re-export

use tracectl::{LevelFilter, trace_target};
trace_target!("config", LevelFilter::INFO);
