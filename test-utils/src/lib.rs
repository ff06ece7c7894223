// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Testing utilities for port forwarding: in-memory stand-ins for the packet filter and the
//! workload manager.

mod filter;
mod workloads;

pub use filter::FakeFilter;
pub use workloads::FakeWorkloads;
