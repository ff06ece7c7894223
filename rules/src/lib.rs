// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Translate port forwarding policy into packet filter rules.
//!
//! Everything in this crate is pure: it computes chain names and the literal argument vectors of
//! NAT rules, but never talks to a packet filter. Each workload owns one chain per
//! [`Direction`] and [`IpVersion`]; a hook rule in a built-in entry chain diverts traffic into
//! it, and the chain holds one rule per forwarded port and workload address.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod plan;
pub mod rule;

pub use chain::{ChainName, Direction, EntryChain, IpVersion, NAT_TABLE}; // re-export
pub use plan::{
    ChainPlan, Hook, Plan, PlanOptions, PlanOptionsBuilder, PlanOptionsBuilderError,
    WorkloadAddresses, plan, teardown,
}; // re-export
pub use rule::{Rule, hook_rule, port_rule}; // re-export

use tracectl::{LevelFilter, trace_target};
trace_target!("rules", LevelFilter::INFO);
