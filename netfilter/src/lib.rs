// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Access to the packet filter holding the forwarding rules.
//!
//! [`PacketFilter`] is the narrow set of chain and rule primitives the forwarding engine needs.
//! Each call is one independent mutation of one table; there are no transactions. Outcomes that
//! the engine must be able to tolerate to stay idempotent ("already exists", "not found") are
//! reported as [`Outcome`] variants, not as errors.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

pub mod iptables;

pub use iptables::Iptables; // re-export

use rules::{IpVersion, Rule};
use std::future::Future;
use strum::{Display, EnumIter};
use thiserror::Error;
use tracectl::{LevelFilter, trace_target};

trace_target!("netfilter", LevelFilter::INFO);

/// What a packet filter call did.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Outcome {
    /// The mutation took place.
    Applied,
    /// Nothing to do: the chain or rule to create is already there.
    AlreadyExists,
    /// Nothing to do: the chain or rule to act on does not exist.
    NotFound,
}

/// The primitives of [`PacketFilter`], for error reports.
#[derive(Clone, Copy, Debug, Display, EnumIter, Eq, Hash, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    NewChain,
    Insert,
    Append,
    Exists,
    Delete,
    ClearChain,
    DeleteChain,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Packet filter program {program} is unavailable: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

impl FilterError {
    /// True if the backend itself could not be reached, as opposed to rejecting a request.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FilterError::Unavailable { .. })
    }
}

/// Chain and rule primitives of a packet filter for one IP version.
///
/// Positions are 1-based, as with `iptables -I`.
pub trait PacketFilter {
    fn version(&self) -> IpVersion;

    fn new_chain(
        &self,
        table: &str,
        chain: &str,
    ) -> impl Future<Output = Result<Outcome, FilterError>> + Send;

    fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &Rule,
    ) -> impl Future<Output = Result<Outcome, FilterError>> + Send;

    fn append(
        &self,
        table: &str,
        chain: &str,
        rule: &Rule,
    ) -> impl Future<Output = Result<Outcome, FilterError>> + Send;

    /// Whether the chain holds the rule. A missing chain holds nothing.
    fn exists(
        &self,
        table: &str,
        chain: &str,
        rule: &Rule,
    ) -> impl Future<Output = Result<bool, FilterError>> + Send;

    /// Delete the first copy of the rule.
    fn delete(
        &self,
        table: &str,
        chain: &str,
        rule: &Rule,
    ) -> impl Future<Output = Result<Outcome, FilterError>> + Send;

    fn clear_chain(
        &self,
        table: &str,
        chain: &str,
    ) -> impl Future<Output = Result<Outcome, FilterError>> + Send;

    /// Delete an empty chain that no rule jumps to.
    fn delete_chain(
        &self,
        table: &str,
        chain: &str,
    ) -> impl Future<Output = Result<Outcome, FilterError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn operation_names() {
        let names: Vec<String> = Operation::iter().map(|op| op.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "new_chain",
                "insert",
                "append",
                "exists",
                "delete",
                "clear_chain",
                "delete_chain"
            ]
        );
    }
}
