// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors of the forwarding engine and the lifecycle watcher.

use lxd::LxdError;
use netfilter::{FilterError, Operation, Outcome};
use rules::{IpVersion, Rule};
use strum::Display;
use thiserror::Error;

/// Failure to forward or reverse one workload.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("No forwarding configured for workload {0}")]
    UnknownWorkload(String),
    #[error("Could not query the addresses of workload {workload}: {source}")]
    WorkloadQueryFailed {
        workload: String,
        #[source]
        source: LxdError,
    },
    #[error("Packet filter unavailable: {0}")]
    BackendUnavailable(#[source] FilterError),
    #[error("{operation} on {version} chain {chain} failed for workload {workload}: {source}")]
    RuleApplyFailed {
        workload: String,
        version: IpVersion,
        operation: Operation,
        chain: String,
        rule: Option<Rule>,
        #[source]
        source: FilterError,
    },
    #[error(
        "{operation} on {version} chain {chain} for workload {workload} did nothing: {outcome:?}"
    )]
    UnexpectedOutcome {
        workload: String,
        version: IpVersion,
        operation: Operation,
        chain: String,
        rule: Option<Rule>,
        outcome: Outcome,
    },
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Forward,
    Reverse,
}

fn names(failures: &[(String, ForwardError)]) -> String {
    let names: Vec<&str> = failures.iter().map(|(w, _)| w.as_str()).collect();
    names.join(", ")
}

/// Failures of a batch over all configured workloads. Workloads not listed succeeded.
#[derive(Debug, Error)]
#[error("Failed to {action} workloads: {}", names(.failures))]
pub struct BatchError {
    pub action: Action,
    pub failures: Vec<(String, ForwardError)>,
}

impl BatchError {
    pub(crate) fn check(action: Action, failures: Vec<(String, ForwardError)>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self { action, failures })
        }
    }

    /// Names of the failed workloads, in config order.
    #[must_use]
    pub fn workloads(&self) -> Vec<&str> {
        self.failures.iter().map(|(w, _)| w.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Could not subscribe to lifecycle events: {0}")]
    Subscribe(#[source] LxdError),
    #[error("Lifecycle event feed closed")]
    FeedClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn batch_error_names_failed_workloads() {
        assert!(BatchError::check(Action::Forward, vec![]).is_ok());
        let err = BatchError::check(
            Action::Reverse,
            vec![
                ("web".to_string(), ForwardError::UnknownWorkload("web".to_string())),
                ("db".to_string(), ForwardError::UnknownWorkload("db".to_string())),
            ],
        )
        .unwrap_err();
        assert_eq!(err.workloads(), vec!["web", "db"]);
        assert_eq!(err.to_string(), "Failed to reverse workloads: web, db");
    }
}
