// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Access to the workload manager (LXD).
//!
//! The forwarding engine needs two things from it: the live addresses of a workload, and a
//! feed of lifecycle events telling when workloads start and stop. Both are behind
//! [`WorkloadApi`]; [`LxcClient`] implements it by running the `lxc` command line client.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

mod client;
mod event;
mod state;

pub use client::{LxcClient, MonitorStream};
pub use event::{LifecycleEvent, LifecycleKind};
pub use state::{InstanceState, NetworkAddress, NetworkState};

use futures::Stream;
use rules::WorkloadAddresses;
use std::future::Future;
use thiserror::Error;
use tracectl::{LevelFilter, trace_target};

trace_target!("lxd", LevelFilter::INFO);

#[derive(Debug, Error)]
pub enum LxdError {
    #[error("Workload manager client {program} is unavailable: {source}")]
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
    #[error("Could not decode the output of '{command}': {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Event feed read error: {0}")]
    Read(#[from] std::io::Error),
}

/// The operations of the workload manager that forwarding depends on.
pub trait WorkloadApi {
    /// Raw lifecycle event records, one JSON document each, in delivery order.
    type Events: Stream<Item = Result<String, LxdError>> + Send + Unpin;

    /// Current addresses of a workload. A workload that is not running has none.
    fn addresses(
        &self,
        workload: &str,
    ) -> impl Future<Output = Result<WorkloadAddresses, LxdError>> + Send;

    /// Start receiving lifecycle events. The stream ends if the feed is closed.
    fn subscribe(&self) -> impl Future<Output = Result<Self::Events, LxdError>> + Send;
}
