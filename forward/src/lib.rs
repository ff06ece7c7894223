// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The forwarding engine.
//!
//! A [`Forwarder`] applies and removes the port forwarding rules of the configured workloads,
//! and a [`Watcher`] drives it from the lifecycle events of the workload manager.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

mod engine;
mod errors;
mod watch;

pub use engine::Forwarder;
pub use errors::{Action, BatchError, ForwardError, WatchError};
pub use watch::{Reaction, Watcher};

use tracectl::{LevelFilter, trace_target};

trace_target!("forward", LevelFilter::INFO);
