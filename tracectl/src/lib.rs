// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing configuration for the portfwd processes.
//!
//! Every crate declares its tracing target once with [`trace_target!`]. The targets are collected
//! at link time so that the binary can list them and adjust their levels from a single
//! `name=level` configuration string before the subscriber is installed.

#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

pub mod control;
pub mod display;
pub mod targets;

// re-exports
pub use control::{TraceCtlError, TracingControl};
pub use linkme;
pub use tracing_subscriber::filter::LevelFilter;
