// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link-time registry of tracing targets

use crate::LevelFilter;
use linkme::distributed_slice;

/// A tracing target declared by some crate in the process.
#[derive(Debug)]
pub struct Target {
    /// The `tracing` target, i.e. the module path the target was declared in.
    pub target: &'static str,
    /// Short name used in configuration strings.
    pub name: &'static str,
    /// Level used unless the configuration says otherwise.
    pub level: LevelFilter,
}

impl Target {
    #[must_use]
    pub const fn new(target: &'static str, name: &'static str, level: LevelFilter) -> Self {
        Self {
            target,
            name,
            level,
        }
    }
}

#[distributed_slice]
pub static TRACING_TARGETS: [Target];

/// Declare the tracing target of the calling module, with a short name and default level.
///
/// ```ignore
/// tracectl::trace_target!("forward", LevelFilter::INFO);
/// ```
#[macro_export]
macro_rules! trace_target {
    // The const scope lets the macro be used several times in one crate without clashing
    // statics, and keeps the imports away from the caller.
    ($name:expr, $level:expr) => {
        const _: () = {
            use $crate::linkme::distributed_slice;
            use $crate::targets::{TRACING_TARGETS, Target};

            #[distributed_slice(TRACING_TARGETS)]
            #[linkme(crate = $crate::linkme)]
            static TRACE_TGT: Target = Target::new(module_path!(), $name, $level);
        };
    };
}
