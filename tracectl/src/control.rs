// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Build and install the process-wide tracing subscriber.

use ordermap::OrderMap;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::LevelFilter;
use crate::targets::TRACING_TARGETS;

/// Reasons a tracing configuration may be rejected.
#[derive(Debug, Error)]
pub enum TraceCtlError {
    #[error("Invalid syntax '{0}': it should be name=level")]
    Syntax(String),
    #[error("Invalid level '{0}'")]
    Level(String),
    #[error("Unknown tracing target '{0}'")]
    UnknownTarget(String),
    #[error("Invalid filter: {0}")]
    Filter(#[from] ParseError),
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLevel {
    pub(crate) target: &'static str,
    pub(crate) level: LevelFilter,
}

/// Levels for the default and for every registered target.
#[derive(Debug, Clone)]
pub struct TracingControl {
    pub(crate) default: LevelFilter,
    pub(crate) targets: OrderMap<&'static str, TargetLevel>,
}

impl Default for TracingControl {
    fn default() -> Self {
        Self::new(LevelFilter::INFO)
    }
}

impl TracingControl {
    /// Load all the targets registered with [`crate::trace_target!`].
    #[must_use]
    pub fn new(default: LevelFilter) -> Self {
        let mut targets = OrderMap::new();
        for target in TRACING_TARGETS {
            targets.insert(
                target.name,
                TargetLevel {
                    target: target.target,
                    level: target.level,
                },
            );
        }
        targets.sort_keys();
        Self { default, targets }
    }

    #[must_use]
    pub fn default_level(&self) -> LevelFilter {
        self.default
    }

    #[must_use]
    pub fn level(&self, name: &str) -> Option<LevelFilter> {
        self.targets.get(name).map(|t| t.level)
    }

    pub fn set_level(&mut self, name: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        let target = self
            .targets
            .get_mut(name)
            .ok_or_else(|| TraceCtlError::UnknownTarget(name.to_string()))?;
        target.level = level;
        Ok(())
    }

    pub fn set_level_all(&mut self, level: LevelFilter) {
        for target in self.targets.values_mut() {
            target.level = level;
        }
    }

    /// Apply a comma-separated sequence of `name=level` items.
    ///
    /// `default=level` sets the level of everything that is not a registered target and
    /// `all=level` sets every registered target. Items are applied in order, so
    /// `all=warn,forward=debug` leaves only `forward` at debug.
    pub fn configure(&mut self, input: &str) -> Result<(), TraceCtlError> {
        for item in input.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let Some((name, level)) = item.split_once('=') else {
                return Err(TraceCtlError::Syntax(item.to_string()));
            };
            let level = LevelFilter::from_str(level.trim())
                .map_err(|_| TraceCtlError::Level(level.trim().to_string()))?;
            match name.trim() {
                "default" => self.default = level,
                "all" => self.set_level_all(level),
                name => self.set_level(name, level)?,
            }
        }
        Ok(())
    }

    /// The directives string equivalent to the current levels.
    #[must_use]
    pub fn directives(&self) -> String {
        let mut out = self.default.to_string();
        for target in self.targets.values() {
            out += format!(",{}={}", target.target, target.level).as_str();
        }
        out
    }

    pub fn env_filter(&self) -> Result<EnvFilter, TraceCtlError> {
        Ok(EnvFilter::try_new(self.directives())?)
    }

    /// Install the global subscriber. May only succeed once per process.
    pub fn install(&self) -> Result<(), TraceCtlError> {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(false)
            .with_level(true);

        tracing_subscriber::registry()
            .with(self.env_filter()?)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TraceCtlError::Install(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_target;
    use pretty_assertions::assert_eq;

    trace_target!("tracectl-test", LevelFilter::WARN);

    #[test]
    fn registered_targets_are_loaded() {
        let tctl = TracingControl::default();
        assert_eq!(tctl.default_level(), LevelFilter::INFO);
        assert_eq!(tctl.level("tracectl-test"), Some(LevelFilter::WARN));
        assert_eq!(
            tctl.targets.get("tracectl-test").map(|t| t.target),
            Some(module_path!())
        );
    }

    #[test]
    fn configure_applies_items_in_order() {
        let mut tctl = TracingControl::default();
        tctl.configure("default=error, all=off, tracectl-test=debug")
            .unwrap();
        assert_eq!(tctl.default_level(), LevelFilter::ERROR);
        assert_eq!(tctl.level("tracectl-test"), Some(LevelFilter::DEBUG));

        tctl.configure("all=trace").unwrap();
        assert_eq!(tctl.level("tracectl-test"), Some(LevelFilter::TRACE));
    }

    #[test]
    fn configure_rejects_bad_input() {
        let mut tctl = TracingControl::default();
        assert!(matches!(
            tctl.configure("tracectl-test"),
            Err(TraceCtlError::Syntax(_))
        ));
        assert!(matches!(
            tctl.configure("tracectl-test=loud"),
            Err(TraceCtlError::Level(_))
        ));
        assert!(matches!(
            tctl.configure("no-such-target=info"),
            Err(TraceCtlError::UnknownTarget(_))
        ));
    }

    #[test]
    fn directives_build_a_filter() {
        let mut tctl = TracingControl::default();
        tctl.configure("tracectl-test=debug").unwrap();
        let directives = tctl.directives();
        assert!(directives.starts_with("info"));
        assert!(directives.contains(&format!("{}=debug", module_path!())));
        assert!(tctl.env_filter().is_ok());
    }
}
