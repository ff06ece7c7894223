// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Display implementations

use crate::control::TracingControl;
use std::fmt::Display;

macro_rules! TARGET_FMT {
    () => {
        "{:>24} │ {:>8} │ {}"
    };
}

impl Display for TracingControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "        ──────── Tracing configuration per target ────────")?;
        writeln!(f, "{}", format_args!(TARGET_FMT!(), "NAME", "LEVEL", "TARGET"))?;
        for (name, target) in &self.targets {
            writeln!(
                f,
                "{}",
                format_args!(TARGET_FMT!(), name, target.level, target.target)
            )?;
        }
        write!(
            f,
            "{}",
            format_args!(TARGET_FMT!(), "(default)", self.default, "--")
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{LevelFilter, TracingControl};

    #[test]
    fn table_lists_targets_then_default() {
        let out = TracingControl::new(LevelFilter::WARN).to_string();
        assert!(out.contains("NAME"));
        assert!(out.contains("tracectl-test"));
        let last = out.lines().last().unwrap_or_default();
        assert!(last.contains("(default)"));
        assert!(last.contains("warn"));
    }
}
