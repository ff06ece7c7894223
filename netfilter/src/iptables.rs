// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`PacketFilter`] implemented by running `iptables` / `ip6tables`.

use crate::{FilterError, Outcome, PacketFilter};
use rules::{IpVersion, Rule};
use tokio::process::Command;
use tracing::{debug, trace};

/// Messages meaning that the chain or rule to create is already present.
const ALREADY_EXISTS: &[&str] = &["already exists", "File exists"];

/// Messages meaning that the chain or rule to act on is absent. Both the legacy and the
/// nf_tables flavors of iptables are covered.
const NOT_FOUND: &[&str] = &[
    "Bad rule (does a matching rule exist in that chain?)",
    "No chain/target/match by that name",
    "does not exist",
    "No such file or directory",
];

/// Map the error output of a failed invocation to a tolerable outcome, if it is one.
#[must_use]
pub fn classify(stderr: &str) -> Option<Outcome> {
    if ALREADY_EXISTS.iter().any(|m| stderr.contains(m)) {
        Some(Outcome::AlreadyExists)
    } else if NOT_FOUND.iter().any(|m| stderr.contains(m)) {
        Some(Outcome::NotFound)
    } else {
        None
    }
}

struct Invocation {
    command: String,
    success: bool,
    status: String,
    stderr: String,
}

impl Invocation {
    fn into_error(self) -> FilterError {
        FilterError::Failed {
            command: self.command,
            status: self.status,
            stderr: self.stderr,
        }
    }
}

/// An `iptables`-compatible program driving the filter of one IP version.
#[derive(Clone, Debug)]
pub struct Iptables {
    program: String,
    version: IpVersion,
}

impl Iptables {
    /// Use `iptables` for IPv4 and `ip6tables` for IPv6, looked up in `PATH`.
    #[must_use]
    pub fn new(version: IpVersion) -> Self {
        let program = match version {
            IpVersion::V4 => "iptables",
            IpVersion::V6 => "ip6tables",
        };
        Self::with_program(version, program)
    }

    #[must_use]
    pub fn with_program(version: IpVersion, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            version,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the program can be run at all.
    pub async fn check_runnable(&self) -> Result<(), FilterError> {
        let invocation = self.run(vec!["--version".to_string()]).await?;
        if invocation.success {
            Ok(())
        } else {
            Err(invocation.into_error())
        }
    }

    /// Like [`Iptables::check_runnable`], but a program that cannot be started yields `None`.
    /// Other failures are still errors.
    pub async fn if_installed(self) -> Result<Option<Self>, FilterError> {
        match self.check_runnable().await {
            Ok(()) => Ok(Some(self)),
            Err(e) if e.is_unavailable() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<Invocation, FilterError> {
        let command = format!("{} {}", self.program, args.join(" "));
        trace!("Running '{command}'");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| FilterError::Unavailable {
                program: self.program.clone(),
                source,
            })?;
        Ok(Invocation {
            command,
            success: output.status.success(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run a table mutation. `-w` waits for the xtables lock instead of failing.
    async fn mutate(&self, table: &str, args: Vec<String>) -> Result<Outcome, FilterError> {
        let mut full = vec!["-w".to_string(), "-t".to_string(), table.to_string()];
        full.extend(args);
        let invocation = self.run(full).await?;
        if invocation.success {
            return Ok(Outcome::Applied);
        }
        match classify(&invocation.stderr) {
            Some(outcome) => {
                debug!("'{}': {outcome:?}", invocation.command);
                Ok(outcome)
            }
            None => Err(invocation.into_error()),
        }
    }
}

fn with_rule(op: &str, chain: &str, rule: &Rule) -> Vec<String> {
    let mut args = vec![op.to_string(), chain.to_string()];
    args.extend(rule.args().iter().cloned());
    args
}

impl PacketFilter for Iptables {
    fn version(&self) -> IpVersion {
        self.version
    }

    async fn new_chain(&self, table: &str, chain: &str) -> Result<Outcome, FilterError> {
        self.mutate(table, vec!["-N".to_string(), chain.to_string()])
            .await
    }

    async fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &Rule,
    ) -> Result<Outcome, FilterError> {
        let mut args = vec!["-I".to_string(), chain.to_string(), position.to_string()];
        args.extend(rule.args().iter().cloned());
        self.mutate(table, args).await
    }

    async fn append(&self, table: &str, chain: &str, rule: &Rule) -> Result<Outcome, FilterError> {
        self.mutate(table, with_rule("-A", chain, rule)).await
    }

    async fn exists(&self, table: &str, chain: &str, rule: &Rule) -> Result<bool, FilterError> {
        match self.mutate(table, with_rule("-C", chain, rule)).await? {
            Outcome::Applied => Ok(true),
            Outcome::NotFound | Outcome::AlreadyExists => Ok(false),
        }
    }

    async fn delete(&self, table: &str, chain: &str, rule: &Rule) -> Result<Outcome, FilterError> {
        self.mutate(table, with_rule("-D", chain, rule)).await
    }

    async fn clear_chain(&self, table: &str, chain: &str) -> Result<Outcome, FilterError> {
        self.mutate(table, vec!["-F".to_string(), chain.to_string()])
            .await
    }

    async fn delete_chain(&self, table: &str, chain: &str) -> Result<Outcome, FilterError> {
        self.mutate(table, vec!["-X".to_string(), chain.to_string()])
            .await
    }
}
