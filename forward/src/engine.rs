// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Application of rule plans to the packet filters.

use crate::errors::{Action, BatchError, ForwardError};
use config::{ConfigError, ForwardingConfig};
use lxd::WorkloadApi;
use netfilter::{FilterError, Operation, Outcome, PacketFilter};
use rules::{ChainPlan, Hook, IpVersion, NAT_TABLE, Plan, PlanOptions, Rule, plan, teardown};
use tracing::{debug, error, info, warn};

/// Where in a workload's rules a backend call was made, for error reports.
struct Step<'a> {
    workload: &'a str,
    version: IpVersion,
    operation: Operation,
    chain: &'a str,
    rule: Option<&'a Rule>,
}

impl Step<'_> {
    fn failed(&self, source: FilterError) -> ForwardError {
        if source.is_unavailable() {
            return ForwardError::BackendUnavailable(source);
        }
        ForwardError::RuleApplyFailed {
            workload: self.workload.to_string(),
            version: self.version,
            operation: self.operation,
            chain: self.chain.to_string(),
            rule: self.rule.cloned(),
            source,
        }
    }

    fn unexpected(&self, outcome: Outcome) -> ForwardError {
        ForwardError::UnexpectedOutcome {
            workload: self.workload.to_string(),
            version: self.version,
            operation: self.operation,
            chain: self.chain.to_string(),
            rule: self.rule.cloned(),
            outcome,
        }
    }

    /// Turn the result of a call into the outcome, if it is one of `accepted`.
    fn check(
        &self,
        result: Result<Outcome, FilterError>,
        accepted: &[Outcome],
    ) -> Result<Outcome, ForwardError> {
        let outcome = result.map_err(|e| self.failed(e))?;
        if accepted.contains(&outcome) {
            Ok(outcome)
        } else {
            Err(self.unexpected(outcome))
        }
    }
}

/// Applies the configured forwarding to workloads.
///
/// Holds one packet filter per IP version and the workload manager client. Every operation is
/// idempotent and needs no state besides the live rule tables. Without an IPv6 packet filter,
/// IPv6 rules are skipped.
pub struct Forwarder<F, W> {
    config: ForwardingConfig,
    v4: F,
    v6: Option<F>,
    workloads: W,
    options: PlanOptions,
}

impl<F: PacketFilter, W: WorkloadApi> Forwarder<F, W> {
    /// Validate the config and build a forwarder.
    pub fn new(
        config: ForwardingConfig,
        v4: F,
        v6: Option<F>,
        workloads: W,
        options: PlanOptions,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        debug_assert_eq!(v4.version(), IpVersion::V4);
        debug_assert!(v6.as_ref().is_none_or(|v6| v6.version() == IpVersion::V6));
        Ok(Self {
            config,
            v4,
            v6,
            workloads,
            options,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ForwardingConfig {
        &self.config
    }

    #[must_use]
    pub fn workloads(&self) -> &W {
        &self.workloads
    }

    #[must_use]
    pub fn filter(&self, version: IpVersion) -> Option<&F> {
        match version {
            IpVersion::V4 => Some(&self.v4),
            IpVersion::V6 => self.v6.as_ref(),
        }
    }

    /// Forward every configured workload, in config order.
    pub async fn forward_all(&self) -> Result<(), BatchError> {
        let mut failures = vec![];
        for workload in self.config.workloads() {
            if let Err(e) = self.forward_workload(workload).await {
                error!("Failed to forward workload {workload}: {e}");
                failures.push((workload.to_string(), e));
            }
        }
        BatchError::check(Action::Forward, failures)
    }

    /// Remove the forwarding of every configured workload, in config order.
    pub async fn reverse_all(&self) -> Result<(), BatchError> {
        let mut failures = vec![];
        for workload in self.config.workloads() {
            if let Err(e) = self.reverse_workload(workload).await {
                error!("Failed to reverse workload {workload}: {e}");
                failures.push((workload.to_string(), e));
            }
        }
        BatchError::check(Action::Reverse, failures)
    }

    /// Forward the configured ports of a workload to its current addresses.
    ///
    /// Rules left by an earlier forward are replaced, and chains and hooks that the current
    /// addresses no longer call for are removed. On failure, whatever was applied before the
    /// failing call stays in place.
    pub async fn forward_workload(&self, workload: &str) -> Result<(), ForwardError> {
        let mappings = self
            .config
            .get(workload)
            .ok_or_else(|| ForwardError::UnknownWorkload(workload.to_string()))?;
        let addresses = self.workloads.addresses(workload).await.map_err(|source| {
            ForwardError::WorkloadQueryFailed {
                workload: workload.to_string(),
                source,
            }
        })?;
        if addresses.is_empty() {
            warn!("Workload {workload} has no address, nothing to forward");
        }
        let plans = plan(workload, mappings, &addresses, &self.options);
        for plan in &plans {
            let Some(filter) = self.filter(plan.version) else {
                warn!(
                    "No {} packet filter, skipping {} rule(s) for workload {workload}",
                    plan.version,
                    plan.rule_count()
                );
                continue;
            };
            self.apply(workload, filter, plan).await?;
            info!(
                "Forwarded {} rule(s) for workload {workload} ({})",
                plan.rule_count(),
                plan.version
            );
        }
        self.prune(workload, &plans).await
    }

    async fn apply(&self, workload: &str, filter: &F, plan: &Plan) -> Result<(), ForwardError> {
        for chain in &plan.chains {
            self.apply_chain(workload, plan.version, filter, chain)
                .await?;
        }
        Ok(())
    }

    async fn apply_chain(
        &self,
        workload: &str,
        version: IpVersion,
        filter: &F,
        chain: &ChainPlan,
    ) -> Result<(), ForwardError> {
        let name = chain.chain.as_str();
        let mut step = Step {
            workload,
            version,
            operation: Operation::NewChain,
            chain: name,
            rule: None,
        };
        let created = step.check(
            filter.new_chain(NAT_TABLE, name).await,
            &[Outcome::Applied, Outcome::AlreadyExists],
        )?;
        if created == Outcome::AlreadyExists {
            debug!("Chain {name} already exists, flushing it");
            step.operation = Operation::ClearChain;
            step.check(filter.clear_chain(NAT_TABLE, name).await, &[Outcome::Applied])?;
        }

        for hook in &chain.hooks {
            let entry = hook.entry.as_str();
            let step = Step {
                workload,
                version,
                operation: Operation::Exists,
                chain: entry,
                rule: Some(&hook.rule),
            };
            let present = filter
                .exists(NAT_TABLE, entry, &hook.rule)
                .await
                .map_err(|e| step.failed(e))?;
            if present {
                debug!("{entry} already jumps to {name}");
                continue;
            }
            let step = Step {
                operation: Operation::Insert,
                ..step
            };
            step.check(
                filter.insert(NAT_TABLE, entry, 1, &hook.rule).await,
                &[Outcome::Applied],
            )?;
            debug!("{version} {entry}: {}", hook.rule);
        }

        for rule in &chain.rules {
            let step = Step {
                workload,
                version,
                operation: Operation::Append,
                chain: name,
                rule: Some(rule),
            };
            step.check(
                filter.append(NAT_TABLE, name, rule).await,
                &[Outcome::Applied],
            )?;
            debug!("{version} {name}: {rule}");
        }
        Ok(())
    }

    /// Remove the chains and hooks of a workload that `plans` does not include.
    async fn prune(&self, workload: &str, plans: &[Plan]) -> Result<(), ForwardError> {
        for stale in teardown(workload) {
            let Some(filter) = self.filter(stale.version) else {
                continue;
            };
            let current = plans.iter().find(|p| p.version == stale.version);
            for chain in &stale.chains {
                let kept = current.and_then(|p| p.chains.iter().find(|c| c.chain == chain.chain));
                let Some(kept) = kept else {
                    self.remove_chain(workload, stale.version, filter, chain)
                        .await?;
                    continue;
                };
                for hook in &chain.hooks {
                    if !kept.hooks.iter().any(|k| k.entry == hook.entry) {
                        self.remove_hook(workload, stale.version, filter, hook)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove every chain and hook a workload may own.
    ///
    /// Needs neither the workload's addresses nor any record of an earlier forward, and
    /// succeeds on a workload that was never forwarded.
    pub async fn reverse_workload(&self, workload: &str) -> Result<(), ForwardError> {
        if !self.config.contains(workload) {
            return Err(ForwardError::UnknownWorkload(workload.to_string()));
        }
        for plan in teardown(workload) {
            let Some(filter) = self.filter(plan.version) else {
                continue;
            };
            for chain in &plan.chains {
                self.remove_chain(workload, plan.version, filter, chain)
                    .await?;
            }
        }
        info!("Removed forwarding of workload {workload}");
        Ok(())
    }

    /// Delete every copy of a hook.
    async fn remove_hook(
        &self,
        workload: &str,
        version: IpVersion,
        filter: &F,
        hook: &Hook,
    ) -> Result<(), ForwardError> {
        let entry = hook.entry.as_str();
        let step = Step {
            workload,
            version,
            operation: Operation::Delete,
            chain: entry,
            rule: Some(&hook.rule),
        };
        loop {
            let outcome = step.check(
                filter.delete(NAT_TABLE, entry, &hook.rule).await,
                &[Outcome::Applied, Outcome::NotFound],
            )?;
            if outcome == Outcome::NotFound {
                return Ok(());
            }
            debug!("Removed {version} {entry}: {}", hook.rule);
        }
    }

    async fn remove_chain(
        &self,
        workload: &str,
        version: IpVersion,
        filter: &F,
        chain: &ChainPlan,
    ) -> Result<(), ForwardError> {
        let name = chain.chain.as_str();
        // a chain cannot be deleted while anything jumps to it
        for hook in &chain.hooks {
            self.remove_hook(workload, version, filter, hook).await?;
        }

        let mut step = Step {
            workload,
            version,
            operation: Operation::ClearChain,
            chain: name,
            rule: None,
        };
        let tolerated = [Outcome::Applied, Outcome::NotFound];
        if step.check(filter.clear_chain(NAT_TABLE, name).await, &tolerated)? == Outcome::NotFound
        {
            return Ok(());
        }
        step.operation = Operation::DeleteChain;
        step.check(filter.delete_chain(NAT_TABLE, name).await, &tolerated)?;
        debug!("Deleted {version} chain {name}");
        Ok(())
    }
}
