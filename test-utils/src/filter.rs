// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A packet filter kept in memory, enforcing the same constraints as the kernel's.

use netfilter::{FilterError, Operation, Outcome, PacketFilter};
use rules::{IpVersion, Rule};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Chains present in the `nat` table of a fresh host.
const BUILTIN_CHAINS: [&str; 4] = ["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"];

/// Targets that are not user-defined chains.
const TARGETS: [&str; 7] = [
    "ACCEPT",
    "DROP",
    "RETURN",
    "DNAT",
    "SNAT",
    "MASQUERADE",
    "REDIRECT",
];

type ChainKey = (String, String);

#[derive(Debug, Default)]
struct State {
    chains: BTreeMap<ChainKey, Vec<Rule>>,
    calls: Vec<String>,
    unavailable: bool,
    faults: HashSet<(Operation, String)>,
}

impl State {
    fn jump_target(rule: &Rule) -> Option<&str> {
        rule.args()
            .windows(2)
            .find(|w| w[0] == "-j")
            .map(|w| w[1].as_str())
            .filter(|target| !TARGETS.contains(target))
    }

    fn referenced(&self, table: &str, chain: &str) -> bool {
        self.chains
            .iter()
            .filter(|((t, _), _)| t == table)
            .flat_map(|(_, rules)| rules)
            .any(|rule| Self::jump_target(rule) == Some(chain))
    }
}

fn failed(op: Operation, table: &str, chain: &str, stderr: &str) -> FilterError {
    FilterError::Failed {
        command: format!("{op} {table} {chain}"),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

/// In-memory packet filter for one IP version.
///
/// Every call is logged. Calls fail the way iptables would: rules cannot be added to missing
/// chains nor jump to them, and chains that are built-in, non-empty or referenced cannot be
/// deleted. Failures can also be injected per operation and chain.
#[derive(Debug)]
pub struct FakeFilter {
    version: IpVersion,
    state: Mutex<State>,
}

impl FakeFilter {
    #[must_use]
    pub fn new(version: IpVersion) -> Self {
        let mut state = State::default();
        for chain in BUILTIN_CHAINS {
            state
                .chains
                .insert(("nat".to_string(), chain.to_string()), vec![]);
        }
        Self {
            version,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `op` on `chain` fail from now on.
    pub fn fail_on(&self, op: Operation, chain: &str) {
        self.lock().faults.insert((op, chain.to_string()));
    }

    /// Make every call fail as if the filter program could not be run.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// The rules of a chain, rendered, or `None` if it does not exist.
    #[must_use]
    pub fn rules(&self, table: &str, chain: &str) -> Option<Vec<String>> {
        self.lock()
            .chains
            .get(&(table.to_string(), chain.to_string()))
            .map(|rules| rules.iter().map(ToString::to_string).collect())
    }

    /// User-defined chains of a table.
    #[must_use]
    pub fn custom_chains(&self, table: &str) -> Vec<String> {
        self.lock()
            .chains
            .keys()
            .filter(|(t, c)| t == table && !BUILTIN_CHAINS.contains(&c.as_str()))
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Total number of rules across all chains.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.lock().chains.values().map(Vec::len).sum()
    }

    /// A copy of all tables, for comparing states.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<(String, String), Vec<String>> {
        self.lock()
            .chains
            .iter()
            .map(|(key, rules)| (key.clone(), rules.iter().map(ToString::to_string).collect()))
            .collect()
    }

    /// Calls received so far, as `<operation> <chain> [<rule>]`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Log a call and apply injected faults.
    fn enter(
        &self,
        op: Operation,
        table: &str,
        chain: &str,
        rule: Option<&Rule>,
    ) -> Result<MutexGuard<'_, State>, FilterError> {
        let mut state = self.lock();
        let call = match rule {
            Some(rule) => format!("{op} {chain} {rule}"),
            None => format!("{op} {chain}"),
        };
        trace!("{}: {call}", self.version);
        state.calls.push(call);
        if state.unavailable {
            return Err(FilterError::Unavailable {
                program: "fake".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        if state.faults.contains(&(op, chain.to_string())) {
            return Err(failed(op, table, chain, "injected failure"));
        }
        Ok(state)
    }

    /// Checks shared by the calls adding a rule.
    fn check_add(state: &State, table: &str, chain: &str, rule: &Rule) -> Option<Outcome> {
        let key = (table.to_string(), chain.to_string());
        if !state.chains.contains_key(&key) {
            return Some(Outcome::NotFound);
        }
        if let Some(target) = State::jump_target(rule) {
            if !state
                .chains
                .contains_key(&(table.to_string(), target.to_string()))
            {
                return Some(Outcome::NotFound);
            }
        }
        None
    }
}

impl PacketFilter for FakeFilter {
    fn version(&self) -> IpVersion {
        self.version
    }

    async fn new_chain(&self, table: &str, chain: &str) -> Result<Outcome, FilterError> {
        let mut state = self.enter(Operation::NewChain, table, chain, None)?;
        let key = (table.to_string(), chain.to_string());
        if state.chains.contains_key(&key) {
            return Ok(Outcome::AlreadyExists);
        }
        state.chains.insert(key, vec![]);
        Ok(Outcome::Applied)
    }

    async fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &Rule,
    ) -> Result<Outcome, FilterError> {
        let mut state = self.enter(Operation::Insert, table, chain, Some(rule))?;
        if let Some(outcome) = Self::check_add(&state, table, chain, rule) {
            return Ok(outcome);
        }
        let rules = state
            .chains
            .entry((table.to_string(), chain.to_string()))
            .or_default();
        let index = usize::try_from(position).unwrap_or(usize::MAX);
        if index == 0 || index > rules.len() + 1 {
            return Err(failed(
                Operation::Insert,
                table,
                chain,
                "Index of insertion too big.",
            ));
        }
        rules.insert(index - 1, rule.clone());
        Ok(Outcome::Applied)
    }

    async fn append(&self, table: &str, chain: &str, rule: &Rule) -> Result<Outcome, FilterError> {
        let mut state = self.enter(Operation::Append, table, chain, Some(rule))?;
        if let Some(outcome) = Self::check_add(&state, table, chain, rule) {
            return Ok(outcome);
        }
        state
            .chains
            .entry((table.to_string(), chain.to_string()))
            .or_default()
            .push(rule.clone());
        Ok(Outcome::Applied)
    }

    async fn exists(&self, table: &str, chain: &str, rule: &Rule) -> Result<bool, FilterError> {
        let state = self.enter(Operation::Exists, table, chain, Some(rule))?;
        Ok(state
            .chains
            .get(&(table.to_string(), chain.to_string()))
            .is_some_and(|rules| rules.contains(rule)))
    }

    async fn delete(&self, table: &str, chain: &str, rule: &Rule) -> Result<Outcome, FilterError> {
        let mut state = self.enter(Operation::Delete, table, chain, Some(rule))?;
        let Some(rules) = state.chains.get_mut(&(table.to_string(), chain.to_string())) else {
            return Ok(Outcome::NotFound);
        };
        match rules.iter().position(|r| r == rule) {
            Some(index) => {
                rules.remove(index);
                Ok(Outcome::Applied)
            }
            None => Ok(Outcome::NotFound),
        }
    }

    async fn clear_chain(&self, table: &str, chain: &str) -> Result<Outcome, FilterError> {
        let mut state = self.enter(Operation::ClearChain, table, chain, None)?;
        match state.chains.get_mut(&(table.to_string(), chain.to_string())) {
            Some(rules) => {
                rules.clear();
                Ok(Outcome::Applied)
            }
            None => Ok(Outcome::NotFound),
        }
    }

    async fn delete_chain(&self, table: &str, chain: &str) -> Result<Outcome, FilterError> {
        let op = Operation::DeleteChain;
        let mut state = self.enter(op, table, chain, None)?;
        let key = (table.to_string(), chain.to_string());
        let Some(rules) = state.chains.get(&key) else {
            return Ok(Outcome::NotFound);
        };
        if BUILTIN_CHAINS.contains(&chain) {
            return Err(failed(op, table, chain, "Invalid argument"));
        }
        if !rules.is_empty() {
            return Err(failed(op, table, chain, "Directory not empty"));
        }
        if state.referenced(table, chain) {
            return Err(failed(op, table, chain, "Too many links"));
        }
        state.chains.remove(&key);
        Ok(Outcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn jump(chain: &str) -> Rule {
        Rule::new(["-j", chain])
    }

    #[tokio::test]
    async fn chain_lifecycle() {
        let filter = FakeFilter::new(IpVersion::V4);
        let pristine = filter.snapshot();
        let dnat = Rule::new(["-p", "tcp", "-j", "DNAT"]);

        assert_eq!(filter.new_chain("nat", "C").await.unwrap(), Outcome::Applied);
        assert_eq!(
            filter.new_chain("nat", "C").await.unwrap(),
            Outcome::AlreadyExists
        );
        assert_eq!(filter.append("nat", "C", &dnat).await.unwrap(), Outcome::Applied);
        assert_eq!(
            filter.insert("nat", "PREROUTING", 1, &jump("C")).await.unwrap(),
            Outcome::Applied
        );
        assert!(filter.exists("nat", "PREROUTING", &jump("C")).await.unwrap());
        assert_eq!(filter.custom_chains("nat"), vec!["C"]);

        // referenced and not empty
        assert!(filter.delete_chain("nat", "C").await.is_err());
        assert_eq!(
            filter.delete("nat", "PREROUTING", &jump("C")).await.unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            filter.delete("nat", "PREROUTING", &jump("C")).await.unwrap(),
            Outcome::NotFound
        );
        assert!(filter.delete_chain("nat", "C").await.is_err());

        assert_eq!(filter.clear_chain("nat", "C").await.unwrap(), Outcome::Applied);
        assert_eq!(filter.delete_chain("nat", "C").await.unwrap(), Outcome::Applied);
        assert_eq!(
            filter.delete_chain("nat", "C").await.unwrap(),
            Outcome::NotFound
        );
        assert_eq!(filter.snapshot(), pristine);
    }

    #[tokio::test]
    async fn missing_chains() {
        let filter = FakeFilter::new(IpVersion::V6);
        let dnat = Rule::new(["-j", "DNAT"]);
        assert_eq!(filter.append("nat", "C", &dnat).await.unwrap(), Outcome::NotFound);
        assert_eq!(
            filter.insert("nat", "PREROUTING", 1, &jump("C")).await.unwrap(),
            Outcome::NotFound
        );
        assert!(!filter.exists("nat", "C", &dnat).await.unwrap());
        assert_eq!(filter.clear_chain("nat", "C").await.unwrap(), Outcome::NotFound);
        assert_eq!(filter.rules("nat", "C"), None);
        assert_eq!(filter.rule_count(), 0);
    }

    #[tokio::test]
    async fn insert_positions() {
        let filter = FakeFilter::new(IpVersion::V4);
        let a = Rule::new(["-j", "ACCEPT"]);
        let b = Rule::new(["-j", "RETURN"]);
        filter.insert("nat", "OUTPUT", 1, &a).await.unwrap();
        filter.insert("nat", "OUTPUT", 1, &b).await.unwrap();
        assert_eq!(
            filter.rules("nat", "OUTPUT"),
            Some(vec!["-j RETURN".to_string(), "-j ACCEPT".to_string()])
        );
        assert!(filter.insert("nat", "OUTPUT", 4, &a).await.is_err());
        assert!(filter.insert("nat", "OUTPUT", 0, &a).await.is_err());
    }

    #[tokio::test]
    async fn injected_faults() {
        let filter = FakeFilter::new(IpVersion::V4);
        filter.fail_on(Operation::NewChain, "C");
        let err = filter.new_chain("nat", "C").await.unwrap_err();
        assert!(!err.is_unavailable());
        assert_eq!(filter.new_chain("nat", "D").await.unwrap(), Outcome::Applied);

        filter.set_unavailable(true);
        let err = filter.new_chain("nat", "E").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(filter.calls(), vec!["new_chain C", "new_chain D", "new_chain E"]);
    }
}
