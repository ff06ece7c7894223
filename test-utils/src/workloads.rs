// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A workload manager kept in memory, with a lifecycle event feed driven by the test.

use lxd::{LxdError, WorkloadApi};
use rules::WorkloadAddresses;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

type Event = Result<String, LxdError>;

#[derive(Debug, Default)]
struct State {
    addresses: HashMap<String, WorkloadAddresses>,
    failing: HashSet<String>,
    queries: Vec<String>,
    sender: Option<UnboundedSender<Event>>,
    receiver: Option<UnboundedReceiver<Event>>,
}

/// In-memory workload manager.
///
/// Workloads without addresses are reported as having none, like stopped instances. Events
/// pushed with [`FakeWorkloads::send`] are delivered, in order, to the single subscriber; the
/// feed ends once [`FakeWorkloads::close`] is called and every pending event is consumed.
#[derive(Debug)]
pub struct FakeWorkloads {
    state: Mutex<State>,
}

impl Default for FakeWorkloads {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWorkloads {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            state: Mutex::new(State {
                sender: Some(sender),
                receiver: Some(receiver),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give a workload addresses.
    ///
    /// # Panics
    ///
    /// If an address does not parse.
    #[must_use]
    pub fn with(self, workload: &str, addresses: &[&str]) -> Self {
        self.set_addresses(workload, addresses);
        self
    }

    /// Replace the addresses of a workload.
    ///
    /// # Panics
    ///
    /// If an address does not parse.
    pub fn set_addresses(&self, workload: &str, addresses: &[&str]) {
        let addresses = addresses
            .iter()
            .map(|a| a.parse::<IpAddr>().unwrap_or_else(|e| panic!("{a}: {e}")))
            .collect();
        self.lock()
            .addresses
            .insert(workload.to_string(), addresses);
    }

    /// Make address queries for a workload fail.
    pub fn fail(&self, workload: &str) {
        self.lock().failing.insert(workload.to_string());
    }

    /// Workloads whose addresses were queried, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    /// Push a raw event record.
    pub fn send(&self, raw: &str) {
        self.push(Ok(raw.to_string()));
    }

    /// Push a read error.
    pub fn send_error(&self, error: LxdError) {
        self.push(Err(error));
    }

    fn push(&self, event: Event) {
        if let Some(sender) = &self.lock().sender {
            // delivery only fails once the subscriber is gone
            let _ = sender.send(event);
        }
    }

    /// End the feed after the events already sent.
    pub fn close(&self) {
        self.lock().sender = None;
    }
}

impl WorkloadApi for FakeWorkloads {
    type Events = UnboundedReceiverStream<Event>;

    async fn addresses(&self, workload: &str) -> Result<WorkloadAddresses, LxdError> {
        let mut state = self.lock();
        trace!("Address query for {workload}");
        state.queries.push(workload.to_string());
        if state.failing.contains(workload) {
            return Err(LxdError::Failed {
                command: format!("lxc query /1.0/instances/{workload}/state"),
                status: "exit status: 1".to_string(),
                stderr: "Error: Instance not found".to_string(),
            });
        }
        Ok(state.addresses.get(workload).cloned().unwrap_or_default())
    }

    async fn subscribe(&self) -> Result<Self::Events, LxdError> {
        match self.lock().receiver.take() {
            Some(receiver) => Ok(UnboundedReceiverStream::new(receiver)),
            None => Err(LxdError::Failed {
                command: "lxc monitor".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "already subscribed".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn addresses_and_queries() {
        let workloads = FakeWorkloads::new().with("web", &["10.0.3.5", "fd42::5"]);
        workloads.fail("db");

        let addresses = workloads.addresses("web").await.unwrap();
        assert_eq!(addresses.v4.len(), 1);
        assert_eq!(addresses.v6.len(), 1);
        assert!(workloads.addresses("stopped").await.unwrap().is_empty());
        assert!(workloads.addresses("db").await.is_err());
        assert_eq!(workloads.queries(), vec!["web", "stopped", "db"]);
    }

    #[tokio::test]
    async fn event_feed() {
        let workloads = FakeWorkloads::new();
        workloads.send("one");
        workloads.send_error(LxdError::Read(std::io::Error::other("broken")));
        workloads.send("two");
        workloads.close();
        workloads.send("dropped");

        let events: Vec<Option<String>> = workloads
            .subscribe()
            .await
            .unwrap()
            .map(Result::ok)
            .collect()
            .await;
        assert_eq!(
            events,
            vec![Some("one".to_string()), None, Some("two".to_string())]
        );
        assert!(workloads.subscribe().await.is_err());
    }
}
