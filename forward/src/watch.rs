// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Keeps forwarding in line with workload lifecycle events.

use crate::engine::Forwarder;
use crate::errors::WatchError;
use futures::StreamExt;
use lxd::{LifecycleEvent, LifecycleKind, WorkloadApi};
use netfilter::PacketFilter;
use tracing::{debug, error, info, trace, warn};

/// What the watcher did with one event record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reaction {
    /// Not a start or stop, or about a workload without forwarding.
    Discarded,
    Forwarded(String),
    Reversed(String),
    /// The forward or reverse triggered by the event failed.
    Failed(String),
}

/// Forwards workloads when they start and removes their forwarding when they stop.
///
/// Events are handled one at a time, in delivery order.
pub struct Watcher<'a, F, W> {
    forwarder: &'a Forwarder<F, W>,
}

impl<'a, F: PacketFilter, W: WorkloadApi> Watcher<'a, F, W> {
    #[must_use]
    pub fn new(forwarder: &'a Forwarder<F, W>) -> Self {
        Self { forwarder }
    }

    /// React to one raw event record. Failures are logged, never returned.
    pub async fn handle(&self, raw: &str) -> Reaction {
        let Some(LifecycleEvent { kind, workload }) = LifecycleEvent::decode(raw) else {
            trace!("Discarding event {raw}");
            return Reaction::Discarded;
        };
        if !self.forwarder.config().contains(&workload) {
            debug!("Ignoring {kind} event of workload {workload}: not forwarded");
            return Reaction::Discarded;
        }
        info!("Workload {workload} {kind}");
        let result = match kind {
            LifecycleKind::Started => self.forwarder.forward_workload(&workload).await,
            LifecycleKind::Stopped => self.forwarder.reverse_workload(&workload).await,
        };
        match (kind, result) {
            (LifecycleKind::Started, Ok(())) => Reaction::Forwarded(workload),
            (LifecycleKind::Stopped, Ok(())) => Reaction::Reversed(workload),
            (_, Err(e)) => {
                error!("Failed to handle {kind} event of workload {workload}: {e}");
                Reaction::Failed(workload)
            }
        }
    }

    /// Handle events until the feed ends.
    ///
    /// This only returns on error: the feed closing is one, since events may have been missed.
    pub async fn run(&self) -> Result<(), WatchError> {
        let mut events = self
            .forwarder
            .workloads()
            .subscribe()
            .await
            .map_err(WatchError::Subscribe)?;
        info!("Watching lifecycle events");
        while let Some(event) = events.next().await {
            match event {
                Ok(raw) => {
                    self.handle(&raw).await;
                }
                Err(e) => warn!("Skipping unreadable event: {e}"),
            }
        }
        error!("Lifecycle event feed closed");
        Err(WatchError::FeedClosed)
    }
}
