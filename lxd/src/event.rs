// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lifecycle events of the workload manager.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::trace;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LifecycleKind {
    Started,
    Stopped,
}

impl Display for LifecycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleKind::Started => f.write_str("started"),
            LifecycleKind::Stopped => f.write_str("stopped"),
        }
    }
}

/// A workload started or stopped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub workload: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawEvent {
    Lifecycle { metadata: LifecycleMetadata },
    Logging { metadata: LoggingMetadata },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct LifecycleMetadata {
    action: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    name: Option<String>,
}

/// Event shape of LXD releases predating lifecycle events.
#[derive(Deserialize)]
struct LoggingMetadata {
    #[serde(default)]
    message: String,
    #[serde(default)]
    context: BTreeMap<String, Value>,
}

/// The instance name in an API path such as `/1.0/instances/web?project=default`.
fn instance_from_source(source: &str) -> Option<&str> {
    let path = source.split('?').next()?;
    let name = path
        .strip_prefix("/1.0/instances/")
        .or_else(|| path.strip_prefix("/1.0/containers/"))?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

impl LifecycleMetadata {
    fn into_event(self) -> Option<LifecycleEvent> {
        let kind = match self.action.as_str() {
            "instance-started" | "instance-restarted" => LifecycleKind::Started,
            "instance-stopped" | "instance-shutdown" => LifecycleKind::Stopped,
            _ => return None,
        };
        let workload = match self.name {
            Some(name) if !name.is_empty() => name,
            _ => instance_from_source(&self.source)?.to_string(),
        };
        Some(LifecycleEvent { kind, workload })
    }
}

impl LoggingMetadata {
    fn into_event(self) -> Option<LifecycleEvent> {
        let kind = match self.message.as_str() {
            "ContainerStart" => LifecycleKind::Started,
            "ContainerStop" => LifecycleKind::Stopped,
            _ => return None,
        };
        let workload = self.context.get("container")?.as_str()?;
        if workload.is_empty() {
            return None;
        }
        Some(LifecycleEvent {
            kind,
            workload: workload.to_string(),
        })
    }
}

impl LifecycleEvent {
    /// Decode one event record. Anything that is not a start or stop of a named workload,
    /// including malformed input, yields `None`.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        let event = match serde_json::from_str::<RawEvent>(raw) {
            Ok(event) => event,
            Err(e) => {
                trace!("Undecodable event: {e}");
                return None;
            }
        };
        match event {
            RawEvent::Lifecycle { metadata } => metadata.into_event(),
            RawEvent::Logging { metadata } => metadata.into_event(),
            RawEvent::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn started(workload: &str) -> Option<LifecycleEvent> {
        Some(LifecycleEvent {
            kind: LifecycleKind::Started,
            workload: workload.to_string(),
        })
    }

    fn stopped(workload: &str) -> Option<LifecycleEvent> {
        Some(LifecycleEvent {
            kind: LifecycleKind::Stopped,
            workload: workload.to_string(),
        })
    }

    #[test]
    fn decode_lifecycle_events() {
        let raw = r#"{
            "type": "lifecycle",
            "timestamp": "2024-05-02T10:11:12.123456789Z",
            "location": "none",
            "project": "default",
            "metadata": {
                "action": "instance-started",
                "source": "/1.0/instances/web",
                "context": {"command": ["start"]},
                "requestor": {"username": "root", "protocol": "unix"}
            }
        }"#;
        assert_eq!(LifecycleEvent::decode(raw), started("web"));

        let raw = r#"{"type":"lifecycle","metadata":{"action":"instance-restarted","source":"/1.0/instances/db?project=prod"}}"#;
        assert_eq!(LifecycleEvent::decode(raw), started("db"));

        let raw = r#"{"type":"lifecycle","metadata":{"action":"instance-stopped","source":"/1.0/instances/web"}}"#;
        assert_eq!(LifecycleEvent::decode(raw), stopped("web"));

        let raw = r#"{"type":"lifecycle","metadata":{"action":"instance-shutdown","source":"/1.0/containers/web"}}"#;
        assert_eq!(LifecycleEvent::decode(raw), stopped("web"));

        let raw = r#"{"type":"lifecycle","metadata":{"action":"instance-started","source":"/1.0/instances/x","name":"web"}}"#;
        assert_eq!(LifecycleEvent::decode(raw), started("web"));
    }

    #[test]
    fn decode_legacy_logging_events() {
        let raw = r#"{"type":"logging","metadata":{"level":"info","message":"ContainerStart","context":{"container":"web","ephemeral":false}}}"#;
        assert_eq!(LifecycleEvent::decode(raw), started("web"));

        let raw = r#"{"type":"logging","metadata":{"message":"ContainerStop","context":{"container":"web"}}}"#;
        assert_eq!(LifecycleEvent::decode(raw), stopped("web"));
    }

    #[test]
    fn discard_everything_else() {
        for raw in [
            "",
            "not json",
            "[]",
            r#"{"metadata":{"action":"instance-started","source":"/1.0/instances/web"}}"#,
            r#"{"type":"operation","metadata":{"id":"1234","status":"Running"}}"#,
            r#"{"type":"lifecycle","metadata":{"action":"instance-created","source":"/1.0/instances/web"}}"#,
            r#"{"type":"lifecycle","metadata":{"action":"instance-started"}}"#,
            r#"{"type":"lifecycle","metadata":{"action":"instance-started","source":"/1.0/instances/"}}"#,
            r#"{"type":"lifecycle","metadata":{"action":"instance-snapshot-created","source":"/1.0/instances/web/snapshots/s0"}}"#,
            r#"{"type":"lifecycle","metadata":{"action":"instance-started","source":"/1.0/images/abc"}}"#,
            r#"{"type":"lifecycle"}"#,
            r#"{"type":"logging","metadata":{"message":"ContainerStart","context":{}}}"#,
            r#"{"type":"logging","metadata":{"message":"ContainerStart","context":{"container":7}}}"#,
            r#"{"type":"logging","metadata":{"message":"Started container","context":{"container":"web"}}}"#,
        ] {
            assert_eq!(LifecycleEvent::decode(raw), None, "{raw}");
        }
    }
}
