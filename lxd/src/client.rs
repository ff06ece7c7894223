// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`WorkloadApi`] implemented with the `lxc` command line client.

use crate::state::InstanceState;
use crate::{LxdError, WorkloadApi};
use futures::Stream;
use rules::WorkloadAddresses;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, trace};

// older releases only report container start and stop as logging events
const MONITOR_ARGS: [&str; 4] = [
    "monitor",
    "--type=lifecycle",
    "--type=logging",
    "--format=json",
];

#[derive(Clone, Debug)]
pub struct LxcClient {
    program: String,
}

impl Default for LxcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LxcClient {
    /// Use `lxc` as found in `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("lxc")
    }

    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn unavailable(&self, source: std::io::Error) -> LxdError {
        LxdError::Unavailable {
            program: self.program.clone(),
            source,
        }
    }

    /// `lxc query <path>`: a raw GET on the LXD API.
    async fn query(&self, path: &str) -> Result<(String, Vec<u8>), LxdError> {
        let command = format!("{} query {path}", self.program);
        trace!("Running '{command}'");
        let output = Command::new(&self.program)
            .args(["query", path])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.unavailable(e))?;
        if !output.status.success() {
            return Err(LxdError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok((command, output.stdout))
    }
}

impl WorkloadApi for LxcClient {
    type Events = MonitorStream;

    async fn addresses(&self, workload: &str) -> Result<WorkloadAddresses, LxdError> {
        let (command, body) = self
            .query(&format!("/1.0/instances/{workload}/state"))
            .await?;
        let state: InstanceState = serde_json::from_slice(&body)
            .map_err(|source| LxdError::Decode { command, source })?;
        let addresses = state.addresses();
        debug!(
            "Workload {workload} is {} with addresses {:?} {:?}",
            state.status, addresses.v4, addresses.v6
        );
        Ok(addresses)
    }

    async fn subscribe(&self) -> Result<MonitorStream, LxdError> {
        debug!("Subscribing: {} {}", self.program, MONITOR_ARGS.join(" "));
        let mut child = Command::new(&self.program)
            .args(MONITOR_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            self.unavailable(std::io::Error::other("monitor output is not captured"))
        })?;
        Ok(MonitorStream {
            _child: child,
            lines: LinesStream::new(BufReader::new(stdout).lines()),
        })
    }
}

/// The output of a running `lxc monitor`, line by line. Dropping the stream kills the monitor.
#[derive(Debug)]
pub struct MonitorStream {
    _child: Child,
    lines: LinesStream<BufReader<ChildStdout>>,
}

impl Stream for MonitorStream {
    type Item = Result<String, LxdError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.lines)
            .poll_next(cx)
            .map(|line| line.map(|l| l.map_err(LxdError::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_client_is_unavailable() {
        let client = LxcClient::with_program("/nonexistent/portfwd/lxc");
        let err = client.addresses("web").await.unwrap_err();
        assert!(matches!(err, LxdError::Unavailable { .. }), "{err}");
        let err = client.subscribe().await.unwrap_err();
        assert!(matches!(err, LxdError::Unavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn failed_query() {
        let client = LxcClient::with_program("false");
        let LxdError::Failed { command, .. } = client.addresses("web").await.unwrap_err() else {
            unreachable!()
        };
        assert_eq!(command, "false query /1.0/instances/web/state");
    }

    #[tokio::test]
    async fn undecodable_state() {
        // echo prints its arguments back, which is not JSON
        let client = LxcClient::with_program("echo");
        let err = client.addresses("web").await.unwrap_err();
        assert!(matches!(err, LxdError::Decode { .. }), "{err}");
    }

    #[tokio::test]
    async fn monitor_lines_until_exit() {
        let client = LxcClient::with_program("echo");
        let events = client.subscribe().await.unwrap();
        let lines: Vec<String> = events.map(Result::unwrap).collect().await;
        assert_eq!(
            lines,
            vec!["monitor --type=lifecycle --type=logging --format=json"]
        );
    }
}
