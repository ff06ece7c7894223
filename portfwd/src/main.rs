// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

use args::{CmdArgs, Mode, Parser};
use config::ConfigError;
use forward::{BatchError, Forwarder, WatchError, Watcher};
use lxd::LxcClient;
use netfilter::{FilterError, Iptables};
use rules::{IpVersion, PlanOptionsBuilderError};
use std::process::ExitCode;
use thiserror::Error;
use tracectl::{LevelFilter, TraceCtlError, TracingControl, trace_target};
use tracing::{error, info, warn};

trace_target!("portfwd", LevelFilter::INFO);

/// Reasons for the process to exit with a failure.
#[derive(Debug, Error)]
enum PortfwdError {
    #[error("Invalid tracing configuration: {0}")]
    Tracing(#[from] TraceCtlError),
    #[error("Invalid forwarding configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid options: {0}")]
    Options(#[from] PlanOptionsBuilderError),
    #[error("Failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error(transparent)]
    Backend(#[from] FilterError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

async fn run(args: &CmdArgs) -> Result<(), PortfwdError> {
    let config = args.forwarding()?;
    let options = args.plan_options()?;
    info!(
        "Loaded forwarding for {} workload(s), loopback forwarding {}",
        config.len(),
        if options.loopback { "on" } else { "off" }
    );

    let v4 = Iptables::with_program(IpVersion::V4, args.iptables());
    v4.check_runnable().await?;
    let v6 = Iptables::with_program(IpVersion::V6, args.ip6tables())
        .if_installed()
        .await?;
    if v6.is_none() {
        warn!(
            "Cannot run {}, IPv6 forwarding is disabled",
            args.ip6tables()
        );
    }

    let workloads = LxcClient::with_program(args.lxc());
    let forwarder = Forwarder::new(config, v4, v6, workloads, options)?;

    match args.mode() {
        Mode::Forward => forwarder.forward_all().await?,
        Mode::Reverse => forwarder.reverse_all().await?,
        Mode::Daemon => {
            if let Err(e) = forwarder.forward_all().await {
                error!("{e}");
            }
            Watcher::new(&forwarder).run().await?;
        }
    }
    Ok(())
}

fn start(args: &CmdArgs) -> Result<(), PortfwdError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PortfwdError::Runtime)?;
    runtime.block_on(run(args))
}

fn main() -> ExitCode {
    /* parse cmd line args */
    let args = CmdArgs::parse();

    let mut tctl = TracingControl::default();
    if let Some(config) = args.tracing()
        && let Err(e) = tctl.configure(config)
    {
        eprintln!("{}", PortfwdError::from(e));
        return ExitCode::FAILURE;
    }
    if args.show_tracing_targets() {
        println!("{tctl}");
        return ExitCode::SUCCESS;
    }
    if let Err(e) = tctl.install() {
        eprintln!("{}", PortfwdError::from(e));
        return ExitCode::FAILURE;
    }

    match start(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
