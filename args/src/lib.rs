// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use clap::ValueEnum;
use config::{ConfigError, ForwardingConfig, PortMapping};
use rules::{PlanOptions, PlanOptionsBuilder, PlanOptionsBuilderError};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// What the process does.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// Forward the ports of every configured workload, then exit.
    #[default]
    Forward,
    /// Remove the forwarding of every configured workload, then exit.
    Reverse,
    /// Forward every configured workload, then follow their lifecycle events.
    Daemon,
}

#[derive(Parser, Debug)]
#[command(name = "portfwd")]
#[command(version)]
#[command(about = "Forward host ports to LXD containers with iptables", long_about = None)]
pub struct CmdArgs {
    #[arg(long, value_enum, default_value_t = Mode::Forward)]
    mode: Mode,

    #[arg(
        long,
        value_name = "NAME",
        requires = "ports",
        help = "Forward to this container only, with the ports given by --ports instead of the config file"
    )]
    container: Option<String>,

    #[arg(
        long,
        value_name = "PROTO://HOST:CONT[,HOST:CONT...]",
        value_parser = PortMapping::from_str,
        requires = "container",
        help = "Ports to forward to --container, e.g. tcp://80:8080,443:443"
    )]
    ports: Option<PortMapping>,

    #[arg(
        long,
        value_name = "PATH",
        default_value = "config.yaml",
        help = "YAML forwarding policy, used when no --container is given"
    )]
    config: PathBuf,

    #[arg(
        long,
        default_value_t = false,
        help = "Also forward connections opened from the host's loopback addresses"
    )]
    loopback: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Create chains and hooks for an IP version the container has no address of"
    )]
    hook_empty_families: bool,

    #[arg(long, value_name = "PATH", default_value = "lxc", help = "LXD client program")]
    lxc: String,

    #[arg(
        long,
        value_name = "PATH",
        default_value = "iptables",
        help = "IPv4 packet filter program"
    )]
    iptables: String,

    #[arg(
        long,
        value_name = "PATH",
        default_value = "ip6tables",
        help = "IPv6 packet filter program"
    )]
    ip6tables: String,

    #[arg(
        long,
        default_value_t = false,
        help = "Show configurable tracing targets and exit"
    )]
    show_tracing_targets: bool,

    #[arg(
        long,
        value_name = "tracing configuration",
        help = "Tracing config string as comma-separated sequence of tag=level, with level one in [off,error,warn,info,debug,trace].
Passing default=level sets the default log-level.
Passing all=level allows setting the log-level of all targets to level.
E.g. default=error,all=info,forward=debug will set the default target to error, and all the registered targets to info, but enable debug for forward"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config
    }

    #[must_use]
    pub fn lxc(&self) -> &str {
        &self.lxc
    }
    #[must_use]
    pub fn iptables(&self) -> &str {
        &self.iptables
    }
    #[must_use]
    pub fn ip6tables(&self) -> &str {
        &self.ip6tables
    }

    #[must_use]
    pub fn show_tracing_targets(&self) -> bool {
        self.show_tracing_targets
    }
    #[must_use]
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }

    /// The forwarding policy: the inline mapping if one was given, the config file otherwise.
    pub fn forwarding(&self) -> Result<ForwardingConfig, ConfigError> {
        match (&self.container, &self.ports) {
            (Some(container), Some(ports)) => {
                debug!("Using inline forwarding for container {container}: {ports:?}");
                let config = ForwardingConfig::single(container, ports.clone());
                config.validate()?;
                Ok(config)
            }
            _ => ForwardingConfig::load(&self.config),
        }
    }

    pub fn plan_options(&self) -> Result<PlanOptions, PlanOptionsBuilderError> {
        PlanOptionsBuilder::default()
            .loopback(self.loopback)
            .hook_empty_families(self.hook_empty_families)
            .build()
    }
}
