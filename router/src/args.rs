// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::config::{RouterConfig, DEFAULT_FLOW_TIMEOUT_SECS, DEFAULT_HEALTH_CHECK_PORT};
pub use clap::Parser;
use flow_tracker::FlowTrackerConfig;
use net::packet::SocketMode;
use net::udp::port::UdpPort;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "geneve-router")]
#[command(version = "0.1.0")]
#[command(about = "Geneve tunnel endpoint for gateway load balancers", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct CmdArgs {
    #[arg(
        long,
        value_name = "PORT",
        default_value_t = 6081,
        help = "UDP port to receive Geneve datagrams on"
    )]
    geneve_port: u16,

    #[arg(
        long,
        value_name = "PORT",
        default_value_t = DEFAULT_HEALTH_CHECK_PORT,
        help = "TCP port answering the balancer's HTTP health probes"
    )]
    health_port: u16,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_FLOW_TIMEOUT_SECS,
        help = "Idle seconds after which a tracked flow is expired (also the sweep period)"
    )]
    flow_timeout: u64,

    #[arg(long, help = "Track inner flows and their TCP connection state")]
    track_flows: bool,

    #[arg(
        long,
        help = "Bind a plain UDP socket instead of a raw socket. No elevated privileges \
                needed; the kernel provides the outer framing, and replies necessarily \
                use source port 6081"
    )]
    udp_only: bool,

    #[arg(
        long,
        help = "Discard new TCP flows whose first packet is not a clean SYN"
    )]
    tcp_nonsyn_block: bool,

    #[arg(
        long,
        help = "Delete a tracked TCP flow as soon as it closes instead of waiting for \
                the sweeper"
    )]
    tcp_immediate_clean: bool,

    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        help = "Log filter directive (error, warn, info, debug, trace, or an env-filter \
                expression)"
    )]
    log_level: String,

    #[arg(long, value_name = "PATH", help = "Write logs to a file instead of stdout")]
    log_file: Option<PathBuf>,
}

impl CmdArgs {
    /// Validate the raw flags into a [`RouterConfig`].
    pub fn router_config(&self) -> Result<RouterConfig, String> {
        let geneve_port = UdpPort::new_checked(self.geneve_port)
            .map_err(|e| format!("bad geneve port {port}: {e}", port = self.geneve_port))?;
        if self.track_flows && self.flow_timeout == 0 {
            return Err("flow timeout must be at least one second".to_string());
        }
        let tracker = self.track_flows.then(|| FlowTrackerConfig {
            flow_timeout: Duration::from_secs(self.flow_timeout),
            tcp_nonsyn_block: self.tcp_nonsyn_block,
            tcp_immediate_clean: self.tcp_immediate_clean,
        });
        let socket_mode = if self.udp_only {
            SocketMode::UdpBind
        } else {
            SocketMode::Raw
        };
        Ok(RouterConfig {
            geneve_port,
            health_port: self.health_port,
            socket_mode,
            tracker,
        })
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}
