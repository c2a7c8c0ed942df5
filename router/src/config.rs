// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use flow_tracker::FlowTrackerConfig;
use net::packet::SocketMode;
use net::udp::port::UdpPort;
use std::time::Duration;

/// Default TCP port for the balancer's health probes.
pub const DEFAULT_HEALTH_CHECK_PORT: u16 = 8080;

/// Default idle expiry (and sweep period) for tracked flows, in seconds.
pub const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 120;

/// Largest datagram a single read can return.
pub const MAX_DATAGRAM: usize = 65536;

/// How much of a health probe request is read (and ignored).
pub const HEALTH_READ_LIMIT: usize = 1024;

/// Read deadline on an accepted health probe connection.
pub const HEALTH_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on a readiness wait, so the shutdown flag is observed even
/// on a silent wire.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// UDP port carrying Geneve (6081 unless testing).
    pub geneve_port: UdpPort,
    /// TCP port answering health probes.
    pub health_port: u16,
    /// Raw socket vs. plain UDP bind.
    pub socket_mode: SocketMode,
    /// Flow tracking policy; `None` disables the tracker entirely.
    pub tracker: Option<FlowTrackerConfig>,
}
