// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A single tracked flow and its TCP connection state machine.

use crate::FlowTrackerConfig;
use net::geneve::FlowCookie;
use net::packet::{GenevePacket, InnerL4};
use net::tcp::Tcp;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use tracing::{error, info, warn};

/// TCP connection states, as observed from the flow's packets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TcpState {
    /// A clean SYN opened the flow.
    Syn,
    /// The SYN was answered.
    SynAck,
    /// The handshake completed (also the resting state of non-TCP flows).
    Run,
    /// One side started closing.
    Fin,
    /// The FIN was answered.
    FinAck,
    /// The close completed.
    Closed,
}

impl Display for TcpState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TcpState::Syn => "SYN",
            TcpState::SynAck => "SYNACK",
            TcpState::Run => "RUN",
            TcpState::Fin => "FIN",
            TcpState::FinAck => "FINACK",
            TcpState::Closed => "CLOSED",
        };
        write!(f, "{name}")
    }
}

/// Whether the tracker should retain a flow after a state transition.
///
/// The table belongs to the tracker; a flow never removes itself, it only
/// reports that it is done.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowVerdict {
    /// Leave the record in the table.
    Keep,
    /// Remove the record now.
    Drop,
}

/// One tracked flow, keyed by its cookie.
///
/// The identity fields (cookie, protocol, addresses, ports) are fixed at
/// creation: the first packet's source and destination define the forward
/// direction for the lifetime of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    cookie: FlowCookie,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    state: Option<TcpState>,
    start_timestamp: u64,
    lastpacket_timestamp: u64,
    pkts_sent: u64,
    pkts_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Flow {
    /// Build a record from the first packet of an unseen cookie.
    ///
    /// The returned verdict is [`FlowVerdict::Drop`] when the flow is TCP,
    /// the packet is not a clean SYN, and the non-SYN block policy is on;
    /// such a record must not enter the table.
    pub(crate) fn new(
        cookie: FlowCookie,
        packet: &GenevePacket,
        now: u64,
        config: &FlowTrackerConfig,
    ) -> (Flow, FlowVerdict) {
        let inner_ipv4 = packet.inner_ipv4();
        let (src_port, dst_port) = packet
            .inner_l4()
            .map_or((0, 0), |l4| (l4.source_port(), l4.destination_port()));
        let mut verdict = FlowVerdict::Keep;
        let state = match packet.inner_l4() {
            Some(InnerL4::Tcp(tcp)) => {
                if tcp.syn() && !tcp.ack() {
                    Some(TcpState::Syn)
                } else {
                    warn!("first packet for untracked tcp flow {cookie} is not a syn");
                    if config.tcp_nonsyn_block {
                        verdict = FlowVerdict::Drop;
                    }
                    None
                }
            }
            _ => Some(TcpState::Run),
        };
        let flow = Flow {
            cookie,
            protocol: inner_ipv4.protocol().0,
            src_addr: inner_ipv4.source(),
            dst_addr: inner_ipv4.destination(),
            src_port,
            dst_port,
            state,
            start_timestamp: now,
            lastpacket_timestamp: now,
            pkts_sent: 1,
            pkts_received: 0,
            bytes_sent: u64::from(packet.inner_payload_len()),
            bytes_received: 0,
        };
        info!("new flow added (flow cookie {})", flow.cookie);
        (flow, verdict)
    }

    /// Account a subsequent packet and advance the TCP state machine.
    pub(crate) fn update(
        &mut self,
        packet: &GenevePacket,
        now: u64,
        config: &FlowTrackerConfig,
    ) -> FlowVerdict {
        let destination = packet.inner_ipv4().destination();
        let payload = u64::from(packet.inner_payload_len());
        if destination == self.dst_addr {
            self.pkts_sent += 1;
            self.bytes_sent += payload;
        } else if destination == self.src_addr {
            self.pkts_received += 1;
            self.bytes_received += payload;
        } else {
            error!(
                "flow {}: inner destination {destination} matches neither direction; \
                 counters unchanged",
                self.cookie
            );
        }
        let verdict = match packet.inner_l4() {
            Some(InnerL4::Tcp(tcp)) => self.advance(tcp, config),
            _ => FlowVerdict::Keep,
        };
        self.lastpacket_timestamp = now;
        verdict
    }

    fn advance(&mut self, tcp: &Tcp, config: &FlowTrackerConfig) -> FlowVerdict {
        let next = match self.state {
            Some(TcpState::Syn) if tcp.syn() && tcp.ack() => TcpState::SynAck,
            Some(TcpState::SynAck) if tcp.ack() && !tcp.syn() && !tcp.rst() => TcpState::Run,
            Some(TcpState::Run) if tcp.fin() => TcpState::Fin,
            Some(TcpState::Fin) if tcp.fin() && tcp.ack() => TcpState::FinAck,
            Some(TcpState::FinAck) if tcp.ack() && !tcp.syn() => TcpState::Closed,
            _ => return FlowVerdict::Keep,
        };
        self.state = Some(next);
        match next {
            TcpState::Run => info!("flow {} moved to RUN state", self.cookie),
            TcpState::Closed => {
                info!("flow {} moved to CLOSED state", self.cookie);
                if config.tcp_immediate_clean {
                    return FlowVerdict::Drop;
                }
            }
            _ => {}
        }
        FlowVerdict::Keep
    }

    /// The cookie keying this record.
    #[must_use]
    pub fn cookie(&self) -> &FlowCookie {
        &self.cookie
    }

    /// The inner ip protocol number.
    #[must_use]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// The forward-direction source address.
    #[must_use]
    pub fn src_addr(&self) -> Ipv4Addr {
        self.src_addr
    }

    /// The forward-direction destination address.
    #[must_use]
    pub fn dst_addr(&self) -> Ipv4Addr {
        self.dst_addr
    }

    /// The forward-direction source port (zero for non-TCP/UDP flows).
    #[must_use]
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// The forward-direction destination port (zero for non-TCP/UDP flows).
    #[must_use]
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// The TCP state, if any was ever established.
    #[must_use]
    pub fn state(&self) -> Option<TcpState> {
        self.state
    }

    /// Unix timestamp (seconds) of the packet that created the record.
    #[must_use]
    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    /// Unix timestamp (seconds) of the most recent packet.
    #[must_use]
    pub fn lastpacket_timestamp(&self) -> u64 {
        self.lastpacket_timestamp
    }

    /// Packets seen in the forward direction.
    #[must_use]
    pub fn pkts_sent(&self) -> u64 {
        self.pkts_sent
    }

    /// Packets seen in the reverse direction.
    #[must_use]
    pub fn pkts_received(&self) -> u64 {
        self.pkts_received
    }

    /// Transport payload bytes seen in the forward direction.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Transport payload bytes seen in the reverse direction.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flow {cookie} - ip {proto} - src {src}:{sport} - dst {dst}:{dport} - \
             pkts/bytes sent {ps}/{bs} - pkts/bytes received {pr}/{br} - state {state}",
            cookie = self.cookie,
            proto = self.protocol,
            src = self.src_addr,
            sport = self.src_port,
            dst = self.dst_addr,
            dport = self.dst_port,
            ps = self.pkts_sent,
            bs = self.bytes_sent,
            pr = self.pkts_received,
            br = self.bytes_received,
            state = self
                .state
                .map_or_else(|| "none".to_string(), |s| s.to_string()),
        )
    }
}
