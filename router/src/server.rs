// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Socket setup and the receive loop.
//!
//! One poller multiplexes the Geneve data socket, the companion port-claim
//! socket (raw mode only), and the health listener. All packet work happens
//! inline on this thread; only the flow sweeper runs elsewhere.

use crate::config::{RouterConfig, MAX_DATAGRAM, POLL_TIMEOUT};
use crate::health;
use flow_tracker::FlowTracker;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use net::geneve::GeneveOptionsPolicy;
use net::packet::{GenevePacket, PacketError, SocketMode};
use net::udp::port::UdpPort;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DATA: Token = Token(0);
const PORT_CLAIM: Token = Token(1);
const HEALTH: Token = Token(2);

/// A raw IPv4 socket with header inclusion: reads return the whole IP
/// datagram and writes must supply one. Requires elevated privileges.
fn raw_geneve_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))?;
    socket.set_header_included_v4(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket.into())
}

/// A plain bound UDP socket. In raw mode this only claims the Geneve port
/// so the kernel does not answer the balancer with port-unreachable; in
/// udp-bind mode it is the data socket itself.
fn bound_udp_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket.into())
}

fn health_listener(port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// The data-plane endpoint: sockets, poller, and per-datagram dispatch.
pub struct Server {
    poll: Poll,
    data: UdpSocket,
    port_claim: Option<UdpSocket>,
    health: TcpListener,
    mode: SocketMode,
    geneve_port: UdpPort,
    tracker: Option<Arc<FlowTracker>>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Open and register every socket the configuration calls for.
    ///
    /// # Errors
    ///
    /// Any bind or registration failure is fatal to startup; in particular
    /// raw mode returns `PermissionDenied` without root.
    pub fn bind(
        config: &RouterConfig,
        tracker: Option<Arc<FlowTracker>>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Server> {
        let port = u16::from(config.geneve_port);
        let (data, port_claim) = match config.socket_mode {
            SocketMode::Raw => (raw_geneve_socket(port)?, Some(bound_udp_socket(port)?)),
            SocketMode::UdpBind => (bound_udp_socket(port)?, None),
        };
        let health = health_listener(config.health_port)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&data.as_raw_fd()), DATA, Interest::READABLE)?;
        if let Some(claim) = &port_claim {
            poll.registry().register(
                &mut SourceFd(&claim.as_raw_fd()),
                PORT_CLAIM,
                Interest::READABLE,
            )?;
        }
        poll.registry().register(
            &mut SourceFd(&health.as_raw_fd()),
            HEALTH,
            Interest::READABLE,
        )?;
        info!(
            "listening for geneve on udp {port} ({mode:?} mode), health checks on tcp {health}",
            mode = config.socket_mode,
            health = config.health_port,
        );
        Ok(Server {
            poll,
            data,
            port_claim,
            health,
            mode: config.socket_mode,
            geneve_port: config.geneve_port,
            tracker,
            shutdown,
        })
    }

    /// Block on readiness and dispatch events until the shutdown flag is
    /// raised. Sockets close when the server drops.
    ///
    /// # Errors
    ///
    /// Per-datagram failures are logged and absorbed; only poller breakage
    /// escapes.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(64);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    // signal delivery; re-check the shutdown flag
                    continue;
                }
                return Err(e);
            }
            for event in &events {
                match event.token() {
                    DATA => self.drain_data_socket(&mut buf),
                    PORT_CLAIM => self.drain_port_claim(&mut buf),
                    HEALTH => health::serve_probes(&self.health),
                    token => warn!("event on unknown token {token:?}"),
                }
            }
        }
        info!("shutdown requested; leaving the receive loop");
        Ok(())
    }

    fn drain_data_socket(&self, buf: &mut [u8]) {
        loop {
            match self.data.recv_from(buf) {
                Ok((len, peer)) => {
                    debug!("received {len} byte datagram from {peer}");
                    if let Some(response) = self.handle_datagram(&buf[..len]) {
                        match self.data.send_to(&response, peer) {
                            Ok(_) => debug!("datagram returned to {peer}"),
                            Err(e) => error!("send to {peer} failed: {e}"),
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("receive failed: {e}");
                    break;
                }
            }
        }
    }

    fn drain_port_claim(&self, buf: &mut [u8]) {
        let Some(claim) = &self.port_claim else {
            return;
        };
        // nothing should arrive here that the raw socket does not also see
        while let Ok((len, peer)) = claim.recv_from(buf) {
            debug!("discarding {len} bytes on the port-claim socket from {peer}");
        }
    }

    fn handle_datagram(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        let parsed = GenevePacket::parse_with(
            bytes.to_vec(),
            self.mode,
            GeneveOptionsPolicy::default(),
            self.geneve_port,
        );
        let packet = match parsed {
            Ok(packet) => packet,
            Err(PacketError::UnmatchedGenevePort(port)) => {
                debug!("ignoring udp datagram for port {port}");
                return None;
            }
            Err(e) => {
                warn!("dropping datagram: {e}");
                return None;
            }
        };
        if let Some(tracker) = &self.tracker {
            if packet.inner_l4().is_some() {
                tracker.update(&packet);
            }
        }
        Some(packet.into_response())
    }
}
