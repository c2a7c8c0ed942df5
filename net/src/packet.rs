// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end parsing of a received Geneve datagram and composition of the
//! response returned to the balancer.

use crate::checksum::Checksum;
use crate::geneve::{Geneve, GeneveError, GeneveOptionsPolicy};
use crate::icmp4::Icmp4;
use crate::ipv4::{Ipv4, Ipv4Error};
use crate::parse::{DeParse, Parse, ParseError, ParseWith};
use crate::tcp::{Tcp, TcpError};
use crate::udp::port::UdpPort;
use crate::udp::Udp;
use core::convert::Infallible;
use etherparse::IpNumber;
use tracing::{debug, warn};

/// How the data socket was opened, which decides what framing the received
/// bytes carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SocketMode {
    /// A raw socket with header inclusion: reads and writes are full IP
    /// datagrams.
    Raw,
    /// A bound UDP socket: the kernel strips (and re-adds) the outer
    /// framing; reads start at the Geneve header.
    UdpBind,
}

/// The transport header of the encapsulated packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerL4 {
    /// An encapsulated TCP segment.
    Tcp(Tcp),
    /// An encapsulated UDP datagram.
    Udp(Udp),
    /// An encapsulated ICMP message.
    Icmp4(Icmp4),
}

impl InnerL4 {
    /// The transport source port (zero for ICMP).
    #[must_use]
    pub fn source_port(&self) -> u16 {
        match self {
            InnerL4::Tcp(tcp) => tcp.source(),
            InnerL4::Udp(udp) => udp.source(),
            InnerL4::Icmp4(_) => 0,
        }
    }

    /// The transport destination port (zero for ICMP).
    #[must_use]
    pub fn destination_port(&self) -> u16 {
        match self {
            InnerL4::Tcp(tcp) => tcp.destination(),
            InnerL4::Udp(udp) => udp.destination(),
            InnerL4::Icmp4(_) => 0,
        }
    }

    /// The transport payload length given the enclosing ip payload length.
    #[must_use]
    pub fn payload_len(&self, ip_payload_len: u16) -> u16 {
        match self {
            InnerL4::Tcp(tcp) => tcp.payload_len(ip_payload_len),
            InnerL4::Udp(udp) => udp.payload_len(ip_payload_len),
            InnerL4::Icmp4(icmp) => icmp.payload_len(ip_payload_len),
        }
    }
}

/// A received Geneve datagram, parsed end to end.
///
/// Owns the received bytes for one request/response cycle; the response is
/// composed by rewriting the outer IPv4 header in place and handing the
/// buffer back.
#[derive(Debug)]
pub struct GenevePacket {
    raw: Vec<u8>,
    mode: SocketMode,
    outer_ipv4: Option<Ipv4>,
    outer_udp: Option<Udp>,
    geneve: Geneve,
    inner_ipv4: Ipv4,
    inner_l4: Option<InnerL4>,
}

/// Errors which abort the handling of a single datagram.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The outer IPv4 header failed to parse.
    #[error("outer ipv4: {0}")]
    OuterIpv4(ParseError<Ipv4Error>),
    /// The outer UDP header failed to parse.
    #[error("outer udp: {0}")]
    OuterUdp(ParseError<Infallible>),
    /// The outer UDP destination is not the Geneve port; the datagram is
    /// not for us.
    #[error("udp destination port {0} does not match the geneve port")]
    UnmatchedGenevePort(u16),
    /// The Geneve header failed to parse.
    #[error("geneve: {0}")]
    Geneve(ParseError<GeneveError>),
    /// The encapsulated IPv4 header failed to parse.
    #[error("inner ipv4: {0}")]
    InnerIpv4(ParseError<Ipv4Error>),
    /// The encapsulated TCP header failed to parse.
    #[error("inner tcp: {0}")]
    InnerTcp(ParseError<TcpError>),
    /// The encapsulated UDP header failed to parse.
    #[error("inner udp: {0}")]
    InnerUdp(ParseError<Infallible>),
    /// The encapsulated ICMP header failed to parse.
    #[error("inner icmp: {0}")]
    InnerIcmp(ParseError<Infallible>),
}

fn tail(raw: &[u8], offset: usize) -> &[u8] {
    raw.get(offset..).unwrap_or(&[])
}

/// Decode the transport header of the encapsulated packet.
///
/// A truncated or malformed header for a dispatched protocol is an error
/// (the datagram is dropped with no response); only an unknown protocol
/// leaves the payload uninspected while the datagram is still answered.
fn parse_inner_l4(inner_ipv4: &Ipv4, buf: &[u8]) -> Result<Option<InnerL4>, PacketError> {
    match inner_ipv4.protocol() {
        IpNumber::TCP => Tcp::parse(buf)
            .map(|(tcp, _)| Some(InnerL4::Tcp(tcp)))
            .map_err(PacketError::InnerTcp),
        IpNumber::UDP => Udp::parse(buf)
            .map(|(udp, _)| Some(InnerL4::Udp(udp)))
            .map_err(PacketError::InnerUdp),
        IpNumber::ICMP => Icmp4::parse(buf)
            .map(|(icmp, _)| Some(InnerL4::Icmp4(icmp)))
            .map_err(PacketError::InnerIcmp),
        other => {
            warn!(
                "unknown inner protocol {}; leaving the payload uninspected",
                other.0
            );
            Ok(None)
        }
    }
}

impl GenevePacket {
    /// Parse a received datagram, decoding Geneve options and expecting the
    /// standard Geneve port.
    ///
    /// # Errors
    ///
    /// Returns a [`PacketError`] naming the layer at which the datagram was
    /// rejected; the caller drops it with no response.
    pub fn parse(raw: Vec<u8>, mode: SocketMode) -> Result<GenevePacket, PacketError> {
        Self::parse_with(raw, mode, GeneveOptionsPolicy::default(), Geneve::PORT)
    }

    /// Parse a received datagram with an explicit Geneve options policy and
    /// data port. A raw socket sees every UDP datagram on the host, so the
    /// destination port decides whether this one is ours at all.
    ///
    /// # Errors
    ///
    /// Returns a [`PacketError`] naming the layer at which the datagram was
    /// rejected.
    pub fn parse_with(
        raw: Vec<u8>,
        mode: SocketMode,
        policy: GeneveOptionsPolicy,
        geneve_port: UdpPort,
    ) -> Result<GenevePacket, PacketError> {
        let (outer_ipv4, outer_udp, geneve_offset) = match mode {
            SocketMode::Raw => {
                let (ipv4, ip_consumed) = Ipv4::parse(&raw).map_err(PacketError::OuterIpv4)?;
                let (udp, udp_consumed) =
                    Udp::parse(tail(&raw, ip_consumed.get())).map_err(PacketError::OuterUdp)?;
                if udp.destination() != u16::from(geneve_port) {
                    return Err(PacketError::UnmatchedGenevePort(udp.destination()));
                }
                let offset = ip_consumed.get() + udp_consumed.get();
                (Some(ipv4), Some(udp), offset)
            }
            SocketMode::UdpBind => (None, None, 0),
        };
        let (geneve, geneve_consumed) =
            Geneve::parse_with(policy, tail(&raw, geneve_offset)).map_err(PacketError::Geneve)?;
        let inner_offset = geneve_offset + geneve_consumed.get();
        let (inner_ipv4, inner_consumed) =
            Ipv4::parse(tail(&raw, inner_offset)).map_err(PacketError::InnerIpv4)?;
        let inner_l4 =
            parse_inner_l4(&inner_ipv4, tail(&raw, inner_offset + inner_consumed.get()))?;
        debug!(
            src = %inner_ipv4.source(),
            dst = %inner_ipv4.destination(),
            protocol = inner_ipv4.protocol().0,
            "parsed inner packet"
        );
        Ok(GenevePacket {
            raw,
            mode,
            outer_ipv4,
            outer_udp,
            geneve,
            inner_ipv4,
            inner_l4,
        })
    }

    /// The socket mode this packet was received under.
    #[must_use]
    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    /// The outer IPv4 header (absent in udp-bind mode).
    #[must_use]
    pub fn outer_ipv4(&self) -> Option<&Ipv4> {
        self.outer_ipv4.as_ref()
    }

    /// The outer UDP header (absent in udp-bind mode).
    #[must_use]
    pub fn outer_udp(&self) -> Option<&Udp> {
        self.outer_udp.as_ref()
    }

    /// The Geneve header.
    #[must_use]
    pub fn geneve(&self) -> &Geneve {
        &self.geneve
    }

    /// The encapsulated IPv4 header.
    #[must_use]
    pub fn inner_ipv4(&self) -> &Ipv4 {
        &self.inner_ipv4
    }

    /// The encapsulated transport header; `None` when the inner protocol is
    /// not one of TCP, UDP, or ICMP.
    #[must_use]
    pub fn inner_l4(&self) -> Option<&InnerL4> {
        self.inner_l4.as_ref()
    }

    /// The received bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The transport payload length of the encapsulated packet (zero when
    /// the inner protocol is unknown).
    #[must_use]
    pub fn inner_payload_len(&self) -> u16 {
        let ip_payload_len = self.inner_ipv4.payload_len();
        self.inner_l4
            .as_ref()
            .map_or(0, |l4| l4.payload_len(ip_payload_len))
    }

    /// Consume the packet and produce the datagram to send back.
    ///
    /// In raw mode the outer IPv4 header is rewritten in place: addresses
    /// swapped, TTL decremented (wrapping), checksum recomputed. Everything
    /// after the outer IPv4 header, outer UDP ports included, is returned
    /// untouched, as the balancer expects the reply on the same destination
    /// port. In udp-bind mode the kernel supplies the outer framing and the
    /// bytes go back verbatim.
    #[must_use]
    pub fn into_response(mut self) -> Vec<u8> {
        if let Some(outer) = &self.outer_ipv4 {
            let mut ipv4 = outer.clone();
            ipv4.swap_addresses().decrement_ttl().update_checksum();
            let header_len = ipv4.header_len();
            ipv4.deparse(&mut self.raw[..header_len])
                .unwrap_or_else(|_| unreachable!());
        }
        self.raw
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)] // valid in test code
#[cfg(test)]
mod test {
    use crate::checksum::Checksum;
    use crate::ipv4::Ipv4;
    use crate::packet::{GenevePacket, InnerL4, PacketError, SocketMode};
    use crate::parse::{Parse, ParseError};
    use crate::testing::{
        geneve_datagram, geneve_payload, icmp_echo, ipv4_packet, tcp_segment, udp_datagram,
        TcpFlags,
    };
    use etherparse::IpNumber;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    const COOKIE: &[u8] = &[0x11, 0x22, 0x33, 0x44];

    fn syn_datagram(ttl: u8, udp_dst_port: u16) -> Vec<u8> {
        let inner = ipv4_packet(
            [192, 0, 2, 5],
            [192, 0, 2, 9],
            IpNumber::TCP,
            63,
            &tcp_segment(40000, 443, TcpFlags::SYN, 0),
        );
        geneve_datagram(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            ttl,
            udp_dst_port,
            Some(COOKIE),
            &inner,
        )
    }

    #[test]
    fn raw_mode_parses_the_whole_stack() {
        let raw = syn_datagram(64, 6081);
        let packet = GenevePacket::parse(raw, SocketMode::Raw).unwrap();
        assert_eq!(packet.outer_ipv4().unwrap().ttl(), 64);
        assert_eq!(packet.outer_udp().unwrap().destination(), 6081);
        assert_eq!(packet.geneve().flow_cookie().unwrap().to_string(), "11223344");
        assert_eq!(
            packet.inner_ipv4().source(),
            Ipv4Addr::new(192, 0, 2, 5)
        );
        match packet.inner_l4() {
            Some(InnerL4::Tcp(tcp)) => {
                assert_eq!(tcp.source(), 40000);
                assert_eq!(tcp.destination(), 443);
                assert!(tcp.syn() && !tcp.ack());
            }
            other => unreachable!("{other:?}"),
        }
        assert_eq!(packet.inner_payload_len(), 0);
    }

    #[test]
    fn raw_mode_response_swaps_addresses_and_preserves_the_tail() {
        let raw = syn_datagram(64, 6081);
        let packet = GenevePacket::parse(raw.clone(), SocketMode::Raw).unwrap();
        let outer_len = packet.outer_ipv4().unwrap().header_len();
        let response = packet.into_response();

        // everything after the outer ipv4 header is byte-exact
        assert_eq!(&response[outer_len..], &raw[outer_len..]);

        let (outer, _) = Ipv4::parse(&response).unwrap();
        assert_eq!(outer.source(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(outer.destination(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(outer.ttl(), 63);
        assert!(outer.validate_checksum().is_ok());
    }

    #[test]
    fn ttl_zero_wraps_in_the_response() {
        let packet =
            GenevePacket::parse(syn_datagram(0, 6081), SocketMode::Raw).unwrap();
        let response = packet.into_response();
        let (outer, _) = Ipv4::parse(&response).unwrap();
        assert_eq!(outer.ttl(), 0xFF);
        assert!(outer.validate_checksum().is_ok());
    }

    #[test]
    fn unmatched_geneve_port_is_rejected() {
        match GenevePacket::parse(syn_datagram(64, 1234), SocketMode::Raw) {
            Err(PacketError::UnmatchedGenevePort(1234)) => {}
            other => unreachable!("{other:?}"),
        }
    }

    #[test]
    fn udp_bind_mode_returns_the_bytes_verbatim() {
        let inner = ipv4_packet(
            [192, 0, 2, 5],
            [192, 0, 2, 9],
            IpNumber::UDP,
            63,
            &udp_datagram(12345, 53, 30),
        );
        let raw = geneve_payload(Some(COOKIE), &inner);
        let packet = GenevePacket::parse(raw.clone(), SocketMode::UdpBind).unwrap();
        assert!(packet.outer_ipv4().is_none());
        assert!(packet.outer_udp().is_none());
        assert_eq!(packet.inner_payload_len(), 30);
        assert_eq!(packet.into_response(), raw);
    }

    #[test]
    fn unknown_inner_protocol_still_yields_a_response() {
        // protocol 2 (IGMP) is not dispatched
        let inner = ipv4_packet(
            [192, 0, 2, 5],
            [192, 0, 2, 9],
            IpNumber(2),
            63,
            &[0u8; 8],
        );
        let raw = geneve_datagram([10, 0, 0, 1], [10, 0, 0, 2], 64, 6081, Some(COOKIE), &inner);
        let packet = GenevePacket::parse(raw.clone(), SocketMode::Raw).unwrap();
        assert!(packet.inner_l4().is_none());
        assert_eq!(packet.inner_payload_len(), 0);
        let response = packet.into_response();
        assert_eq!(&response[20..], &raw[20..]);
    }

    #[test]
    fn inner_icmp_counts_payload_past_the_fixed_header() {
        let inner = ipv4_packet(
            [192, 0, 2, 5],
            [192, 0, 2, 9],
            IpNumber::ICMP,
            63,
            &icmp_echo(48),
        );
        let raw = geneve_datagram([10, 0, 0, 1], [10, 0, 0, 2], 64, 6081, Some(COOKIE), &inner);
        let packet = GenevePacket::parse(raw, SocketMode::Raw).unwrap();
        assert!(matches!(packet.inner_l4(), Some(InnerL4::Icmp4(_))));
        assert_eq!(packet.inner_payload_len(), 48);
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        let raw = syn_datagram(64, 6081);
        // cut into the inner ipv4 header
        let cut = raw.len() - 30;
        match GenevePacket::parse(raw[..cut].to_vec(), SocketMode::Raw) {
            Err(PacketError::InnerIpv4(_)) => {}
            other => unreachable!("{other:?}"),
        }
        // cut into the inner tcp header: a dispatched protocol with a short
        // transport header also drops the datagram
        let cut = raw.len() - 10;
        match GenevePacket::parse(raw[..cut].to_vec(), SocketMode::Raw) {
            Err(PacketError::InnerTcp(ParseError::Length(_))) => {}
            other => unreachable!("{other:?}"),
        }
    }

    #[test]
    fn missing_cookie_parses_but_yields_no_cookie() {
        let inner = ipv4_packet(
            [192, 0, 2, 5],
            [192, 0, 2, 9],
            IpNumber::TCP,
            63,
            &tcp_segment(40000, 443, TcpFlags::SYN, 0),
        );
        let raw = geneve_datagram([10, 0, 0, 1], [10, 0, 0, 2], 64, 6081, None, &inner);
        let packet = GenevePacket::parse(raw, SocketMode::Raw).unwrap();
        assert!(packet.geneve().flow_cookie().is_err());
        assert!(packet.inner_l4().is_some());
    }
}
