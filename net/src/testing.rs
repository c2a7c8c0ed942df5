// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet-building helpers for tests.
//!
//! Gated behind the `testing` feature so downstream crates can materialize
//! realistic datagrams in their test suites without hand-rolling byte
//! arrays.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)] // test payloads are small

use crate::geneve::{Geneve, GeneveOption, Vni};
use crate::parse::DeParse;
use etherparse::{IpNumber, Ipv4Header, TcpHeader, UdpHeader};

/// The ethertype Geneve carries for an encapsulated IPv4 packet.
pub const ETH_P_IPV4: u16 = 0x0800;

/// TCP control bits for [`tcp_segment`].
#[derive(Debug, Copy, Clone, Default)]
pub struct TcpFlags {
    /// synchronize sequence numbers
    pub syn: bool,
    /// acknowledgment field significant
    pub ack: bool,
    /// no more data from sender
    pub fin: bool,
    /// reset the connection
    pub rst: bool,
}

impl TcpFlags {
    /// A bare SYN.
    pub const SYN: TcpFlags = TcpFlags { syn: true, ack: false, fin: false, rst: false };
    /// A SYN-ACK.
    pub const SYN_ACK: TcpFlags = TcpFlags { syn: true, ack: true, fin: false, rst: false };
    /// A bare ACK.
    pub const ACK: TcpFlags = TcpFlags { syn: false, ack: true, fin: false, rst: false };
    /// A bare FIN.
    pub const FIN: TcpFlags = TcpFlags { syn: false, ack: false, fin: true, rst: false };
    /// A FIN-ACK.
    pub const FIN_ACK: TcpFlags = TcpFlags { syn: false, ack: true, fin: true, rst: false };
    /// An RST-ACK.
    pub const RST_ACK: TcpFlags = TcpFlags { syn: false, ack: true, fin: false, rst: true };
}

/// A minimal TCP segment with `payload_len` zero bytes of payload.
#[must_use]
pub fn tcp_segment(src_port: u16, dst_port: u16, flags: TcpFlags, payload_len: usize) -> Vec<u8> {
    let mut header = TcpHeader::new(src_port, dst_port, 1000, 64240);
    header.syn = flags.syn;
    header.ack = flags.ack;
    header.fin = flags.fin;
    header.rst = flags.rst;
    let mut buf = Vec::new();
    header.write(&mut buf).unwrap();
    buf.resize(buf.len() + payload_len, 0);
    buf
}

/// A UDP datagram with `payload_len` zero bytes of payload.
#[must_use]
pub fn udp_datagram(src_port: u16, dst_port: u16, payload_len: usize) -> Vec<u8> {
    let header = UdpHeader {
        source_port: src_port,
        destination_port: dst_port,
        length: (8 + payload_len) as u16,
        checksum: 0,
    };
    let mut buf = Vec::new();
    header.write(&mut buf).unwrap();
    buf.resize(buf.len() + payload_len, 0);
    buf
}

/// An ICMP echo request with `payload_len` zero bytes of payload.
#[must_use]
pub fn icmp_echo(payload_len: usize) -> Vec<u8> {
    let mut buf = vec![8, 0, 0, 0, 0, 1, 0, 1];
    buf.resize(buf.len() + payload_len, 0);
    buf
}

/// An IPv4 packet (checksummed header plus the given payload).
#[must_use]
pub fn ipv4_packet(
    src: [u8; 4],
    dst: [u8; 4],
    protocol: IpNumber,
    ttl: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut header =
        Ipv4Header::new(payload.len() as u16, ttl, protocol, src, dst).unwrap();
    header.header_checksum = header.calc_header_checksum();
    let mut buf = Vec::new();
    header.write(&mut buf).unwrap();
    buf.extend_from_slice(payload);
    buf
}

/// The balancer's flow-cookie tunnel option.
#[must_use]
pub fn flow_cookie_option(cookie: &[u8]) -> GeneveOption {
    GeneveOption::new(
        Geneve::AWS_OPTION_CLASS,
        false,
        Geneve::FLOW_COOKIE_OPTION_TYPE,
        cookie,
    )
    .unwrap()
}

/// A Geneve payload (header + options + encapsulated packet) as received on
/// a udp-bind socket.
#[must_use]
pub fn geneve_payload(cookie: Option<&[u8]>, inner: &[u8]) -> Vec<u8> {
    let options = cookie.map(|c| vec![flow_cookie_option(c)]).unwrap_or_default();
    let geneve = Geneve::new(ETH_P_IPV4, Vni::default(), options);
    let mut buf = vec![0u8; geneve.header_len()];
    geneve.deparse(&mut buf).unwrap();
    buf.extend_from_slice(inner);
    buf
}

/// A full Geneve datagram (outer IPv4 + outer UDP + Geneve + inner packet)
/// as received on a raw socket.
#[must_use]
pub fn geneve_datagram(
    outer_src: [u8; 4],
    outer_dst: [u8; 4],
    ttl: u8,
    udp_dst_port: u16,
    cookie: Option<&[u8]>,
    inner: &[u8],
) -> Vec<u8> {
    let udp_payload = geneve_payload(cookie, inner);
    let udp = UdpHeader {
        source_port: 55000,
        destination_port: udp_dst_port,
        length: (8 + udp_payload.len()) as u16,
        checksum: 0,
    };
    let mut l3_payload = Vec::new();
    udp.write(&mut l3_payload).unwrap();
    l3_payload.extend_from_slice(&udp_payload);
    ipv4_packet(outer_src, outer_dst, IpNumber::UDP, ttl, &l3_payload)
}
