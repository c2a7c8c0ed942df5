// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [Geneve][RFC8926] header and tunnel-option parsing.
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver|  Opt Len  |O|C|    Rsvd.  |          Protocol Type        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Virtual Network Identifier (VNI)       |    Reserved   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! ~                    Variable-Length Options                    ~
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! [RFC8926]: https://datatracker.ietf.org/doc/html/rfc8926

mod cookie;
mod option;
mod vni;

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError, ParseWith};
use crate::udp::port::UdpPort;
use std::num::NonZero;

pub use cookie::{FlowCookie, MissingFlowCookie};
pub use option::{GeneveOption, GeneveOptionError};
pub use vni::{InvalidVni, Vni};

/// A Geneve header, including its tunnel options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geneve {
    control: bool,
    critical: bool,
    reserved: u8,
    protocol_type: u16,
    vni: Vni,
    reserved2: u8,
    options: GeneveOptions,
}

/// The options region of a [`Geneve`] header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneveOptions {
    /// Options decoded into individual TLVs (the default).
    Parsed(Vec<GeneveOption>),
    /// The raw options block, retained unparsed.
    Opaque(Box<[u8]>),
}

/// Steers how [`Geneve::parse_with`] treats the options region.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum GeneveOptionsPolicy {
    /// Decode every TLV (required to extract the flow cookie).
    #[default]
    Parse,
    /// Keep the options as an opaque block. Headers flagging critical
    /// options (C bit) are rejected under this policy, as the protocol
    /// requires.
    Opaque,
}

impl Geneve {
    /// The length of the fixed part of a Geneve header.
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const MIN_LEN: NonZero<usize> = NonZero::new(8).unwrap();

    /// UDP port on which we expect to receive Geneve datagrams. The
    /// standard (and the balancer) require 6081.
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const PORT: UdpPort = UdpPort::new(NonZero::new(6081).unwrap());

    /// Option class assigned to Amazon; the balancer's tunnel options all
    /// carry it.
    pub const AWS_OPTION_CLASS: u16 = 0x0108;

    /// The option type (within [`Geneve::AWS_OPTION_CLASS`]) carrying the
    /// flow cookie.
    pub const FLOW_COOKIE_OPTION_TYPE: u8 = 3;

    /// Create a new Geneve header carrying the given options.
    ///
    /// The C bit is derived from the options; the O bit and reserved fields
    /// are zero.
    #[must_use]
    pub fn new(protocol_type: u16, vni: Vni, options: Vec<GeneveOption>) -> Geneve {
        let critical = options.iter().any(GeneveOption::critical);
        Geneve {
            control: false,
            critical,
            reserved: 0,
            protocol_type,
            vni,
            reserved2: 0,
            options: GeneveOptions::Parsed(options),
        }
    }

    /// Returns true if the control bit (O) is set.
    ///
    /// Control packets carry no meaning for this endpoint beyond the bit
    /// itself; they are reflected like any other datagram.
    #[must_use]
    pub fn control(&self) -> bool {
        self.control
    }

    /// Returns true if the critical bit (C) is set, i.e. one or more
    /// options are critical.
    #[must_use]
    pub fn critical(&self) -> bool {
        self.critical
    }

    /// The ethertype of the encapsulated payload (0x0800 for IPv4).
    #[must_use]
    pub fn protocol_type(&self) -> u16 {
        self.protocol_type
    }

    /// Get the [`Vni`] of this header.
    #[must_use]
    pub fn vni(&self) -> Vni {
        self.vni
    }

    /// The options region of this header.
    #[must_use]
    pub fn options(&self) -> &GeneveOptions {
        &self.options
    }

    /// Length of the header in bytes, including all options.
    #[must_use]
    pub fn header_len(&self) -> usize {
        Geneve::MIN_LEN.get() + self.options_len()
    }

    fn options_len(&self) -> usize {
        match &self.options {
            GeneveOptions::Parsed(options) => options.iter().map(|o| o.size().get()).sum(),
            GeneveOptions::Opaque(block) => block.len(),
        }
    }

    /// Extract the balancer's flow cookie (option class 0x0108, type 3).
    ///
    /// # Errors
    ///
    /// Returns [`MissingFlowCookie`] if the option is absent or if the
    /// options were retained unparsed.
    pub fn flow_cookie(&self) -> Result<FlowCookie, MissingFlowCookie> {
        match &self.options {
            GeneveOptions::Parsed(options) => options
                .iter()
                .find(|o| {
                    o.option_class() == Geneve::AWS_OPTION_CLASS
                        && o.option_type() == Geneve::FLOW_COOKIE_OPTION_TYPE
                })
                .map(|o| FlowCookie::from(o.data()))
                .ok_or(MissingFlowCookie),
            GeneveOptions::Opaque(_) => Err(MissingFlowCookie),
        }
    }
}

/// Errors which may occur when parsing a [`Geneve`] header.
#[derive(Debug, thiserror::Error)]
pub enum GeneveError {
    /// The version field (top two bits) must be zero.
    #[error("unsupported geneve version {0}")]
    UnsupportedVersion(u8),
    /// The header flags critical options but option parsing is disabled;
    /// the protocol requires such packets be dropped.
    #[error("critical options present but option parsing is disabled")]
    CriticalUnparsed,
    /// A TLV declares more data than the options region holds.
    #[error("options region ends mid-option")]
    TruncatedOptions,
}

impl ParseWith for Geneve {
    type Error = GeneveError;
    type Param = GeneveOptionsPolicy;

    fn parse_with(
        policy: GeneveOptionsPolicy,
        buf: &[u8],
    ) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        if buf.len() < Geneve::MIN_LEN.get() {
            return Err(ParseError::Length(LengthError {
                expected: Geneve::MIN_LEN,
                actual: buf.len(),
            }));
        }
        let version = buf[0] >> 6;
        if version != 0 {
            return Err(ParseError::Invalid(GeneveError::UnsupportedVersion(
                version,
            )));
        }
        let options_len = usize::from(buf[0] & 0x3F) * 4;
        let header_len = Geneve::MIN_LEN.get() + options_len;
        if buf.len() < header_len {
            return Err(ParseError::Length(LengthError {
                expected: NonZero::new(header_len).unwrap_or(Geneve::MIN_LEN),
                actual: buf.len(),
            }));
        }
        let critical = buf[1] & 0x40 != 0;
        let region = &buf[Geneve::MIN_LEN.get()..header_len];
        let options = match policy {
            GeneveOptionsPolicy::Parse => {
                let mut options = Vec::new();
                let mut cursor = 0;
                while cursor < region.len() {
                    let (option, consumed) =
                        GeneveOption::parse(&region[cursor..]).map_err(|_| {
                            ParseError::Invalid(GeneveError::TruncatedOptions)
                        })?;
                    cursor += consumed.get();
                    options.push(option);
                }
                GeneveOptions::Parsed(options)
            }
            GeneveOptionsPolicy::Opaque => {
                if critical {
                    return Err(ParseError::Invalid(GeneveError::CriticalUnparsed));
                }
                GeneveOptions::Opaque(region.into())
            }
        };
        let geneve = Geneve {
            control: buf[1] & 0x80 != 0,
            critical,
            reserved: buf[1] & 0x3F,
            protocol_type: u16::from_be_bytes([buf[2], buf[3]]),
            vni: Vni::new_checked(u32::from_be_bytes([0, buf[4], buf[5], buf[6]]))
                .unwrap_or_else(|_| unreachable!()),
            reserved2: buf[7],
            options,
        };
        Ok((
            geneve,
            NonZero::new(header_len).unwrap_or(Geneve::MIN_LEN),
        ))
    }
}

impl DeParse for Geneve {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        NonZero::new(self.header_len()).unwrap_or(Geneve::MIN_LEN)
    }

    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>> {
        let size = self.size();
        if buf.len() < size.get() {
            return Err(DeParseError::Length(LengthError {
                expected: size,
                actual: buf.len(),
            }));
        }
        #[allow(clippy::cast_possible_truncation)] // options are at most 63 words
        {
            buf[0] = (self.options_len() / 4) as u8;
        }
        buf[1] = (u8::from(self.control) << 7) | (u8::from(self.critical) << 6) | self.reserved;
        buf[2..4].copy_from_slice(&self.protocol_type.to_be_bytes());
        buf[4..7].copy_from_slice(&self.vni.as_u32().to_be_bytes()[1..]);
        buf[7] = self.reserved2;
        let mut cursor = Geneve::MIN_LEN.get();
        match &self.options {
            GeneveOptions::Parsed(options) => {
                for option in options {
                    let written = option.deparse(&mut buf[cursor..size.get()])?;
                    cursor += written.get();
                }
            }
            GeneveOptions::Opaque(block) => {
                buf[cursor..cursor + block.len()].copy_from_slice(block);
            }
        }
        Ok(size)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)] // valid in test code
#[cfg(test)]
mod test {
    use crate::parse::{DeParse, ParseError, ParseWith};
    use crate::geneve::{
        Geneve, GeneveError, GeneveOption, GeneveOptions, GeneveOptionsPolicy, Vni,
    };

    const ETH_P_IPV4: u16 = 0x0800;

    fn cookie_option(data: &[u8]) -> GeneveOption {
        GeneveOption::new(Geneve::AWS_OPTION_CLASS, false, 3, data).unwrap()
    }

    #[test]
    fn parse_back_without_options() {
        bolero::check!()
            .with_type()
            .for_each(|(protocol, raw_vni): &(u16, u32)| {
                let vni = Vni::new_checked(raw_vni & Vni::MAX).unwrap();
                let header = Geneve::new(*protocol, vni, Vec::new());
                assert_eq!(header.header_len(), 8);
                let mut buf = [0u8; 8];
                let written = header.deparse(&mut buf).unwrap();
                assert_eq!(written, Geneve::MIN_LEN);
                let (parsed, consumed) =
                    Geneve::parse_with(GeneveOptionsPolicy::Parse, &buf).unwrap();
                assert_eq!(consumed, written);
                assert_eq!(parsed, header);
                assert_eq!(parsed.vni(), vni);
            });
    }

    #[test]
    fn parse_back_with_options() {
        let header = Geneve::new(
            ETH_P_IPV4,
            Vni::new_checked(0xABCDEF).unwrap(),
            vec![
                cookie_option(&[0x11, 0x22, 0x33, 0x44]),
                GeneveOption::new(0xFFFF, false, 0x0A, vec![0u8; 8]).unwrap(),
            ],
        );
        assert_eq!(header.header_len(), 8 + 8 + 12);
        let mut buf = vec![0u8; header.header_len()];
        header.deparse(&mut buf).unwrap();
        assert_eq!(buf[0], 5); // five words of options
        let (parsed, consumed) = Geneve::parse_with(GeneveOptionsPolicy::Parse, &buf).unwrap();
        assert_eq!(consumed.get(), buf.len());
        assert_eq!(parsed, header);
    }

    #[test]
    fn flow_cookie_extraction() {
        let header = Geneve::new(
            ETH_P_IPV4,
            Vni::default(),
            vec![cookie_option(&[0xDE, 0xAD, 0xBE, 0xEF])],
        );
        assert_eq!(header.flow_cookie().unwrap().to_string(), "deadbeef");
    }

    #[test]
    fn flow_cookie_missing() {
        let header = Geneve::new(ETH_P_IPV4, Vni::default(), Vec::new());
        assert!(header.flow_cookie().is_err());

        // an AWS option of a different type is not a cookie
        let header = Geneve::new(
            ETH_P_IPV4,
            Vni::default(),
            vec![GeneveOption::new(Geneve::AWS_OPTION_CLASS, false, 1, vec![0u8; 8]).unwrap()],
        );
        assert!(header.flow_cookie().is_err());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let buf = [0x40, 0, 0x08, 0x00, 0, 0, 0, 0];
        match Geneve::parse_with(GeneveOptionsPolicy::Parse, &buf) {
            Err(ParseError::Invalid(GeneveError::UnsupportedVersion(1))) => {}
            other => unreachable!("{other:?}"),
        }
    }

    #[test]
    fn critical_bit_with_parsing_disabled_is_rejected() {
        let mut buf = vec![0u8; 16];
        buf[0] = 2; // two words of options
        buf[1] = 0x40; // C bit
        buf[10] = 0x83; // a critical option of type 3
        buf[11] = 0x01;
        match Geneve::parse_with(GeneveOptionsPolicy::Opaque, &buf) {
            Err(ParseError::Invalid(GeneveError::CriticalUnparsed)) => {}
            other => unreachable!("{other:?}"),
        }
        // the same bytes parse fine when option parsing is on
        let (parsed, _) = Geneve::parse_with(GeneveOptionsPolicy::Parse, &buf).unwrap();
        assert!(parsed.critical());
    }

    #[test]
    fn opaque_policy_retains_the_raw_block() {
        let mut buf = vec![0u8; 16];
        buf[0] = 2;
        buf[8..16].copy_from_slice(&[0x01, 0x08, 0x03, 0x01, 0x11, 0x22, 0x33, 0x44]);
        let (parsed, _) = Geneve::parse_with(GeneveOptionsPolicy::Opaque, &buf).unwrap();
        match parsed.options() {
            GeneveOptions::Opaque(block) => assert_eq!(block.as_ref(), &buf[8..16]),
            GeneveOptions::Parsed(_) => unreachable!(),
        }
        // the cookie is unreachable without parsed options
        assert!(parsed.flow_cookie().is_err());
        // but the bytes re-encode exactly
        let mut back = vec![0u8; 16];
        parsed.deparse(&mut back).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn declared_options_beyond_buffer_fail_gracefully() {
        let mut buf = [0u8; 8];
        buf[0] = 1; // one word of options, none present
        match Geneve::parse_with(GeneveOptionsPolicy::Parse, &buf) {
            Err(ParseError::Length(e)) => assert_eq!(e.expected().get(), 12),
            other => unreachable!("{other:?}"),
        }
    }

    #[test]
    fn option_overrunning_its_region_fails_gracefully() {
        let mut buf = vec![0u8; 12];
        buf[0] = 1; // one word of options
        buf[8..12].copy_from_slice(&[0x01, 0x08, 0x03, 0x01]); // declares one data word
        match Geneve::parse_with(GeneveOptionsPolicy::Parse, &buf) {
            Err(ParseError::Invalid(GeneveError::TruncatedOptions)) => {}
            other => unreachable!("{other:?}"),
        }
    }
}
