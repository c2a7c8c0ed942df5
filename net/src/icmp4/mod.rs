// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `ICMPv4` header type and logic.

use crate::parse::{LengthError, Parse, ParseError};
use core::convert::Infallible;
use etherparse::{Icmpv4Header, Icmpv4Type};
use std::num::NonZero;

/// An `ICMPv4` header.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp4(pub(crate) Icmpv4Header);

impl Icmp4 {
    /// The length of the fixed part of an ICMP header: type, code, checksum,
    /// and the 4 "rest of header" bytes.
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const MIN_LEN: NonZero<usize> = NonZero::new(8).unwrap();

    /// Get the icmp type (reference) field value.
    #[must_use]
    pub fn icmp_type(&self) -> &Icmpv4Type {
        &self.0.icmp_type
    }

    /// Get the header's checksum field.
    #[must_use]
    pub fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// The number of payload bytes attributed to an ICMP message for
    /// accounting purposes: the enclosing ip payload minus the 8 fixed
    /// header bytes.
    #[must_use]
    pub fn payload_len(&self, ip_payload_len: u16) -> u16 {
        #[allow(clippy::cast_possible_truncation)] // fixed header is 8 bytes
        ip_payload_len.saturating_sub(Icmp4::MIN_LEN.get() as u16)
    }
}

impl Parse for Icmp4 {
    type Error = Infallible;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (header, rest) = Icmpv4Header::from_slice(buf).map_err(|e| {
            ParseError::Length(LengthError {
                expected: NonZero::new(e.required_len).unwrap_or(Icmp4::MIN_LEN),
                actual: buf.len(),
            })
        })?;
        let consumed = NonZero::new(buf.len() - rest.len()).unwrap_or(Icmp4::MIN_LEN);
        Ok((Self(header), consumed))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)] // valid in test code
#[cfg(test)]
mod test {
    use crate::parse::{Parse, ParseError};
    use crate::icmp4::Icmp4;
    use etherparse::Icmpv4Type;

    // type 8 (echo request), code 0, zero checksum, id 0x0102, seq 0x0304
    const ECHO: [u8; 8] = [8, 0, 0, 0, 0x01, 0x02, 0x03, 0x04];

    #[test]
    fn parse_echo_request() {
        let (icmp, consumed) = Icmp4::parse(&ECHO).unwrap();
        assert_eq!(consumed, Icmp4::MIN_LEN);
        match icmp.icmp_type() {
            Icmpv4Type::EchoRequest(echo) => {
                assert_eq!(echo.id, 0x0102);
                assert_eq!(echo.seq, 0x0304);
            }
            other => unreachable!("unexpected type: {other:?}"),
        }
        assert_eq!(icmp.checksum(), 0);
    }

    #[test]
    fn payload_length_subtracts_the_fixed_header() {
        let (icmp, _) = Icmp4::parse(&ECHO).unwrap();
        assert_eq!(icmp.payload_len(64), 56);
        assert_eq!(icmp.payload_len(4), 0);
    }

    #[test]
    fn short_buffer_fails_gracefully() {
        for i in 0..ECHO.len() {
            assert!(matches!(
                Icmp4::parse(&ECHO[..i]),
                Err(ParseError::Length(_))
            ));
        }
    }
}
