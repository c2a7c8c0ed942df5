// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 header type and manipulation.

mod checksum;

pub use checksum::*;

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::err::ipv4::{HeaderError, HeaderSliceError};
use etherparse::{IpNumber, Ipv4Header};
use std::net::Ipv4Addr;
use std::num::NonZero;

/// An IPv4 header.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ipv4(pub(crate) Ipv4Header);

impl Ipv4 {
    /// The minimum length of an IPv4 header (i.e., a header with no options).
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const MIN_LEN: NonZero<usize> = NonZero::new(20).unwrap();

    /// The maximum length of an IPv4 header (i.e., a header with full options).
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const MAX_LEN: NonZero<usize> = NonZero::new(60).unwrap();

    /// Get the source ip address of the header.
    #[must_use]
    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0.source)
    }

    /// Get the destination ip address of the header.
    #[must_use]
    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0.destination)
    }

    /// Get the next layer protocol which follows this header.
    #[must_use]
    pub fn protocol(&self) -> IpNumber {
        self.0.protocol
    }

    /// Length of the header (includes options) in bytes.
    ///
    /// <div class="warning">
    /// The returned value is in bytes (not in units of 32 bits as per the
    /// IHL field).
    /// </div>
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.0.header_len()
    }

    /// Value of the total length ip header field.
    #[must_use]
    pub fn total_len(&self) -> u16 {
        self.0.total_len
    }

    /// The length of the payload carried behind this header, i.e. the total
    /// length minus the header length (saturating on malformed totals).
    #[must_use]
    pub fn payload_len(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)] // header length is at most 60
        self.0.total_len.saturating_sub(self.0.header_len() as u16)
    }

    /// The number of routing hops the packet is allowed to take.
    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.0.time_to_live
    }

    /// Return the header's "identification".
    #[must_use]
    pub fn identification(&self) -> u16 {
        self.0.identification
    }

    /// The raw 6-bit differentiated services code point.
    #[must_use]
    pub fn dscp(&self) -> u8 {
        self.0.dscp.value()
    }

    /// The raw 2-bit explicit congestion notification field.
    #[must_use]
    pub fn ecn(&self) -> u8 {
        self.0.ecn.value()
    }

    /// Returns true if the "don't fragment" bit is set in this header.
    #[must_use]
    pub fn dont_fragment(&self) -> bool {
        self.0.dont_fragment
    }

    /// Returns true if the "more-fragments" bit is set in this header.
    #[must_use]
    pub fn more_fragments(&self) -> bool {
        self.0.more_fragments
    }

    /// The fragment offset: the low 13 bits of the flags word, in 8-byte
    /// units.
    #[must_use]
    pub fn fragment_offset(&self) -> u16 {
        self.0.fragment_offset.value()
    }

    /// Get the options for this header (as a byte slice).
    #[must_use]
    pub fn options(&self) -> &[u8] {
        self.0.options.as_slice()
    }

    /// Set the source ip of the header.
    pub fn set_source(&mut self, source: Ipv4Addr) -> &mut Self {
        self.0.source = source.octets();
        self
    }

    /// Set the destination ip address for this header.
    pub fn set_destination(&mut self, destination: Ipv4Addr) -> &mut Self {
        self.0.destination = destination.octets();
        self
    }

    /// Exchange the source and destination addresses of this header.
    pub fn swap_addresses(&mut self) -> &mut Self {
        core::mem::swap(&mut self.0.source, &mut self.0.destination);
        self
    }

    /// Set the header's time to live.
    pub fn set_ttl(&mut self, ttl: u8) -> &mut Self {
        self.0.time_to_live = ttl;
        self
    }

    /// Decrement the TTL, wrapping at zero.
    ///
    /// A received TTL of zero decrements to 0xFF: this endpoint hairpins the
    /// datagram back to the balancer, which does not route on TTL.
    pub fn decrement_ttl(&mut self) -> &mut Self {
        self.0.time_to_live = self.0.time_to_live.wrapping_sub(1);
        self
    }

    /// Set the "identification" of this packet.
    pub fn set_identification(&mut self, id: u16) -> &mut Self {
        self.0.identification = id;
        self
    }
}

/// Errors which may occur when parsing an [`Ipv4`] header.
#[derive(Debug, thiserror::Error)]
pub enum Ipv4Error {
    /// The version field is not 4.
    #[error("unsupported ip version {0} (expected 4)")]
    UnsupportedVersion(u8),
    /// Any other semantic defect reported by the underlying parser.
    #[error(transparent)]
    Malformed(HeaderError),
}

impl Parse for Ipv4 {
    type Error = Ipv4Error;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (header, rest) = Ipv4Header::from_slice(buf).map_err(|e| match e {
            HeaderSliceError::Len(l) => ParseError::Length(LengthError {
                expected: NonZero::new(l.required_len).unwrap_or(Ipv4::MIN_LEN),
                actual: buf.len(),
            }),
            HeaderSliceError::Content(HeaderError::UnexpectedVersion { version_number }) => {
                ParseError::Invalid(Ipv4Error::UnsupportedVersion(version_number))
            }
            HeaderSliceError::Content(content) => {
                ParseError::Invalid(Ipv4Error::Malformed(content))
            }
        })?;
        let consumed = NonZero::new(buf.len() - rest.len()).unwrap_or(Ipv4::MIN_LEN);
        Ok((Self(header), consumed))
    }
}

impl DeParse for Ipv4 {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        NonZero::new(self.0.header_len()).unwrap_or(Ipv4::MIN_LEN)
    }

    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>> {
        let size = self.size();
        if buf.len() < size.get() {
            return Err(DeParseError::Length(LengthError {
                expected: size,
                actual: buf.len(),
            }));
        }
        buf[..size.get()].copy_from_slice(&self.0.to_bytes());
        Ok(size)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)] // valid in test code
#[cfg(test)]
mod test {
    use crate::checksum::Checksum;
    use crate::ipv4::{Ipv4, Ipv4Error};
    use crate::parse::{DeParse, Parse, ParseError};
    use etherparse::{IpNumber, Ipv4Header};
    use std::net::Ipv4Addr;

    const MIN_LEN: usize = 20;

    fn header(src: [u8; 4], dst: [u8; 4], ttl: u8, payload_len: u16) -> Ipv4 {
        let mut inner =
            Ipv4Header::new(payload_len, ttl, IpNumber::UDP, src, dst).expect("valid header");
        inner.header_checksum = inner.calc_header_checksum();
        Ipv4(inner)
    }

    #[test]
    fn parse_back() {
        bolero::check!().with_type().for_each(
            |(src, dst, ttl, payload_len): &(u32, u32, u8, u16)| {
                // leave room for the 20-byte header within the total length
                let payload_len = payload_len % 65515;
                let header = header(src.to_be_bytes(), dst.to_be_bytes(), *ttl, payload_len);
                let mut buf = [0u8; MIN_LEN];
                let written = header.deparse(&mut buf).unwrap();
                assert_eq!(written, Ipv4::MIN_LEN);
                let (parsed, consumed) = Ipv4::parse(&buf).unwrap();
                assert_eq!(consumed, written);
                assert_eq!(parsed, header);
                assert_eq!(parsed.source(), Ipv4Addr::from(*src));
                assert_eq!(parsed.destination(), Ipv4Addr::from(*dst));
                assert_eq!(parsed.ttl(), *ttl);
                assert_eq!(parsed.payload_len(), payload_len);
            },
        );
    }

    #[test]
    fn parse_arbitrary_bytes() {
        bolero::check!()
            .with_type()
            .for_each(|slice: &[u8; MIN_LEN]| match Ipv4::parse(slice) {
                Ok((parsed, consumed)) => {
                    assert_eq!(slice[0] >> 4, 4);
                    assert_eq!(consumed.get(), parsed.header_len());
                    let mut buf = [0u8; MIN_LEN];
                    parsed.deparse(&mut buf).unwrap();
                    assert_eq!(&slice[..6], &buf[..6]);
                    // reserved bit in ipv4 flags serializes to zero
                    assert_eq!(slice[6] & 0b0111_1111, buf[6]);
                    assert_eq!(&slice[7..], &buf[7..]);
                }
                Err(ParseError::Invalid(Ipv4Error::UnsupportedVersion(version))) => {
                    assert_eq!(slice[0] >> 4, version);
                    assert_ne!(version, 4);
                }
                Err(ParseError::Invalid(Ipv4Error::Malformed(_))) => {
                    // e.g. an ihl shorter than the fixed header
                    assert_eq!(slice[0] >> 4, 4);
                }
                Err(ParseError::Length(e)) => {
                    // ihl declares options beyond the sampled buffer
                    assert!(e.expected().get() > MIN_LEN);
                }
            });
    }

    #[test]
    fn too_short_buffer_fails_gracefully() {
        let header = header([10, 0, 0, 1], [10, 0, 0, 2], 64, 0);
        let mut buf = [0u8; MIN_LEN];
        header.deparse(&mut buf).unwrap();
        for i in 0..MIN_LEN {
            assert!(matches!(
                Ipv4::parse(&buf[..i]),
                Err(ParseError::Length(_))
            ));
        }
    }

    #[test]
    fn swap_and_decrement_preserve_validity() {
        let mut header = header([10, 0, 0, 1], [10, 0, 0, 2], 64, 100);
        header.swap_addresses().decrement_ttl().update_checksum();
        assert_eq!(header.source(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(header.destination(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(header.ttl(), 63);
        assert!(header.validate_checksum().is_ok());
    }

    #[test]
    fn ttl_zero_wraps() {
        let mut header = header([10, 0, 0, 1], [10, 0, 0, 2], 0, 0);
        header.decrement_ttl();
        assert_eq!(header.ttl(), 0xFF);
    }
}
