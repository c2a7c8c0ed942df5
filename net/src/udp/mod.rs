// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UDP header type and logic.

pub mod port;

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use core::convert::Infallible;
use etherparse::UdpHeader;
use std::num::NonZero;

/// A UDP header.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Udp(pub(crate) UdpHeader);

impl Udp {
    /// The minimum length of a valid UDP header (technically also the
    /// maximum length). The name choice here is for consistency with other
    /// header types.
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const MIN_LEN: NonZero<usize> = NonZero::new(8).unwrap();

    /// Get the header's source port.
    #[must_use]
    pub fn source(&self) -> u16 {
        self.0.source_port
    }

    /// Get the header's destination port.
    #[must_use]
    pub fn destination(&self) -> u16 {
        self.0.destination_port
    }

    /// The length field: payload plus the 8-byte udp header.
    ///
    /// No attempt is made to ensure this value is correct (you can't always
    /// trust the packet).
    #[must_use]
    pub fn length(&self) -> u16 {
        self.0.length
    }

    /// Get the header's checksum field.
    #[must_use]
    pub fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// The length of the datagram payload given the length of the enclosing
    /// ip payload.
    #[must_use]
    pub fn payload_len(&self, ip_payload_len: u16) -> u16 {
        #[allow(clippy::cast_possible_truncation)] // udp headers are 8 bytes
        ip_payload_len.saturating_sub(Udp::MIN_LEN.get() as u16)
    }

    /// Set the source port.
    pub fn set_source(&mut self, port: u16) -> &mut Self {
        self.0.source_port = port;
        self
    }

    /// Set the destination port.
    pub fn set_destination(&mut self, port: u16) -> &mut Self {
        self.0.destination_port = port;
        self
    }
}

impl Parse for Udp {
    type Error = Infallible;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (header, rest) = UdpHeader::from_slice(buf).map_err(|e| {
            ParseError::Length(LengthError {
                expected: NonZero::new(e.required_len).unwrap_or(Udp::MIN_LEN),
                actual: buf.len(),
            })
        })?;
        let consumed = NonZero::new(buf.len() - rest.len()).unwrap_or(Udp::MIN_LEN);
        Ok((Self(header), consumed))
    }
}

impl DeParse for Udp {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        Udp::MIN_LEN
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
