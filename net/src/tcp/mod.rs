// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP header type and logic.

use crate::parse::{LengthError, Parse, ParseError};
use etherparse::err::tcp::{HeaderError, HeaderSliceError};
use etherparse::TcpHeader;
use std::num::NonZero;

/// A TCP header.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tcp(pub(crate) TcpHeader);

impl Tcp {
    /// The minimum length of a [`Tcp`] header.
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const MIN_LEN: NonZero<usize> = NonZero::new(20).unwrap();

    /// The maximum length of a [`Tcp`] header.
    pub const MAX_LEN: usize = 60;

    /// Get the source port.
    #[must_use]
    pub fn source(&self) -> u16 {
        self.0.source_port
    }

    /// Get the destination port.
    #[must_use]
    pub fn destination(&self) -> u16 {
        self.0.destination_port
    }

    /// Get the sequence number of the header.
    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        self.0.sequence_number
    }

    /// Get the acknowledgment number of the header.
    #[must_use]
    pub fn acknowledgment_number(&self) -> u32 {
        self.0.acknowledgment_number
    }

    /// The number of 32-bit words in the TCP header and TCP header options.
    #[must_use]
    pub fn data_offset(&self) -> u8 {
        self.0.data_offset()
    }

    /// Get the header length in bytes (i.e., the data offset in byte units).
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.0.header_len()
    }

    /// Returns true if the syn flag is set in this header.
    #[must_use]
    pub fn syn(&self) -> bool {
        self.0.syn
    }

    /// Returns true if the ack flag is set in this header.
    #[must_use]
    pub fn ack(&self) -> bool {
        self.0.ack
    }

    /// Returns true if the fin flag is set in this header.
    #[must_use]
    pub fn fin(&self) -> bool {
        self.0.fin
    }

    /// Returns true if the rst flag is set in this header.
    #[must_use]
    pub fn rst(&self) -> bool {
        self.0.rst
    }

    /// Returns true if the psh flag is set in this header.
    #[must_use]
    pub fn psh(&self) -> bool {
        self.0.psh
    }

    /// Returns true if the urg flag is set in this header.
    #[must_use]
    pub fn urg(&self) -> bool {
        self.0.urg
    }

    /// Returns the window size of the tcp header.
    #[must_use]
    pub fn window_size(&self) -> u16 {
        self.0.window_size
    }

    /// Get the checksum of the header.
    #[must_use]
    pub fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// Returns the urgent pointer of the tcp header.
    ///
    /// This value is only relevant if the urg flag is set (see [`Tcp::urg`]).
    #[must_use]
    pub fn urgent_pointer(&self) -> u16 {
        self.0.urgent_pointer
    }

    /// Returns any tcp options present in this header as a slice.
    #[must_use]
    pub fn options(&self) -> &[u8] {
        self.0.options.as_slice()
    }

    /// The length of the segment payload given the length of the enclosing
    /// ip payload.
    #[must_use]
    pub fn payload_len(&self, ip_payload_len: u16) -> u16 {
        #[allow(clippy::cast_possible_truncation)] // data offset is at most 60 bytes
        ip_payload_len.saturating_sub(self.0.header_len() as u16)
    }

    /// Compact render of the set control bits, e.g. "SA" for a syn-ack.
    #[must_use]
    pub fn flags(&self) -> String {
        let mut flags = String::with_capacity(6);
        for (set, c) in [
            (self.0.syn, 'S'),
            (self.0.ack, 'A'),
            (self.0.rst, 'R'),
            (self.0.fin, 'F'),
            (self.0.urg, 'U'),
            (self.0.psh, 'P'),
        ] {
            if set {
                flags.push(c);
            }
        }
        flags
    }
}

/// Errors which may occur when parsing a [`Tcp`] header.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    /// The data offset field declares fewer than 5 words.
    #[error(transparent)]
    Malformed(HeaderError),
}

impl Parse for Tcp {
    type Error = TcpError;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (header, rest) = TcpHeader::from_slice(buf).map_err(|e| match e {
            HeaderSliceError::Len(l) => ParseError::Length(LengthError {
                expected: NonZero::new(l.required_len).unwrap_or(Tcp::MIN_LEN),
                actual: buf.len(),
            }),
            HeaderSliceError::Content(content) => ParseError::Invalid(TcpError::Malformed(content)),
        })?;
        let consumed = NonZero::new(buf.len() - rest.len()).unwrap_or(Tcp::MIN_LEN);
        Ok((Self(header), consumed))
    }
}
