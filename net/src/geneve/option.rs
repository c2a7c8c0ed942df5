// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use core::convert::Infallible;
use std::num::NonZero;

/// A single Geneve tunnel option (TLV).
///
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Option Class         |C|     Type    |R|R|R| Length  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Variable Option Data                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `Length` counts 4-byte words of option data; the top bit of the type
/// octet is the per-option critical flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneveOption {
    option_class: u16,
    critical: bool,
    option_type: u8,
    reserved: u8,
    data: Box<[u8]>,
}

/// Errors which may occur when building a [`GeneveOption`].
#[derive(Debug, thiserror::Error)]
pub enum GeneveOptionError {
    /// Option data must come in whole 4-byte words.
    #[error("option data length {0} is not a multiple of 4")]
    UnalignedData(usize),
    /// Option data is limited to 31 words (the 5-bit length field).
    #[error("option data length {0} exceeds the maximum of {max} bytes", max = GeneveOption::MAX_DATA_LEN)]
    DataTooLong(usize),
    /// The option type is a 7-bit value (the top bit is the critical flag).
    #[error("option type {0:#04x} exceeds 7 bits")]
    TypeTooLarge(u8),
}

impl GeneveOption {
    /// The length of the fixed part of an option (class, type, length).
    #[allow(clippy::unwrap_used)] // const-eval and trivially safe
    pub const FIXED_LEN: NonZero<usize> = NonZero::new(4).unwrap();

    /// The maximum number of data bytes an option can carry (31 words).
    pub const MAX_DATA_LEN: usize = 31 * 4;

    /// Create a new [`GeneveOption`].
    ///
    /// # Errors
    ///
    /// Returns a [`GeneveOptionError`] if `data` is not a whole number of
    /// 4-byte words, is longer than 31 words, or if `option_type` does not
    /// fit in 7 bits.
    pub fn new(
        option_class: u16,
        critical: bool,
        option_type: u8,
        data: impl Into<Box<[u8]>>,
    ) -> Result<GeneveOption, GeneveOptionError> {
        let data = data.into();
        if option_type > 0x7F {
            return Err(GeneveOptionError::TypeTooLarge(option_type));
        }
        if data.len() % 4 != 0 {
            return Err(GeneveOptionError::UnalignedData(data.len()));
        }
        if data.len() > GeneveOption::MAX_DATA_LEN {
            return Err(GeneveOptionError::DataTooLong(data.len()));
        }
        Ok(GeneveOption {
            option_class,
            critical,
            option_type,
            reserved: 0,
            data,
        })
    }

    /// The 16-bit option class (a vendor or standards-track namespace).
    #[must_use]
    pub fn option_class(&self) -> u16 {
        self.option_class
    }

    /// The 7-bit option type within its class.
    #[must_use]
    pub fn option_type(&self) -> u8 {
        self.option_type
    }

    /// Returns true if the per-option critical flag is set.
    #[must_use]
    pub fn critical(&self) -> bool {
        self.critical
    }

    /// The option data bytes (always a whole number of 4-byte words).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Parse for GeneveOption {
    type Error = Infallible;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        if buf.len() < GeneveOption::FIXED_LEN.get() {
            return Err(ParseError::Length(LengthError {
                expected: GeneveOption::FIXED_LEN,
                actual: buf.len(),
            }));
        }
        let data_len = usize::from(buf[3] & 0x1F) * 4;
        let total_len = GeneveOption::FIXED_LEN.get() + data_len;
        if buf.len() < total_len {
            return Err(ParseError::Length(LengthError {
                expected: NonZero::new(total_len).unwrap_or(GeneveOption::FIXED_LEN),
                actual: buf.len(),
            }));
        }
        let option = GeneveOption {
            option_class: u16::from_be_bytes([buf[0], buf[1]]),
            critical: buf[2] & 0x80 != 0,
            option_type: buf[2] & 0x7F,
            reserved: buf[3] >> 5,
            data: buf[GeneveOption::FIXED_LEN.get()..total_len].into(),
        };
        Ok((option, NonZero::new(total_len).unwrap_or(GeneveOption::FIXED_LEN)))
    }
}

impl DeParse for GeneveOption {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        NonZero::new(GeneveOption::FIXED_LEN.get() + self.data.len())
            .unwrap_or(GeneveOption::FIXED_LEN)
    }

    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>> {
        let size = self.size();
        if buf.len() < size.get() {
            return Err(DeParseError::Length(LengthError {
                expected: size,
                actual: buf.len(),
            }));
        }
        buf[..2].copy_from_slice(&self.option_class.to_be_bytes());
        buf[2] = if self.critical {
            0x80 | self.option_type
        } else {
            self.option_type
        };
        #[allow(clippy::cast_possible_truncation)] // data is at most 31 words
        {
            buf[3] = (self.reserved << 5) | ((self.data.len() / 4) as u8);
        }
        buf[GeneveOption::FIXED_LEN.get()..size.get()].copy_from_slice(&self.data);
        Ok(size)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)] // valid in test code
#[cfg(test)]
mod test {
    use crate::parse::{DeParse, Parse, ParseError};
    use crate::geneve::GeneveOption;

    #[test]
    fn parse_back() {
        // arbitrary fixed header plus the largest possible data region
        bolero::check!()
            .with_type()
            .for_each(|slice: &[u8; 4 + GeneveOption::MAX_DATA_LEN]| {
                let (option, consumed) = GeneveOption::parse(slice).unwrap();
                assert_eq!(
                    consumed.get(),
                    4 + usize::from(slice[3] & 0x1F) * 4
                );
                let mut buf = [0u8; 4 + GeneveOption::MAX_DATA_LEN];
                let written = option.deparse(&mut buf).unwrap();
                assert_eq!(written, consumed);
                assert_eq!(&buf[..written.get()], &slice[..consumed.get()]);
            });
    }

    #[test]
    fn critical_flag_rides_the_type_octet() {
        let encoded = [0x01, 0x08, 0x83, 0x01, 0xaa, 0xbb, 0xcc, 0xdd];
        let (option, _) = GeneveOption::parse(&encoded).unwrap();
        assert_eq!(option.option_class(), 0x0108);
        assert!(option.critical());
        assert_eq!(option.option_type(), 3);
        assert_eq!(option.data(), &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn declared_length_beyond_buffer_fails_gracefully() {
        let encoded = [0x01, 0x08, 0x03, 0x02, 0xaa, 0xbb, 0xcc, 0xdd];
        match GeneveOption::parse(&encoded) {
            Err(ParseError::Length(e)) => {
                assert_eq!(e.expected().get(), 12);
                assert_eq!(e.actual(), 8);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn construction_enforces_word_alignment() {
        assert!(GeneveOption::new(0x0108, false, 3, vec![0u8; 6]).is_err());
        assert!(GeneveOption::new(0x0108, false, 3, vec![0u8; 128]).is_err());
        assert!(GeneveOption::new(0x0108, false, 0x80, vec![0u8; 4]).is_err());
        assert!(GeneveOption::new(0x0108, false, 3, vec![0u8; 4]).is_ok());
    }
}
