// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Header parsing traits.

use std::num::NonZero;

/// Decode a header from the start of a byte slice.
pub trait Parse: Sized {
    /// Content errors this header can produce (truncation is covered by
    /// [`ParseError::Length`]).
    type Error: core::error::Error;

    /// Parse from a buffer.
    ///
    /// Returns the decoded value and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns an error in the event that parsing fails.
    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>>;
}

/// Decode a header whose parsing must be parameterized.
pub trait ParseWith: Sized {
    /// Content errors this header can produce.
    type Error: core::error::Error;
    /// The parameter steering the parse.
    type Param;

    /// This function is spiritually similar to [`Parse::parse`] but is used
    /// in cases where parsing must be parameterized.
    ///
    /// # Errors
    ///
    /// Will return an error if parsing fails.
    fn parse_with(
        param: Self::Param,
        buf: &[u8],
    ) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>>;
}

/// Write a header back to wire format.
pub trait DeParse {
    /// Errors beyond an undersized buffer (most encoders are infallible).
    type Error;

    /// The exact number of bytes [`DeParse::deparse`] will write.
    fn size(&self) -> NonZero<usize>;

    /// Write a data structure (e.g., a packet header) to a buffer.
    ///
    /// Returns the number of bytes written in the event of success.
    ///
    /// # Errors
    ///
    /// Will return an error if there is not enough space in the buffer
    /// or if serialization fails for some other (implementation-dependent)
    /// reason.
    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>>;
}

/// The buffer ended mid-header.
#[derive(Debug, thiserror::Error)]
#[error("expected at least {expected} bytes, got {actual}")]
pub struct LengthError {
    pub(crate) expected: NonZero<usize>,
    pub(crate) actual: usize,
}

impl LengthError {
    /// The minimum number of bytes the codec needed.
    #[must_use]
    pub fn expected(&self) -> NonZero<usize> {
        self.expected
    }

    /// The number of bytes which were actually available.
    #[must_use]
    pub fn actual(&self) -> usize {
        self.actual
    }
}

/// Errors which may occur when parsing a header.
#[derive(Debug, thiserror::Error)]
pub enum ParseError<E: core::error::Error> {
    /// Buffer ended mid-header.
    #[error(transparent)]
    Length(LengthError),
    /// The bytes were long enough but semantically invalid.
    #[error(transparent)]
    Invalid(E),
}

/// Errors which may occur when serializing a header.
#[derive(Debug, thiserror::Error)]
pub enum DeParseError<E> {
    /// The supplied buffer is too small.
    #[error(transparent)]
    Length(LengthError),
    /// Serialization failed for an implementation-specific reason.
    #[error("invalid header")]
    Invalid(E),
}
