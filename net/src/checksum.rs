// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Checksum calculation and manipulation.

use std::fmt::Debug;

/// The 16-bit one's-complement sum over `bytes` taken as big-endian 16-bit
/// words, with end-around carry, inverted.
///
/// A trailing odd byte is treated as if padded with 0x00 (IPv4 headers are
/// always even-length, but the fold handles the general case).
#[must_use]
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = bytes.chunks_exact(2);
    for word in words.by_ref() {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [tail] = words.remainder() {
        sum += u32::from(u16::from_be_bytes([*tail, 0x00]));
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)] // folded to 16 bits above
    !(sum as u16)
}

/// A trait for checksum calculation and manipulation on headers which carry
/// their own checksum field.
pub trait Checksum {
    /// The checksum type.
    type Checksum: Eq + Copy + Sized + Debug + From<u16> + Into<u16>;

    /// Get the checksum value currently stored in the header.
    fn checksum(&self) -> Self::Checksum;

    /// Compute the checksum the header should carry.
    ///
    /// This method _does not_ update the checksum field.
    fn compute_checksum(&self) -> Self::Checksum;

    /// Set the checksum field of the header.
    ///
    /// The validity of the checksum is not checked.
    fn set_checksum(&mut self, checksum: Self::Checksum) -> &mut Self;

    /// Validate the checksum value in the header.
    ///
    /// # Errors
    ///
    /// Returns a [`ChecksumError`] if the stored checksum does not match the
    /// computed one.
    fn validate_checksum(&self) -> Result<Self::Checksum, ChecksumError<Self>> {
        let expected = self.compute_checksum();
        let actual = self.checksum();
        if expected == actual {
            Ok(expected)
        } else {
            Err(ChecksumError::Mismatch { expected, actual })
        }
    }

    /// Update the checksum value in the header.
    ///
    /// The post-condition of this function is that the checksum is valid:
    /// [`Checksum::validate_checksum`] will not return an `Err` variant.
    fn update_checksum(&mut self) -> &mut Self {
        let checksum = self.compute_checksum();
        self.set_checksum(checksum)
    }
}

/// An error resulting from a checksum mismatch.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError<T: Checksum + ?Sized> {
    /// The checksum in the header does not match the computed checksum.
    #[error("checksum mismatch: expected {expected:?}, actual {actual:?}")]
    Mismatch {
        /// The expected (computed) checksum.
        expected: T::Checksum,
        /// The actual checksum in the header.
        actual: T::Checksum,
    },
}
