// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::checksum::{internet_checksum, Checksum};
use crate::ipv4::Ipv4;
use std::fmt::{Display, Formatter};

/// An [`Ipv4`] checksum.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Ipv4Checksum(u16);

impl Display for Ipv4Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl Ipv4Checksum {
    /// Map a raw value to an [`Ipv4Checksum`].
    #[must_use]
    pub const fn new(raw: u16) -> Ipv4Checksum {
        Ipv4Checksum(raw)
    }
}

impl From<u16> for Ipv4Checksum {
    fn from(raw: u16) -> Self {
        Self::new(raw)
    }
}

impl From<Ipv4Checksum> for u16 {
    fn from(checksum: Ipv4Checksum) -> Self {
        checksum.0
    }
}

impl Checksum for Ipv4 {
    type Checksum = Ipv4Checksum;

    fn checksum(&self) -> Ipv4Checksum {
        Ipv4Checksum(self.0.header_checksum)
    }

    /// Compute the header checksum: the one's-complement fold of the
    /// re-encoded header with the checksum field zeroed.
    fn compute_checksum(&self) -> Ipv4Checksum {
        let mut zeroed = self.0.clone();
        zeroed.header_checksum = 0;
        Ipv4Checksum(internet_checksum(&zeroed.to_bytes()))
    }

    fn set_checksum(&mut self, checksum: Ipv4Checksum) -> &mut Self {
        self.0.header_checksum = checksum.0;
        self
    }
}
