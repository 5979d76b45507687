use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

use tokio_postgres::types::PgLsn;

use crate::error::{ErrorKind, ReplError};

/// A Postgres write-ahead-log position.
///
/// Totally ordered 64-bit log sequence number. The textual form is the usual
/// `X/Y` pair of 32-bit hex halves. The zero value means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(u64);

impl Lsn {
    /// The unset LSN.
    pub const ZERO: Lsn = Lsn(0);

    /// Creates an [`Lsn`] from its raw 64-bit representation.
    pub fn from_raw(value: u64) -> Self {
        Lsn(value)
    }

    /// Returns the raw 64-bit representation.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    /// Returns `true` when this LSN is the unset zero value.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Lsn {
    type Err = ReplError;

    fn from_str(lsn_str: &str) -> Result<Self, Self::Err> {
        let Some((high_str, low_str)) = lsn_str.split_once('/') else {
            return Err(ReplError::new(
                ErrorKind::ConversionError,
                "invalid LSN format",
            )
            .with_detail(format!("expected `X/Y` hex pair, got `{lsn_str}`")));
        };

        let high = u64::from_str_radix(high_str, 16)?;
        let low = u64::from_str_radix(low_str, 16)?;
        if high > u64::from(u32::MAX) || low > u64::from(u32::MAX) {
            return Err(ReplError::new(
                ErrorKind::ConversionError,
                "invalid LSN format",
            )
            .with_detail(format!("halves of `{lsn_str}` exceed 32 bits")));
        }

        Ok(Lsn((high << 32) | low))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 as u32)
    }
}

impl Sub for Lsn {
    type Output = u64;

    /// Byte distance between two log positions.
    fn sub(self, rhs: Lsn) -> u64 {
        self.0 - rhs.0
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> u64 {
        lsn.0
    }
}

impl From<PgLsn> for Lsn {
    fn from(lsn: PgLsn) -> Self {
        Lsn(lsn.into())
    }
}

impl From<Lsn> for PgLsn {
    fn from(lsn: Lsn) -> PgLsn {
        PgLsn::from(lsn.0)
    }
}
