//! Utilities for working with raw byte units.

use core::fmt;

/// `1 KiB`
pub const KIB: u64 = 1 << 10;
/// `1 MiB`
pub const MIB: u64 = 1 << 20;
/// `1 GiB`
pub const GIB: u64 = 1 << 30;
/// `1 TiB`
pub const TIB: u64 = 1 << 40;

/// Wrap the given number of bytes into a [`ByteUnit`].
pub fn bytes(count: u64) -> ByteUnit {
    ByteUnit(count)
}

/// Wrapper around raw byte that pretty-prints
/// them using the [`Display`](core::fmt::Display)
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteUnit(pub u64);

impl fmt::Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.0 as f64;

        match self.0 {
            0..KIB => write!(f, "{} B", self.0)?,
            KIB..MIB => write!(f, "{:.2} KiB", count / KIB as f64)?,
            MIB..GIB => write!(f, "{:.2} MiB", count / MIB as f64)?,
            GIB..TIB => write!(f, "{:.2} GiB", count / GIB as f64)?,
            _ => write!(f, "{:.2} TiB", count / TIB as f64)?,
        };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_print() {
        assert_eq!(bytes(512).to_string(), "512 B");
        assert_eq!(bytes(4 * KIB).to_string(), "4.00 KiB");
        assert_eq!(bytes(3 * MIB / 2).to_string(), "1.50 MiB");
        assert_eq!(bytes(2 * GIB).to_string(), "2.00 GiB");
        assert_eq!(bytes(TIB).to_string(), "1.00 TiB");
    }
}
