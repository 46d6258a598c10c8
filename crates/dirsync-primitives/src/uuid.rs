use std::fmt;
use std::str::FromStr;

use crate::error::CsnError;

/// A 16-byte `entryUUID`, as carried over the wire in the sync-state
/// control. Displayed in the canonical 8-4-4-4-12 hex form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid16(pub [u8; 16]);

impl Uuid16 {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CsnError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CsnError::MalformedUuid(bytes.len()))?;
        Ok(Self(arr))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The present-set bucket index: the first two bytes.
    #[must_use]
    pub const fn bucket(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// The remaining 14 bytes used as the intra-bucket key.
    #[must_use]
    pub fn suffix(&self) -> [u8; 14] {
        let mut out = [0_u8; 14];
        out.copy_from_slice(&self.0[2..]);
        out
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid16({self})")
    }
}

impl fmt::Display for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl FromStr for Uuid16 {
    type Err = CsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        let bytes =
            hex::decode(&hex).map_err(|e| CsnError::MalformedUuid(e.to_string().len()))?;
        Self::from_slice(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let u = Uuid16::from_bytes([0xaa; 16]);
        let s = u.to_string();
        assert_eq!(s, "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa");
        assert_eq!(s.parse::<Uuid16>().unwrap(), u);
    }

    #[test]
    fn bucket_is_first_two_bytes() {
        let u = Uuid16::from_bytes([0x01, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(u.bucket(), 0x0102);
    }
}
