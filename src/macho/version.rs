//! Packed `X.Y.Z` version numbers used by platform load commands.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A version packed as `xxxx.yy.zz` nibbles (major in the high 16 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PackedVersion(pub u32);

impl PackedVersion {
    /// Packs a version from its components.
    #[inline]
    pub const fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self(((major as u32) << 16) | ((minor as u32) << 8) | patch as u32)
    }

    /// Major component.
    #[inline]
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Minor component.
    #[inline]
    pub const fn minor(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Patch component.
    #[inline]
    pub const fn patch(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for PackedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())?;
        if self.patch() != 0 {
            write!(f, ".{}", self.patch())?;
        }
        Ok(())
    }
}

impl FromStr for PackedVersion {
    type Err = Error;

    /// Parses `"14"`, `"14.5"` or `"14.5.1"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse::<u16>()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(major, minor, patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack() {
        assert_eq!(PackedVersion::new(10, 0, 0).0, 0x000A_0000);
        assert_eq!(PackedVersion::new(14, 5, 0).0, 0x000E_0500);
        assert_eq!(PackedVersion::new(609, 7, 0).0, 0x0261_0700);
    }

    #[test]
    fn test_parse() {
        assert_eq!("14.5".parse::<PackedVersion>().unwrap().0, 0x000E_0500);
        assert_eq!("10".parse::<PackedVersion>().unwrap().0, 0x000A_0000);
        assert_eq!("11.2.3".parse::<PackedVersion>().unwrap().0, 0x000B_0203);
        assert!("".parse::<PackedVersion>().is_err());
        assert!("1.2.3.4".parse::<PackedVersion>().is_err());
        assert!("1.300".parse::<PackedVersion>().is_err());
        assert!("a.b".parse::<PackedVersion>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(PackedVersion(0x000E_0500).to_string(), "14.5");
        assert_eq!(PackedVersion(0x000B_0203).to_string(), "11.2.3");
    }
}
