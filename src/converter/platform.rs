//! Target platform description and the canonical build version command.

use std::fmt;

use crate::error::{Error, Result};
use crate::macho::{
    platform_name, tool_name, write_struct, BuildToolVersion, BuildVersionCommand, PackedVersion,
    LC_BUILD_VERSION, PLATFORM_BRIDGEOS, PLATFORM_DRIVERKIT, PLATFORM_IOS, PLATFORM_IOSSIMULATOR,
    PLATFORM_MACCATALYST, PLATFORM_MACOS, PLATFORM_TVOS, PLATFORM_TVOSSIMULATOR,
    PLATFORM_WATCHOS, PLATFORM_WATCHOSSIMULATOR, TOOL_LD,
};
use crate::util::Endian;

/// The platform an image is rewritten to declare.
///
/// Every field ends up verbatim in the `LC_BUILD_VERSION` command written by the
/// rewriter, which always carries exactly one build tool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTarget {
    /// Platform identifier (PLATFORM_*)
    pub platform: u32,
    /// Minimum OS version
    pub minos: PackedVersion,
    /// SDK version
    pub sdk: PackedVersion,
    /// Build tool identifier (TOOL_*)
    pub tool: u32,
    /// Build tool version
    pub tool_version: PackedVersion,
}

impl Default for PlatformTarget {
    /// Mac Catalyst 10.0, SDK 14.5, linked by ld 609.7.
    fn default() -> Self {
        Self {
            platform: PLATFORM_MACCATALYST,
            minos: PackedVersion::new(10, 0, 0),
            sdk: PackedVersion::new(14, 5, 0),
            tool: TOOL_LD,
            tool_version: PackedVersion::new(609, 7, 0),
        }
    }
}

impl PlatformTarget {
    /// Size of the canonical build version command.
    pub const COMMAND_SIZE: usize = BuildVersionCommand::SIZE + BuildToolVersion::SIZE;

    /// Returns the default target with another platform identifier.
    pub fn for_platform(platform: u32) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }

    /// Sets the minimum OS version.
    pub fn with_minos(mut self, minos: PackedVersion) -> Self {
        self.minos = minos;
        self
    }

    /// Sets the SDK version.
    pub fn with_sdk(mut self, sdk: PackedVersion) -> Self {
        self.sdk = sdk;
        self
    }

    /// Returns the build version command header.
    pub fn build_version_command(&self) -> BuildVersionCommand {
        BuildVersionCommand {
            cmd: LC_BUILD_VERSION,
            cmdsize: Self::COMMAND_SIZE as u32,
            platform: self.platform,
            minos: self.minos.0,
            sdk: self.sdk.0,
            ntools: 1,
        }
    }

    /// Returns the single build tool entry.
    pub fn build_tool(&self) -> BuildToolVersion {
        BuildToolVersion {
            tool: self.tool,
            version: self.tool_version.0,
        }
    }

    /// Encodes the canonical command at `offset` in the given byte order.
    pub fn write_command(&self, data: &mut [u8], offset: usize, endian: Endian) -> Result<()> {
        write_struct(data, offset, &self.build_version_command(), endian)?;
        write_struct(
            data,
            offset + BuildVersionCommand::SIZE,
            &self.build_tool(),
            endian,
        )
    }

    /// Returns the canonical command bytes in the given byte order.
    pub fn encode(&self, endian: Endian) -> Result<[u8; Self::COMMAND_SIZE]> {
        let mut bytes = [0u8; Self::COMMAND_SIZE];
        self.write_command(&mut bytes, 0, endian)?;
        Ok(bytes)
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (sdk {}, {} {})",
            platform_name(self.platform),
            self.minos,
            self.sdk,
            tool_name(self.tool),
            self.tool_version
        )
    }
}

/// Parses a platform name into a platform identifier.
pub fn parse_platform(name: &str) -> Result<u32> {
    let platform = match name.to_ascii_lowercase().as_str() {
        "macos" | "macosx" => PLATFORM_MACOS,
        "ios" => PLATFORM_IOS,
        "tvos" => PLATFORM_TVOS,
        "watchos" => PLATFORM_WATCHOS,
        "bridgeos" => PLATFORM_BRIDGEOS,
        "maccatalyst" | "catalyst" => PLATFORM_MACCATALYST,
        "ios-simulator" | "iossimulator" => PLATFORM_IOSSIMULATOR,
        "tvos-simulator" | "tvossimulator" => PLATFORM_TVOSSIMULATOR,
        "watchos-simulator" | "watchossimulator" => PLATFORM_WATCHOSSIMULATOR,
        "driverkit" => PLATFORM_DRIVERKIT,
        other => other
            .parse::<u32>()
            .map_err(|_| Error::InvalidPlatform(name.to_string()))?,
    };
    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_bytes() {
        let bytes = PlatformTarget::default().encode(Endian::Little).unwrap();
        let words: Vec<u32> = bytes
            .chunks(4)
            .map(|c| Endian::Little.read_u32(c))
            .collect();
        assert_eq!(
            words,
            vec![0x32, 0x20, 6, 0xA0000, 0xE0500, 1, 3, 0x2610700]
        );
    }

    #[test]
    fn test_big_endian_encoding() {
        let little = PlatformTarget::default().encode(Endian::Little).unwrap();
        let big = PlatformTarget::default().encode(Endian::Big).unwrap();
        assert_eq!(&big[..8], &[0, 0, 0, 0x32, 0, 0, 0, 0x20]);
        for (l, b) in little.chunks(4).zip(big.chunks(4)) {
            let mut reversed = b.to_vec();
            reversed.reverse();
            assert_eq!(l, reversed.as_slice());
        }
    }

    #[test]
    fn test_builder() {
        let target = PlatformTarget::for_platform(PLATFORM_IOSSIMULATOR)
            .with_minos(PackedVersion::new(13, 0, 0))
            .with_sdk(PackedVersion::new(17, 0, 0));
        assert_eq!(target.build_version_command().platform, 7);
        assert_eq!(target.build_version_command().minos, 0x000D_0000);
        assert_eq!(target.tool, TOOL_LD);
        assert_eq!(target.to_string(), "ios-simulator 13.0 (sdk 17.0, ld 609.7)");
    }

    #[test]
    fn test_parse_platform() {
        assert_eq!(parse_platform("maccatalyst").unwrap(), PLATFORM_MACCATALYST);
        assert_eq!(parse_platform("iOS-Simulator").unwrap(), PLATFORM_IOSSIMULATOR);
        assert_eq!(parse_platform("11").unwrap(), 11);

        let err = parse_platform("beos").unwrap_err();
        assert!(matches!(err, Error::InvalidPlatform(ref name) if name == "beos"));
        assert!(!err.is_structural());
        assert_eq!(err.exit_code(), 1);
    }
}
