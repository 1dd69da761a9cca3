//! Mach-O binary structures.
//!
//! These structures match the on-disk format of Mach-O files and fat containers.
//! They are laid out in host order by `zerocopy`; [`read_struct`] and
//! [`write_struct`] convert to and from the byte order a file declares.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::constants::*;
use crate::error::{Error, Result};
use crate::util::Endian;

// =============================================================================
// Byte Swapping
// =============================================================================

/// On-disk structures whose fields can be byte-swapped as a unit.
pub trait SwapBytes: Sized {
    /// Returns a copy with every integer field byte-swapped.
    fn swap_bytes(self) -> Self;
}

macro_rules! impl_swap_bytes {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl SwapBytes for $ty {
            #[inline]
            fn swap_bytes(self) -> Self {
                Self {
                    $($field: self.$field.swap_bytes(),)*
                }
            }
        }
    };
}

/// Decodes a structure stored at `offset` in the given byte order.
pub fn read_struct<T>(data: &[u8], offset: usize, endian: Endian) -> Result<T>
where
    T: FromBytes + SwapBytes,
{
    let size = std::mem::size_of::<T>();
    let end = offset
        .checked_add(size)
        .ok_or_else(|| Error::buffer_too_small(usize::MAX, data.len()))?;
    if end > data.len() {
        return Err(Error::buffer_too_small(end, data.len()));
    }

    let value = T::read_from_prefix(&data[offset..end])
        .map_err(|_| Error::parse(offset, "failed to decode structure"))?
        .0;

    Ok(if endian.needs_swap() {
        value.swap_bytes()
    } else {
        value
    })
}

/// Encodes a structure at `offset` in the given byte order.
pub fn write_struct<T>(data: &mut [u8], offset: usize, value: &T, endian: Endian) -> Result<()>
where
    T: IntoBytes + Immutable + SwapBytes + Copy,
{
    let size = std::mem::size_of::<T>();
    let end = offset
        .checked_add(size)
        .ok_or_else(|| Error::buffer_too_small(usize::MAX, data.len()))?;
    if end > data.len() {
        return Err(Error::buffer_too_small(end, data.len()));
    }

    let encoded = if endian.needs_swap() {
        value.swap_bytes()
    } else {
        *value
    };
    data[offset..end].copy_from_slice(encoded.as_bytes());
    Ok(())
}

// =============================================================================
// Fat Container Structures
// =============================================================================

/// Fat (universal) container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    /// FAT_MAGIC or FAT_MAGIC_64
    pub magic: u32,
    /// Number of architecture descriptors that follow
    pub nfat_arch: u32,
}

impl FatHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 8;
}

impl_swap_bytes!(FatHeader { magic, nfat_arch });

/// Architecture descriptor with 32-bit offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the slice
    pub offset: u32,
    /// Size of the slice
    pub size: u32,
    /// Alignment (power of 2)
    pub align: u32,
}

impl FatArch {
    /// Size of a descriptor in bytes.
    pub const SIZE: usize = 20;
}

impl_swap_bytes!(FatArch {
    cputype,
    cpusubtype,
    offset,
    size,
    align
});

/// Architecture descriptor with 64-bit offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch64 {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the slice
    pub offset: u64,
    /// Size of the slice
    pub size: u64,
    /// Alignment (power of 2)
    pub align: u32,
    /// Reserved
    pub reserved: u32,
}

impl FatArch64 {
    /// Size of a descriptor in bytes.
    pub const SIZE: usize = 32;

    /// File offset one past the end of the slice, or `None` if it overflows.
    #[inline]
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

impl_swap_bytes!(FatArch64 {
    cputype,
    cpusubtype,
    offset,
    size,
    align,
    reserved
});

// =============================================================================
// Header Structures
// =============================================================================

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    /// Magic number (MH_MAGIC_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;
}

impl_swap_bytes!(MachHeader64 {
    magic,
    cputype,
    cpusubtype,
    filetype,
    ncmds,
    sizeofcmds,
    flags,
    reserved
});

/// 32-bit Mach-O header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader {
    /// Magic number (MH_MAGIC)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;
}

impl_swap_bytes!(MachHeader {
    magic,
    cputype,
    cpusubtype,
    filetype,
    ncmds,
    sizeofcmds,
    flags
});

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommand {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommand {
    /// Size of the load command header.
    pub const SIZE: usize = 8;
}

impl_swap_bytes!(LoadCommand { cmd, cmdsize });

// =============================================================================
// Build Version Command
// =============================================================================

/// Build version command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildVersionCommand {
    /// LC_BUILD_VERSION
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Platform
    pub platform: u32,
    /// Minimum OS version (X.Y.Z packed into 32 bits)
    pub minos: u32,
    /// SDK version (X.Y.Z packed into 32 bits)
    pub sdk: u32,
    /// Number of tool entries following
    pub ntools: u32,
}

impl BuildVersionCommand {
    /// Size of this command (without tool entries).
    pub const SIZE: usize = 24;
}

impl_swap_bytes!(BuildVersionCommand {
    cmd,
    cmdsize,
    platform,
    minos,
    sdk,
    ntools
});

/// Build tool entry trailing a build version command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildToolVersion {
    /// Tool identifier (TOOL_*)
    pub tool: u32,
    /// Tool version (X.Y.Z packed into 32 bits)
    pub version: u32,
}

impl BuildToolVersion {
    /// Size of a tool entry.
    pub const SIZE: usize = 8;
}

impl_swap_bytes!(BuildToolVersion { tool, version });

// =============================================================================
// Version Min Command
// =============================================================================

/// Minimum OS version command (LC_VERSION_MIN_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct VersionMinCommand {
    /// LC_VERSION_MIN_MACOSX, LC_VERSION_MIN_IPHONEOS, ...
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// X.Y.Z packed into 32 bits
    pub version: u32,
    /// X.Y.Z packed into 32 bits
    pub sdk: u32,
}

impl VersionMinCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
}

impl_swap_bytes!(VersionMinCommand {
    cmd,
    cmdsize,
    version,
    sdk
});

// =============================================================================
// Encryption Info Command
// =============================================================================

/// 32-bit encryption info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct EncryptionInfoCommand {
    /// LC_ENCRYPTION_INFO
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset of encrypted range
    pub cryptoff: u32,
    /// Size of encrypted range
    pub cryptsize: u32,
    /// Encryption system ID (0 = not encrypted yet)
    pub cryptid: u32,
}

impl EncryptionInfoCommand {
    /// Size of this command.
    pub const SIZE: usize = 20;
}

impl_swap_bytes!(EncryptionInfoCommand {
    cmd,
    cmdsize,
    cryptoff,
    cryptsize,
    cryptid
});

/// 64-bit encryption info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct EncryptionInfoCommand64 {
    /// LC_ENCRYPTION_INFO_64
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset of encrypted range
    pub cryptoff: u32,
    /// Size of encrypted range
    pub cryptsize: u32,
    /// Encryption system ID (0 = not encrypted yet)
    pub cryptid: u32,
    /// Padding
    pub pad: u32,
}

impl EncryptionInfoCommand64 {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

impl_swap_bytes!(EncryptionInfoCommand64 {
    cmd,
    cmdsize,
    cryptoff,
    cryptsize,
    cryptid,
    pad
});

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for FatArch64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FatArch {{ arch: {}, offset: {:#x}, size: {:#x}, align: 2^{} }}",
            arch_name(self.cputype),
            self.offset,
            self.size,
            self.align
        )
    }
}

impl From<FatArch> for FatArch64 {
    fn from(arch: FatArch) -> Self {
        Self {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            offset: arch.offset as u64,
            size: arch.size as u64,
            align: arch.align,
            reserved: 0,
        }
    }
}
