//! Read-only view of a single-architecture Mach-O image.
//!
//! [`ImageHeader`] decodes the header in whatever byte order the magic declares,
//! and [`LoadCommands`] walks the command list with every offset checked against
//! the load-command region before it is dereferenced.

use std::ops::Range;

use super::constants::*;
use super::structs::*;
use super::version::PackedVersion;
use crate::error::{Error, Result};
use crate::util::{read_u32_le_at, Endian};

// =============================================================================
// Image Header
// =============================================================================

/// Decoded Mach-O header, independent of word size and byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Byte order declared by the magic
    pub endian: Endian,
    /// True for 64-bit images (`mach_header_64`)
    pub is_64: bool,
    /// Header fields in host order. `reserved` is zero for 32-bit images.
    pub raw: MachHeader64,
}

impl ImageHeader {
    /// Identifies the byte order and word size of a Mach-O magic read as little-endian.
    pub fn classify_magic(raw_le: u32) -> Option<(Endian, bool)> {
        match raw_le {
            MH_MAGIC_64 => Some((Endian::Little, true)),
            MH_CIGAM_64 => Some((Endian::Big, true)),
            MH_MAGIC => Some((Endian::Little, false)),
            MH_CIGAM => Some((Endian::Big, false)),
            _ => None,
        }
    }

    /// Decodes the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::buffer_too_small(4, data.len()));
        }

        let magic = read_u32_le_at(data, 0);
        let (endian, is_64) =
            Self::classify_magic(magic).ok_or(Error::InvalidMachoMagic(magic))?;

        let raw = if is_64 {
            read_struct::<MachHeader64>(data, 0, endian)?
        } else {
            let h = read_struct::<MachHeader>(data, 0, endian)?;
            MachHeader64 {
                magic: h.magic,
                cputype: h.cputype,
                cpusubtype: h.cpusubtype,
                filetype: h.filetype,
                ncmds: h.ncmds,
                sizeofcmds: h.sizeofcmds,
                flags: h.flags,
                reserved: 0,
            }
        };

        Ok(Self { endian, is_64, raw })
    }

    /// Size of the header structure, i.e. the offset of the first load command.
    #[inline]
    pub fn size(&self) -> usize {
        if self.is_64 {
            MachHeader64::SIZE
        } else {
            MachHeader::SIZE
        }
    }

    /// Byte range occupied by the load commands.
    #[inline]
    pub fn commands_range(&self) -> Range<usize> {
        self.size()..self.size() + self.raw.sizeofcmds as usize
    }

    /// Header flags.
    #[inline]
    pub fn flags(&self) -> MachOFlags {
        MachOFlags::from_bits_retain(self.raw.flags)
    }

    /// Re-encodes the header at the start of `data` in its original byte order.
    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        if self.is_64 {
            write_struct(data, 0, &self.raw, self.endian)
        } else {
            let h = MachHeader {
                magic: self.raw.magic,
                cputype: self.raw.cputype,
                cpusubtype: self.raw.cpusubtype,
                filetype: self.raw.filetype,
                ncmds: self.raw.ncmds,
                sizeofcmds: self.raw.sizeofcmds,
                flags: self.raw.flags,
            };
            write_struct(data, 0, &h, self.endian)
        }
    }
}

// =============================================================================
// Load Command Walking
// =============================================================================

/// A load command's prefix and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLoadCommand {
    /// Kind of load command
    pub cmd: u32,
    /// Declared size including the prefix
    pub cmdsize: u32,
    /// Offset from the start of the image header
    pub offset: usize,
}

impl RawLoadCommand {
    /// Returns the `LC_*` name of this command.
    #[inline]
    pub fn name(&self) -> &'static str {
        load_command_name(self.cmd)
    }

    /// Byte range of this command within the image.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.cmdsize as usize
    }
}

/// Iterator over the load commands of an image.
///
/// Yields an error and stops at the first command whose prefix or body falls
/// outside the load-command region, or whose size is smaller than the prefix.
#[derive(Debug, Clone)]
pub struct LoadCommands<'a> {
    data: &'a [u8],
    endian: Endian,
    offset: usize,
    end: usize,
    remaining: u32,
}

impl<'a> LoadCommands<'a> {
    fn new(data: &'a [u8], header: &ImageHeader) -> Self {
        let region = header.commands_range();
        Self {
            data,
            endian: header.endian,
            offset: region.start,
            end: region.end.min(data.len()),
            remaining: header.raw.ncmds,
        }
    }

    /// Offset one past the last command walked so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.offset
    }

    fn next_command(&mut self) -> Result<RawLoadCommand> {
        let offset = self.offset;
        if offset + LoadCommand::SIZE > self.end {
            return Err(Error::LoadCommandOverflow { offset });
        }

        let lc: LoadCommand = read_struct(self.data, offset, self.endian)?;
        if (lc.cmdsize as usize) < LoadCommand::SIZE {
            return Err(Error::InvalidLoadCommandSize {
                offset,
                cmdsize: lc.cmdsize,
            });
        }
        if offset + lc.cmdsize as usize > self.end {
            return Err(Error::LoadCommandOverflow { offset });
        }

        self.offset += lc.cmdsize as usize;
        Ok(RawLoadCommand {
            cmd: lc.cmd,
            cmdsize: lc.cmdsize,
            offset,
        })
    }
}

impl Iterator for LoadCommands<'_> {
    type Item = Result<RawLoadCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let result = self.next_command();
        self.remaining = if result.is_ok() {
            self.remaining - 1
        } else {
            0
        };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

// =============================================================================
// Decoded Commands
// =============================================================================

/// Decoded build version command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVersionInfo {
    /// Offset of the command within the image
    pub offset: usize,
    /// Declared command size
    pub cmdsize: u32,
    /// Platform identifier (PLATFORM_*)
    pub platform: u32,
    /// Minimum OS version
    pub minos: PackedVersion,
    /// SDK version
    pub sdk: PackedVersion,
    /// Build tool entries
    pub tools: Vec<BuildToolVersion>,
}

/// Decoded encryption info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// LC_ENCRYPTION_INFO or LC_ENCRYPTION_INFO_64
    pub cmd: u32,
    /// Offset of the command within the image
    pub offset: usize,
    /// File offset of the encrypted range
    pub cryptoff: u32,
    /// Size of the encrypted range
    pub cryptsize: u32,
    /// Encryption system ID
    pub cryptid: u32,
}

impl EncryptionInfo {
    /// Returns true if the range is still encrypted on disk.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.cryptid != 0
    }
}

/// Decoded minimum OS version command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMinInfo {
    /// LC_VERSION_MIN_* kind
    pub cmd: u32,
    /// Offset of the command within the image
    pub offset: usize,
    /// Minimum OS version
    pub version: PackedVersion,
    /// SDK version
    pub sdk: PackedVersion,
}

// =============================================================================
// Mach-O Image
// =============================================================================

/// Read-only view over a single-architecture Mach-O image.
#[derive(Debug, Clone, Copy)]
pub struct MachOImage<'a> {
    /// The decoded header
    pub header: ImageHeader,
    data: &'a [u8],
}

impl<'a> MachOImage<'a> {
    /// Parses the header and checks that the load-command region lies within `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = ImageHeader::parse(data)?;

        let region = header.commands_range();
        if region.end > data.len() {
            return Err(Error::buffer_too_small(region.end, data.len()));
        }

        Ok(Self { header, data })
    }

    /// Byte order of the image.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.header.endian
    }

    /// Returns an iterator over the load commands.
    pub fn commands(&self) -> LoadCommands<'a> {
        LoadCommands::new(self.data, &self.header)
    }

    /// Walks every load command and checks that they exactly fill `sizeofcmds`.
    pub fn validated_commands(&self) -> Result<Vec<RawLoadCommand>> {
        let mut iter = self.commands();
        let commands = iter.by_ref().collect::<Result<Vec<_>>>()?;

        let actual = (iter.position() - self.header.size()) as u32;
        if actual != self.header.raw.sizeofcmds {
            return Err(Error::LoadCommandSizeMismatch {
                declared: self.header.raw.sizeofcmds,
                actual,
            });
        }

        Ok(commands)
    }

    /// Returns the bytes of a load command.
    #[inline]
    pub fn command_bytes(&self, lc: &RawLoadCommand) -> &'a [u8] {
        &self.data[lc.range()]
    }

    /// Returns the first build version command, if any.
    pub fn build_version(&self) -> Result<Option<BuildVersionInfo>> {
        for lc in self.commands() {
            let lc = lc?;
            if lc.cmd != LC_BUILD_VERSION {
                continue;
            }

            let bytes = self.command_bytes(&lc);
            let command: BuildVersionCommand = read_struct(bytes, 0, self.endian())?;

            // Only tools that fit inside the declared command size are reported.
            let mut tools = Vec::new();
            let mut tool_offset = BuildVersionCommand::SIZE;
            for _ in 0..command.ntools {
                if tool_offset + BuildToolVersion::SIZE > bytes.len() {
                    break;
                }
                tools.push(read_struct::<BuildToolVersion>(
                    bytes,
                    tool_offset,
                    self.endian(),
                )?);
                tool_offset += BuildToolVersion::SIZE;
            }

            return Ok(Some(BuildVersionInfo {
                offset: lc.offset,
                cmdsize: lc.cmdsize,
                platform: command.platform,
                minos: PackedVersion(command.minos),
                sdk: PackedVersion(command.sdk),
                tools,
            }));
        }

        Ok(None)
    }

    /// Returns the first `LC_VERSION_MIN_*` command, if any.
    pub fn version_min(&self) -> Result<Option<VersionMinInfo>> {
        for lc in self.commands() {
            let lc = lc?;
            if !matches!(
                lc.cmd,
                LC_VERSION_MIN_MACOSX
                    | LC_VERSION_MIN_IPHONEOS
                    | LC_VERSION_MIN_TVOS
                    | LC_VERSION_MIN_WATCHOS
            ) {
                continue;
            }

            let command: VersionMinCommand =
                read_struct(self.command_bytes(&lc), 0, self.endian())?;
            return Ok(Some(VersionMinInfo {
                cmd: lc.cmd,
                offset: lc.offset,
                version: PackedVersion(command.version),
                sdk: PackedVersion(command.sdk),
            }));
        }

        Ok(None)
    }

    /// Returns the first encryption info command, if any.
    pub fn encryption_info(&self) -> Result<Option<EncryptionInfo>> {
        for lc in self.commands() {
            let lc = lc?;
            let bytes = self.command_bytes(&lc);

            // Both variants share the same leading fields.
            let command: EncryptionInfoCommand = match lc.cmd {
                LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
                    read_struct(bytes, 0, self.endian())?
                }
                _ => continue,
            };

            return Ok(Some(EncryptionInfo {
                cmd: lc.cmd,
                offset: lc.offset,
                cryptoff: command.cryptoff,
                cryptsize: command.cryptsize,
                cryptid: command.cryptid,
            }));
        }

        Ok(None)
    }

    /// Returns true if the image carries an active encryption segment.
    pub fn is_encrypted(&self) -> Result<bool> {
        Ok(self
            .encryption_info()?
            .map(|info| info.is_encrypted())
            .unwrap_or(false))
    }
}
