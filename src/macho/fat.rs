//! Fat (universal) container handling.
//!
//! A fat file starts with a big-endian [`FatHeader`] followed by `nfat_arch`
//! architecture descriptors, each pointing at a complete Mach-O image inside the
//! same file. Descriptors are decoded into host-order values; the buffer itself is
//! never modified here.

use std::ops::Range;

use tracing::{debug, warn};

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::{is_aligned, read_u32_le_at, Endian};

/// Location of a single-architecture image within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    /// Offset of the image header from the start of the file
    pub offset: usize,
    /// Size of the image in bytes
    pub size: usize,
}

impl SliceRange {
    /// Byte range of the slice.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// Identifies the byte order and descriptor width of a fat magic read as little-endian.
pub fn classify_fat_magic(raw_le: u32) -> Option<(Endian, bool)> {
    match raw_le {
        FAT_MAGIC => Some((Endian::Little, false)),
        FAT_CIGAM => Some((Endian::Big, false)),
        FAT_MAGIC_64 => Some((Endian::Little, true)),
        FAT_CIGAM_64 => Some((Endian::Big, true)),
        _ => None,
    }
}

/// Returns true if `data` starts with a fat container magic.
pub fn is_fat(data: &[u8]) -> bool {
    data.len() >= 4 && classify_fat_magic(read_u32_le_at(data, 0)).is_some()
}

/// Decodes every architecture descriptor of a fat container.
///
/// Returns `None` if `data` is not a fat container. Descriptors that would be read
/// past the end of `data` are a structural error.
pub fn fat_slices(data: &[u8]) -> Result<Option<Vec<FatArch64>>> {
    if data.len() < 4 {
        return Err(Error::buffer_too_small(4, data.len()));
    }

    let Some((endian, wide)) = classify_fat_magic(read_u32_le_at(data, 0)) else {
        return Ok(None);
    };

    let header: FatHeader = read_struct(data, 0, endian)?;
    let entry_size = if wide { FatArch64::SIZE } else { FatArch::SIZE };

    let table_end = (header.nfat_arch as usize)
        .checked_mul(entry_size)
        .and_then(|len| len.checked_add(FatHeader::SIZE))
        .ok_or_else(|| Error::parse(FatHeader::SIZE, "fat descriptor table overflows"))?;
    if table_end > data.len() {
        return Err(Error::buffer_too_small(table_end, data.len()));
    }

    debug!(
        "Fat container: {} architectures, {:?} endian{}",
        header.nfat_arch,
        endian,
        if endian.needs_swap() { " (byte-swapped)" } else { "" }
    );

    let mut archs = Vec::with_capacity(header.nfat_arch as usize);
    for i in 0..header.nfat_arch as usize {
        let offset = FatHeader::SIZE + i * entry_size;
        let arch = if wide {
            read_struct::<FatArch64>(data, offset, endian)?
        } else {
            read_struct::<FatArch>(data, offset, endian)?.into()
        };
        archs.push(arch);
    }

    Ok(Some(archs))
}

/// Locates the image for `cputype` within `data`.
///
/// A thin image is returned whole. In a fat container every descriptor is scanned
/// and the last one matching `cputype` wins; the matched slice must lie entirely
/// within `data`.
pub fn locate_slice(data: &[u8], cputype: u32) -> Result<SliceRange> {
    let Some(archs) = fat_slices(data)? else {
        return Ok(SliceRange {
            offset: 0,
            size: data.len(),
        });
    };

    let mut found = None;
    for arch in &archs {
        if arch.cputype == cputype {
            found = Some(arch);
        }
    }

    let arch = found.ok_or(Error::ArchitectureNotFound { cputype })?;

    if arch.end().map_or(true, |end| end > data.len() as u64) {
        return Err(Error::SliceOutOfBounds {
            offset: arch.offset,
            size: arch.size,
            file_size: data.len() as u64,
        });
    }

    if arch.align < 64 && !is_aligned(arch.offset, 1u64 << arch.align) {
        warn!(
            "slice at {:#x} is not aligned to 2^{}",
            arch.offset, arch.align
        );
    }

    debug!("Selected {}", arch);

    Ok(SliceRange {
        offset: arch.offset as usize,
        size: arch.size as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_fat, build_image_for};

    fn two_slice_fat(endian: Endian) -> Vec<u8> {
        let arm = build_image_for(CPU_TYPE_ARM64, Endian::Little, &[(LC_UUID, 24)], 0x200);
        let x86 = build_image_for(CPU_TYPE_X86_64, Endian::Little, &[(LC_UUID, 24)], 0x300);
        build_fat(endian, &[(CPU_TYPE_X86_64, &x86), (CPU_TYPE_ARM64, &arm)])
    }

    #[test]
    fn test_thin_image_is_whole_buffer() {
        let data = build_image_for(CPU_TYPE_ARM64, Endian::Little, &[(LC_UUID, 24)], 0x100);
        let slice = locate_slice(&data, CPU_TYPE_X86_64).unwrap();
        assert_eq!(slice, SliceRange { offset: 0, size: 0x100 });
        assert!(!is_fat(&data));
    }

    #[test]
    fn test_locate_in_big_endian_fat() {
        let data = two_slice_fat(Endian::Big);
        assert_eq!(&data[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert!(is_fat(&data));

        let slice = locate_slice(&data, CPU_TYPE_ARM64).unwrap();
        assert_eq!(slice, SliceRange { offset: 0x2000, size: 0x200 });

        let slice = locate_slice(&data, CPU_TYPE_X86_64).unwrap();
        assert_eq!(slice, SliceRange { offset: 0x1000, size: 0x300 });
    }

    #[test]
    fn test_locate_in_little_endian_fat() {
        let data = two_slice_fat(Endian::Little);
        let slice = locate_slice(&data, CPU_TYPE_ARM64).unwrap();
        assert_eq!(slice, SliceRange { offset: 0x2000, size: 0x200 });
    }

    #[test]
    fn test_locator_leaves_buffer_untouched() {
        let data = two_slice_fat(Endian::Big);
        let before = data.clone();
        locate_slice(&data, CPU_TYPE_ARM64).unwrap();
        assert_eq!(data, before);
    }

    #[test]
    fn test_missing_architecture() {
        let data = two_slice_fat(Endian::Big);
        let err = locate_slice(&data, CPU_TYPE_ARM64_32).unwrap_err();
        assert!(matches!(
            err,
            Error::ArchitectureNotFound {
                cputype: CPU_TYPE_ARM64_32
            }
        ));
        assert!(!err.is_structural());
    }

    #[test]
    fn test_last_match_wins() {
        let a = build_image_for(CPU_TYPE_ARM64, Endian::Little, &[(LC_UUID, 24)], 0x100);
        let b = build_image_for(CPU_TYPE_ARM64, Endian::Little, &[(LC_UUID, 24)], 0x180);
        let data = build_fat(Endian::Big, &[(CPU_TYPE_ARM64, &a), (CPU_TYPE_ARM64, &b)]);

        let slice = locate_slice(&data, CPU_TYPE_ARM64).unwrap();
        assert_eq!(slice, SliceRange { offset: 0x2000, size: 0x180 });
    }

    #[test]
    fn test_slice_past_end() {
        let mut data = two_slice_fat(Endian::Big);
        // Second descriptor's size field.
        Endian::Big.write_u32(&mut data[FatHeader::SIZE + FatArch::SIZE + 12..], 0x10_0000);

        let err = locate_slice(&data, CPU_TYPE_ARM64).unwrap_err();
        assert!(matches!(err, Error::SliceOutOfBounds { offset: 0x2000, .. }));
        assert!(err.is_structural());
    }

    #[test]
    fn test_descriptor_table_past_end() {
        let mut data = vec![0u8; 16];
        Endian::Big.write_u32(&mut data[0..], FAT_MAGIC);
        Endian::Big.write_u32(&mut data[4..], 3);
        assert!(matches!(
            locate_slice(&data, CPU_TYPE_ARM64),
            Err(Error::BufferTooSmall { needed: 68, .. })
        ));
    }

    #[test]
    fn test_fat64_descriptors() {
        let arm = build_image_for(CPU_TYPE_ARM64, Endian::Little, &[(LC_UUID, 24)], 0x100);
        let mut data = vec![0u8; 0x1000];
        write_struct(
            &mut data,
            0,
            &FatHeader {
                magic: FAT_MAGIC_64,
                nfat_arch: 1,
            },
            Endian::Big,
        )
        .unwrap();
        let arch = FatArch64 {
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            offset: 0x1000,
            size: arm.len() as u64,
            align: 12,
            reserved: 0,
        };
        write_struct(&mut data, FatHeader::SIZE, &arch, Endian::Big).unwrap();
        data.extend_from_slice(&arm);

        let archs = fat_slices(&data).unwrap().unwrap();
        assert_eq!(archs, vec![arch]);
        let slice = locate_slice(&data, CPU_TYPE_ARM64).unwrap();
        assert_eq!(slice.range(), 0x1000..0x1100);
    }

    #[test]
    fn test_tiny_buffer() {
        assert!(matches!(
            locate_slice(&[0xCA, 0xFE], CPU_TYPE_ARM64),
            Err(Error::BufferTooSmall { .. })
        ));
    }
}
