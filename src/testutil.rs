//! Synthetic Mach-O images for unit tests.

use crate::macho::*;
use crate::util::{align_up, Endian};

/// Builds a 64-bit arm64 image with the given commands, in the given byte order.
///
/// Each command is `(cmd, cmdsize)`. Bodies are filled with `0xA0 + index` so moved
/// commands can be recognised. The buffer is at least `capacity` bytes long.
pub(crate) fn build_image(endian: Endian, commands: &[(u32, u32)], capacity: usize) -> Vec<u8> {
    build_image_for(CPU_TYPE_ARM64, endian, commands, capacity)
}

/// Same as [`build_image`] for an arbitrary CPU type.
pub(crate) fn build_image_for(
    cputype: u32,
    endian: Endian,
    commands: &[(u32, u32)],
    capacity: usize,
) -> Vec<u8> {
    let sizeofcmds: u32 = commands.iter().map(|&(_, size)| size).sum();
    let mut data = vec![0u8; capacity.max(MachHeader64::SIZE + sizeofcmds as usize)];

    let header = MachHeader64 {
        magic: MH_MAGIC_64,
        cputype,
        cpusubtype: 0,
        filetype: MH_EXECUTE,
        ncmds: commands.len() as u32,
        sizeofcmds,
        flags: (MachOFlags::PIE | MachOFlags::TWOLEVEL).bits(),
        reserved: 0,
    };
    write_struct(&mut data, 0, &header, endian).unwrap();
    write_commands(&mut data, MachHeader64::SIZE, endian, commands);

    data
}

/// Builds a 32-bit armv7 image laid out like [`build_image`].
pub(crate) fn build_image32(endian: Endian, commands: &[(u32, u32)], capacity: usize) -> Vec<u8> {
    let sizeofcmds: u32 = commands.iter().map(|&(_, size)| size).sum();
    let mut data = vec![0u8; capacity.max(MachHeader::SIZE + sizeofcmds as usize)];

    let header = MachHeader {
        magic: MH_MAGIC,
        cputype: CPU_TYPE_ARM,
        cpusubtype: 9,
        filetype: MH_EXECUTE,
        ncmds: commands.len() as u32,
        sizeofcmds,
        flags: MachOFlags::PIE.bits(),
    };
    write_struct(&mut data, 0, &header, endian).unwrap();
    write_commands(&mut data, MachHeader::SIZE, endian, commands);

    data
}

fn write_commands(data: &mut [u8], start: usize, endian: Endian, commands: &[(u32, u32)]) {
    let mut offset = start;
    for (i, &(cmd, cmdsize)) in commands.iter().enumerate() {
        let end = offset + cmdsize as usize;
        data[offset..end].fill(0xA0 + i as u8);
        write_struct(data, offset, &LoadCommand { cmd, cmdsize }, endian).unwrap();
        offset = end;
    }
}

/// Wraps slices in a fat container with 32-bit descriptors, page aligned.
pub(crate) fn build_fat(endian: Endian, slices: &[(u32, &[u8])]) -> Vec<u8> {
    build_container(endian, false, slices)
}

/// Wraps slices in a fat container with 64-bit descriptors, page aligned.
pub(crate) fn build_fat64(endian: Endian, slices: &[(u32, &[u8])]) -> Vec<u8> {
    build_container(endian, true, slices)
}

fn build_container(endian: Endian, wide: bool, slices: &[(u32, &[u8])]) -> Vec<u8> {
    const ALIGN: usize = 0x1000;

    let mut data = vec![0u8; ALIGN];
    let header = FatHeader {
        magic: if wide { FAT_MAGIC_64 } else { FAT_MAGIC },
        nfat_arch: slices.len() as u32,
    };
    write_struct(&mut data, 0, &header, endian).unwrap();

    for (i, &(cputype, bytes)) in slices.iter().enumerate() {
        let offset = data.len();
        let arch = FatArch64 {
            cputype,
            cpusubtype: 0,
            offset: offset as u64,
            size: bytes.len() as u64,
            align: 12,
            reserved: 0,
        };
        if wide {
            write_struct(&mut data, FatHeader::SIZE + i * FatArch64::SIZE, &arch, endian).unwrap();
        } else {
            let arch = FatArch {
                cputype,
                cpusubtype: 0,
                offset: arch.offset as u32,
                size: arch.size as u32,
                align: arch.align,
            };
            write_struct(&mut data, FatHeader::SIZE + i * FatArch::SIZE, &arch, endian).unwrap();
        }

        data.extend_from_slice(bytes);
        let padded = align_up(data.len() as u64, ALIGN as u64);
        data.resize(padded as usize, 0);
    }

    data
}
