//! Byte-order aware primitives for binary data processing.
//!
//! Mach-O files and fat containers declare their byte order through their magic
//! numbers, so every multi-byte field is read through an [`Endian`] value rather
//! than assuming the host order. Reads and writes go through `byteorder`, which
//! compiles down to a single unaligned load/store (plus `rev` when swapping).

use byteorder::{BigEndian, ByteOrder, LittleEndian};

// =============================================================================
// Endianness
// =============================================================================

/// Byte order declared by a Mach-O or fat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first (arm64, x86_64 images).
    Little,
    /// Most significant byte first (fat containers, ppc images).
    Big,
}

impl Endian {
    /// Byte order of the host we are running on.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    /// Byte order of the host we are running on.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;

    /// Returns true if values in this order must be byte-swapped on this host.
    #[inline]
    pub fn needs_swap(self) -> bool {
        self != Self::NATIVE
    }

    /// Reads a u32 from the start of `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 4`.
    #[inline(always)]
    pub fn read_u32(self, data: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(data),
            Endian::Big => BigEndian::read_u32(data),
        }
    }

    /// Writes a u32 to the start of `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 4`.
    #[inline(always)]
    pub fn write_u32(self, data: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(data, value),
            Endian::Big => BigEndian::write_u32(data, value),
        }
    }
}

/// Reads a little-endian u32 from a byte slice at the given offset.
///
/// Used for raw magic probing, where the byte order is what we are trying to find out.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&data[offset..])
}

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Aligns a value up to the given power-of-two alignment.
#[inline(always)]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given power-of-two alignment.
#[inline(always)]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    debug_assert!(alignment.is_power_of_two());
    (value & (alignment - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_read_write() {
        let mut data = [0u8; 8];
        Endian::Big.write_u32(&mut data, 0xCAFEBABE);
        assert_eq!(&data[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(Endian::Big.read_u32(&data), 0xCAFEBABE);
        assert_eq!(Endian::Little.read_u32(&data), 0xBEBAFECA);

        Endian::Little.write_u32(&mut data[4..], 0x08070605);
        assert_eq!(&data[4..], &[5, 6, 7, 8]);
    }

    #[test]
    fn test_native_swap() {
        assert!(!Endian::NATIVE.needs_swap());
        assert_ne!(Endian::Little.needs_swap(), Endian::Big.needs_swap());
    }

    #[test]
    fn test_read_u32_le_at() {
        let data = [0xFF, 0xCF, 0xFA, 0xED, 0xFE];
        assert_eq!(read_u32_le_at(&data, 1), 0xFEEDFACF);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(20, 8), 24);
        assert_eq!(align_up(32, 8), 32);
        assert!(is_aligned(32, 8));
        assert!(!is_aligned(20, 8));
    }
}
