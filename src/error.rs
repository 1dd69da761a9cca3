//! Error types for Mach-O platform rewriting.
//!
//! Errors fall into four groups: the file could not be made available, the
//! requested architecture is absent, the image is structurally malformed, or the
//! load-command region has no room for the platform command. Every error is raised
//! before the image buffer is mutated.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for Mach-O rewriting operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to query size of '{path}': {source}")]
    FileMetadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to flush changes to '{path}': {source}")]
    FileFlush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Architecture Errors ====================
    #[error("architecture {cputype:#x} not found in fat binary")]
    ArchitectureNotFound { cputype: u32 },

    #[error("fat slice at {offset:#x}+{size:#x} exceeds file size {file_size:#x}")]
    SliceOutOfBounds {
        offset: u64,
        size: u64,
        file_size: u64,
    },

    // ==================== Mach-O Errors ====================
    #[error("invalid Mach-O magic: {0:#x}")]
    InvalidMachoMagic(u32),

    #[error("load command at offset {offset:#x} extends beyond the load command region")]
    LoadCommandOverflow { offset: usize },

    #[error("load command at offset {offset:#x} has invalid size {cmdsize:#x}")]
    InvalidLoadCommandSize { offset: usize, cmdsize: u32 },

    #[error("sizeofcmds is {declared:#x} but load commands occupy {actual:#x} bytes")]
    LoadCommandSizeMismatch { declared: u32, actual: u32 },

    #[error("insufficient space for new load commands (need {needed} bytes, have {available})")]
    InsufficientLoadCommandSpace { needed: usize, available: usize },

    #[error("image is encrypted (cryptid {cryptid}); decrypt it before converting")]
    EncryptedImage { cryptid: u32 },

    // ==================== Parse Errors ====================
    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("invalid version string '{0}'")]
    InvalidVersion(String),

    #[error("unknown platform '{0}'")]
    InvalidPlatform(String),
}

/// A specialized Result type for Mach-O rewriting operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error indicates malformed input data.
    ///
    /// Structural errors are deterministic: retrying with the same bytes fails the
    /// same way.
    #[inline]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::SliceOutOfBounds { .. }
                | Error::InvalidMachoMagic(_)
                | Error::LoadCommandOverflow { .. }
                | Error::InvalidLoadCommandSize { .. }
                | Error::LoadCommandSizeMismatch { .. }
                | Error::Parse { .. }
                | Error::BufferTooSmall { .. }
        )
    }

    /// Returns the process exit code the command-line front end reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::FileOpen { .. } => 1,
            Error::FileMetadata { .. } => 2,
            Error::MemoryMap { .. } => 3,
            Error::ArchitectureNotFound { .. } => 5,
            Error::InsufficientLoadCommandSpace { .. } => 7,
            Error::EncryptedImage { .. } => 8,
            e if e.is_structural() => 6,
            _ => 1,
        }
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let open = Error::FileOpen {
            path: PathBuf::from("/nonexistent"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(open.exit_code(), 1);
        assert_eq!(Error::ArchitectureNotFound { cputype: 0x0100000C }.exit_code(), 5);
        assert_eq!(Error::LoadCommandOverflow { offset: 0x20 }.exit_code(), 6);
        assert_eq!(
            Error::InsufficientLoadCommandSpace {
                needed: 32,
                available: 0
            }
            .exit_code(),
            7
        );
    }

    #[test]
    fn test_structural_classification() {
        assert!(Error::InvalidMachoMagic(0xdeadbeef).is_structural());
        assert!(Error::buffer_too_small(32, 4).is_structural());
        assert!(!Error::ArchitectureNotFound { cputype: 7 }.is_structural());
        assert!(!Error::EncryptedImage { cryptid: 1 }.is_structural());
        assert!(!Error::InvalidPlatform("beos".into()).is_structural());
        assert_eq!(Error::InvalidVersion("x.y".into()).exit_code(), 1);
    }

    #[test]
    fn test_architecture_message() {
        let err = Error::ArchitectureNotFound {
            cputype: 0x0100000C,
        };
        assert_eq!(
            err.to_string(),
            "architecture 0x100000c not found in fat binary"
        );
    }
}
