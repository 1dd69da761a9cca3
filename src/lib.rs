//! machsim - Rewrites the platform metadata of Mach-O images.
//!
//! This library makes an iOS device build of a Mach-O image declare another
//! Apple platform, by default Mac Catalyst, so it can be loaded on an Apple silicon
//! Mac or in a simulator after re-signing. The image is edited in place: commands
//! that tie it to physical devices are removed and a single `LC_BUILD_VERSION`
//! command describing the target platform is patched in or appended.
//!
//! # Features
//!
//! - Memory-mapped, in-place rewriting
//! - Fat containers with 32-bit and 64-bit descriptors
//! - Images in either byte order
//! - No partial writes: every check runs before the first mutation
//!
//! # Example
//!
//! ```no_run
//! use machsim::{convert_file, ConvertOptions};
//!
//! fn main() -> machsim::Result<()> {
//!     let report = convert_file("Payload/App.app/App", &ConvertOptions::default())?;
//!     println!("removed {} load commands", report.rewrite.removed.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle;
pub mod converter;
pub mod error;
pub mod macho;
pub mod util;

#[cfg(test)]
mod testutil;

// Re-export main types
pub use bundle::{find_macho_files, is_macho_candidate};
pub use converter::{rewrite_load_commands, PlatformAction, PlatformTarget, RewriteReport};
pub use error::{Error, Result};
pub use macho::{locate_slice, MachOImage, SliceRange};

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use tracing::{debug, warn};

use macho::{arch_name, CPU_TYPE_ARM64};

/// Options for converting an image.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// CPU type of the slice to rewrite in fat containers
    pub arch: u32,
    /// Platform the image should declare
    pub target: PlatformTarget,
    /// Map the file copy-on-write so nothing is written back
    pub dry_run: bool,
    /// Rewrite images whose text is still encrypted
    pub allow_encrypted: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            arch: CPU_TYPE_ARM64,
            target: PlatformTarget::default(),
            dry_run: false,
            allow_encrypted: false,
        }
    }
}

/// Result of converting a single image.
#[derive(Debug, Clone)]
pub struct ConvertReport {
    /// File that was converted, if any
    pub path: Option<PathBuf>,
    /// Location of the rewritten image within the file
    pub slice: SliceRange,
    /// CPU type of the rewritten image
    pub cputype: u32,
    /// True if the changes were discarded
    pub dry_run: bool,
    /// What the rewriter did
    pub rewrite: RewriteReport,
}

/// Converts the image for `options.arch` inside an in-memory buffer.
///
/// `data` may hold a thin image or a fat container; only the selected slice is
/// modified. On error `data` is left untouched.
pub fn convert_buffer(data: &mut [u8], options: &ConvertOptions) -> Result<ConvertReport> {
    let slice = locate_slice(data, options.arch)?;
    let image = &mut data[slice.range()];

    let parsed = MachOImage::parse(image)?;
    let cputype = parsed.header.raw.cputype;
    if cputype != options.arch {
        warn!(
            "image is {}, not {}",
            arch_name(cputype),
            arch_name(options.arch)
        );
    }

    if let Some(info) = parsed.encryption_info()? {
        if info.is_encrypted() {
            if !options.allow_encrypted {
                return Err(Error::EncryptedImage {
                    cryptid: info.cryptid,
                });
            }
            warn!(
                "image is encrypted (cryptid {}), the result will not run",
                info.cryptid
            );
        }
    }

    debug!(
        "Rewriting {} slice at {:#x} ({:#x} bytes) for {}",
        arch_name(cputype),
        slice.offset,
        slice.size,
        options.target
    );

    let rewrite = rewrite_load_commands(image, &options.target)?;

    Ok(ConvertReport {
        path: None,
        slice,
        cputype,
        dry_run: options.dry_run,
        rewrite,
    })
}

/// Converts a file in place through a memory mapping.
///
/// With `options.dry_run` the file is mapped copy-on-write and never modified.
pub fn convert_file<P: AsRef<Path>>(path: P, options: &ConvertOptions) -> Result<ConvertReport> {
    let path = path.as_ref();

    let file = open_for_rewrite(path, options.dry_run)?;

    let len = file
        .metadata()
        .map_err(|e| Error::FileMetadata {
            path: path.to_path_buf(),
            source: e,
        })?
        .len();
    if len < 4 {
        return Err(Error::buffer_too_small(4, len as usize));
    }

    let mut mmap = if options.dry_run {
        unsafe { MmapOptions::new().map_copy(&file) }
    } else {
        unsafe { MmapOptions::new().map_mut(&file) }
    }
    .map_err(|e| Error::MemoryMap {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut report = convert_buffer(&mut mmap, options)?;

    if !options.dry_run {
        mmap.flush().map_err(|e| Error::FileFlush {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    report.path = Some(path.to_path_buf());
    Ok(report)
}

fn open_for_rewrite(path: &Path, read_only: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(!read_only)
        .open(path)
        .map_err(|e| Error::FileOpen {
            path: path.to_path_buf(),
            source: e,
        })
}
