//! Load command rewriting.
//!
//! Removes the commands that pin an image to physical devices, makes the image
//! declare the target platform through a single `LC_BUILD_VERSION` command, and
//! compacts the command list in place.
//!
//! The rewrite runs in two passes. The first walks and validates every command
//! and decides what happens to each one, so a malformed list or a lack of space is
//! reported before a single byte changes. The second pass moves surviving commands
//! down with a write cursor that never overtakes the read position.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::macho::{
    load_command_name, MachOImage, RawLoadCommand, LC_BUILD_VERSION, LC_ENCRYPTION_INFO,
    LC_ENCRYPTION_INFO_64, LC_VERSION_MIN_IPHONEOS,
};

use super::PlatformTarget;

/// Load commands that are dropped from every rewritten image.
pub const DISALLOWED_COMMANDS: &[u32] = &[
    LC_ENCRYPTION_INFO,
    LC_ENCRYPTION_INFO_64,
    LC_VERSION_MIN_IPHONEOS,
];

// =============================================================================
// Report
// =============================================================================

/// A load command dropped by the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedCommand {
    /// Kind of load command
    pub cmd: u32,
    /// Size of the dropped command
    pub cmdsize: u32,
    /// Offset of the command before compaction
    pub offset: usize,
}

impl RemovedCommand {
    /// Returns the `LC_*` name of the removed command.
    pub fn name(&self) -> &'static str {
        load_command_name(self.cmd)
    }
}

/// How the build version command was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformAction {
    /// An existing build version command was overwritten.
    Patched {
        /// Offset of the original command
        original_offset: usize,
        /// Offset of the canonical command after compaction
        offset: usize,
    },
    /// A build version command was appended after the last surviving command.
    Inserted {
        /// Offset of the new command
        offset: usize,
    },
}

impl PlatformAction {
    /// Final offset of the build version command.
    pub fn offset(&self) -> usize {
        match *self {
            PlatformAction::Patched { offset, .. } | PlatformAction::Inserted { offset } => offset,
        }
    }
}

/// Summary of a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    /// Commands removed, in their original order
    pub removed: Vec<RemovedCommand>,
    /// How the build version command was produced
    pub platform: PlatformAction,
    /// `ncmds` before rewriting
    pub ncmds_before: u32,
    /// `ncmds` after rewriting
    pub ncmds_after: u32,
    /// `sizeofcmds` before rewriting
    pub sizeofcmds_before: u32,
    /// `sizeofcmds` after rewriting
    pub sizeofcmds_after: u32,
}

impl RewriteReport {
    /// Returns true if commands were removed, inserted or resized.
    pub fn layout_changed(&self) -> bool {
        self.ncmds_before != self.ncmds_after || self.sizeofcmds_before != self.sizeofcmds_after
    }
}

// =============================================================================
// Planning
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Keep,
    Remove,
    Patch,
}

#[derive(Debug)]
struct Plan {
    steps: Vec<(RawLoadCommand, Action)>,
    /// Bytes freed by removed commands and oversized build version commands
    reclaimed: usize,
    removed_count: u32,
    insert: bool,
}

fn plan_rewrite(commands: &[RawLoadCommand]) -> Plan {
    let canonical = PlatformTarget::COMMAND_SIZE;

    let mut steps = Vec::with_capacity(commands.len());
    let mut reclaimed = 0usize;
    let mut removed_count = 0u32;
    let mut patched = false;

    for lc in commands {
        let size = lc.cmdsize as usize;
        let action = if DISALLOWED_COMMANDS.contains(&lc.cmd) {
            Action::Remove
        } else if lc.cmd == LC_BUILD_VERSION {
            // Only the first build version that can hold the canonical command is
            // patched; short ones and duplicates are dropped.
            if !patched && size >= canonical {
                patched = true;
                Action::Patch
            } else {
                Action::Remove
            }
        } else {
            Action::Keep
        };

        match action {
            Action::Remove => {
                reclaimed += size;
                removed_count += 1;
            }
            Action::Patch => reclaimed += size - canonical,
            Action::Keep => {}
        }

        steps.push((*lc, action));
    }

    Plan {
        steps,
        reclaimed,
        removed_count,
        insert: !patched,
    }
}

// =============================================================================
// Rewriting
// =============================================================================

/// Rewrites the load commands of a single-architecture image in place.
///
/// `image` must start with a Mach-O header. On success the header's `ncmds` and
/// `sizeofcmds` describe the compacted list; bytes between the new and the old end
/// of the command region keep their previous contents. On error `image` is left
/// untouched.
pub fn rewrite_load_commands(image: &mut [u8], target: &PlatformTarget) -> Result<RewriteReport> {
    let parsed = MachOImage::parse(image)?;
    let mut header = parsed.header;
    let commands = parsed.validated_commands()?;

    let endian = header.endian;
    let canonical = PlatformTarget::COMMAND_SIZE;
    let plan = plan_rewrite(&commands);

    if plan.insert && plan.reclaimed < canonical {
        return Err(Error::InsufficientLoadCommandSpace {
            needed: canonical,
            available: plan.reclaimed,
        });
    }

    debug!(
        "{} load commands ({:#x} bytes), {:?} endian, reclaiming {:#x} bytes",
        header.raw.ncmds, header.raw.sizeofcmds, endian, plan.reclaimed
    );

    let mut removed = Vec::with_capacity(plan.removed_count as usize);
    let mut platform = None;
    let mut cursor = header.size();

    for (lc, action) in &plan.steps {
        match action {
            Action::Remove => {
                info!(
                    "remove load command {} ({:#x}) at offset {:#x}",
                    lc.name(),
                    lc.cmd,
                    lc.offset
                );
                removed.push(RemovedCommand {
                    cmd: lc.cmd,
                    cmdsize: lc.cmdsize,
                    offset: lc.offset,
                });
            }
            Action::Keep => {
                if cursor != lc.offset {
                    image.copy_within(lc.range(), cursor);
                }
                cursor += lc.cmdsize as usize;
            }
            Action::Patch => {
                target.write_command(image, cursor, endian)?;
                info!(
                    "patch build version command at offset {:#x} (now {:#x})",
                    lc.offset, cursor
                );
                platform = Some(PlatformAction::Patched {
                    original_offset: lc.offset,
                    offset: cursor,
                });
                cursor += canonical;
            }
        }
    }

    let platform = match platform {
        Some(action) => action,
        None => {
            target.write_command(image, cursor, endian)?;
            info!("insert build version command at offset {:#x}", cursor);
            let action = PlatformAction::Inserted { offset: cursor };
            cursor += canonical;
            action
        }
    };

    let ncmds_before = header.raw.ncmds;
    let sizeofcmds_before = header.raw.sizeofcmds;
    let sizeofcmds_after = (cursor - header.size()) as u32;
    let ncmds_after = ncmds_before - plan.removed_count + u32::from(plan.insert);
    debug_assert_eq!(
        sizeofcmds_after as usize,
        sizeofcmds_before as usize - plan.reclaimed + if plan.insert { canonical } else { 0 }
    );

    header.raw.ncmds = ncmds_after;
    header.raw.sizeofcmds = sizeofcmds_after;
    header.write(image)?;

    Ok(RewriteReport {
        removed,
        platform,
        ncmds_before,
        ncmds_after,
        sizeofcmds_before,
        sizeofcmds_after,
    })
}
