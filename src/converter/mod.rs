//! Platform conversion of Mach-O images.
//!
//! This module contains the rewriting logic that makes an iOS device image load
//! on another Apple platform, by default Mac Catalyst on Apple silicon.
//!
//! # Conversion Pipeline
//!
//! 1. **Slice Selection** - Finds the requested architecture in a fat container
//! 2. **Encryption Check** - Refuses images whose text is still encrypted
//! 3. **Load Command Rewriting** - Drops device-only commands, installs the
//!    target `LC_BUILD_VERSION` and compacts the command list in place
//!
//! Code signatures are not updated; a rewritten image must be re-signed before it
//! will load.

mod platform;
mod rewrite;

pub use platform::*;
pub use rewrite::*;
