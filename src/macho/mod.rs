//! Mach-O file format handling.
//!
//! This module provides types and utilities for parsing Mach-O images and fat
//! containers in either byte order, which are the executable formats used on macOS
//! and iOS.

mod constants;
mod context;
mod fat;
mod structs;
mod version;

pub use constants::*;
pub use context::*;
pub use fat::*;
pub use structs::*;
pub use version::*;
