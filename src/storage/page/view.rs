//! Page-type tags and the typed-view contract (spec §4.1).
//!
//! The first 4 bytes of every page are a little-endian `u32` tag
//! identifying how the rest of the page is laid out. Initialising a view
//! writes the tag; wrapping an existing page validates it and fails
//! `CorruptPage` on mismatch.

use super::Page;
use crate::common::{Error, Result};

/// Offset of the page-type tag, shared by every typed view.
pub const TAG_OFFSET: usize = 0;

pub const TAG_UNINITIALISED: u32 = 0;
pub const TAG_SLOTTED: u32 = 128;
pub const TAG_DIRECTORY: u32 = 129;
pub const TAG_VARIABLE_DATA: u32 = 130;
pub const TAG_FIXED_COLUMN_HEADER: u32 = 512;
pub const TAG_VARIABLE_COLUMN_HEADER: u32 = 513;

/// Read the raw page-type tag without validating it.
pub fn read_tag(page: &Page) -> Result<u32> {
    page.get_u32(TAG_OFFSET)
}

/// Write a page-type tag, initialising a fresh view.
pub fn write_tag(page: &mut Page, tag: u32) -> Result<()> {
    page.set_u32(TAG_OFFSET, tag)
}

/// Validate that `page` carries the `expected` tag.
///
/// `TAG_UNINITIALISED` pages are accepted as a not-yet-tagged page
/// being bound for the first time; the caller is expected to
/// immediately call [`write_tag`] in that case.
pub fn expect_tag(page: &Page, expected: u32) -> Result<()> {
    let found = read_tag(page)?;
    if found == expected || found == TAG_UNINITIALISED {
        Ok(())
    } else {
        Err(Error::CorruptPage { expected, found })
    }
}
