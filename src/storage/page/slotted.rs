//! Slotted page view: an array of fixed-size records, each preceded by a
//! 1-byte flags field (spec §3, §4.5, §6).
//!
//! Used directly by fixed column data pages, where `entryWidth` is a
//! column-level constant and the slot for a given `TupleId` is computed
//! arithmetically rather than looked up.

use super::view::{self, TAG_SLOTTED};
use super::Page;
use crate::common::{Error, Result};

/// `tag(4) + free-space pointer(4, unused by fixed-width callers) +
/// slot count(4)`.
pub const HEADER_SIZE: usize = 12;

const FREE_SPACE_OFFSET: usize = 4;
const SLOT_COUNT_OFFSET: usize = 8;

pub const FLAG_NULL: u8 = 0b0000_0001;
pub const FLAG_DELETED: u8 = 0b0000_0010;

/// Initialise a fresh page as a slotted page.
pub fn init(page: &mut Page) -> Result<()> {
    view::write_tag(page, TAG_SLOTTED)?;
    page.set_u32(FREE_SPACE_OFFSET, HEADER_SIZE as u32)?;
    page.set_u32(SLOT_COUNT_OFFSET, 0)?;
    Ok(())
}

/// Validate (and lazily initialise) an existing page as a slotted page.
pub fn open(page: &mut Page) -> Result<()> {
    view::expect_tag(page, TAG_SLOTTED)?;
    if view::read_tag(page)? == view::TAG_UNINITIALISED {
        init(page)?;
    }
    Ok(())
}

/// Number of `(flags, entry)` slots that fit on a page of this size.
pub fn slots_per_page(page_size: usize, entry_width: usize) -> usize {
    (page_size - HEADER_SIZE) / (entry_width + 1)
}

fn slot_offset(slot: usize, entry_width: usize) -> usize {
    HEADER_SIZE + slot * (entry_width + 1)
}

pub fn get_flags(page: &Page, slot: usize, entry_width: usize) -> Result<u8> {
    page.get_u8(slot_offset(slot, entry_width))
}

pub fn set_flags(page: &mut Page, slot: usize, entry_width: usize, flags: u8) -> Result<()> {
    page.set_u8(slot_offset(slot, entry_width), flags)
}

pub fn get_entry_bytes<'a>(page: &'a Page, slot: usize, entry_width: usize) -> Result<&'a [u8]> {
    page.get_bytes(slot_offset(slot, entry_width) + 1, entry_width)
}

pub fn set_entry_bytes(
    page: &mut Page,
    slot: usize,
    entry_width: usize,
    bytes: &[u8],
) -> Result<()> {
    if bytes.len() != entry_width {
        return Err(Error::DataCorruption(format!(
            "entry width mismatch: expected {}, got {}",
            entry_width,
            bytes.len()
        )));
    }
    page.put_bytes(slot_offset(slot, entry_width) + 1, bytes)
}

pub fn is_null(flags: u8) -> bool {
    flags & FLAG_NULL != 0
}

pub fn is_deleted(flags: u8) -> bool {
    flags & FLAG_DELETED != 0
}

pub fn get_slot_count(page: &Page) -> Result<u32> {
    page.get_u32(SLOT_COUNT_OFFSET)
}

pub fn set_slot_count(page: &mut Page, count: u32) -> Result<()> {
    page.set_u32(SLOT_COUNT_OFFSET, count)
}
