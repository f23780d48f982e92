//! Variable-length data page view (spec §4.6): a slot-offset table growing
//! up from the header, payloads packed from the end of the page growing
//! down. Addressed by `SlotId`; a `VariableColumnFile`'s directory pages
//! (`storage::page::directory`) hold the `(PageId, SlotId)` → `TupleId`
//! mapping, so this view never reuses or shrinks a slot — an update simply
//! inserts a new slot and the directory entry is repointed.
//!
//! `tag(4) + slot_count(4) + free_start(4) + free_end(4)`.

use super::view::{self, TAG_VARIABLE_DATA};
use super::Page;
use crate::common::{Error, Result, SlotId};

pub const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 8;

const SLOT_COUNT_OFFSET: usize = 4;
const FREE_START_OFFSET: usize = 8;
const FREE_END_OFFSET: usize = 12;

pub fn init(page: &mut Page) -> Result<()> {
    view::write_tag(page, TAG_VARIABLE_DATA)?;
    let size = page.size() as u32;
    page.set_u32(SLOT_COUNT_OFFSET, 0)?;
    page.set_u32(FREE_START_OFFSET, HEADER_SIZE as u32)?;
    page.set_u32(FREE_END_OFFSET, size)?;
    Ok(())
}

pub fn open(page: &mut Page) -> Result<()> {
    view::expect_tag(page, TAG_VARIABLE_DATA)?;
    if view::read_tag(page)? == view::TAG_UNINITIALISED {
        init(page)?;
    }
    Ok(())
}

pub fn slot_count(page: &Page) -> Result<u32> {
    page.get_u32(SLOT_COUNT_OFFSET)
}

fn free_start(page: &Page) -> Result<u32> {
    page.get_u32(FREE_START_OFFSET)
}

fn free_end(page: &Page) -> Result<u32> {
    page.get_u32(FREE_END_OFFSET)
}

/// Bytes available for a new `(slot entry, payload)` pair.
pub fn free_space(page: &Page) -> Result<usize> {
    Ok((free_end(page)? - free_start(page)?) as usize)
}

fn slot_offset(index: usize) -> usize {
    HEADER_SIZE + index * ENTRY_SIZE
}

/// Insert `bytes` as a new slot, returning its `SlotId`. Fails with
/// [`Error::PageFull`] rather than attempting compaction; the caller
/// allocates a fresh page and retries there.
pub fn insert(page: &mut Page, bytes: &[u8]) -> Result<SlotId> {
    let needed = ENTRY_SIZE + bytes.len();
    let available = free_space(page)?;
    if available < needed {
        return Err(Error::PageFull {
            payload_len: bytes.len(),
            free_space: available,
        });
    }

    let count = slot_count(page)?;
    let new_free_end = free_end(page)? - bytes.len() as u32;
    page.put_bytes(new_free_end as usize, bytes)?;

    let entry_off = slot_offset(count as usize);
    page.set_u32(entry_off, new_free_end)?;
    page.set_u32(entry_off + 4, bytes.len() as u32)?;

    page.set_u32(SLOT_COUNT_OFFSET, count + 1)?;
    page.set_u32(FREE_START_OFFSET, (entry_off + ENTRY_SIZE) as u32)?;
    page.set_u32(FREE_END_OFFSET, new_free_end)?;

    Ok(SlotId::new(count as u16))
}

/// Read back the payload stored at `slot_id`.
pub fn get(page: &Page, slot_id: SlotId) -> Result<&[u8]> {
    let index = slot_id.0 as usize;
    if index as u32 >= slot_count(page)? {
        return Err(Error::DataCorruption(format!(
            "slot {} out of range for variable data page",
            slot_id.0
        )));
    }
    let entry_off = slot_offset(index);
    let offset = page.get_u32(entry_off)?;
    let length = page.get_u32(entry_off + 4)?;
    page.get_bytes(offset as usize, length as usize)
}
