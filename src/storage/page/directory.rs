//! Directory page view: a doubly linked list node mapping TupleId ranges
//! to `(flags, Address)` entries for variable-length columns (spec §3, §6).

use super::view::{self, TAG_DIRECTORY};
use super::Page;
use crate::common::{Address, Error, PageId, Result, TupleId};

/// `tag(4) + previous(8) + next(8) + first_tuple_id(8) + last_tuple_id(8)
/// + entry_count(4)`.
pub const HEADER_SIZE: usize = 40;
/// `flags(1) + address(8)`.
pub const ENTRY_SIZE: usize = 9;

const PREVIOUS_OFFSET: usize = 4;
const NEXT_OFFSET: usize = 12;
const FIRST_TUPLE_ID_OFFSET: usize = 20;
const LAST_TUPLE_ID_OFFSET: usize = 28;
const ENTRY_COUNT_OFFSET: usize = 36;

pub const FLAG_NULL: u8 = 0b0000_0001;
pub const FLAG_DELETED: u8 = 0b0000_0010;

pub fn init(page: &mut Page, first_tuple_id: TupleId) -> Result<()> {
    view::write_tag(page, TAG_DIRECTORY)?;
    set_previous_page_id(page, PageId::INVALID)?;
    set_next_page_id(page, PageId::INVALID)?;
    set_first_tuple_id(page, first_tuple_id)?;
    // empty page: last < first signals "no entries yet"; we use
    // first_tuple_id - 1 is unsafe at zero, so track via entry_count instead.
    set_last_tuple_id(page, first_tuple_id)?;
    set_entry_count(page, 0)?;
    Ok(())
}

pub fn open(page: &mut Page) -> Result<()> {
    view::expect_tag(page, TAG_DIRECTORY)?;
    if view::read_tag(page)? == view::TAG_UNINITIALISED {
        return Err(Error::DataCorruption(
            "directory page opened before initialisation".to_string(),
        ));
    }
    Ok(())
}

pub fn previous_page_id(page: &Page) -> Result<PageId> {
    Ok(PageId::new(page.get_u64(PREVIOUS_OFFSET)?))
}

pub fn set_previous_page_id(page: &mut Page, id: PageId) -> Result<()> {
    page.set_u64(PREVIOUS_OFFSET, id.0)
}

pub fn next_page_id(page: &Page) -> Result<PageId> {
    Ok(PageId::new(page.get_u64(NEXT_OFFSET)?))
}

pub fn set_next_page_id(page: &mut Page, id: PageId) -> Result<()> {
    page.set_u64(NEXT_OFFSET, id.0)
}

pub fn first_tuple_id(page: &Page) -> Result<TupleId> {
    Ok(TupleId::new(page.get_u64(FIRST_TUPLE_ID_OFFSET)?))
}

pub fn set_first_tuple_id(page: &mut Page, id: TupleId) -> Result<()> {
    page.set_u64(FIRST_TUPLE_ID_OFFSET, id.0)
}

pub fn last_tuple_id(page: &Page) -> Result<TupleId> {
    Ok(TupleId::new(page.get_u64(LAST_TUPLE_ID_OFFSET)?))
}

pub fn set_last_tuple_id(page: &mut Page, id: TupleId) -> Result<()> {
    page.set_u64(LAST_TUPLE_ID_OFFSET, id.0)
}

pub fn entry_count(page: &Page) -> Result<u32> {
    page.get_u32(ENTRY_COUNT_OFFSET)
}

pub fn set_entry_count(page: &mut Page, count: u32) -> Result<()> {
    page.set_u32(ENTRY_COUNT_OFFSET, count)
}

/// Maximum number of `(flags, address)` entries this page size can hold.
pub fn capacity(page_size: usize) -> usize {
    (page_size - HEADER_SIZE) / ENTRY_SIZE
}

fn entry_offset(index: usize) -> usize {
    HEADER_SIZE + index * ENTRY_SIZE
}

pub fn get_entry(page: &Page, index: usize) -> Result<(u8, Address)> {
    let off = entry_offset(index);
    let flags = page.get_u8(off)?;
    let raw = page.get_u64(off + 1)?;
    Ok((flags, Address::from_u64(raw)))
}

pub fn set_entry(page: &mut Page, index: usize, flags: u8, address: Address) -> Result<()> {
    let off = entry_offset(index);
    page.set_u8(off, flags)?;
    page.set_u64(off + 1, address.as_u64())
}

/// Append an entry at the next free slot, growing `entry_count` and
/// `last_tuple_id`. Returns the `TupleId` assigned to the new entry.
pub fn push_entry(page: &mut Page, flags: u8, address: Address) -> Result<TupleId> {
    let count = entry_count(page)?;
    set_entry(page, count as usize, flags, address)?;
    let assigned = if count == 0 {
        first_tuple_id(page)?
    } else {
        TupleId::new(last_tuple_id(page)?.0 + 1)
    };
    set_last_tuple_id(page, assigned)?;
    set_entry_count(page, count + 1)?;
    Ok(assigned)
}

/// Whether `tuple_id` falls within this directory page's range.
pub fn contains(page: &Page, tuple_id: TupleId) -> Result<bool> {
    let count = entry_count(page)?;
    if count == 0 {
        return Ok(false);
    }
    let first = first_tuple_id(page)?;
    let last = last_tuple_id(page)?;
    Ok(tuple_id.0 >= first.0 && tuple_id.0 <= last.0)
}

pub fn is_null(flags: u8) -> bool {
    flags & FLAG_NULL != 0
}

pub fn is_deleted(flags: u8) -> bool {
    flags & FLAG_DELETED != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_defaults() {
        let mut page = Page::new(4096);
        init(&mut page, TupleId::new(0)).unwrap();
        assert_eq!(previous_page_id(&page).unwrap(), PageId::INVALID);
        assert_eq!(next_page_id(&page).unwrap(), PageId::INVALID);
        assert_eq!(entry_count(&page).unwrap(), 0);
        assert!(!contains(&page, TupleId::new(0)).unwrap());
    }

    #[test]
    fn test_push_entry_assigns_consecutive_tuple_ids() {
        let mut page = Page::new(4096);
        init(&mut page, TupleId::new(100)).unwrap();

        let t0 = push_entry(&mut page, 0, Address::new(PageId::new(1), crate::common::SlotId::new(0))).unwrap();
        let t1 = push_entry(&mut page, 0, Address::new(PageId::new(1), crate::common::SlotId::new(1))).unwrap();

        assert_eq!(t0, TupleId::new(100));
        assert_eq!(t1, TupleId::new(101));
        assert_eq!(entry_count(&page).unwrap(), 2);
        assert!(contains(&page, TupleId::new(100)).unwrap());
        assert!(contains(&page, TupleId::new(101)).unwrap());
        assert!(!contains(&page, TupleId::new(102)).unwrap());
    }

    #[test]
    fn test_entry_roundtrip() {
        let mut page = Page::new(4096);
        init(&mut page, TupleId::new(0)).unwrap();
        let addr = Address::new(PageId::new(7), crate::common::SlotId::new(3));
        set_entry(&mut page, 0, FLAG_NULL, addr).unwrap();
        let (flags, got) = get_entry(&page, 0).unwrap();
        assert!(is_null(flags));
        assert_eq!(got, addr);
    }

    #[test]
    fn test_capacity() {
        assert_eq!(capacity(4096), (4096 - HEADER_SIZE) / ENTRY_SIZE);
    }

    #[test]
    fn test_linked_list_pointers() {
        let mut page = Page::new(4096);
        init(&mut page, TupleId::new(0)).unwrap();
        set_next_page_id(&mut page, PageId::new(5)).unwrap();
        set_previous_page_id(&mut page, PageId::new(3)).unwrap();
        assert_eq!(next_page_id(&page).unwrap(), PageId::new(5));
        assert_eq!(previous_page_id(&page).unwrap(), PageId::new(3));
    }
}
