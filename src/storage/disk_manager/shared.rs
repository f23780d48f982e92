//! Logic shared between the Direct and WAL disk manager flavors: file
//! bootstrap, the free-page stack page, and startup CRC verification
//! (spec §3, §4.2).

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::common::{Error, PageId, Result};
use crate::storage::page::{header, FileHeader};
use crate::storage::page::Page;

/// The free-page stack always lives at this fixed page id, right after
/// the file header.
pub const FREE_STACK_PAGE_ID: PageId = PageId(1);

/// First page id available for column data.
pub const FIRST_DATA_PAGE_ID: PageId = PageId(2);

pub fn free_stack_capacity(page_size: usize) -> usize {
    (page_size - 4) / 8
}

pub fn read_free_stack(page: &Page) -> Result<Vec<PageId>> {
    let count = page.get_u32(0)? as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(PageId::new(page.get_u64(4 + i * 8)?));
    }
    Ok(out)
}

pub fn write_free_stack(page: &mut Page, stack: &[PageId]) -> Result<()> {
    page.set_u32(0, stack.len() as u32)?;
    for (i, id) in stack.iter().enumerate() {
        page.set_u64(4 + i * 8, id.0)?;
    }
    Ok(())
}

/// Read one page at `page_id` directly from `file`, bypassing any
/// buffering layer above the DiskManager.
pub fn read_page_at(file: &File, page_id: PageId, page_size: usize, page: &mut Page) -> Result<()> {
    file.read_exact_at(page.as_mut_slice(), page_id.0 * page_size as u64)?;
    Ok(())
}

pub fn write_page_at(file: &File, page_id: PageId, page: &Page) -> Result<()> {
    file.write_all_at(page.as_slice(), page_id.0 * page.size() as u64)?;
    Ok(())
}

/// Extend `file` by `count` zeroed pages starting right after
/// `current_max_page_id`, in one batched write.
pub fn preallocate(file: &File, current_max_page_id: PageId, page_size: usize, count: u32) -> Result<()> {
    let zero_page = Page::new(page_size);
    for i in 1..=count {
        write_page_at(file, PageId::new(current_max_page_id.0 + i as u64), &zero_page)?;
    }
    Ok(())
}

/// Recompute the checksum over every page from [`FIRST_DATA_PAGE_ID`] up
/// to `max_page_id`, inclusive.
pub fn recompute_crc(file: &File, page_size: usize, max_page_id: PageId) -> Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut page = Page::new(page_size);
    let mut id = FREE_STACK_PAGE_ID.0;
    while id <= max_page_id.0 {
        read_page_at(file, PageId::new(id), page_size, &mut page)?;
        hasher.update(page.as_slice());
        id += 1;
    }
    Ok(hasher.finalize())
}

/// Bootstrap a brand-new file: header page, free-page stack page, both
/// zeroed/initialised, extended to two pages total.
pub fn initialise_new_file(
    file: &File,
    kind: header::FileKind,
    page_shift: u32,
) -> Result<FileHeader> {
    let page_size = crate::common::config::page_size_for_shift(page_shift);
    let mut header_page = Page::new(page_size);
    let mut header = FileHeader::new(kind, page_shift);
    header.max_page_id = FREE_STACK_PAGE_ID;
    header.allocated = 2; // header page + free-stack page
    header.write_to(&mut header_page)?;
    write_page_at(file, PageId::HEADER, &header_page)?;

    let mut stack_page = Page::new(page_size);
    write_free_stack(&mut stack_page, &[])?;
    write_page_at(file, FREE_STACK_PAGE_ID, &stack_page)?;

    Ok(header)
}

/// Startup recovery: read the header, and if it was not properly closed,
/// recompute the CRC over data pages and compare against the stored one.
pub fn read_and_verify_header(file: &File, page_size: usize) -> Result<FileHeader> {
    let mut header_page = Page::new(page_size);
    read_page_at(file, PageId::HEADER, page_size, &mut header_page)?;
    let header = FileHeader::read_from(&header_page)?;

    if !header.properly_closed {
        let recomputed = recompute_crc(file, page_size, header.max_page_id)?;
        if recomputed != header.crc32 {
            return Err(Error::DataCorruption(format!(
                "CRC mismatch on recovery: stored {:#x}, recomputed {:#x}",
                header.crc32, recomputed
            )));
        }
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn test_free_stack_roundtrip() {
        let mut page = Page::new(256);
        let stack = vec![PageId::new(5), PageId::new(9), PageId::new(3)];
        write_free_stack(&mut page, &stack).unwrap();
        assert_eq!(read_free_stack(&page).unwrap(), stack);
    }

    #[test]
    fn test_initialise_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hare");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let mut header = initialise_new_file(&file, header::FileKind::Data, 12).unwrap();
        header.properly_closed = true;
        header.dirty = false;
        let mut header_page = Page::new(4096);
        header.write_to(&mut header_page).unwrap();
        write_page_at(&file, PageId::HEADER, &header_page).unwrap();

        let read_back = read_and_verify_header(&file, 4096).unwrap();
        assert_eq!(read_back.max_page_id, FREE_STACK_PAGE_ID);
    }

    #[test]
    fn test_recovery_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hare");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let mut header = initialise_new_file(&file, header::FileKind::Data, 12).unwrap();
        header.crc32 = 0x1234; // wrong on purpose; properly_closed stays false
        let mut header_page = Page::new(4096);
        header.write_to(&mut header_page).unwrap();
        write_page_at(&file, PageId::HEADER, &header_page).unwrap();

        assert!(read_and_verify_header(&file, 4096).is_err());
    }
}
