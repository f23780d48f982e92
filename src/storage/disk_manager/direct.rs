//! Direct DiskManager: every write reaches the file immediately;
//! `commit`/`rollback` are no-ops (spec §4.2).
//!
//! Fastest of the two flavors, but a crash mid-write can corrupt the
//! file; recovery at open time relies solely on the CRC stored in the
//! header. The spec treats the no-op commit/rollback as intentional
//! (see DESIGN.md) rather than a placeholder: Direct offers no atomicity
//! by design, only WAL does.

use std::fs::{File, OpenOptions as FsOpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use super::{lock, shared, DiskManager};
use crate::common::config::{self, OpenOptions};
use crate::common::{Error, PageId, Result};
use crate::storage::page::header::FileKind;
use crate::storage::page::{FileHeader, Page};

struct State {
    header: FileHeader,
    free_stack: Vec<PageId>,
    /// Highest page id physically present in the file (may run ahead of
    /// `header.max_page_id` due to batched preallocation).
    physical_max_page_id: PageId,
}

pub struct DirectDiskManager {
    path: PathBuf,
    file: File,
    page_size: usize,
    preallocate_pages: u32,
    close_lock: RwLock<()>,
    state: Mutex<State>,
    closed: AtomicBool,
}

impl DirectDiskManager {
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = FsOpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        lock::acquire_exclusive(&file, &path.to_string_lossy(), options.lock_timeout)?;

        let mut header = if existed && file.metadata()?.len() > 0 {
            let page_size = {
                // Peek the page shift from the header before we know the
                // full page size: the shift lives in the first 20 bytes.
                let mut probe = Page::new(config::page_size_for_shift(config::MIN_PAGE_SHIFT));
                shared::read_page_at(&file, PageId::HEADER, probe.size(), &mut probe)?;
                let shift = probe.get_u32(16)?;
                config::page_size_for_shift(shift)
            };
            shared::read_and_verify_header(&file, page_size)?
        } else {
            shared::initialise_new_file(&file, FileKind::Data, options.page_shift)?
        };

        let page_size = config::page_size_for_shift(header.page_shift);
        header.dirty = true;
        header.properly_closed = false;
        let mut header_page = Page::new(page_size);
        header.write_to(&mut header_page)?;
        shared::write_page_at(&file, PageId::HEADER, &header_page)?;

        let mut stack_page = Page::new(page_size);
        shared::read_page_at(&file, shared::FREE_STACK_PAGE_ID, page_size, &mut stack_page)?;
        let free_stack = shared::read_free_stack(&stack_page)?;

        let physical_max_page_id = PageId::new(file.metadata()?.len() / page_size as u64 - 1);

        Ok(Self {
            path,
            file,
            page_size,
            preallocate_pages: options.preallocate_pages,
            close_lock: RwLock::new(()),
            state: Mutex::new(State {
                header,
                free_stack,
                physical_max_page_id,
            }),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed(self.path.to_string_lossy().into_owned()));
        }
        Ok(())
    }

    fn persist_header(&self, state: &State) -> Result<()> {
        let mut page = Page::new(self.page_size);
        state.header.write_to(&mut page)?;
        shared::write_page_at(&self.file, PageId::HEADER, &page)
    }

    fn persist_free_stack(&self, state: &State) -> Result<()> {
        let mut page = Page::new(self.page_size);
        shared::write_free_stack(&mut page, &state.free_stack)?;
        shared::write_page_at(&self.file, shared::FREE_STACK_PAGE_ID, &page)
    }
}

impl DiskManager for DirectDiskManager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn max_page_id(&self) -> PageId {
        self.state.lock().header.max_page_id
    }

    fn read(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        let max = self.state.lock().header.max_page_id;
        if page_id.0 > max.0 {
            return Err(Error::PageOutOfRange(page_id.0));
        }
        shared::read_page_at(&self.file, page_id, self.page_size, page)
    }

    fn read_many(&self, start_page_id: PageId, pages: &mut [Page]) -> Result<()> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        let max = self.state.lock().header.max_page_id;
        for (i, page) in pages.iter_mut().enumerate() {
            let id = PageId::new(start_page_id.0 + i as u64);
            if id.0 > max.0 {
                return Err(Error::PageOutOfRange(id.0));
            }
            shared::read_page_at(&self.file, id, self.page_size, page)?;
        }
        Ok(())
    }

    fn update(&self, page_id: PageId, page: &Page) -> Result<()> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        let max = self.state.lock().header.max_page_id;
        if page_id.0 > max.0 {
            return Err(Error::PageOutOfRange(page_id.0));
        }
        shared::write_page_at(&self.file, page_id, page)
    }

    fn allocate(&self) -> Result<PageId> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        let mut state = self.state.lock();

        if let Some(id) = state.free_stack.pop() {
            self.persist_free_stack(&state)?;
            return Ok(id);
        }

        let new_id = state.header.max_page_id.next();
        if new_id.0 > state.physical_max_page_id.0 {
            shared::preallocate(
                &self.file,
                state.physical_max_page_id,
                self.page_size,
                self.preallocate_pages,
            )?;
            state.physical_max_page_id =
                PageId::new(state.physical_max_page_id.0 + self.preallocate_pages as u64);
        }
        state.header.max_page_id = new_id;
        state.header.allocated += 1;
        self.persist_header(&state)?;
        Ok(new_id)
    }

    fn free(&self, page_id: PageId) -> Result<()> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        let mut state = self.state.lock();

        if state.free_stack.len() < shared::free_stack_capacity(self.page_size) {
            state.free_stack.push(page_id);
            self.persist_free_stack(&state)
        } else {
            state.header.dangling += 1;
            self.persist_header(&state)
        }
    }

    fn commit(&self) -> Result<()> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let _guard = self.close_lock.read();
        self.ensure_open()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _guard = self.close_lock.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.lock();
        let crc = shared::recompute_crc(&self.file, self.page_size, state.header.max_page_id)?;
        state.header.crc32 = crc;
        state.header.dirty = false;
        state.header.properly_closed = true;
        self.persist_header(&state)?;
        self.file.sync_all()?;
        lock::release(&self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_with_header_and_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.hare");
        let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();
        assert_eq!(dm.page_size(), 4096);
        assert_eq!(dm.max_page_id(), shared::FREE_STACK_PAGE_ID);
    }

    #[test]
    fn test_allocate_appends_then_read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.hare");
        let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();

        let id = dm.allocate().unwrap();
        assert_eq!(id, PageId::new(2));

        let mut page = Page::new(4096);
        page.set_i32(0, 12345).unwrap();
        dm.update(id, &page).unwrap();

        let mut read_back = Page::new(4096);
        dm.read(id, &mut read_back).unwrap();
        assert_eq!(read_back.get_i32(0).unwrap(), 12345);
    }

    #[test]
    fn test_free_then_allocate_reuses_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.hare");
        let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();

        let id = dm.allocate().unwrap();
        dm.free(id).unwrap();
        let reused = dm.allocate().unwrap();
        assert_eq!(reused, id);
    }

    #[test]
    fn test_read_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.hare");
        let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();
        let mut page = Page::new(4096);
        assert!(matches!(
            dm.read(PageId::new(999), &mut page),
            Err(Error::PageOutOfRange(999))
        ));
    }

    #[test]
    fn test_close_then_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.hare");
        let id;
        {
            let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();
            id = dm.allocate().unwrap();
            let mut page = Page::new(4096);
            page.set_i32(0, 777).unwrap();
            dm.update(id, &page).unwrap();
            dm.close().unwrap();
        }
        {
            let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();
            let mut page = Page::new(4096);
            dm.read(id, &mut page).unwrap();
            assert_eq!(page.get_i32(0).unwrap(), 777);
        }
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.hare");
        let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();
        dm.close().unwrap();
        assert!(matches!(dm.allocate(), Err(Error::Closed(_))));
    }
}
