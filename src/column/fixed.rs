//! Fixed-width column file (spec §4.5).
//!
//! Page layout: the column header lives at [`header::HEADER_PAGE_ID`];
//! data pages are slotted views (`storage::page::slotted`) starting at
//! [`header::FIRST_DATA_PAGE_ID`]. For a `TupleId` *t*, the owning page is
//! `FIRST_DATA_PAGE_ID + t / slotsPerPage` and the slot is `t % slotsPerPage` —
//! this mapping never changes for the file's lifetime and needs no
//! directory lookup.
//!
//! A single `RwLock<()>` column-level latch serializes readers against the
//! lone writer (spec §5): [`Reader`], [`Writer`] and [`Cursor`] each hold
//! the appropriate guard for their whole lifetime.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::BufferPoolManager;
use crate::column::header::{self, FixedColumnHeader};
use crate::column::logical_type::{serializer_for, LogicalType, Serializer, Value};
use crate::common::{Error, PageId, Result, TupleId};
use crate::storage::page::slotted;
use crate::storage::DiskManager;

/// A fixed-width column file: one value of a known physical size per
/// `TupleId`, with an optional null bit per slot.
pub struct FixedColumnFile<D: DiskManager> {
    pool: BufferPoolManager<D>,
    header: Mutex<FixedColumnHeader>,
    serializer: Box<dyn Serializer>,
    slots_per_page: usize,
    latch: RwLock<()>,
}

impl<D: DiskManager> FixedColumnFile<D> {
    /// Create a fresh fixed column file backed by a brand-new `disk_manager`.
    pub fn create(disk_manager: D, pool_size: usize, logical_type: LogicalType, nullable: bool) -> Result<Self> {
        let pool = BufferPoolManager::new(pool_size, disk_manager);
        let header = FixedColumnHeader::new(logical_type, nullable)?;

        {
            let mut guard = pool.append_page()?;
            debug_assert_eq!(guard.page_id(), header::HEADER_PAGE_ID);
            header.write_to(&mut guard)?;
        }

        let serializer = serializer_for(&header.logical_type)?;
        let slots_per_page = slotted::slots_per_page(pool.disk_manager().page_size(), header.physical_size);

        Ok(Self {
            pool,
            header: Mutex::new(header),
            serializer,
            slots_per_page,
            latch: RwLock::new(()),
        })
    }

    /// Reopen an existing fixed column file, reading its header back.
    pub fn open(disk_manager: D, pool_size: usize) -> Result<Self> {
        let pool = BufferPoolManager::new(pool_size, disk_manager);
        let header = {
            let guard = pool.fetch_page_read(header::HEADER_PAGE_ID)?;
            FixedColumnHeader::read_from(&guard)?
        };
        let serializer = serializer_for(&header.logical_type)?;
        let slots_per_page = slotted::slots_per_page(pool.disk_manager().page_size(), header.physical_size);

        Ok(Self {
            pool,
            header: Mutex::new(header),
            serializer,
            slots_per_page,
            latch: RwLock::new(()),
        })
    }

    fn locate(&self, tuple_id: TupleId) -> (PageId, usize) {
        let spp = self.slots_per_page as u64;
        let page_index = tuple_id.0 / spp;
        let slot = (tuple_id.0 % spp) as usize;
        (PageId::new(header::FIRST_DATA_PAGE_ID.0 + page_index), slot)
    }

    fn check_tuple_id(&self, tuple_id: TupleId) -> Result<()> {
        match self.header.lock().max_tuple_id {
            Some(max) if tuple_id.0 <= max.0 => Ok(()),
            _ => Err(Error::TupleIdOutOfRange(tuple_id.0)),
        }
    }

    fn flush_header(&self, header: &FixedColumnHeader) -> Result<()> {
        let mut guard = self.pool.fetch_page_write(header::HEADER_PAGE_ID)?;
        header.write_to(&mut guard)
    }

    // ------------------------------------------------------------------
    // Reader operations (spec §4.5)
    // ------------------------------------------------------------------

    pub fn count(&self) -> u64 {
        self.header.lock().count
    }

    pub fn max_tuple_id(&self) -> Option<TupleId> {
        self.header.lock().max_tuple_id
    }

    fn slot_flags(&self, tuple_id: TupleId) -> Result<u8> {
        self.check_tuple_id(tuple_id)?;
        let (page_id, slot) = self.locate(tuple_id);
        let physical_size = self.header.lock().physical_size;
        let guard = self.pool.fetch_page_read(page_id)?;
        slotted::get_flags(&guard, slot, physical_size)
    }

    pub fn is_null(&self, tuple_id: TupleId) -> Result<bool> {
        Ok(slotted::is_null(self.slot_flags(tuple_id)?))
    }

    pub fn is_deleted(&self, tuple_id: TupleId) -> Result<bool> {
        Ok(slotted::is_deleted(self.slot_flags(tuple_id)?))
    }

    pub fn get(&self, tuple_id: TupleId) -> Result<Option<Value>> {
        self.check_tuple_id(tuple_id)?;
        let (page_id, slot) = self.locate(tuple_id);
        let physical_size = self.header.lock().physical_size;
        let guard = self.pool.fetch_page_read(page_id)?;
        let flags = slotted::get_flags(&guard, slot, physical_size)?;
        if slotted::is_deleted(flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }
        if slotted::is_null(flags) {
            return Ok(None);
        }
        let bytes = slotted::get_entry_bytes(&guard, slot, physical_size)?;
        Ok(Some(self.serializer.decode(bytes)?))
    }

    // ------------------------------------------------------------------
    // Writer operations (spec §4.5, single-writer per column)
    // ------------------------------------------------------------------

    pub fn append(&self, value: Option<Value>) -> Result<TupleId> {
        let mut header = self.header.lock();
        let next = header.max_tuple_id.map_or(0, |t| t.0 + 1);
        let tuple_id = TupleId::new(next);
        if value.is_none() && !header.nullable {
            return Err(Error::NullValueNotAllowed(tuple_id.0));
        }

        let (page_id, slot) = self.locate(tuple_id);
        let mut page_guard = if slot == 0 {
            let mut g = self.pool.append_page()?;
            slotted::init(&mut g)?;
            debug_assert_eq!(g.page_id(), page_id);
            g
        } else {
            self.pool.fetch_page_write(page_id)?
        };

        let physical_size = header.physical_size;
        let mut flags = 0u8;
        let bytes = match &value {
            Some(v) => self.serializer.encode(v)?,
            None => {
                flags |= slotted::FLAG_NULL;
                vec![0u8; physical_size]
            }
        };
        slotted::set_flags(&mut page_guard, slot, physical_size, flags)?;
        slotted::set_entry_bytes(&mut page_guard, slot, physical_size, &bytes)?;
        let slot_count = slotted::get_slot_count(&page_guard)?;
        slotted::set_slot_count(&mut page_guard, slot_count + 1)?;
        drop(page_guard);

        header.count += 1;
        header.max_tuple_id = Some(tuple_id);
        self.flush_header(&header)?;
        Ok(tuple_id)
    }

    pub fn update(&self, tuple_id: TupleId, value: Option<Value>) -> Result<()> {
        self.check_tuple_id(tuple_id)?;
        let header = self.header.lock();
        if value.is_none() && !header.nullable {
            return Err(Error::NullValueNotAllowed(tuple_id.0));
        }

        let (page_id, slot) = self.locate(tuple_id);
        let physical_size = header.physical_size;
        let mut page_guard = self.pool.fetch_page_write(page_id)?;
        let flags = slotted::get_flags(&page_guard, slot, physical_size)?;
        if slotted::is_deleted(flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }

        let mut new_flags = flags & !slotted::FLAG_NULL;
        let bytes = match &value {
            Some(v) => self.serializer.encode(v)?,
            None => {
                new_flags |= slotted::FLAG_NULL;
                vec![0u8; physical_size]
            }
        };
        slotted::set_flags(&mut page_guard, slot, physical_size, new_flags)?;
        slotted::set_entry_bytes(&mut page_guard, slot, physical_size, &bytes)?;
        Ok(())
    }

    /// Atomic compare-then-write, serialized by the page's own write latch
    /// (the `PageWriteGuard` held for this call).
    pub fn compare_and_update(&self, tuple_id: TupleId, expected: Option<Value>, new: Option<Value>) -> Result<bool> {
        self.check_tuple_id(tuple_id)?;
        let header = self.header.lock();
        let (page_id, slot) = self.locate(tuple_id);
        let physical_size = header.physical_size;
        let mut page_guard = self.pool.fetch_page_write(page_id)?;
        let flags = slotted::get_flags(&page_guard, slot, physical_size)?;
        if slotted::is_deleted(flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }

        let current = if slotted::is_null(flags) {
            None
        } else {
            Some(self.serializer.decode(slotted::get_entry_bytes(&page_guard, slot, physical_size)?)?)
        };
        if current != expected {
            return Ok(false);
        }
        if new.is_none() && !header.nullable {
            return Err(Error::NullValueNotAllowed(tuple_id.0));
        }

        let mut new_flags = flags & !slotted::FLAG_NULL;
        let bytes = match &new {
            Some(v) => self.serializer.encode(v)?,
            None => {
                new_flags |= slotted::FLAG_NULL;
                vec![0u8; physical_size]
            }
        };
        slotted::set_flags(&mut page_guard, slot, physical_size, new_flags)?;
        slotted::set_entry_bytes(&mut page_guard, slot, physical_size, &bytes)?;
        Ok(true)
    }

    pub fn delete(&self, tuple_id: TupleId) -> Result<Option<Value>> {
        self.check_tuple_id(tuple_id)?;
        let mut header = self.header.lock();
        let (page_id, slot) = self.locate(tuple_id);
        let physical_size = header.physical_size;
        let mut page_guard = self.pool.fetch_page_write(page_id)?;
        let flags = slotted::get_flags(&page_guard, slot, physical_size)?;
        if slotted::is_deleted(flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }

        let previous = if slotted::is_null(flags) {
            None
        } else {
            Some(self.serializer.decode(slotted::get_entry_bytes(&page_guard, slot, physical_size)?)?)
        };
        slotted::set_flags(&mut page_guard, slot, physical_size, flags | slotted::FLAG_DELETED)?;
        drop(page_guard);

        header.count -= 1;
        self.flush_header(&header)?;
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Commit / rollback / flush (spec §4.5: "commit/rollback delegate to
    // the DiskManager; the writer flushes the header page before the
    // commit point")
    // ------------------------------------------------------------------

    pub fn flush(&self) -> Result<()> {
        self.pool.flush_all_pages()
    }

    pub fn commit(&self) -> Result<()> {
        self.flush()?;
        self.pool.disk_manager().commit()
    }

    /// Discards pending DiskManager state and reloads the header so
    /// in-memory `count`/`maxTupleId` reflect the rolled-back file again.
    pub fn rollback(&self) -> Result<()> {
        self.pool.disk_manager().rollback()?;
        self.pool.discard_all_pages();
        let guard = self.pool.fetch_page_read(header::HEADER_PAGE_ID)?;
        let restored = FixedColumnHeader::read_from(&guard)?;
        drop(guard);
        *self.header.lock() = restored;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reader / Writer / Cursor (spec §4.5, §4.7)
    // ------------------------------------------------------------------

    /// Acquire a shared reader, holding the column's read latch for its
    /// whole lifetime.
    pub fn reader(&self) -> Reader<'_, D> {
        Reader {
            file: self,
            _latch: self.latch.read(),
        }
    }

    /// Acquire the single writer, holding the column's write latch for its
    /// whole lifetime.
    pub fn writer(&self) -> Writer<'_, D> {
        Writer {
            file: self,
            _latch: self.latch.write(),
        }
    }

    /// Open a forward-only cursor over `[start, end]`, fixed at construction
    /// (spec §4.7 — cursors do not observe later appends).
    pub fn cursor(&self, start: TupleId, end: TupleId) -> Cursor<'_, D> {
        Cursor {
            file: self,
            _latch: self.latch.read(),
            next: start.0,
            end: end.0,
        }
    }
}

/// Shared-access view over a [`FixedColumnFile`], held for as long as the
/// guard lives.
pub struct Reader<'a, D: DiskManager> {
    file: &'a FixedColumnFile<D>,
    _latch: RwLockReadGuard<'a, ()>,
}

impl<D: DiskManager> Reader<'_, D> {
    pub fn get(&self, tuple_id: TupleId) -> Result<Option<Value>> {
        self.file.get(tuple_id)
    }

    pub fn count(&self) -> u64 {
        self.file.count()
    }

    pub fn max_tuple_id(&self) -> Option<TupleId> {
        self.file.max_tuple_id()
    }

    pub fn is_null(&self, tuple_id: TupleId) -> Result<bool> {
        self.file.is_null(tuple_id)
    }

    pub fn is_deleted(&self, tuple_id: TupleId) -> Result<bool> {
        self.file.is_deleted(tuple_id)
    }
}

/// Exclusive-access view over a [`FixedColumnFile`] (spec §4.5
/// "single-writer per column").
pub struct Writer<'a, D: DiskManager> {
    file: &'a FixedColumnFile<D>,
    _latch: RwLockWriteGuard<'a, ()>,
}

impl<D: DiskManager> Writer<'_, D> {
    pub fn append(&self, value: Option<Value>) -> Result<TupleId> {
        self.file.append(value)
    }

    pub fn update(&self, tuple_id: TupleId, value: Option<Value>) -> Result<()> {
        self.file.update(tuple_id, value)
    }

    pub fn compare_and_update(&self, tuple_id: TupleId, expected: Option<Value>, new: Option<Value>) -> Result<bool> {
        self.file.compare_and_update(tuple_id, expected, new)
    }

    pub fn delete(&self, tuple_id: TupleId) -> Result<Option<Value>> {
        self.file.delete(tuple_id)
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    pub fn commit(&self) -> Result<()> {
        self.file.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.file.rollback()
    }
}

/// Forward-only iterator over a fixed `TupleId` range (spec §4.7).
pub struct Cursor<'a, D: DiskManager> {
    file: &'a FixedColumnFile<D>,
    _latch: RwLockReadGuard<'a, ()>,
    next: u64,
    end: u64,
}

impl<D: DiskManager> Cursor<'_, D> {
    /// Advance past tombstoned tuples and report whether a live one remains.
    pub fn has_next(&mut self) -> Result<bool> {
        while self.next <= self.end {
            if !self.file.is_deleted(TupleId::new(self.next))? {
                return Ok(true);
            }
            self.next += 1;
        }
        Ok(false)
    }

    /// Materialize the value under the current TupleId and advance.
    pub fn read_through(&mut self) -> Result<Option<Value>> {
        if !self.has_next()? {
            return Err(Error::TupleIdOutOfRange(self.next));
        }
        let tuple_id = TupleId::new(self.next);
        self.next += 1;
        self.file.get(tuple_id)
    }
}
