//! Variable-length column file (spec §4.6).
//!
//! Values are stored in payload pages (`column::slotted_variable`) and
//! addressed indirectly: a chain of directory pages
//! (`storage::page::directory`), starting at [`header::FIRST_DATA_PAGE_ID`]
//! and linked via `next_page_id`/`previous_page_id`, maps each `TupleId` to
//! an `(flags, Address)` entry. Appending a directory entry assigns the
//! next consecutive `TupleId`; looking one up walks the directory chain
//! until the owning page's `[first_tuple_id, last_tuple_id]` range contains
//! it.
//!
//! The column header additionally tracks `allocation_page_id`, the payload
//! page currently being appended to, so writers don't rescan for free space
//! on every insert.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::BufferPoolManager;
use crate::column::header::{self, VariableColumnHeader};
use crate::column::logical_type::{serializer_for, LogicalType, Serializer, Value};
use crate::column::slotted_variable;
use crate::common::{Address, Error, PageId, Result, TupleId};
use crate::storage::page::directory;
use crate::storage::DiskManager;

pub struct VariableColumnFile<D: DiskManager> {
    pool: BufferPoolManager<D>,
    header: Mutex<VariableColumnHeader>,
    serializer: Box<dyn Serializer>,
    latch: RwLock<()>,
}

impl<D: DiskManager> VariableColumnFile<D> {
    pub fn create(disk_manager: D, pool_size: usize, logical_type: LogicalType, nullable: bool) -> Result<Self> {
        let pool = BufferPoolManager::new(pool_size, disk_manager);
        let mut header = VariableColumnHeader::new(logical_type, nullable);

        {
            let mut guard = pool.append_page()?;
            debug_assert_eq!(guard.page_id(), header::HEADER_PAGE_ID);
            header.write_to(&mut guard)?;
        }

        let first_directory_page_id = {
            let mut guard = pool.append_page()?;
            debug_assert_eq!(guard.page_id(), header::FIRST_DATA_PAGE_ID);
            directory::init(&mut guard, TupleId::new(0))?;
            guard.page_id()
        };
        header.last_directory_page_id = first_directory_page_id;

        let allocation_page_id = {
            let mut guard = pool.append_page()?;
            slotted_variable::init(&mut guard)?;
            guard.page_id()
        };
        header.allocation_page_id = allocation_page_id;

        let serializer = serializer_for(&header.logical_type)?;
        {
            let mut guard = pool.fetch_page_write(header::HEADER_PAGE_ID)?;
            header.write_to(&mut guard)?;
        }

        Ok(Self {
            pool,
            header: Mutex::new(header),
            serializer,
            latch: RwLock::new(()),
        })
    }

    pub fn open(disk_manager: D, pool_size: usize) -> Result<Self> {
        let pool = BufferPoolManager::new(pool_size, disk_manager);
        let header = {
            let guard = pool.fetch_page_read(header::HEADER_PAGE_ID)?;
            VariableColumnHeader::read_from(&guard)?
        };
        let serializer = serializer_for(&header.logical_type)?;

        Ok(Self {
            pool,
            header: Mutex::new(header),
            serializer,
            latch: RwLock::new(()),
        })
    }

    fn flush_header(&self, header: &VariableColumnHeader) -> Result<()> {
        let mut guard = self.pool.fetch_page_write(header::HEADER_PAGE_ID)?;
        header.write_to(&mut guard)
    }

    fn check_tuple_id(&self, tuple_id: TupleId, header: &VariableColumnHeader) -> Result<()> {
        match header.max_tuple_id {
            Some(max) if tuple_id.0 <= max.0 => Ok(()),
            _ => Err(Error::TupleIdOutOfRange(tuple_id.0)),
        }
    }

    /// Walk the directory chain from the first directory page until the
    /// owning page's range contains `tuple_id`.
    fn locate_directory_entry(&self, tuple_id: TupleId) -> Result<(PageId, usize)> {
        let mut page_id = header::FIRST_DATA_PAGE_ID;
        loop {
            let guard = self.pool.fetch_page_read(page_id)?;
            if directory::contains(&guard, tuple_id)? {
                let first = directory::first_tuple_id(&guard)?;
                return Ok((page_id, (tuple_id.0 - first.0) as usize));
            }
            let next = directory::next_page_id(&guard)?;
            if !next.is_valid() {
                return Err(Error::TupleIdOutOfRange(tuple_id.0));
            }
            page_id = next;
        }
    }

    fn get_directory_entry(&self, tuple_id: TupleId) -> Result<(u8, Address)> {
        let (page_id, index) = self.locate_directory_entry(tuple_id)?;
        let guard = self.pool.fetch_page_read(page_id)?;
        directory::get_entry(&guard, index)
    }

    /// Append `bytes` to the current allocation page, rolling over to a
    /// freshly allocated page if it doesn't fit (spec §4.6).
    fn append_payload(&self, header: &mut VariableColumnHeader, bytes: &[u8]) -> Result<Address> {
        {
            let mut guard = self.pool.fetch_page_write(header.allocation_page_id)?;
            match slotted_variable::insert(&mut guard, bytes) {
                Ok(slot_id) => return Ok(Address::new(header.allocation_page_id, slot_id)),
                Err(Error::PageFull { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let mut guard = self.pool.append_page()?;
        slotted_variable::init(&mut guard)?;
        let new_page_id = guard.page_id();
        let slot_id = slotted_variable::insert(&mut guard, bytes)?;
        drop(guard);
        header.allocation_page_id = new_page_id;
        Ok(Address::new(new_page_id, slot_id))
    }

    /// Append a directory entry, rolling over to a new linked directory
    /// page if the current one is full.
    fn append_directory_entry(&self, header: &mut VariableColumnHeader, flags: u8, address: Address) -> Result<TupleId> {
        loop {
            let dir_page_id = header.last_directory_page_id;
            let mut guard = self.pool.fetch_page_write(dir_page_id)?;
            let count = directory::entry_count(&guard)? as usize;
            let capacity = directory::capacity(guard.size());
            if count < capacity {
                return directory::push_entry(&mut guard, flags, address);
            }

            let next_tuple_id = TupleId::new(directory::last_tuple_id(&guard)?.0 + 1);
            let mut new_guard = self.pool.append_page()?;
            directory::init(&mut new_guard, next_tuple_id)?;
            let new_page_id = new_guard.page_id();
            directory::set_previous_page_id(&mut new_guard, dir_page_id)?;
            drop(new_guard);

            directory::set_next_page_id(&mut guard, new_page_id)?;
            drop(guard);
            header.last_directory_page_id = new_page_id;
        }
    }

    // ------------------------------------------------------------------
    // Reader operations
    // ------------------------------------------------------------------

    pub fn count(&self) -> u64 {
        self.header.lock().count
    }

    pub fn max_tuple_id(&self) -> Option<TupleId> {
        self.header.lock().max_tuple_id
    }

    pub fn is_null(&self, tuple_id: TupleId) -> Result<bool> {
        self.check_tuple_id(tuple_id, &self.header.lock())?;
        let (flags, _) = self.get_directory_entry(tuple_id)?;
        Ok(directory::is_null(flags))
    }

    pub fn is_deleted(&self, tuple_id: TupleId) -> Result<bool> {
        self.check_tuple_id(tuple_id, &self.header.lock())?;
        let (flags, _) = self.get_directory_entry(tuple_id)?;
        Ok(directory::is_deleted(flags))
    }

    pub fn get(&self, tuple_id: TupleId) -> Result<Option<Value>> {
        self.check_tuple_id(tuple_id, &self.header.lock())?;
        let (flags, address) = self.get_directory_entry(tuple_id)?;
        if directory::is_deleted(flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }
        if directory::is_null(flags) {
            return Ok(None);
        }
        let guard = self.pool.fetch_page_read(address.page_id())?;
        let bytes = slotted_variable::get(&guard, address.slot_id())?;
        Ok(Some(self.serializer.decode(bytes)?))
    }

    // ------------------------------------------------------------------
    // Writer operations
    // ------------------------------------------------------------------

    pub fn append(&self, value: Option<Value>) -> Result<TupleId> {
        let mut header = self.header.lock();
        let next = header.max_tuple_id.map_or(0, |t| t.0 + 1);
        if value.is_none() && !header.nullable {
            return Err(Error::NullValueNotAllowed(next));
        }

        let (flags, address) = match &value {
            Some(v) => {
                let bytes = self.serializer.encode(v)?;
                (0u8, self.append_payload(&mut header, &bytes)?)
            }
            None => (directory::FLAG_NULL, Address::INVALID),
        };

        let tuple_id = self.append_directory_entry(&mut header, flags, address)?;
        debug_assert_eq!(tuple_id.0, next);

        header.count += 1;
        header.max_tuple_id = Some(tuple_id);
        self.flush_header(&header)?;
        Ok(tuple_id)
    }

    pub fn update(&self, tuple_id: TupleId, value: Option<Value>) -> Result<()> {
        let mut header = self.header.lock();
        self.check_tuple_id(tuple_id, &header)?;
        if value.is_none() && !header.nullable {
            return Err(Error::NullValueNotAllowed(tuple_id.0));
        }

        let (dir_page_id, index) = self.locate_directory_entry(tuple_id)?;
        let (old_flags, _) = {
            let guard = self.pool.fetch_page_read(dir_page_id)?;
            directory::get_entry(&guard, index)?
        };
        if directory::is_deleted(old_flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }

        let (new_flags, new_address) = match &value {
            Some(v) => {
                let bytes = self.serializer.encode(v)?;
                (0u8, self.append_payload(&mut header, &bytes)?)
            }
            None => (directory::FLAG_NULL, Address::INVALID),
        };

        let mut guard = self.pool.fetch_page_write(dir_page_id)?;
        directory::set_entry(&mut guard, index, new_flags, new_address)?;
        Ok(())
    }

    pub fn compare_and_update(&self, tuple_id: TupleId, expected: Option<Value>, new: Option<Value>) -> Result<bool> {
        let current = self.get(tuple_id)?;
        if current != expected {
            return Ok(false);
        }
        self.update(tuple_id, new)?;
        Ok(true)
    }

    pub fn delete(&self, tuple_id: TupleId) -> Result<Option<Value>> {
        let mut header = self.header.lock();
        self.check_tuple_id(tuple_id, &header)?;

        let (dir_page_id, index) = self.locate_directory_entry(tuple_id)?;
        let mut guard = self.pool.fetch_page_write(dir_page_id)?;
        let (flags, address) = directory::get_entry(&guard, index)?;
        if directory::is_deleted(flags) {
            return Err(Error::EntryDeleted(tuple_id.0));
        }
        // Read the payload before tombstoning, since `get()` would refuse a
        // deleted entry once the flag is set below.
        let previous = if directory::is_null(flags) {
            None
        } else {
            let payload_guard = self.pool.fetch_page_read(address.page_id())?;
            let bytes = slotted_variable::get(&payload_guard, address.slot_id())?;
            Some(self.serializer.decode(bytes)?)
        };
        directory::set_entry(&mut guard, index, flags | directory::FLAG_DELETED, address)?;
        drop(guard);

        header.count -= 1;
        self.flush_header(&header)?;
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Commit / rollback / flush
    // ------------------------------------------------------------------

    pub fn flush(&self) -> Result<()> {
        self.pool.flush_all_pages()
    }

    pub fn commit(&self) -> Result<()> {
        self.flush()?;
        self.pool.disk_manager().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.pool.disk_manager().rollback()?;
        self.pool.discard_all_pages();
        let guard = self.pool.fetch_page_read(header::HEADER_PAGE_ID)?;
        let restored = VariableColumnHeader::read_from(&guard)?;
        drop(guard);
        *self.header.lock() = restored;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reader / Writer / Cursor
    // ------------------------------------------------------------------

    pub fn reader(&self) -> Reader<'_, D> {
        Reader {
            file: self,
            _latch: self.latch.read(),
        }
    }

    pub fn writer(&self) -> Writer<'_, D> {
        Writer {
            file: self,
            _latch: self.latch.write(),
        }
    }

    pub fn cursor(&self, start: TupleId, end: TupleId) -> Cursor<'_, D> {
        Cursor {
            file: self,
            _latch: self.latch.read(),
            next: start.0,
            end: end.0,
        }
    }
}

pub struct Reader<'a, D: DiskManager> {
    file: &'a VariableColumnFile<D>,
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

pub struct Writer<'a, D: DiskManager> {
    file: &'a VariableColumnFile<D>,
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

pub struct Cursor<'a, D: DiskManager> {
    file: &'a VariableColumnFile<D>,
    _latch: RwLockReadGuard<'a, ()>,
    next: u64,
    end: u64,
}

impl<D: DiskManager> Cursor<'_, D> {
    pub fn has_next(&mut self) -> Result<bool> {
        while self.next <= self.end {
            if !self.file.is_deleted(TupleId::new(self.next))? {
                return Ok(true);
            }
            self.next += 1;
        }
        Ok(false)
    }

    pub fn read_through(&mut self) -> Result<Option<Value>> {
        if !self.has_next()? {
            return Err(Error::TupleIdOutOfRange(self.next));
        }
        let tuple_id = TupleId::new(self.next);
        self.next += 1;
        self.file.get(tuple_id)
    }
}
