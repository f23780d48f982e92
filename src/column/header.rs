//! Column header pages (spec §3, §6): page 0 of a column file for the
//! fixed flavor, page 0 for the variable flavor.
//!
//! A HARE column file reuses its `DiskManager`'s own bootstrap pages —
//! page 0 (file header) and page 1 (free-page stack, spec §3) — so the
//! first page a column-file layer itself allocates lands at PageId 2.
//! That page is always the column header; data (or directory) pages
//! follow from PageId 3 onward. This generalizes the spec's "page 0 is
//! the column header" statement by a constant offset of two, rather than
//! fighting the `DiskManager`'s own use of the physical page 0 (see
//! DESIGN.md Open Question decisions).

use crate::column::logical_type::LogicalType;
use crate::common::{Error, PageId, Result, TupleId};
use crate::storage::page::view::{self, TAG_FIXED_COLUMN_HEADER, TAG_VARIABLE_COLUMN_HEADER};
use crate::storage::page::Page;

/// The column header is always the first page the column-file layer
/// allocates after the DiskManager's own header (0) and free-stack (1)
/// pages.
pub const HEADER_PAGE_ID: PageId = PageId::new(2);

/// First page index available to column data (or directory) pages.
pub const FIRST_DATA_PAGE_ID: PageId = PageId::new(3);

const TYPE_ORDINAL_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 8;
const LOGICAL_SIZE_OFFSET: usize = 12;
const PHYSICAL_SIZE_OFFSET: usize = 16;
const COUNT_OFFSET: usize = 20;
const MAX_TUPLE_ID_OFFSET: usize = 28;
/// Only used by the variable-column header; shares the common prefix.
const LAST_DIRECTORY_PAGE_ID_OFFSET: usize = 36;
const ALLOCATION_PAGE_ID_OFFSET: usize = 44;

const FLAG_NULLABLE: u32 = 0b01;
const FLAG_IS_VECTOR: u32 = 0b10;

/// Sentinel `max_tuple_id` meaning "no entries yet" (spec S3: `maxTupleId()
/// == -1` on an empty column).
fn tuple_id_sentinel_write(id: Option<TupleId>) -> u64 {
    id.map_or(u64::MAX, |t| t.0)
}

fn tuple_id_sentinel_read(raw: u64) -> Option<TupleId> {
    if raw == u64::MAX {
        None
    } else {
        Some(TupleId::new(raw))
    }
}

/// In-memory header for a fixed-width column file.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedColumnHeader {
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub physical_size: usize,
    pub count: u64,
    pub max_tuple_id: Option<TupleId>,
}

impl FixedColumnHeader {
    pub fn new(logical_type: LogicalType, nullable: bool) -> Result<Self> {
        let physical_size = logical_type.physical_size().ok_or_else(|| {
            Error::DataCorruption("fixed column requires a fixed-size logical type".to_string())
        })?;
        Ok(Self {
            logical_type,
            nullable,
            physical_size,
            count: 0,
            max_tuple_id: None,
        })
    }

    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        view::write_tag(page, TAG_FIXED_COLUMN_HEADER)?;
        let (ordinal, is_vector, logical_size) = self.logical_type.to_header_parts()?;
        page.set_u32(TYPE_ORDINAL_OFFSET, ordinal)?;
        let mut flags = 0u32;
        if self.nullable {
            flags |= FLAG_NULLABLE;
        }
        if is_vector {
            flags |= FLAG_IS_VECTOR;
        }
        page.set_u32(FLAGS_OFFSET, flags)?;
        page.set_u32(LOGICAL_SIZE_OFFSET, logical_size)?;
        page.set_u32(PHYSICAL_SIZE_OFFSET, self.physical_size as u32)?;
        page.set_u64(COUNT_OFFSET, self.count)?;
        page.set_u64(MAX_TUPLE_ID_OFFSET, tuple_id_sentinel_write(self.max_tuple_id))?;
        Ok(())
    }

    pub fn read_from(page: &Page) -> Result<Self> {
        view::expect_tag(page, TAG_FIXED_COLUMN_HEADER)?;
        let ordinal = page.get_u32(TYPE_ORDINAL_OFFSET)?;
        let flags = page.get_u32(FLAGS_OFFSET)?;
        let logical_size = page.get_u32(LOGICAL_SIZE_OFFSET)?;
        let physical_size = page.get_u32(PHYSICAL_SIZE_OFFSET)? as usize;
        let count = page.get_u64(COUNT_OFFSET)?;
        let max_tuple_id = tuple_id_sentinel_read(page.get_u64(MAX_TUPLE_ID_OFFSET)?);

        let logical_type =
            LogicalType::from_header_parts(ordinal, flags & FLAG_IS_VECTOR != 0, logical_size)?;

        Ok(Self {
            logical_type,
            nullable: flags & FLAG_NULLABLE != 0,
            physical_size,
            count,
            max_tuple_id,
        })
    }
}

/// In-memory header for a variable-length column file.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableColumnHeader {
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub count: u64,
    pub max_tuple_id: Option<TupleId>,
    pub last_directory_page_id: PageId,
    pub allocation_page_id: PageId,
}

impl VariableColumnHeader {
    pub fn new(logical_type: LogicalType, nullable: bool) -> Self {
        Self {
            logical_type,
            nullable,
            count: 0,
            max_tuple_id: None,
            last_directory_page_id: PageId::INVALID,
            allocation_page_id: PageId::INVALID,
        }
    }

    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        view::write_tag(page, TAG_VARIABLE_COLUMN_HEADER)?;
        let (ordinal, is_vector, logical_size) = self.logical_type.to_header_parts()?;
        page.set_u32(TYPE_ORDINAL_OFFSET, ordinal)?;
        let mut flags = 0u32;
        if self.nullable {
            flags |= FLAG_NULLABLE;
        }
        if is_vector {
            flags |= FLAG_IS_VECTOR;
        }
        page.set_u32(FLAGS_OFFSET, flags)?;
        page.set_u32(LOGICAL_SIZE_OFFSET, logical_size)?;
        page.set_u64(COUNT_OFFSET, self.count)?;
        page.set_u64(MAX_TUPLE_ID_OFFSET, tuple_id_sentinel_write(self.max_tuple_id))?;
        page.set_u64(LAST_DIRECTORY_PAGE_ID_OFFSET, self.last_directory_page_id.0)?;
        page.set_u64(ALLOCATION_PAGE_ID_OFFSET, self.allocation_page_id.0)?;
        Ok(())
    }

    pub fn read_from(page: &Page) -> Result<Self> {
        view::expect_tag(page, TAG_VARIABLE_COLUMN_HEADER)?;
        let ordinal = page.get_u32(TYPE_ORDINAL_OFFSET)?;
        let flags = page.get_u32(FLAGS_OFFSET)?;
        let logical_size = page.get_u32(LOGICAL_SIZE_OFFSET)?;
        let count = page.get_u64(COUNT_OFFSET)?;
        let max_tuple_id = tuple_id_sentinel_read(page.get_u64(MAX_TUPLE_ID_OFFSET)?);
        let last_directory_page_id = PageId::new(page.get_u64(LAST_DIRECTORY_PAGE_ID_OFFSET)?);
        let allocation_page_id = PageId::new(page.get_u64(ALLOCATION_PAGE_ID_OFFSET)?);

        let logical_type =
            LogicalType::from_header_parts(ordinal, flags & FLAG_IS_VECTOR != 0, logical_size)?;

        Ok(Self {
            logical_type,
            nullable: flags & FLAG_NULLABLE != 0,
            count,
            max_tuple_id,
            last_directory_page_id,
            allocation_page_id,
        })
    }
}
