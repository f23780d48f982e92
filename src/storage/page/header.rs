//! File header: the 128-byte page 0 carried by every HARE file, data or
//! WAL (spec §3, §6).
//!
//! Byte layout (little-endian):
//! ```text
//! 0..8    magic: four u16 code units, "HARE"
//! 8..12   file kind (0 = data, 1 = WAL)
//! 12..16  format version
//! 16..20  page shift
//! 20..28  flags bitmap (bit 0 = properly-closed, bit 1 = dirty)
//! 28..36  allocated-page count
//! 36..44  dangling-page count
//! 44..52  maximum page id ever allocated
//! 52..60  CRC32C over all data pages
//! 60..128 reserved, zero
//! ```
//!
//! The source repository this spec was distilled from stored "HARE" as
//! four UTF-16 code units; that is frozen here as the magic.

use crc32fast::Hasher;

use super::Page;
use crate::common::{Error, PageId, Result};

const MAGIC: [u16; 4] = [b'H' as u16, b'A' as u16, b'R' as u16, b'E' as u16];

const FILE_KIND_OFFSET: usize = 8;
const VERSION_OFFSET: usize = 12;
const PAGE_SHIFT_OFFSET: usize = 16;
const FLAGS_OFFSET: usize = 20;
const ALLOCATED_OFFSET: usize = 28;
const DANGLING_OFFSET: usize = 36;
const MAX_PAGE_ID_OFFSET: usize = 44;
const CRC_OFFSET: usize = 52;

const FLAG_PROPERLY_CLOSED: u64 = 1 << 0;
const FLAG_DIRTY: u64 = 1 << 1;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Data = 0,
    Wal = 1,
}

impl FileKind {
    fn from_u32(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(FileKind::Data),
            1 => Ok(FileKind::Wal),
            other => Err(Error::DataCorruption(format!(
                "unknown file kind {other}"
            ))),
        }
    }
}

/// In-memory representation of a file header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub kind: FileKind,
    pub version: u32,
    pub page_shift: u32,
    pub properly_closed: bool,
    pub dirty: bool,
    pub allocated: u64,
    pub dangling: u64,
    pub max_page_id: PageId,
    pub crc32: u32,
}

impl FileHeader {
    /// A fresh header for a newly created file, not yet closed.
    pub fn new(kind: FileKind, page_shift: u32) -> Self {
        Self {
            kind,
            version: CURRENT_VERSION,
            page_shift,
            properly_closed: false,
            dirty: true,
            allocated: 0,
            dangling: 0,
            max_page_id: PageId::HEADER,
            crc32: 0,
        }
    }

    fn flags_bits(&self) -> u64 {
        let mut bits = 0u64;
        if self.properly_closed {
            bits |= FLAG_PROPERLY_CLOSED;
        }
        if self.dirty {
            bits |= FLAG_DIRTY;
        }
        bits
    }

    /// Serialize this header into page 0's bytes.
    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        for (i, unit) in MAGIC.iter().enumerate() {
            page.set_u16(i * 2, *unit)?;
        }
        page.set_u32(FILE_KIND_OFFSET, self.kind as u32)?;
        page.set_u32(VERSION_OFFSET, self.version)?;
        page.set_u32(PAGE_SHIFT_OFFSET, self.page_shift)?;
        page.set_u64(FLAGS_OFFSET, self.flags_bits())?;
        page.set_u64(ALLOCATED_OFFSET, self.allocated)?;
        page.set_u64(DANGLING_OFFSET, self.dangling)?;
        page.set_u64(MAX_PAGE_ID_OFFSET, self.max_page_id.0)?;
        page.set_u64(CRC_OFFSET, self.crc32 as u64)?;
        for i in (CRC_OFFSET + 8)..page.size().min(128) {
            page.set_u8(i, 0)?;
        }
        Ok(())
    }

    /// Parse a header from page 0's bytes, validating the magic and
    /// `pageShift >= 10` invariant.
    pub fn read_from(page: &Page) -> Result<Self> {
        for (i, unit) in MAGIC.iter().enumerate() {
            if page.get_u16(i * 2)? != *unit {
                return Err(Error::DataCorruption(
                    "file header magic mismatch".to_string(),
                ));
            }
        }
        let kind = FileKind::from_u32(page.get_u32(FILE_KIND_OFFSET)?)?;
        let version = page.get_u32(VERSION_OFFSET)?;
        let page_shift = page.get_u32(PAGE_SHIFT_OFFSET)?;
        if page_shift < crate::common::config::MIN_PAGE_SHIFT {
            return Err(Error::DataCorruption(format!(
                "page shift {page_shift} below minimum {}",
                crate::common::config::MIN_PAGE_SHIFT
            )));
        }
        let flags = page.get_u64(FLAGS_OFFSET)?;
        let allocated = page.get_u64(ALLOCATED_OFFSET)?;
        let dangling = page.get_u64(DANGLING_OFFSET)?;
        let max_page_id = PageId::new(page.get_u64(MAX_PAGE_ID_OFFSET)?);
        let crc32 = page.get_u64(CRC_OFFSET)? as u32;

        Ok(Self {
            kind,
            version,
            page_shift,
            properly_closed: flags & FLAG_PROPERLY_CLOSED != 0,
            dirty: flags & FLAG_DIRTY != 0,
            allocated,
            dangling,
            max_page_id,
            crc32,
        })
    }
}

/// Compute the rolling checksum used for header and WAL verification.
///
/// Grounded on the teacher's `crc32fast`-based page checksum; the spec
/// names this "CRC32C" but the corpus's checksum crate implements the
/// IEEE 802.3 polynomial rather than Castagnoli. Treated as the project's
/// fixed checksum primitive (see DESIGN.md).
pub fn checksum<'a>(chunks: impl Iterator<Item = &'a [u8]>) -> u32 {
    let mut hasher = Hasher::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut page = Page::new(128);
        let header = FileHeader {
            kind: FileKind::Data,
            version: 1,
            page_shift: 12,
            properly_closed: true,
            dirty: false,
            allocated: 5,
            dangling: 2,
            max_page_id: PageId::new(10),
            crc32: 0xDEADBEEF,
        };
        header.write_to(&mut page).unwrap();
        let read_back = FileHeader::read_from(&page).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn test_header_magic_mismatch() {
        let page = Page::new(128);
        assert!(FileHeader::read_from(&page).is_err());
    }

    #[test]
    fn test_header_rejects_small_page_shift() {
        let mut page = Page::new(128);
        let header = FileHeader::new(FileKind::Data, 4);
        header.write_to(&mut page).unwrap();
        assert!(FileHeader::read_from(&page).is_err());
    }

    #[test]
    fn test_checksum_deterministic() {
        let a = checksum([b"hello".as_ref(), b"world".as_ref()].into_iter());
        let b = checksum([b"hello".as_ref(), b"world".as_ref()].into_iter());
        assert_eq!(a, b);
        let c = checksum([b"hello".as_ref(), b"there".as_ref()].into_iter());
        assert_ne!(a, c);
    }

    #[test]
    fn test_new_header_defaults() {
        let header = FileHeader::new(FileKind::Wal, 12);
        assert!(!header.properly_closed);
        assert!(header.dirty);
        assert_eq!(header.allocated, 0);
        assert_eq!(header.max_page_id, PageId::HEADER);
    }
}
