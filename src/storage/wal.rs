//! WriteAheadLog: append-only companion to the WAL `DiskManager` flavor
//! (spec §4.3, §6).
//!
//! Page 0 of the `.hare.wal` sidecar is a 60-byte header (magic, version,
//! kind, entry count, transferred count, starting max page id, rolling
//! CRC32C) padded to one full page. Each subsequent entry is a 24-byte
//! envelope (sequence, action, pageId, payloadSize) followed by
//! `payloadSize` bytes, the whole block rounded up to a page boundary.

use std::fs::{File, OpenOptions as FsOpenOptions};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

const MAGIC: [u16; 4] = [b'H' as u16, b'A' as u16, b'R' as u16, b'E' as u16];
const HEADER_ENTRIES_OFFSET: usize = 16;
const HEADER_TRANSFERRED_OFFSET: usize = 20;
const HEADER_START_MAX_PAGE_ID_OFFSET: usize = 24;
const HEADER_CRC_OFFSET: usize = 32;
const ENVELOPE_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WalAction {
    Update = 0,
    AllocateAppend = 1,
    AllocateReuse = 2,
    Free = 3,
}

impl WalAction {
    fn from_u32(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(WalAction::Update),
            1 => Ok(WalAction::AllocateAppend),
            2 => Ok(WalAction::AllocateReuse),
            3 => Ok(WalAction::Free),
            other => Err(Error::DataCorruption(format!(
                "unknown WAL action {other}"
            ))),
        }
    }
}

/// One replayable mutation: the action, the affected page, and its new
/// contents (absent for `Free`).
pub struct WalEntry {
    pub sequence: u64,
    pub action: WalAction,
    pub page_id: PageId,
    pub payload: Option<Page>,
}

fn round_up_to_page(size: usize, page_size: usize) -> usize {
    size.div_ceil(page_size) * page_size
}

struct WalState {
    entries: u32,
    transferred: u32,
    start_max_page_id: PageId,
    crc: u32,
    hasher: Hasher,
    next_offset: u64,
}

pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    page_size: usize,
    state: Mutex<WalState>,
}

impl WriteAheadLog {
    pub fn path_for(data_file_path: &Path) -> PathBuf {
        let mut os = data_file_path.as_os_str().to_owned();
        os.push(".wal");
        PathBuf::from(os)
    }

    /// Create a fresh WAL sidecar.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize, start_max_page_id: PageId) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = FsOpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let wal = Self {
            path,
            file,
            page_size,
            state: Mutex::new(WalState {
                entries: 0,
                transferred: 0,
                start_max_page_id,
                crc: 0,
                hasher: Hasher::new(),
                next_offset: page_size as u64,
            }),
        };
        wal.flush_header()?;
        Ok(wal)
    }

    /// Open an existing WAL sidecar, verifying its stored checksum against
    /// a recomputation over its recorded entries.
    pub fn open_existing<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = FsOpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_page = Page::new(page_size);
        read_block(&file, 0, &mut header_page)?;
        for (i, unit) in MAGIC.iter().enumerate() {
            if header_page.get_u16(i * 2)? != *unit {
                return Err(Error::DataCorruption("WAL header magic mismatch".into()));
            }
        }
        let entries = header_page.get_u32(HEADER_ENTRIES_OFFSET)?;
        let transferred = header_page.get_u32(HEADER_TRANSFERRED_OFFSET)?;
        let start_max_page_id = PageId::new(header_page.get_u64(HEADER_START_MAX_PAGE_ID_OFFSET)?);
        let stored_crc = header_page.get_u32(HEADER_CRC_OFFSET)?;

        let (hasher, next_offset) = replay_hash(&file, page_size, entries)?;
        let recomputed = hasher.clone().finalize();
        if recomputed != stored_crc {
            return Err(Error::DataCorruption(format!(
                "WAL CRC mismatch: stored {stored_crc:#x}, recomputed {recomputed:#x}"
            )));
        }

        Ok(Self {
            path,
            file,
            page_size,
            state: Mutex::new(WalState {
                entries,
                transferred,
                start_max_page_id,
                crc: stored_crc,
                hasher,
                next_offset,
            }),
        })
    }

    pub fn exists(data_file_path: &Path) -> bool {
        Self::path_for(data_file_path).exists()
    }

    fn flush_header(&self) -> Result<()> {
        let state = self.state.lock();
        let mut page = Page::new(self.page_size);
        for (i, unit) in MAGIC.iter().enumerate() {
            page.set_u16(i * 2, *unit)?;
        }
        page.set_u32(8, 1)?; // kind = WAL
        page.set_u32(12, 1)?; // version
        page.set_u32(HEADER_ENTRIES_OFFSET, state.entries)?;
        page.set_u32(HEADER_TRANSFERRED_OFFSET, state.transferred)?;
        page.set_u64(HEADER_START_MAX_PAGE_ID_OFFSET, state.start_max_page_id.0)?;
        page.set_u32(HEADER_CRC_OFFSET, state.crc)?;
        write_block(&self.file, 0, &page)
    }

    /// Append one entry, updating the rolling checksum and entry count.
    pub fn append(&self, action: WalAction, page_id: PageId, payload: Option<&Page>) -> Result<u64> {
        let mut state = self.state.lock();
        let sequence = state.entries as u64 + 1;
        let payload_size = payload.map_or(0, |p| p.size());

        let mut envelope = Page::new(ENVELOPE_SIZE);
        envelope.set_u64(0, sequence)?;
        envelope.set_u32(8, action as u32)?;
        envelope.set_u64(12, page_id.0)?;
        envelope.set_u32(20, payload_size as u32)?;

        state.hasher.update(envelope.as_slice());
        if let Some(p) = payload {
            state.hasher.update(p.as_slice());
        }

        let offset = state.next_offset;
        write_exact(&self.file, offset, envelope.as_slice())?;
        if let Some(p) = payload {
            write_exact(&self.file, offset + ENVELOPE_SIZE as u64, p.as_slice())?;
        }

        let block_size = round_up_to_page(ENVELOPE_SIZE + payload_size, self.page_size);
        state.next_offset = offset + block_size as u64;
        state.entries += 1;
        state.crc = state.hasher.clone().finalize();

        drop(state);
        self.flush_header()?;
        Ok(sequence)
    }

    /// Entries from `transferred + 1` through `entries`, in order.
    pub fn unreplayed(&self) -> Result<Vec<WalEntry>> {
        let state = self.state.lock();
        let (entries, transferred) = (state.entries, state.transferred);
        drop(state);
        scan_entries(&self.file, self.page_size, entries, transferred)
    }

    /// Record that entries through `sequence` have been replayed into the
    /// data file, flushing the header.
    pub fn mark_transferred(&self, sequence: u32) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.transferred = sequence;
        }
        self.flush_header()
    }

    pub fn entries(&self) -> u32 {
        self.state.lock().entries
    }

    pub fn transferred(&self) -> u32 {
        self.state.lock().transferred
    }

    pub fn start_max_page_id(&self) -> PageId {
        self.state.lock().start_max_page_id
    }

    /// Delete the WAL sidecar after a full replay.
    pub fn delete(self) -> Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

fn write_exact(file: &File, offset: u64, bytes: &[u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(bytes, offset)?;
    Ok(())
}

fn read_block(file: &File, block_index: u64, page: &mut Page) -> Result<()> {
    use std::os::unix::fs::FileExt;
    let size = page.size();
    file.read_exact_at(page.as_mut_slice(), block_index * size as u64)?;
    Ok(())
}

fn write_block(file: &File, block_index: u64, page: &Page) -> Result<()> {
    write_exact(file, block_index * page.size() as u64, page.as_slice())
}

/// Walk entries `1..=count` from the start of the entry region, hashing
/// each envelope+payload, and return the resulting hasher plus the file
/// offset immediately after the last entry.
fn replay_hash(file: &File, page_size: usize, count: u32) -> Result<(Hasher, u64)> {
    use std::os::unix::fs::FileExt;
    let mut hasher = Hasher::new();
    let mut offset = page_size as u64;
    let mut envelope = [0u8; ENVELOPE_SIZE];

    for _ in 0..count {
        file.read_exact_at(&mut envelope, offset)?;
        let payload_size = u32::from_le_bytes(envelope[20..24].try_into().unwrap()) as usize;
        hasher.update(&envelope);
        if payload_size > 0 {
            let mut payload = vec![0u8; payload_size];
            file.read_exact_at(&mut payload, offset + ENVELOPE_SIZE as u64)?;
            hasher.update(&payload);
        }
        let block_size = round_up_to_page(ENVELOPE_SIZE + payload_size, page_size);
        offset += block_size as u64;
    }

    Ok((hasher, offset))
}

fn scan_entries(file: &File, page_size: usize, count: u32, skip: u32) -> Result<Vec<WalEntry>> {
    use std::os::unix::fs::FileExt;
    let mut out = Vec::new();
    let mut offset = page_size as u64;

    for seq in 1..=count {
        let mut envelope = [0u8; ENVELOPE_SIZE];
        file.read_exact_at(&mut envelope, offset)?;
        let sequence = u64::from_le_bytes(envelope[0..8].try_into().unwrap());
        let action = WalAction::from_u32(u32::from_le_bytes(envelope[8..12].try_into().unwrap()))?;
        let page_id = PageId::new(u64::from_le_bytes(envelope[12..20].try_into().unwrap()));
        let payload_size = u32::from_le_bytes(envelope[20..24].try_into().unwrap()) as usize;

        let payload = if payload_size > 0 {
            let mut page = Page::new(payload_size);
            file.read_exact_at(page.as_mut_slice(), offset + ENVELOPE_SIZE as u64)?;
            Some(page)
        } else {
            None
        };

        if seq > skip {
            out.push(WalEntry {
                sequence,
                action,
                page_id,
                payload,
            });
        }

        let block_size = round_up_to_page(ENVELOPE_SIZE + payload_size, page_size);
        offset += block_size as u64;
    }

    Ok(out)
}
