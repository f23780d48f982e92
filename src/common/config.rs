//! Configuration values for HARE.
//!
//! HARE does not read environment variables or configuration files itself;
//! every tunable here is a plain value passed in at `open()` time by the
//! caller. Loading those values from disk/env is a concern of the layers
//! built on top of this crate.

use std::time::Duration;

/// Smallest page shift HARE will accept (page size 1024 bytes).
pub const MIN_PAGE_SHIFT: u32 = 10;

/// Default page shift (page size 4096 bytes), matching common OS page size.
pub const DEFAULT_PAGE_SHIFT: u32 = 12;

/// Size in bytes of the fixed file header stored at PageId 0.
pub const HEADER_SIZE: usize = 128;

/// Size in bytes of one WAL entry envelope (excludes variable payload).
pub const WAL_ENTRY_ENVELOPE_SIZE: usize = 24;

/// Size in bytes of the WAL file header.
pub const WAL_HEADER_SIZE: usize = 60;

/// Number of pages a Direct `DiskManager` pre-extends the file by when it
/// runs out of room, amortising the cost of repeated single-page growth.
pub const DEFAULT_PREALLOCATE_PAGES: u32 = 16;

/// Compute the page size in bytes for a given page shift.
///
/// # Panics
/// Panics if `page_shift < MIN_PAGE_SHIFT`.
#[inline]
pub fn page_size_for_shift(page_shift: u32) -> usize {
    assert!(
        page_shift >= MIN_PAGE_SHIFT,
        "page_shift must be >= {}, got {}",
        MIN_PAGE_SHIFT,
        page_shift
    );
    1usize << page_shift
}

/// Options controlling how a `DiskManager` opens a file.
///
/// This is the only configuration surface HARE exposes; callers are
/// expected to source these values from whatever config layer they run
/// (environment, file, CLI flags) above this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Page shift to use when *creating* a new file. Ignored when opening
    /// an existing file, whose page shift is read from the on-disk header.
    pub page_shift: u32,
    /// How long to retry acquiring the exclusive file lock before failing
    /// with `Error::FileLockTimeout`.
    pub lock_timeout: Duration,
    /// Number of pages to pre-extend the file by in one amortised batch
    /// (Direct manager only).
    pub preallocate_pages: u32,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_shift(mut self, page_shift: u32) -> Self {
        self.page_shift = page_shift;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_preallocate_pages(mut self, pages: u32) -> Self {
        self.preallocate_pages = pages;
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            page_shift: DEFAULT_PAGE_SHIFT,
            lock_timeout: Duration::from_secs(5),
            preallocate_pages: DEFAULT_PREALLOCATE_PAGES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_for_shift() {
        assert_eq!(page_size_for_shift(10), 1024);
        assert_eq!(page_size_for_shift(12), 4096);
        assert_eq!(page_size_for_shift(16), 65536);
    }

    #[test]
    #[should_panic(expected = "page_shift must be >=")]
    fn test_page_size_for_shift_too_small() {
        page_size_for_shift(9);
    }

    #[test]
    fn test_open_options_defaults() {
        let opts = OpenOptions::new();
        assert_eq!(opts.page_shift, DEFAULT_PAGE_SHIFT);
        assert_eq!(opts.preallocate_pages, DEFAULT_PREALLOCATE_PAGES);
    }

    #[test]
    fn test_open_options_builder() {
        let opts = OpenOptions::new()
            .with_page_shift(13)
            .with_lock_timeout(Duration::from_millis(250));
        assert_eq!(opts.page_shift, 13);
        assert_eq!(opts.lock_timeout, Duration::from_millis(250));
    }
}
