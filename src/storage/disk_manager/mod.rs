//! DiskManager: owns a file, manages its page-level layout, and exposes
//! read/update/allocate/free/commit/rollback (spec §4.2).
//!
//! Two variants share the [`DiskManager`] trait: [`direct::DirectDiskManager`]
//! writes straight through to the file; [`wal::WalDiskManager`] buffers
//! mutations in a [`crate::storage::wal::WriteAheadLog`] until `commit`.
//!
//! A transaction/session layer sits above HARE and is out of this crate's
//! scope (see DESIGN.md); each open `DiskManager` is itself the unit of
//! pending-write state, so trait methods take no transaction handle.

pub mod direct;
mod lock;
mod shared;
pub mod wal_manager;

use crate::common::{PageId, Result};
use crate::storage::page::Page;

pub use direct::DirectDiskManager;
pub use wal_manager::WalDiskManager;

/// Shared contract implemented by the Direct and WAL disk manager flavors.
pub trait DiskManager: Send + Sync {
    /// Size in bytes of one page in this file.
    fn page_size(&self) -> usize;

    /// Highest `PageId` ever allocated in this file.
    fn max_page_id(&self) -> PageId;

    /// Fill `page` with the on-disk bytes for `page_id`. No side effects.
    fn read(&self, page_id: PageId, page: &mut Page) -> Result<()>;

    /// Fill `pages` with `pages.len()` consecutive pages starting at
    /// `start_page_id`, in one transfer.
    fn read_many(&self, start_page_id: PageId, pages: &mut [Page]) -> Result<()>;

    /// Durably update `page_id`'s contents. May be buffered until `commit`.
    fn update(&self, page_id: PageId, page: &Page) -> Result<()>;

    /// Allocate a page, popped from the free-page stack or freshly
    /// extending the file.
    fn allocate(&self) -> Result<PageId>;

    /// Free a page: push it onto the free-page stack, or mark it dangling
    /// if the stack has no room.
    fn free(&self, page_id: PageId) -> Result<()>;

    /// Atomically apply all pending updates since the last commit/rollback.
    fn commit(&self) -> Result<()>;

    /// Discard all pending updates since the last commit/rollback.
    fn rollback(&self) -> Result<()>;

    /// Flush the header, mark the file properly closed, and release the
    /// file lock.
    fn close(&self) -> Result<()>;
}
