//! RAII guards for page access.
//!
//! These guards provide safe access to pages in the buffer pool:
//! - [`PageReadGuard`] - Shared read access (multiple allowed)
//! - [`PageWriteGuard`] - Exclusive write access (auto-marks dirty)
//!
//! Both guards release (unpin) the page when dropped, per the spec's
//! `release()` operation (§4.4).

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::replacer::Priority;
use crate::common::{FrameId, PageId};
use crate::storage::page::Page;
use crate::storage::DiskManager;

use super::buffer_pool_manager::BufferPoolManager;

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
/// The page is automatically unpinned when the guard is dropped.
pub struct PageReadGuard<'a, D: DiskManager> {
    bpm: &'a BufferPoolManager<D>,
    frame_id: FrameId,
    page_id: PageId,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a, D: DiskManager> PageReadGuard<'a, D> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager<D>,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Eviction priority this page was fetched with (spec §4.4 PageRef field).
    pub fn priority(&self) -> Priority {
        self.bpm.frame_priority(self.frame_id)
    }

    /// Logical access-order stamp for this page's frame (spec §4.4 PageRef
    /// field).
    pub fn last_access(&self) -> u64 {
        self.bpm.frame_last_access(self.frame_id)
    }
}

impl<D: DiskManager> Deref for PageReadGuard<'_, D> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl<D: DiskManager> Drop for PageReadGuard<'_, D> {
    fn drop(&mut self) {
        self.bpm.unpin_page_internal(self.frame_id, false);
    }
}

/// Guard for exclusive write access to a page.
///
/// Only one `PageWriteGuard` can exist for a page at a time. The page is
/// automatically marked dirty and released when the guard is dropped.
pub struct PageWriteGuard<'a, D: DiskManager> {
    bpm: &'a BufferPoolManager<D>,
    frame_id: FrameId,
    page_id: PageId,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a, D: DiskManager> PageWriteGuard<'a, D> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager<D>,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Eviction priority this page was fetched/appended with (spec §4.4
    /// PageRef field).
    pub fn priority(&self) -> Priority {
        self.bpm.frame_priority(self.frame_id)
    }

    /// Logical access-order stamp for this page's frame (spec §4.4 PageRef
    /// field).
    pub fn last_access(&self) -> u64 {
        self.bpm.frame_last_access(self.frame_id)
    }
}

impl<D: DiskManager> Deref for PageWriteGuard<'_, D> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl<D: DiskManager> DerefMut for PageWriteGuard<'_, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.lock
    }
}

impl<D: DiskManager> Drop for PageWriteGuard<'_, D> {
    fn drop(&mut self) {
        self.bpm.unpin_page_internal(self.frame_id, true);
    }
}
