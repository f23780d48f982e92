//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] holds a [`Page`] plus the metadata the spec's PageRef field
//! list requires (§4.4): which page is loaded, retain count, dirty flag,
//! priority, and last-access order.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::replacer::Priority;
use crate::common::PageId;
use crate::storage::page::Page;

/// A frame in the buffer pool. Frames are allocated once at construction
/// and reused for the pool's entire lifetime (spec §5 resource policy).
///
/// # Thread Safety
/// All fields use interior mutability for safe concurrent access:
/// - `page`: `RwLock` for read/write synchronization
/// - `page_id`: `Mutex` for safe updates
/// - `pin_count` (retain count), `is_dirty`, `priority`, `last_access`: atomics
pub struct Frame {
    page: RwLock<Page>,
    page_id: Mutex<Option<PageId>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    priority: AtomicU8,
    last_access: AtomicU64,
}

impl Frame {
    /// Create a new empty frame holding a zeroed page of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: RwLock::new(Page::new(page_size)),
            page_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            priority: AtomicU8::new(Priority::NORMAL.0),
            last_access: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.lock() = page_id;
    }

    /// Increment the retain count. Returns the new count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the retain count. Returns the new count.
    ///
    /// # Panics
    /// Panics if the retain count is already 0 (spec invariant: retain
    /// count never goes negative).
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "retain count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        Priority(self.priority.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.0, Ordering::Relaxed);
    }

    /// Logical access-order stamp. Higher is more recent; the pool hands
    /// out values from a single monotonic counter.
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_last_access(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.page_id().is_some() && !self.is_pinned()
    }

    /// Reset the frame to empty state, ready for reuse.
    pub fn reset(&self) {
        self.page_mut().reset();
        self.set_page_id(None);
        self.pin_count.store(0, Ordering::Relaxed);
        self.is_dirty.store(false, Ordering::Relaxed);
        self.priority.store(Priority::NORMAL.0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = Frame::new(4096);
        assert!(frame.is_empty());
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
        assert_eq!(frame.pin_count(), 0);
        assert_eq!(frame.page_id(), None);
        assert_eq!(frame.priority(), Priority::NORMAL);
    }

    #[test]
    fn test_frame_pin_unpin() {
        let frame = Frame::new(4096);
        assert_eq!(frame.pin(), 1);
        assert!(frame.is_pinned());
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert!(frame.is_pinned());
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    #[should_panic(expected = "retain count underflow")]
    fn test_frame_unpin_underflow() {
        let frame = Frame::new(4096);
        frame.unpin();
    }

    #[test]
    fn test_frame_dirty_flag() {
        let frame = Frame::new(4096);
        assert!(!frame.is_dirty());
        frame.mark_dirty();
        assert!(frame.is_dirty());
        frame.clear_dirty();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_page_access() {
        let frame = Frame::new(4096);
        frame.page_mut().set_u8(0, 0xAB).unwrap();
        assert_eq!(frame.page().get_u8(0).unwrap(), 0xAB);
    }

    #[test]
    fn test_frame_page_id() {
        let frame = Frame::new(4096);
        assert_eq!(frame.page_id(), None);
        frame.set_page_id(Some(PageId::new(42)));
        assert_eq!(frame.page_id(), Some(PageId::new(42)));
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_frame_evictable() {
        let frame = Frame::new(4096);
        assert!(!frame.is_evictable());
        frame.set_page_id(Some(PageId::new(1)));
        assert!(frame.is_evictable());
        frame.pin();
        assert!(!frame.is_evictable());
        frame.unpin();
        assert!(frame.is_evictable());
    }

    #[test]
    fn test_frame_priority_roundtrip() {
        let frame = Frame::new(4096);
        frame.set_priority(Priority::HIGH);
        assert_eq!(frame.priority(), Priority::HIGH);
    }

    #[test]
    fn test_frame_reset() {
        let frame = Frame::new(4096);
        frame.set_page_id(Some(PageId::new(99)));
        frame.pin();
        frame.mark_dirty();
        frame.set_priority(Priority::HIGH);
        frame.page_mut().set_u8(100, 0xFF).unwrap();

        frame.reset();

        assert!(frame.is_empty());
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
        assert_eq!(frame.priority(), Priority::NORMAL);
        assert_eq!(frame.page().get_u8(100).unwrap(), 0);
    }

    #[test]
    fn test_frame_concurrent_pin() {
        use std::sync::Arc;
        use std::thread;

        let frame = Arc::new(Frame::new(4096));
        let mut handles = vec![];
        for _ in 0..10 {
            let frame_clone = Arc::clone(&frame);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    frame_clone.pin();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(frame.pin_count(), 1000);
    }
}
