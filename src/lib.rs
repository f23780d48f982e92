//! HARE - a paged, column-oriented, persistent byte store.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                              HARE                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │        Column Files (column/)                             │   │
//! │  │   Fixed-width columns  |  Variable-length columns         │   │
//! │  │       Reader / Writer / Cursor over TupleId ranges        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Buffer Pool (buffer/)  [Runtime Swappable]      │   │
//! │  │   ┌─────────────────────────────────────────────────┐   │   │
//! │  │   │     Eviction Policies: FIFO | LRU (pluggable)    │   │   │
//! │  │   └─────────────────────────────────────────────────┘   │   │
//! │  │      BufferPoolManager + Frame + Statistics               │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                        │   │
//! │  │   Page + page views + DiskManager (Direct | WAL-backed)   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, TupleId, Address, Error, config)
//! - [`storage`] - Page formats, disk I/O, and the write-ahead log
//! - [`buffer`] - Buffer pool management and eviction policies
//! - [`column`] - Fixed/variable-length column file readers, writers, cursors
//!
//! # Quick Start
//! ```no_run
//! use hare::common::config::OpenOptions;
//! use hare::storage::{DirectDiskManager, DiskManager};
//!
//! // Open (creating if absent) a data file.
//! let dm = DirectDiskManager::open("my_database.hare", OpenOptions::new()).unwrap();
//!
//! // Allocate and write a page.
//! let page_id = dm.allocate().unwrap();
//! ```

pub mod buffer;
pub mod column;
pub mod common;
pub mod storage;

pub use buffer::{BufferPoolManager, BufferPoolStats, Frame, PageReadGuard, PageWriteGuard, StatsSnapshot};
pub use common::{Address, Error, FrameId, PageId, Result, SlotId, TupleId};
pub use storage::page::Page;
pub use storage::{DirectDiskManager, DiskManager, WalDiskManager};
