//! Storage layer: disk I/O, page formats, and write-ahead logging.
//!
//! - [`page`] — `Page` and its typed overlays.
//! - [`disk_manager`] — the `DiskManager` trait plus Direct and WAL flavors.
//! - [`wal`] — the `WriteAheadLog` companion used by the WAL flavor.

pub mod disk_manager;
pub mod page;
pub mod wal;

pub use disk_manager::{DirectDiskManager, DiskManager, WalDiskManager};
