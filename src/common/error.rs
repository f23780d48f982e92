//! Error types for HARE.
//!
//! A single enum covers every fallible operation in the storage core
//! (spec §7). Nothing here is locally recovered: WAL replay and checksum
//! failures are logged before being returned, never swallowed.

use thiserror::Error;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors raised by the HARE storage core.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk or WAL file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Exclusive file lock could not be acquired before the configured
    /// timeout elapsed.
    #[error("timed out acquiring exclusive lock on {path}")]
    FileLockTimeout { path: String },

    /// Header magic/version mismatch, CRC mismatch, page-view tag mismatch,
    /// or WAL checksum mismatch. Fatal for the file.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// A typed page view was opened against a page whose tag does not
    /// match the expected view.
    #[error("corrupt page: expected tag {expected}, found {found}")]
    CorruptPage { expected: u32, found: u32 },

    /// A byte-level accessor would read or write past the end of the page.
    #[error("index out of range: offset {offset} + width {width} > page size {page_size}")]
    IndexOutOfRange {
        offset: usize,
        width: usize,
        page_size: usize,
    },

    /// Requested PageId is negative or greater than the maximum allocated
    /// page id.
    #[error("page id {0:?} out of range")]
    PageOutOfRange(u64),

    /// Requested TupleId is outside [0, maxTupleId] for the column.
    #[error("tuple id {0} out of range")]
    TupleIdOutOfRange(u64),

    /// Access to a tombstoned TupleId.
    #[error("entry {0} has been deleted")]
    EntryDeleted(u64),

    /// A null value was written to a non-nullable column.
    #[error("null value not allowed for tuple {0}")]
    NullValueNotAllowed(u64),

    /// Operation attempted on a closed DiskManager, column file, or cursor.
    #[error("operation attempted on a closed resource: {0}")]
    Closed(String),

    /// The buffer pool has no evictable frame and cannot service a request.
    #[error("no free frames available in buffer pool")]
    NoFreeFrames,

    /// A variable-length payload does not fit in the page's remaining free
    /// space; the caller should allocate a new page and retry there.
    #[error("payload of {payload_len} bytes does not fit in {free_space} bytes of free space")]
    PageFull { payload_len: usize, free_space: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TupleIdOutOfRange(42);
        assert_eq!(format!("{}", err), "tuple id 42 out of range");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn might_fail() -> Result<u32> {
            Ok(42)
        }
        assert_eq!(might_fail().unwrap(), 42);
    }
}
