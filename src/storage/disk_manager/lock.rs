//! Exclusive file-lock acquisition with retry and timeout (spec §4.2, §5).

use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::common::{Error, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Acquire an exclusive advisory lock on `file`, retrying until `timeout`
/// elapses. Surfaces `FileLockTimeout` on failure.
pub fn acquire_exclusive(file: &File, path: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if Instant::now() < deadline => {
                thread::sleep(RETRY_INTERVAL);
            }
            Err(_) => {
                return Err(Error::FileLockTimeout {
                    path: path.to_string(),
                });
            }
        }
    }
}

pub fn release(file: &File) -> Result<()> {
    FileExt::unlock(file).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.test");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        acquire_exclusive(&file, path.to_str().unwrap(), Duration::from_secs(1)).unwrap();
        release(&file).unwrap();
    }

    #[test]
    fn test_acquire_times_out_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.test");
        let holder = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        holder.try_lock_exclusive().unwrap();

        let contender = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let result = acquire_exclusive(
            &contender,
            path.to_str().unwrap(),
            Duration::from_millis(80),
        );
        assert!(matches!(result, Err(Error::FileLockTimeout { .. })));
    }
}
