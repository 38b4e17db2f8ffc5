//! Advisory locking on the sibling `<name>.lock` file.
//!
//! Shared locks may be held by many readers at once; an exclusive lock
//! excludes everyone else. Acquisition polls for a bounded time and then
//! reports failure, so callers can fall back to unlocked I/O.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use fd_lock::RwLock;

use crate::error::SessionError;

/// Delay between lock attempts while another process holds the lock
const LOCK_POLL_MILLIS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Run `op` while holding the lock file in `mode`.
///
/// Blocks the calling thread for up to `wait`. `Err` means the lock could
/// not be taken in time; `op` has not run.
pub fn with_file_lock<T>(
    lock_path: &Path,
    mode: LockMode,
    wait: Duration,
    op: impl FnOnce() -> T,
) -> Result<T> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(lock_path)?;
    let mut lock = RwLock::new(file);
    let deadline = Instant::now() + wait;

    loop {
        let err = match mode {
            LockMode::Shared => match lock.try_read() {
                Ok(_guard) => return Ok(op()),
                Err(e) => e,
            },
            LockMode::Exclusive => match lock.try_write() {
                Ok(_guard) => return Ok(op()),
                Err(e) => e,
            },
        };

        if err.kind() == ErrorKind::WouldBlock && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(LOCK_POLL_MILLIS));
            continue;
        }
        return Err(SessionError::TransientStore(format!(
            "could not lock {}: {}",
            lock_path.display(),
            err
        ))
        .into());
    }
}
