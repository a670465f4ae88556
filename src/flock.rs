use std::{
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use log::{debug, trace};
use thiserror::Error;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long another repofetch process may hold the lock before we give up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Exclusive advisory lock on a file, held until dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("timed out after {timeout:?} waiting for the lock on {path}", path = .path.display())]
    Timeout { path: PathBuf, timeout: Duration },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FileLock {
    pub fn new(path: &Path) -> Result<Self, Error> {
        Self::with_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(path: &Path, timeout: Duration) -> Result<Self, Error> {
        let file = File::create(path)?;
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(outcome) if outcome.acquired() => {
                    trace!("Locked {}", path.display());
                    return Ok(Self {
                        path: path.to_owned(),
                        _file: file,
                    });
                }
                Ok(_) => {}
                Err(error)
                    if error.raw_os_error() == fs4::lock_contended_error().raw_os_error() => {}
                Err(error) => return Err(error.into()),
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    path: path.to_owned(),
                    timeout,
                });
            }
            debug!("Failed to acquire a lock on {}, retrying", path.display());
            std::thread::sleep(RETRY_DELAY);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Contention is reported as `Ok(false)` by fs4 releases whose `try_lock_*` returns a flag and as
/// an error by older ones.
trait LockOutcome {
    fn acquired(self) -> bool;
}

impl LockOutcome for () {
    fn acquired(self) -> bool {
        true
    }
}

impl LockOutcome for bool {
    fn acquired(self) -> bool {
        self
    }
}
