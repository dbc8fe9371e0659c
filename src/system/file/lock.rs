use std::{
    fs::File,
    io::Result,
    os::fd::{AsRawFd, RawFd},
};

use crate::cutils::cerr;

/// An advisory `flock(2)` lock, released when dropped.
///
/// The lock refers to the descriptor of the file it was taken on, so it must not outlive that
/// file.
#[derive(Debug)]
pub struct FileLock {
    fd: RawFd,
}

impl FileLock {
    /// Get an exclusive lock on the file. If `nonblocking` is false this waits while another
    /// process holds a lock on the file, otherwise it fails with `WouldBlock`.
    pub fn exclusive(file: &File, nonblocking: bool) -> Result<Self> {
        let fd = file.as_raw_fd();
        flock(fd, LockOp::LockExclusive, nonblocking)?;
        Ok(Self { fd })
    }

    /// Release the lock on the file.
    pub fn unlock(self) -> Result<()> {
        let fd = self.fd;
        std::mem::forget(self);
        flock(fd, LockOp::Unlock, false)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        flock(self.fd, LockOp::Unlock, false).ok();
    }
}

#[derive(Clone, Copy, Debug)]
enum LockOp {
    LockExclusive,
    Unlock,
}

impl LockOp {
    fn as_flock_operation(self) -> libc::c_int {
        match self {
            LockOp::LockExclusive => libc::LOCK_EX,
            LockOp::Unlock => libc::LOCK_UN,
        }
    }
}

fn flock(fd: RawFd, action: LockOp, nonblocking: bool) -> Result<()> {
    let mut operation = action.as_flock_operation();
    if nonblocking {
        operation |= libc::LOCK_NB;
    }

    cerr(unsafe { libc::flock(fd, operation) })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locking_of_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let f = File::create(&path).unwrap();
        let lock = FileLock::exclusive(&f, true).unwrap();

        // a second open file description cannot take the lock
        let other = File::open(&path).unwrap();
        let err = FileLock::exclusive(&other, true).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);

        lock.unlock().unwrap();
        assert!(FileLock::exclusive(&other, true).is_ok());
    }
}
