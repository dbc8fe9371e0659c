use std::{
    collections::BTreeMap,
    io,
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use crate::cutils::cerr;
use libc::{c_short, pollfd, POLLERR, POLLHUP, POLLIN, POLLOUT};

/// The kind of event that will be monitored for a file descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PollEvent {
    /// Data may be read without blocking.
    Readable,
    /// Data may be written without blocking.
    Writable,
}

/// A set of indexed file descriptors to be polled using the [`poll`](https://manpage.me/?q=poll) system call.
pub struct PollSet<K> {
    fds: BTreeMap<K, (RawFd, bool, c_short)>,
}

impl<K: Ord + Clone> Default for PollSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> PollSet<K> {
    /// Create an empty set of file descriptors.
    pub const fn new() -> Self {
        Self {
            fds: BTreeMap::new(),
        }
    }

    /// Add a file descriptor under the provided key. This descriptor will be checked for the given
    /// poll event.
    ///
    /// If the provided key is already in the set, calling this function will overwrite the file
    /// descriptor for that key.
    pub fn add_fd<F: AsRawFd>(&mut self, key: K, fd: &F, event: PollEvent) {
        self.add_raw_fd(key, fd.as_raw_fd(), event)
    }

    pub fn add_raw_fd(&mut self, key: K, fd: RawFd, event: PollEvent) {
        let event = match event {
            PollEvent::Readable => POLLIN,
            PollEvent::Writable => POLLOUT,
        };
        self.fds.insert(key, (fd, true, event));
    }

    /// Remove the file descriptor under the provided key, if any.
    pub fn remove_fd(&mut self, key: &K) -> bool {
        self.fds.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.fds.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fds.values().all(|&(_, should_poll, _)| !should_poll)
    }

    /// Ignore the file descriptor under the provided key, if any.
    pub fn ignore_fd(&mut self, key: &K) {
        if let Some((_, should_poll, _)) = self.fds.get_mut(key) {
            *should_poll = false;
        }
    }

    /// Poll the set of file descriptors and return the key of the descriptors that are ready to be
    /// read or written.
    ///
    /// Blocks until one of the descriptors is ready or until `timeout` has elapsed, in which case
    /// the returned list is empty. A hang-up or error condition on a descriptor that is polled for
    /// reading reports it as ready, so the following read observes the condition.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<K>> {
        let (keys, mut fds): (Vec<&K>, Vec<pollfd>) = self
            .fds
            .iter()
            .filter(|(_, entry)| entry.1)
            .map(|(key, &(fd, _, events))| {
                (
                    key,
                    pollfd {
                        fd,
                        events,
                        revents: 0,
                    },
                )
            })
            .unzip();

        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let n = loop {
            match cerr(unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as _, timeout_ms) }) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => break result?,
            }
        };

        let mut ready = Vec::with_capacity(n as usize);

        for (key, fd) in keys.into_iter().zip(fds) {
            let mut events = fd.events & fd.revents;
            if fd.events & POLLIN != 0 && fd.revents & (POLLHUP | POLLERR) != 0 {
                events |= POLLIN;
            }

            if (events & POLLIN != 0) || (events & POLLOUT != 0) {
                ready.push(key.clone());
            }
        }

        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, os::unix::net::UnixStream};

    #[test]
    fn reports_ready_descriptors() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut set = PollSet::new();
        set.add_fd(("rx", PollEvent::Readable), &rx, PollEvent::Readable);
        set.add_fd(("tx", PollEvent::Writable), &tx, PollEvent::Writable);

        let ready = set.poll(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(ready, vec![("tx", PollEvent::Writable)]);

        tx.write_all(b"x").unwrap();
        set.ignore_fd(&("tx", PollEvent::Writable));
        let ready = set.poll(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(ready, vec![("rx", PollEvent::Readable)]);
    }

    #[test]
    fn times_out() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let mut set = PollSet::new();
        set.add_fd(0, &rx, PollEvent::Readable);
        assert!(set.poll(Some(Duration::from_millis(10))).unwrap().is_empty());
        assert!(set.remove_fd(&0));
        assert!(set.is_empty());
    }

    #[test]
    fn hangup_counts_as_readable() {
        let (tx, rx) = UnixStream::pair().unwrap();
        let mut set = PollSet::new();
        set.add_fd(1, &rx, PollEvent::Readable);
        drop(tx);
        assert_eq!(set.poll(Some(Duration::from_millis(100))).unwrap(), vec![1]);
    }
}
