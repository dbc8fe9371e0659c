use std::collections::VecDeque;
use std::io::{self, Read};

use super::proto::MESSAGE_SIZE_MAX;
use super::Error;

/// Bytes received from a peer that have not yet formed a complete frame.
pub struct ConnectionBuffer {
    data: Vec<u8>,
    // start of the unconsumed bytes
    off: usize,
    // end of the received bytes
    len: usize,
}

impl Default for ConnectionBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuffer {
    const INITIAL_LEN: usize = 64 * 1024;

    pub fn new() -> Self {
        Self {
            data: vec![0; Self::INITIAL_LEN],
            off: 0,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.off == self.len
    }

    pub fn pending(&self) -> &[u8] {
        &self.data[self.off..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Ensure at least `needed` bytes fit after the unconsumed data, moving that data to the
    /// front first and growing to the next power of two if that is not enough.
    fn reserve(&mut self, needed: usize) {
        if self.off > 0 {
            self.data.copy_within(self.off..self.len, 0);
            self.len -= self.off;
            self.off = 0;
        }
        let wanted = self.len + needed;
        if wanted > self.data.len() {
            self.data.resize(wanted.next_power_of_two(), 0);
        }
    }

    /// Free space to receive into; follow up with [`commit`](Self::commit).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.len == self.data.len() {
            self.reserve(1);
        }
        &mut self.data[self.len..]
    }

    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.data.len());
        self.len += n;
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Read once from `source`; 0 means end of file.
    pub fn fill_from<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        let n = source.read(self.spare_mut())?;
        self.commit(n);
        Ok(n)
    }

    /// Remove and return the next complete message, without its length prefix.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let pending = self.pending();
        let Some(prefix) = pending.get(..4) else {
            return Ok(None);
        };
        let mut len_bytes = [0; 4];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MESSAGE_SIZE_MAX {
            return Err(Error::TooLarge(len));
        }

        if pending.len() < 4 + len {
            self.reserve(4 + len - self.pending().len());
            return Ok(None);
        }
        let message = pending[4..4 + len].to_vec();
        self.off += 4 + len;
        if self.off == self.len {
            self.off = 0;
            self.len = 0;
        }
        Ok(Some(message))
    }
}

/// Framed messages waiting to be sent, oldest first. Sent buffers are kept for reuse.
#[derive(Default)]
pub struct WriteQueue {
    queue: VecDeque<(Vec<u8>, usize)>,
    free: Vec<Vec<u8>>,
}

impl WriteQueue {
    const FREE_MAX: usize = 16;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn push_message(&mut self, message: &[u8]) -> Result<(), Error> {
        if message.len() > MESSAGE_SIZE_MAX {
            return Err(Error::TooLarge(message.len()));
        }
        let mut buf = self.free.pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(&(message.len() as u32).to_be_bytes());
        buf.extend_from_slice(message);
        self.queue.push_back((buf, 0));
        Ok(())
    }

    /// The unsent part of the oldest message.
    pub fn front(&self) -> Option<&[u8]> {
        self.queue.front().map(|(buf, off)| &buf[*off..])
    }

    /// Mark `n` bytes of the oldest message as sent.
    pub fn advance(&mut self, n: usize) {
        let Some((buf, off)) = self.queue.front_mut() else {
            return;
        };
        *off += n;
        if *off >= buf.len() {
            if let Some((buf, _)) = self.queue.pop_front() {
                if self.free.len() < Self::FREE_MAX {
                    self.free.push(buf);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        while let Some((buf, _)) = self.queue.pop_front() {
            if self.free.len() < Self::FREE_MAX {
                self.free.push(buf);
            }
        }
    }
}
