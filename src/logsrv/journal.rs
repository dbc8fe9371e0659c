//! Journals of relayed sessions.
//!
//! Every message a client sends is appended, length prefixed and unchanged, to a journal
//! in `<relay_dir>/incoming`. When the session is complete the journal moves to
//! `<relay_dir>/outgoing`, from where it is forwarded to the next server.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use uuid::Uuid;

use super::handler::ClientMessageHandler;
use super::proto::{
    AcceptMessage, AlertMessage, ChangeWindowSize, ClientMessage, CommandSuspend, ExitMessage,
    IoBuffer, RejectMessage, RestartMessage, MESSAGE_SIZE_MAX,
};
use super::Error;
use crate::iolog::IoEvent;
use crate::log::{dev_debug, dev_warn};
use crate::system::file::{create_new_private, create_private_dir_all, FileLock};
use crate::system::time::TimeSpec;

/// Where journals are kept when no other directory is configured.
pub const DEFAULT_RELAY_DIR: &str = env!("PATH_RELAY_DIR");

const INCOMING: &str = "incoming";
pub(super) const OUTGOING: &str = "outgoing";

fn journal_error(what: &str, err: io::Error) -> Error {
    Error::Journal(format!("{what}: {err}"))
}

struct OpenJournal {
    // declared before `file` so the lock is released first
    lock: FileLock,
    file: File,
    path: PathBuf,
    uuid: Uuid,
}

/// A message handler that journals one client session.
pub struct Journal {
    relay_dir: PathBuf,
    hostname: Option<String>,
    open: Option<OpenJournal>,
    finished: Option<PathBuf>,
}

impl Journal {
    pub fn new(relay_dir: impl Into<PathBuf>) -> Self {
        Journal {
            relay_dir: relay_dir.into(),
            hostname: None,
            open: None,
            finished: None,
        }
    }

    /// Prefix log ids with `hostname/`.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    /// Where the journal ended up once the session completed.
    pub fn finished_path(&self) -> Option<&Path> {
        self.finished.as_deref()
    }

    fn incoming(&self) -> PathBuf {
        self.relay_dir.join(INCOMING)
    }

    fn outgoing(&self) -> PathBuf {
        self.relay_dir.join(OUTGOING)
    }

    /// Start a new journal with a fresh name in the incoming directory.
    pub fn create(&mut self) -> Result<(), Error> {
        if self.open.is_some() || self.finished.is_some() {
            return Err(Error::Protocol("journal already started".to_string()));
        }
        let incoming = self.incoming();
        create_private_dir_all(&incoming)
            .map_err(|err| journal_error("unable to create journal file", err))?;

        let uuid = Uuid::new_v4();
        let path = incoming.join(uuid.hyphenated().to_string());
        let file = create_new_private(&path)
            .map_err(|err| journal_error("unable to create journal file", err))?;
        let lock = FileLock::exclusive(&file, true)
            .map_err(|err| journal_error("unable to lock journal file", err))?;
        dev_debug!("created journal {}", path.display());

        self.open = Some(OpenJournal {
            lock,
            file,
            path,
            uuid,
        });
        Ok(())
    }

    /// Reopen the incoming journal named by `log_id` and position it exactly at
    /// `resume_point`, discarding anything recorded after that point.
    pub fn restart(&mut self, log_id: &str, resume_point: TimeSpec) -> Result<(), Error> {
        if self.open.is_some() || self.finished.is_some() {
            return Err(Error::Protocol("journal already started".to_string()));
        }
        // strip the host part, if any
        let encoded = match log_id.find('/') {
            Some(pos) if pos > 0 => &log_id[pos + 1..],
            _ => log_id,
        };
        let uuid = URL_SAFE
            .decode(encoded)
            .ok()
            .and_then(|bytes| Uuid::from_slice(&bytes).ok())
            .ok_or_else(|| Error::Journal(format!("invalid log id {log_id}")))?;

        let path = self.incoming().join(uuid.hyphenated().to_string());
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| journal_error(&format!("unable to open {}", path.display()), err))?;
        let lock = FileLock::exclusive(&file, true)
            .map_err(|err| journal_error("unable to lock journal file", err))?;

        let offset = seek_journal(&mut file, resume_point)?;
        file.set_len(offset)
            .map_err(|err| journal_error("unable to truncate journal file", err))?;
        file.seek(SeekFrom::End(0))
            .map_err(|err| journal_error("unable to seek journal file", err))?;
        dev_debug!("restarted journal {} at {resume_point}", path.display());

        self.open = Some(OpenJournal {
            lock,
            file,
            path,
            uuid,
        });
        Ok(())
    }

    pub fn append(&mut self, raw: &[u8]) -> Result<(), Error> {
        let Some(journal) = &mut self.open else {
            return Err(Error::Protocol("message before the session started".to_string()));
        };
        if raw.len() > MESSAGE_SIZE_MAX {
            return Err(Error::TooLarge(raw.len()));
        }
        let mut framed = Vec::with_capacity(raw.len() + 4);
        framed.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        framed.extend_from_slice(raw);
        journal
            .file
            .write_all(&framed)
            .map_err(|err| journal_error("unable to write journal file", err))
    }

    /// Flush the journal and move it to the outgoing directory.
    pub fn finish(&mut self) -> Result<PathBuf, Error> {
        let Some(journal) = self.open.take() else {
            return Err(Error::Protocol("no journal to finish".to_string()));
        };
        journal
            .file
            .sync_all()
            .map_err(|err| journal_error("unable to write journal file", err))?;

        let outgoing = self.outgoing();
        create_private_dir_all(&outgoing)
            .map_err(|err| journal_error("unable to create outgoing directory", err))?;
        let target = outgoing.join(journal.uuid.hyphenated().to_string());
        fs::rename(&journal.path, &target).map_err(|err| {
            journal_error(&format!("unable to rename {}", journal.path.display()), err)
        })?;
        if let Err(err) = journal.lock.unlock() {
            dev_warn!("unable to unlock journal: {err}");
        }

        self.finished = Some(target.clone());
        Ok(target)
    }
}

/// Read the length prefix of the next journal entry; `None` at a clean end of file.
fn read_entry<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, Error> {
    let mut len = [0; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(journal_error("unable to read journal file", err)),
    }
    let len = u32::from_be_bytes(len) as usize;
    if len > MESSAGE_SIZE_MAX {
        return Err(Error::Journal("client message too large".to_string()));
    }
    let mut raw = vec![0; len];
    reader.read_exact(&mut raw).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::Journal("unexpected EOF reading journal file".to_string())
        }
        _ => journal_error("unable to read journal file", err),
    })?;
    Ok(Some(raw))
}

/// Replay the journal from the start until `target` has elapsed; returns the offset just
/// past the last message that belongs before the restart point.
fn seek_journal(file: &mut File, target: TimeSpec) -> Result<u64, Error> {
    file.seek(SeekFrom::Start(0))
        .map_err(|err| journal_error("unable to seek journal file", err))?;
    let mut reader = BufReader::new(&mut *file);
    let mut elapsed = TimeSpec::ZERO;
    let mut offset = 0u64;

    loop {
        let Some(raw) = read_entry(&mut reader)? else {
            return Err(Error::Journal("unexpected EOF reading journal file".to_string()));
        };
        offset += 4 + raw.len() as u64;
        let message = ClientMessage::decode(&raw)?;
        if let Some(delay) = message.delay() {
            elapsed += delay;
        }
        if elapsed >= target {
            break;
        }
    }

    if elapsed != target {
        return Err(Error::Journal(
            "invalid journal file, unable to restart".to_string(),
        ));
    }
    Ok(offset)
}

impl ClientMessageHandler for Journal {
    fn accept(&mut self, _: &AcceptMessage, raw: &[u8]) -> Result<(), Error> {
        self.create()?;
        self.append(raw)
    }

    fn reject(&mut self, _: &RejectMessage, raw: &[u8]) -> Result<(), Error> {
        self.create()?;
        self.append(raw)?;
        self.finish().map(|_| ())
    }

    fn exit(&mut self, _: &ExitMessage, raw: &[u8]) -> Result<(), Error> {
        self.append(raw)?;
        self.finish().map(|_| ())
    }

    fn restart(&mut self, msg: &RestartMessage, _: &[u8]) -> Result<(), Error> {
        Journal::restart(self, &msg.log_id, msg.resume_point)
    }

    fn alert(&mut self, _: &AlertMessage, raw: &[u8]) -> Result<(), Error> {
        if self.open.is_none() {
            self.create()?;
        }
        self.append(raw)
    }

    fn iobuf(&mut self, _: IoEvent, _: &IoBuffer, raw: &[u8]) -> Result<(), Error> {
        self.append(raw)
    }

    fn winsize(&mut self, _: &ChangeWindowSize, raw: &[u8]) -> Result<(), Error> {
        self.append(raw)
    }

    fn suspend(&mut self, _: &CommandSuspend, raw: &[u8]) -> Result<(), Error> {
        self.append(raw)
    }

    fn log_id(&self) -> Option<String> {
        let journal = self.open.as_ref()?;
        let encoded = URL_SAFE.encode(journal.uuid.as_bytes());
        Some(match &self.hostname {
            Some(hostname) => format!("{hostname}/{encoded}"),
            None => encoded,
        })
    }
}

/// The messages of a completed journal, in the order they were received.
pub struct JournalReader {
    // declared before `reader` so the lock is released first
    _lock: Option<FileLock>,
    reader: BufReader<File>,
}

impl JournalReader {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|err| journal_error(&format!("unable to open {}", path.display()), err))?;
        Ok(JournalReader {
            _lock: None,
            reader: BufReader::new(file),
        })
    }

    /// Like [`open`](Self::open), but holds an exclusive lock on the journal for as long
    /// as the reader lives; fails at once if someone else has it locked.
    pub fn open_locked(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|err| journal_error(&format!("unable to open {}", path.display()), err))?;
        let lock = FileLock::exclusive(&file, true)
            .map_err(|err| journal_error(&format!("unable to lock {}", path.display()), err))?;
        Ok(JournalReader {
            _lock: Some(lock),
            reader: BufReader::new(file),
        })
    }

    /// The next message and its encoded form.
    pub fn read_message(&mut self) -> Result<Option<(ClientMessage, Vec<u8>)>, Error> {
        let Some(raw) = read_entry(&mut self.reader)? else {
            return Ok(None);
        };
        let message = ClientMessage::decode(&raw)?;
        Ok(Some((message, raw)))
    }
}

impl Iterator for JournalReader {
    type Item = Result<ClientMessage, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_message()
            .map(|message| message.map(|(message, _)| message))
            .transpose()
    }
}
