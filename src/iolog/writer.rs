use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use super::timing::{write_record, TimingRecord};
use super::{info, Error, IoEvent, WithPath};
use crate::eventlog::Eventlog;
use crate::log::dev_warn;
use crate::system::file::{
    create_new_private, create_private_dir_all, open_append_private, FileLock, PRIVATE_FILE_MODE,
};
use crate::system::signal::SignalNumber;
use crate::system::time::{format_time, TimeSpec};

/// Values for the `%{name}` escapes of `iolog_dir` and `iolog_file`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathEscapes<'a> {
    pub user: &'a str,
    pub group: &'a str,
    pub runas_user: &'a str,
    pub runas_group: &'a str,
    pub hostname: &'a str,
    pub command: &'a str,
}

impl PathEscapes<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "user" => self.user,
            "group" => self.group,
            "runas_user" => self.runas_user,
            "runas_group" => self.runas_group,
            "hostname" => self.hostname,
            "command" => self.command.rsplit('/').next().unwrap_or(self.command),
            _ => return None,
        };
        Some(value.to_string())
    }
}

const MAX_SEQUENCE: u64 = 36 * 36 * 36 * 36 * 36 * 36;

/// Take the next session id from the `seq` file in `iolog_dir`: six base 36 digits, stored
/// under a lock so that concurrent sessions never share one.
pub fn next_sequence(iolog_dir: &Path) -> Result<String, Error> {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    create_private_dir_all(iolog_dir).at(iolog_dir)?;
    let path = iolog_dir.join("seq");
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(PRIVATE_FILE_MODE)
        .open(&path)
        .at(&path)?;
    let lock = FileLock::exclusive(&file, false).at(&path)?;

    let mut buf = [0u8; 31];
    let nread = file.read(&mut buf).at(&path)?;
    let text = String::from_utf8_lossy(&buf[..nread]);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    let current = if text.is_empty() {
        0
    } else {
        match u64::from_str_radix(text, 36) {
            Ok(id) if id < MAX_SEQUENCE => id,
            _ => {
                dev_warn!("{}: bad sequence number: {text}", path.display());
                0
            }
        }
    };

    let mut id = current + 1;
    let mut sessid = [b'0'; 6];
    for digit in sessid.iter_mut().rev() {
        *digit = DIGITS[(id % 36) as usize];
        id /= 36;
    }

    let mut contents = sessid.to_vec();
    contents.push(b'\n');
    file.seek(SeekFrom::Start(0)).at(&path)?;
    file.write_all(&contents).at(&path)?;
    file.set_len(contents.len() as u64).at(&path)?;
    lock.unlock().at(&path)?;

    Ok(String::from_utf8_lossy(&sessid).into_owned())
}

/// Expand one path component. `%{seq}` is only available when `seq_dir` is given, and
/// expands to the next session id as `XX/XX/XX`; any other `%` escape is left to
/// `strftime(3)`.
fn expand(template: &str, escapes: &PathEscapes, seq_dir: Option<&Path>) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut strftime = false;
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = &rest[pos..];

        if let Some(body) = escape.strip_prefix("%{") {
            if let Some(end) = body.find('}') {
                let name = &body[..end];
                let value = match name {
                    "seq" => match seq_dir {
                        Some(dir) => {
                            let id = next_sequence(dir)?;
                            Some(format!("{}/{}/{}", &id[0..2], &id[2..4], &id[4..6]))
                        }
                        None => None,
                    },
                    _ => escapes.lookup(name),
                };
                if let Some(value) = value {
                    out.push_str(&value);
                    rest = &body[end + 1..];
                    continue;
                }
            }
            strftime = true;
            out.push('%');
            rest = &escape[1..];
        } else if escape.starts_with("%%") {
            out.push('%');
            rest = &escape[2..];
        } else {
            strftime = true;
            out.push('%');
            rest = &escape[1..];
        }
    }
    out.push_str(rest);

    if strftime {
        let now = TimeSpec::now()?;
        out = format_time(now.secs(), &out, false)
            .ok_or_else(|| Error::Corrupt(format!("unable to expand {template}")))?;
    }
    Ok(out)
}

/// The directory a new session is recorded in: `dir_template` joined with `file_template`,
/// both with their escapes expanded. The sequence file lives in the expanded directory.
pub fn expand_path(
    dir_template: &str,
    file_template: &str,
    escapes: &PathEscapes,
) -> Result<PathBuf, Error> {
    let dir = expand(dir_template, escapes, None)?;
    let mut dir = dir.as_str();
    while dir.len() > 1 && dir.ends_with('/') {
        dir = &dir[..dir.len() - 1];
    }
    let dir = Path::new(dir);

    let file = expand(file_template.trim_start_matches('/'), escapes, Some(dir))?;
    Ok(dir.join(file))
}

/// Writes a new recording: the timing file, one file per data stream that is used, and the
/// session info files.
pub struct IoLogWriter {
    dir: PathBuf,
    timing: BufWriter<File>,
    streams: [Option<BufWriter<File>>; 5],
    flush: bool,
}

impl IoLogWriter {
    /// Create the session directory. It is an error for a recording to exist there already.
    pub fn create(dir: &Path, evlog: &Eventlog, flush: bool) -> Result<Self, Error> {
        create_private_dir_all(dir).at(dir)?;
        let timing_path = dir.join("timing");
        let timing = create_new_private(&timing_path).at(&timing_path)?;
        info::write_info(dir, evlog)?;

        Ok(IoLogWriter {
            dir: dir.to_path_buf(),
            timing: BufWriter::new(timing),
            streams: Default::default(),
            flush,
        })
    }

    /// Continue a recording that was interrupted.
    pub fn append(dir: &Path, flush: bool) -> Result<Self, Error> {
        let timing_path = dir.join("timing");
        if !timing_path.exists() {
            return Err(Error::Corrupt(format!("{} does not exist", timing_path.display())));
        }
        let timing = open_append_private(&timing_path).at(&timing_path)?;

        Ok(IoLogWriter {
            dir: dir.to_path_buf(),
            timing: BufWriter::new(timing),
            streams: Default::default(),
            flush,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn stream(&mut self, event: IoEvent) -> Result<&mut BufWriter<File>, Error> {
        let (Some(index), Some(name)) = (event.stream_index(), event.stream_name()) else {
            return Err(Error::Corrupt(format!("{event:?} does not carry data")));
        };
        let slot = &mut self.streams[index];
        if slot.is_none() {
            let path = self.dir.join(name);
            *slot = Some(BufWriter::new(open_append_private(&path).at(&path)?));
        }
        // filled in just above
        slot.as_mut()
            .ok_or_else(|| Error::Corrupt(format!("{name} is not open")))
    }

    /// Append `record`, writing its data to the matching stream first.
    pub fn write_record(&mut self, record: &TimingRecord, data: &[u8]) -> Result<(), Error> {
        if record.data_len() != data.len() {
            return Err(Error::Corrupt(format!(
                "record announces {} bytes but {} were given",
                record.data_len(),
                data.len()
            )));
        }
        if !data.is_empty() {
            let flush = self.flush;
            let stream = self.stream(record.event)?;
            stream.write_all(data)?;
            if flush {
                stream.flush()?;
            }
        }

        write_record(&mut self.timing, record)?;
        if self.flush {
            self.timing.flush()?;
        }
        Ok(())
    }

    pub fn write_io(&mut self, event: IoEvent, delay: TimeSpec, data: &[u8]) -> Result<(), Error> {
        self.write_record(&TimingRecord::io(event, delay, data.len()), data)
    }

    pub fn write_winsize(&mut self, delay: TimeSpec, lines: u32, cols: u32) -> Result<(), Error> {
        self.write_record(&TimingRecord::winsize(delay, lines, cols), &[])
    }

    pub fn write_suspend(&mut self, delay: TimeSpec, signal: SignalNumber) -> Result<(), Error> {
        self.write_record(&TimingRecord::suspend(delay, signal), &[])
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        for stream in self.streams.iter_mut().flatten() {
            stream.flush()?;
        }
        self.timing.flush()?;
        Ok(())
    }
}

impl Drop for IoLogWriter {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            dev_warn!("unable to flush {}: {err}", self.dir.display());
        }
    }
}
