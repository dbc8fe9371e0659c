use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use super::timing::{TimingReader, TimingRecord};
use super::{info, Error, IoEvent, WithPath};
use crate::eventlog::Eventlog;
use crate::system::time::TimeSpec;

/// An I/O log directory opened for replay.
pub struct IoLogFiles {
    dir: PathBuf,
    timing: TimingReader<BufReader<File>>,
    streams: [Option<File>; 5],
    elapsed: TimeSpec,
}

impl IoLogFiles {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        let timing_path = dir.join("timing");
        let timing = File::open(&timing_path).at(&timing_path)?;

        let mut streams: [Option<File>; 5] = Default::default();
        for (slot, event) in streams.iter_mut().zip(IoEvent::STREAMS) {
            let Some(name) = event.stream_name() else {
                continue;
            };
            let path = dir.join(name);
            *slot = match File::open(&path) {
                Ok(file) => Some(file),
                Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                Err(err) => return Err(Error::Io(Some(path), err)),
            };
        }

        Ok(IoLogFiles {
            dir,
            timing: TimingReader::new(BufReader::new(timing)),
            streams,
            elapsed: TimeSpec::ZERO,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn info(&self) -> Result<Eventlog, Error> {
        info::read_info(&self.dir)
    }

    /// The data streams present in the directory.
    pub fn streams(&self) -> Vec<IoEvent> {
        IoEvent::STREAMS
            .into_iter()
            .zip(&self.streams)
            .filter(|(_, file)| file.is_some())
            .map(|(event, _)| event)
            .collect()
    }

    /// The sum of the delays of all records read so far.
    pub fn elapsed(&self) -> TimeSpec {
        self.elapsed
    }

    fn stream(&mut self, event: IoEvent) -> Result<&mut File, Error> {
        event
            .stream_index()
            .and_then(|index| self.streams[index].as_mut())
            .ok_or_else(|| Error::Corrupt(format!("missing {:?} stream", event)))
    }

    /// The next timing record; its data, if any, must be consumed with
    /// [`read_data`](Self::read_data) before reading another record.
    pub fn read_record(&mut self) -> Result<Option<TimingRecord>, Error> {
        let record = self.timing.read_record()?;
        if let Some(record) = &record {
            self.elapsed += record.delay;
        }
        Ok(record)
    }

    pub fn read_data(&mut self, record: &TimingRecord) -> Result<Vec<u8>, Error> {
        let len = record.data_len();
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut data = vec![0; len];
        self.stream(record.event)?
            .read_exact(&mut data)
            .map_err(|err| short_read(record.event, err))?;
        Ok(data)
    }

    fn skip_data(&mut self, record: &TimingRecord) -> Result<(), Error> {
        let len = record.data_len() as u64;
        if len == 0 {
            return Ok(());
        }
        let stream = self.stream(record.event)?;
        let skipped = io::copy(&mut stream.take(len), &mut io::sink())?;
        if skipped != len {
            return Err(short_read(
                record.event,
                io::ErrorKind::UnexpectedEof.into(),
            ));
        }
        Ok(())
    }

    /// Skip records, and the data they refer to, until exactly `target` has elapsed.
    pub fn seek_to(&mut self, target: TimeSpec) -> Result<(), Error> {
        while self.elapsed < target {
            let Some(record) = self.read_record()? else {
                return Err(Error::NotFound(target));
            };
            self.skip_data(&record)?;
        }

        if self.elapsed == target {
            Ok(())
        } else {
            Err(Error::NotFound(target))
        }
    }

    /// Cut the timing file and every stream at the current read position, dropping what
    /// was recorded after it.
    pub fn truncate(&mut self) -> Result<(), Error> {
        let cut = |path: PathBuf, len: u64| -> Result<(), Error> {
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_len(len))
                .at(path)
        };
        cut(self.dir.join("timing"), self.timing.offset())?;
        for (event, stream) in IoEvent::STREAMS.into_iter().zip(&mut self.streams) {
            let (Some(file), Some(name)) = (stream, event.stream_name()) else {
                continue;
            };
            let position = file.stream_position()?;
            cut(self.dir.join(name), position)?;
        }
        Ok(())
    }
}

fn short_read(event: IoEvent, err: io::Error) -> Error {
    Error::Corrupt(format!(
        "{} stream is shorter than its timing records: {err}",
        event.stream_name().unwrap_or("unknown")
    ))
}
