//! The timing file: one line per recorded event,
//! `<event> <seconds>.<nanoseconds> <bytes>` for data, `<event> <delay> <lines> <cols>` for
//! a window size change and `<event> <delay> <signal>` for a suspend.
use std::fmt;
use std::io::{self, BufRead, Write};

use super::{Error, IoEvent};
use crate::system::signal::{short_signal_name, signal_number, SignalNumber};
use crate::system::time::TimeSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Bytes(usize),
    WinSize { lines: u32, cols: u32 },
    Suspend(SignalNumber),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingRecord {
    pub event: IoEvent,
    /// Time since the previous record.
    pub delay: TimeSpec,
    pub payload: Payload,
}

impl TimingRecord {
    pub fn io(event: IoEvent, delay: TimeSpec, len: usize) -> Self {
        TimingRecord {
            event,
            delay,
            payload: Payload::Bytes(len),
        }
    }

    pub fn winsize(delay: TimeSpec, lines: u32, cols: u32) -> Self {
        TimingRecord {
            event: IoEvent::WinSize,
            delay,
            payload: Payload::WinSize { lines, cols },
        }
    }

    pub fn suspend(delay: TimeSpec, signal: SignalNumber) -> Self {
        TimingRecord {
            event: IoEvent::Suspend,
            delay,
            payload: Payload::Suspend(signal),
        }
    }

    /// Number of bytes this record consumes from its data stream.
    pub fn data_len(&self) -> usize {
        match self.payload {
            Payload::Bytes(len) => len,
            _ => 0,
        }
    }
}

impl fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.event.code(), self.delay)?;
        match self.payload {
            Payload::Bytes(len) => write!(f, "{len}"),
            Payload::WinSize { lines, cols } => write!(f, "{lines} {cols}"),
            Payload::Suspend(signal) => f.write_str(&short_signal_name(signal)),
        }
    }
}

pub fn write_record<W: Write>(out: &mut W, record: &TimingRecord) -> io::Result<()> {
    writeln!(out, "{record}")
}

fn leading_digits(text: &str) -> (&str, &str) {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text.split_at(end)
}

/// Parse `<seconds><radix><fraction>` followed by optional whitespace. The fraction is
/// scaled to nanoseconds without going through floating point; `decimal` is accepted as an
/// alternative radix for files written in a locale that uses it.
pub fn parse_delay(text: &str, decimal: char) -> Option<(TimeSpec, &str)> {
    let (secs, rest) = leading_digits(text);
    let secs: i64 = secs.parse().ok()?;

    let rest = rest
        .strip_prefix('.')
        .or_else(|| rest.strip_prefix(decimal))?;

    let (fraction, rest) = leading_digits(rest);
    let nsecs = if fraction.is_empty() {
        0
    } else {
        let mut digits = fraction[..fraction.len().min(9)].to_string();
        while digits.len() < 9 {
            digits.push('0');
        }
        digits.parse::<i64>().ok()?
    };

    Some((TimeSpec::new(secs, nsecs), rest.trim_start()))
}

fn parse_uint(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parse one line of a timing file (without its newline). `adjustment` carries the
/// correction for legacy event codes from one line to the next.
pub fn parse_record(line: &str, adjustment: &mut i64, decimal: char) -> Result<TimingRecord, Error> {
    let invalid = || Error::InvalidTiming(line.to_string());

    let (code, rest) = leading_digits(line);
    if code.is_empty() || !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return Err(invalid());
    }
    let code: i64 = code.parse().map_err(|_| invalid())?;
    if code >= IoEvent::COUNT {
        return Err(invalid());
    }
    if code == IoEvent::LEGACY_TTYOUT {
        *adjustment = 2;
    }
    let event = IoEvent::from_code(code - *adjustment).ok_or_else(invalid)?;

    let (delay, rest) = parse_delay(rest.trim_start(), decimal).ok_or_else(invalid)?;

    let payload = match event {
        IoEvent::Suspend => {
            let signal = match parse_uint(rest) {
                Some(number) => SignalNumber::try_from(number).ok(),
                None => signal_number(rest),
            };
            Payload::Suspend(signal.ok_or_else(invalid)?)
        }
        IoEvent::WinSize => {
            let (lines, cols) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .ok_or_else(invalid)?;
            let lines = parse_uint(lines).and_then(|n| u32::try_from(n).ok());
            let cols = parse_uint(cols.trim_start()).and_then(|n| u32::try_from(n).ok());
            match (lines, cols) {
                (Some(lines), Some(cols)) if lines <= i32::MAX as u32 && cols <= i32::MAX as u32 => {
                    Payload::WinSize { lines, cols }
                }
                _ => return Err(invalid()),
            }
        }
        _ => {
            let len = parse_uint(rest)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(invalid)?;
            Payload::Bytes(len)
        }
    };

    Ok(TimingRecord {
        event,
        delay,
        payload,
    })
}

/// Reads the records of a timing file in order.
pub struct TimingReader<R> {
    reader: R,
    adjustment: i64,
    decimal: char,
    line: String,
    offset: u64,
}

impl<R: BufRead> TimingReader<R> {
    pub fn new(reader: R) -> Self {
        TimingReader {
            reader,
            adjustment: 0,
            decimal: '.',
            line: String::new(),
            offset: 0,
        }
    }

    /// Also accept `decimal` as the radix of delays.
    pub fn with_decimal(mut self, decimal: char) -> Self {
        self.decimal = decimal;
        self
    }

    /// Bytes of the file consumed by the records read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The next record, or `None` at the end of the file.
    pub fn read_record(&mut self) -> Result<Option<TimingRecord>, Error> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        self.offset += n as u64;
        let line = self.line.trim_end_matches('\n');
        parse_record(line, &mut self.adjustment, self.decimal).map(Some)
    }
}

impl<R: BufRead> Iterator for TimingReader<R> {
    type Item = Result<TimingRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}
