//! The log server protocol messages and their protobuf wire encoding.
//!
//! Only what the protocol uses is implemented: varint scalars, strings, bytes, nested
//! messages and packed repeated integers. Unknown fields are skipped when decoding.
use super::Error;
use crate::eventlog::Eventlog;
use crate::system::time::TimeSpec;

/// Largest message either side may send, excluding the length prefix.
pub const MESSAGE_SIZE_MAX: usize = 2 * 1024 * 1024;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[derive(Default)]
pub(super) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push(value as u8 | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn key(&mut self, field: u32, wire: u8) {
        self.varint(u64::from(field) << 3 | u64::from(wire));
    }

    /// A scalar that is part of a `oneof`, and therefore written even when zero.
    fn varint_field(&mut self, field: u32, value: u64) {
        self.key(field, WIRE_VARINT);
        self.varint(value);
    }

    fn uint(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.varint_field(field, value);
        }
    }

    fn int64(&mut self, field: u32, value: i64) {
        self.uint(field, value as u64);
    }

    /// Negative values are sign extended to ten bytes, as protobuf does for `int32`.
    fn int32(&mut self, field: u32, value: i32) {
        self.uint(field, i64::from(value) as u64);
    }

    fn bool(&mut self, field: u32, value: bool) {
        self.uint(field, u64::from(value));
    }

    fn bytes_field(&mut self, field: u32, value: &[u8]) {
        self.key(field, WIRE_LEN);
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    fn bytes(&mut self, field: u32, value: &[u8]) {
        if !value.is_empty() {
            self.bytes_field(field, value);
        }
    }

    fn string(&mut self, field: u32, value: &str) {
        self.bytes(field, value.as_bytes());
    }

    fn message<M: Message + ?Sized>(&mut self, field: u32, message: &M) {
        let mut inner = Encoder::default();
        message.encode(&mut inner);
        self.bytes_field(field, &inner.buf);
    }

    pub(super) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub(super) enum Value<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    Fixed,
}

impl<'a> Value<'a> {
    fn varint(&self) -> Result<u64, Error> {
        match self {
            Value::Varint(value) => Ok(*value),
            _ => Err(Error::Protocol("expected an integer field".into())),
        }
    }

    fn int64(&self) -> Result<i64, Error> {
        Ok(self.varint()? as i64)
    }

    fn int32(&self) -> Result<i32, Error> {
        Ok(self.varint()? as i64 as i32)
    }

    fn bool(&self) -> Result<bool, Error> {
        Ok(self.varint()? != 0)
    }

    fn bytes(&self) -> Result<&'a [u8], Error> {
        match self {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(Error::Protocol("expected a length-delimited field".into())),
        }
    }

    fn string(&self) -> Result<String, Error> {
        String::from_utf8(self.bytes()?.to_vec())
            .map_err(|_| Error::Protocol("string field is not valid UTF-8".into()))
    }

    fn message<M: Message + Default>(&self) -> Result<M, Error> {
        M::decode(self.bytes()?)
    }
}

pub(super) struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Decoder { buf }
    }

    fn varint(&mut self) -> Result<u64, Error> {
        let mut value = 0u64;
        for (i, &byte) in self.buf.iter().enumerate().take(10) {
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                self.buf = &self.buf[i + 1..];
                return Ok(value);
            }
        }
        Err(Error::Protocol("malformed varint".into()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if len > self.buf.len() {
            return Err(Error::Protocol("truncated field".into()));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn next_field(&mut self) -> Result<Option<(u32, Value<'a>)>, Error> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = u32::try_from(key >> 3)
            .ok()
            .filter(|&field| field != 0)
            .ok_or_else(|| Error::Protocol("invalid field number".into()))?;

        let value = match (key & 7) as u8 {
            WIRE_VARINT => Value::Varint(self.varint()?),
            WIRE_FIXED64 => {
                self.take(8)?;
                Value::Fixed
            }
            WIRE_LEN => {
                let len = usize::try_from(self.varint()?)
                    .map_err(|_| Error::Protocol("field too large".into()))?;
                Value::Bytes(self.take(len)?)
            }
            WIRE_FIXED32 => {
                self.take(4)?;
                Value::Fixed
            }
            wire => return Err(Error::Protocol(format!("unsupported wire type {wire}"))),
        };
        Ok(Some((field, value)))
    }
}

pub(super) trait Message {
    fn encode(&self, enc: &mut Encoder);

    /// Absorb one decoded field; unknown fields are ignored.
    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error>;

    fn decode(buf: &[u8]) -> Result<Self, Error>
    where
        Self: Default,
    {
        let mut message = Self::default();
        let mut decoder = Decoder::new(buf);
        while let Some((field, value)) = decoder.next_field()? {
            message.merge(field, value)?;
        }
        Ok(message)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::default();
        self.encode(&mut enc);
        enc.finish()
    }
}

impl Message for TimeSpec {
    fn encode(&self, enc: &mut Encoder) {
        enc.int64(1, self.secs());
        enc.int32(2, self.nsecs() as i32);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => *self = TimeSpec::new(value.int64()?, self.nsecs()),
            2 => *self = TimeSpec::new(self.secs(), value.int32()?.into()),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoBuffer {
    pub delay: TimeSpec,
    pub data: Vec<u8>,
}

impl Message for IoBuffer {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.delay);
        enc.bytes(2, &self.data);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.delay = value.message()?,
            2 => self.data = value.bytes()?.to_vec(),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Number(i64),
    Str(String),
    StrList(Vec<String>),
    NumList(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    pub key: String,
    pub value: InfoValue,
}

impl InfoMessage {
    pub fn number(key: &str, value: i64) -> Self {
        InfoMessage {
            key: key.to_string(),
            value: InfoValue::Number(value),
        }
    }

    pub fn string(key: &str, value: &str) -> Self {
        InfoMessage {
            key: key.to_string(),
            value: InfoValue::Str(value.to_string()),
        }
    }

    pub fn strings(key: &str, value: &[String]) -> Self {
        InfoMessage {
            key: key.to_string(),
            value: InfoValue::StrList(value.to_vec()),
        }
    }
}

impl Default for InfoMessage {
    fn default() -> Self {
        InfoMessage::number("", 0)
    }
}

#[derive(Default)]
struct StringList(Vec<String>);

impl Message for StringList {
    fn encode(&self, enc: &mut Encoder) {
        for string in &self.0 {
            enc.bytes_field(1, string.as_bytes());
        }
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        if field == 1 {
            self.0.push(value.string()?);
        }
        Ok(())
    }
}

#[derive(Default)]
struct NumberList(Vec<i64>);

impl Message for NumberList {
    fn encode(&self, enc: &mut Encoder) {
        if self.0.is_empty() {
            return;
        }
        let mut packed = Encoder::default();
        for &number in &self.0 {
            packed.varint(number as u64);
        }
        enc.bytes_field(1, &packed.buf);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        if field != 1 {
            return Ok(());
        }
        match value {
            Value::Bytes(packed) => {
                let mut decoder = Decoder::new(packed);
                while !decoder.buf.is_empty() {
                    self.0.push(decoder.varint()? as i64);
                }
            }
            other => self.0.push(other.int64()?),
        }
        Ok(())
    }
}

impl Message for InfoMessage {
    fn encode(&self, enc: &mut Encoder) {
        enc.string(1, &self.key);
        match &self.value {
            InfoValue::Number(number) => enc.varint_field(2, *number as u64),
            InfoValue::Str(string) => enc.bytes_field(3, string.as_bytes()),
            InfoValue::StrList(strings) => enc.message(4, &StringList(strings.clone())),
            InfoValue::NumList(numbers) => enc.message(5, &NumberList(numbers.clone())),
        }
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.key = value.string()?,
            2 => self.value = InfoValue::Number(value.int64()?),
            3 => self.value = InfoValue::Str(value.string()?),
            4 => self.value = InfoValue::StrList(value.message::<StringList>()?.0),
            5 => self.value = InfoValue::NumList(value.message::<NumberList>()?.0),
            _ => {}
        }
        Ok(())
    }
}

fn encode_info(enc: &mut Encoder, field: u32, info_msgs: &[InfoMessage]) {
    for info in info_msgs {
        enc.message(field, info);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptMessage {
    pub submit_time: TimeSpec,
    pub info_msgs: Vec<InfoMessage>,
    pub expect_iobufs: bool,
}

impl Message for AcceptMessage {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.submit_time);
        encode_info(enc, 2, &self.info_msgs);
        enc.bool(3, self.expect_iobufs);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.submit_time = value.message()?,
            2 => self.info_msgs.push(value.message()?),
            3 => self.expect_iobufs = value.bool()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectMessage {
    pub submit_time: TimeSpec,
    pub reason: String,
    pub info_msgs: Vec<InfoMessage>,
}

impl Message for RejectMessage {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.submit_time);
        enc.string(2, &self.reason);
        encode_info(enc, 3, &self.info_msgs);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.submit_time = value.message()?,
            2 => self.reason = value.string()?,
            3 => self.info_msgs.push(value.message()?),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitMessage {
    pub run_time: TimeSpec,
    pub exit_value: i32,
    pub dumped_core: bool,
    /// Signal name without the `SIG` prefix, empty if the command was not killed.
    pub signal: String,
    pub error: String,
}

impl Message for ExitMessage {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.run_time);
        enc.int32(2, self.exit_value);
        enc.bool(3, self.dumped_core);
        enc.string(4, &self.signal);
        enc.string(5, &self.error);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.run_time = value.message()?,
            2 => self.exit_value = value.int32()?,
            3 => self.dumped_core = value.bool()?,
            4 => self.signal = value.string()?,
            5 => self.error = value.string()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertMessage {
    pub alert_time: TimeSpec,
    pub reason: String,
    pub info_msgs: Vec<InfoMessage>,
}

impl Message for AlertMessage {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.alert_time);
        enc.string(2, &self.reason);
        encode_info(enc, 3, &self.info_msgs);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.alert_time = value.message()?,
            2 => self.reason = value.string()?,
            3 => self.info_msgs.push(value.message()?),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartMessage {
    pub log_id: String,
    pub resume_point: TimeSpec,
}

impl Message for RestartMessage {
    fn encode(&self, enc: &mut Encoder) {
        enc.string(1, &self.log_id);
        enc.message(2, &self.resume_point);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.log_id = value.string()?,
            2 => self.resume_point = value.message()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeWindowSize {
    pub delay: TimeSpec,
    pub rows: i32,
    pub cols: i32,
}

impl Message for ChangeWindowSize {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.delay);
        enc.int32(2, self.rows);
        enc.int32(3, self.cols);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.delay = value.message()?,
            2 => self.rows = value.int32()?,
            3 => self.cols = value.int32()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSuspend {
    pub delay: TimeSpec,
    pub signal: String,
}

impl Message for CommandSuspend {
    fn encode(&self, enc: &mut Encoder) {
        enc.message(1, &self.delay);
        enc.string(2, &self.signal);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.delay = value.message()?,
            2 => self.signal = value.string()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub client_id: String,
}

impl Message for ClientHello {
    fn encode(&self, enc: &mut Encoder) {
        enc.string(1, &self.client_id);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        if field == 1 {
            self.client_id = value.string()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Accept(AcceptMessage),
    Reject(RejectMessage),
    Exit(ExitMessage),
    Restart(RestartMessage),
    Alert(AlertMessage),
    TtyIn(IoBuffer),
    TtyOut(IoBuffer),
    Stdin(IoBuffer),
    Stdout(IoBuffer),
    Stderr(IoBuffer),
    WinSize(ChangeWindowSize),
    Suspend(CommandSuspend),
    Hello(ClientHello),
}

impl ClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::default();
        match self {
            ClientMessage::Accept(msg) => enc.message(1, msg),
            ClientMessage::Reject(msg) => enc.message(2, msg),
            ClientMessage::Exit(msg) => enc.message(3, msg),
            ClientMessage::Restart(msg) => enc.message(4, msg),
            ClientMessage::Alert(msg) => enc.message(5, msg),
            ClientMessage::TtyIn(msg) => enc.message(6, msg),
            ClientMessage::TtyOut(msg) => enc.message(7, msg),
            ClientMessage::Stdin(msg) => enc.message(8, msg),
            ClientMessage::Stdout(msg) => enc.message(9, msg),
            ClientMessage::Stderr(msg) => enc.message(10, msg),
            ClientMessage::WinSize(msg) => enc.message(11, msg),
            ClientMessage::Suspend(msg) => enc.message(12, msg),
            ClientMessage::Hello(msg) => enc.message(13, msg),
        }
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut decoder = Decoder::new(buf);
        let mut message = None;
        while let Some((field, value)) = decoder.next_field()? {
            message = Some(match field {
                1 => ClientMessage::Accept(value.message()?),
                2 => ClientMessage::Reject(value.message()?),
                3 => ClientMessage::Exit(value.message()?),
                4 => ClientMessage::Restart(value.message()?),
                5 => ClientMessage::Alert(value.message()?),
                6 => ClientMessage::TtyIn(value.message()?),
                7 => ClientMessage::TtyOut(value.message()?),
                8 => ClientMessage::Stdin(value.message()?),
                9 => ClientMessage::Stdout(value.message()?),
                10 => ClientMessage::Stderr(value.message()?),
                11 => ClientMessage::WinSize(value.message()?),
                12 => ClientMessage::Suspend(value.message()?),
                13 => ClientMessage::Hello(value.message()?),
                _ => continue,
            });
        }
        message.ok_or_else(|| Error::Protocol("empty ClientMessage".into()))
    }

    /// The time since the previous I/O event, for the messages that are part of the stream.
    pub fn delay(&self) -> Option<TimeSpec> {
        match self {
            ClientMessage::TtyIn(buf)
            | ClientMessage::TtyOut(buf)
            | ClientMessage::Stdin(buf)
            | ClientMessage::Stdout(buf)
            | ClientMessage::Stderr(buf) => Some(buf.delay),
            ClientMessage::WinSize(msg) => Some(msg.delay),
            ClientMessage::Suspend(msg) => Some(msg.delay),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Accept(_) => "AcceptMessage",
            ClientMessage::Reject(_) => "RejectMessage",
            ClientMessage::Exit(_) => "ExitMessage",
            ClientMessage::Restart(_) => "RestartMessage",
            ClientMessage::Alert(_) => "AlertMessage",
            ClientMessage::TtyIn(_) => "TtyInBuf",
            ClientMessage::TtyOut(_) => "TtyOutBuf",
            ClientMessage::Stdin(_) => "StdinBuf",
            ClientMessage::Stdout(_) => "StdoutBuf",
            ClientMessage::Stderr(_) => "StderrBuf",
            ClientMessage::WinSize(_) => "ChangeWindowSize",
            ClientMessage::Suspend(_) => "CommandSuspend",
            ClientMessage::Hello(_) => "ClientHello",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHello {
    pub server_id: String,
    pub redirect: String,
    pub servers: Vec<String>,
    pub subcommands: bool,
}

impl Message for ServerHello {
    fn encode(&self, enc: &mut Encoder) {
        enc.string(1, &self.server_id);
        enc.string(2, &self.redirect);
        for server in &self.servers {
            enc.bytes_field(3, server.as_bytes());
        }
        enc.bool(4, self.subcommands);
    }

    fn merge(&mut self, field: u32, value: Value<'_>) -> Result<(), Error> {
        match field {
            1 => self.server_id = value.string()?,
            2 => self.redirect = value.string()?,
            3 => self.servers.push(value.string()?),
            4 => self.subcommands = value.bool()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Hello(ServerHello),
    CommitPoint(TimeSpec),
    LogId(String),
    Error(String),
    Abort(String),
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::default();
        match self {
            ServerMessage::Hello(msg) => enc.message(1, msg),
            ServerMessage::CommitPoint(time) => enc.message(2, time),
            ServerMessage::LogId(id) => enc.bytes_field(3, id.as_bytes()),
            ServerMessage::Error(reason) => enc.bytes_field(4, reason.as_bytes()),
            ServerMessage::Abort(reason) => enc.bytes_field(5, reason.as_bytes()),
        }
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut decoder = Decoder::new(buf);
        let mut message = None;
        while let Some((field, value)) = decoder.next_field()? {
            message = Some(match field {
                1 => ServerMessage::Hello(value.message()?),
                2 => ServerMessage::CommitPoint(value.message()?),
                3 => ServerMessage::LogId(value.string()?),
                4 => ServerMessage::Error(value.string()?),
                5 => ServerMessage::Abort(value.string()?),
                _ => continue,
            });
        }
        message.ok_or_else(|| Error::Protocol("empty ServerMessage".into()))
    }
}

/// Prefix an encoded message with its length as a 32-bit big-endian number.
pub fn frame(message: &[u8]) -> Result<Vec<u8>, Error> {
    if message.len() > MESSAGE_SIZE_MAX {
        return Err(Error::TooLarge(message.len()));
    }
    let mut framed = Vec::with_capacity(message.len() + 4);
    framed.extend_from_slice(&(message.len() as u32).to_be_bytes());
    framed.extend_from_slice(message);
    Ok(framed)
}

/// The session details as sent in `AcceptMessage`, `RejectMessage` and `AlertMessage`.
pub fn info_messages(evlog: &Eventlog) -> Vec<InfoMessage> {
    let mut info = vec![
        InfoMessage::number("columns", evlog.columns.into()),
        InfoMessage::string("command", &evlog.command),
        InfoMessage::number("lines", evlog.lines.into()),
        InfoMessage::strings("runargv", &evlog.argv),
        InfoMessage::strings("runenv", &evlog.envp),
    ];
    if let Some(group) = &evlog.rungroup {
        if let Some(gid) = evlog.rungid {
            info.push(InfoMessage::number("rungid", gid.into()));
        }
        info.push(InfoMessage::string("rungroup", group));
    }
    if let Some(uid) = evlog.runuid {
        info.push(InfoMessage::number("runuid", uid.into()));
    }
    info.push(InfoMessage::string("runuser", &evlog.runuser));
    let optional = [
        ("runchroot", &evlog.runchroot),
        ("runcwd", &evlog.runcwd),
        ("submitcwd", &evlog.cwd),
        ("submitgroup", &evlog.submitgroup),
        ("submithost", &evlog.submithost),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            info.push(InfoMessage::string(key, value));
        }
    }
    info.push(InfoMessage::string("submituser", &evlog.submituser));
    if let Some(tty) = &evlog.ttyname {
        info.push(InfoMessage::string("ttyname", tty));
    }
    info
}

/// Rebuild the session details from received info messages. Unknown keys are ignored,
/// a value of the wrong type is an error.
pub fn eventlog_from_info(submit_time: TimeSpec, info_msgs: &[InfoMessage]) -> Result<Eventlog, Error> {
    let mut evlog = Eventlog {
        submit_time,
        ..Default::default()
    };
    let mut seen = (false, false, false);

    for info in info_msgs {
        let wrong_type = || Error::Protocol(format!("unexpected value type for {}", info.key));
        let string = || match &info.value {
            InfoValue::Str(value) => Ok(value.clone()),
            _ => Err(wrong_type()),
        };
        let number = || match &info.value {
            InfoValue::Number(value) => Ok(*value),
            _ => Err(wrong_type()),
        };
        let strings = || match &info.value {
            InfoValue::StrList(value) => Ok(value.clone()),
            _ => Err(wrong_type()),
        };
        let id = || number().and_then(|n| u32::try_from(n).map_err(|_| wrong_type()));
        let size = || number().and_then(|n| i32::try_from(n).map_err(|_| wrong_type()));

        match info.key.as_str() {
            "columns" => evlog.columns = size()?,
            "lines" => evlog.lines = size()?,
            "command" => {
                evlog.command = string()?;
                seen.0 = true;
            }
            "runargv" => evlog.argv = strings()?,
            "runenv" => evlog.envp = strings()?,
            "rungid" => evlog.rungid = Some(id()?),
            "rungroup" => evlog.rungroup = Some(string()?),
            "runuid" => evlog.runuid = Some(id()?),
            "runuser" => {
                evlog.runuser = string()?;
                seen.1 = true;
            }
            "runchroot" => evlog.runchroot = Some(string()?),
            "runcwd" => evlog.runcwd = Some(string()?),
            "submitcwd" => evlog.cwd = Some(string()?),
            "submitgroup" => evlog.submitgroup = Some(string()?),
            "submithost" => evlog.submithost = Some(string()?),
            "submituser" => {
                evlog.submituser = string()?;
                seen.2 = true;
            }
            "ttyname" => evlog.ttyname = Some(string()?),
            _ => {}
        }
    }

    match seen {
        (false, _, _) => Err(Error::Protocol("missing command in info messages".into())),
        (_, false, _) => Err(Error::Protocol("missing runuser in info messages".into())),
        (_, _, false) => Err(Error::Protocol("missing submituser in info messages".into())),
        _ => Ok(evlog),
    }
}
