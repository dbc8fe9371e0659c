//! Event records for accepted, rejected and alerted commands, written to syslog and/or a log
//! file in the traditional sudo line format or as JSON.
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::defaults::enums::log_format;
use crate::log::{dev_warn, iolog_warn};
use crate::sudoers::Settings;
use crate::system::file::{FileLock, PRIVATE_FILE_MODE};
use crate::system::time::{format_time, TimeSpec};

/// Everything that is known about a command at the time an event is logged.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Eventlog {
    pub iolog_path: Option<String>,
    pub iolog_file: Option<String>,
    pub command: String,
    pub cwd: Option<String>,
    pub runchroot: Option<String>,
    pub runcwd: Option<String>,
    pub rungroup: Option<String>,
    pub runuser: String,
    pub submithost: Option<String>,
    pub submituser: String,
    pub submitgroup: Option<String>,
    pub ttyname: Option<String>,
    pub argv: Vec<String>,
    pub env_add: Vec<String>,
    pub envp: Vec<String>,
    pub submit_time: TimeSpec,
    pub lines: i32,
    pub columns: i32,
    pub runuid: Option<u32>,
    pub rungid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Accept,
    Reject,
    Alert,
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::Accept => "accept",
            EventType::Reject => "reject",
            EventType::Alert => "alert",
        }
    }

    fn time_key(self) -> &'static str {
        match self {
            EventType::Accept | EventType::Reject => "submit_time",
            EventType::Alert => "alert_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Sudo,
    Json,
}

/// Where events go; both may be enabled at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogTypes {
    pub syslog: bool,
    pub file: bool,
}

impl LogTypes {
    pub const NONE: LogTypes = LogTypes {
        syslog: false,
        file: false,
    };

    pub fn is_none(&self) -> bool {
        !self.syslog && !self.file
    }
}

#[derive(Debug, Clone)]
pub struct EventlogConfig {
    pub log_type: LogTypes,
    pub format: LogFormat,
    /// Syslog priorities per event type; `None` disables syslog for that type.
    pub syslog_acceptpri: Option<libc::c_int>,
    pub syslog_rejectpri: Option<libc::c_int>,
    pub syslog_alertpri: Option<libc::c_int>,
    pub syslog_maxlen: usize,
    pub logpath: PathBuf,
    pub time_fmt: String,
}

impl Default for EventlogConfig {
    fn default() -> Self {
        EventlogConfig {
            log_type: LogTypes {
                syslog: true,
                file: false,
            },
            format: LogFormat::Sudo,
            syslog_acceptpri: Some(libc::LOG_NOTICE),
            syslog_rejectpri: Some(libc::LOG_ALERT),
            syslog_alertpri: Some(libc::LOG_ALERT),
            syslog_maxlen: 980,
            logpath: PathBuf::from("/var/log/sudo"),
            time_fmt: "%h %e %T".to_string(),
        }
    }
}

impl EventlogConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = EventlogConfig {
            format: match settings.log_format {
                log_format::sudo => LogFormat::Sudo,
                log_format::json => LogFormat::Json,
            },
            syslog_maxlen: usize::try_from(settings.syslog_maxlen).unwrap_or(980),
            ..Default::default()
        };
        if let Some(logfile) = &settings.logfile {
            config.log_type.file = true;
            config.logpath = PathBuf::from(logfile);
        }
        config
    }

    fn priority(&self, event_type: EventType) -> Option<libc::c_int> {
        match event_type {
            EventType::Accept => self.syslog_acceptpri,
            EventType::Reject => self.syslog_rejectpri,
            EventType::Alert => self.syslog_alertpri,
        }
    }
}

/// The destinations events are written to.
pub trait LogSink {
    /// Open the event log file for reading and writing, creating it if needed.
    fn open_log(&self, path: &Path) -> io::Result<File>;

    fn close_log(&self, file: File) {
        drop(file)
    }

    fn syslog(&self, priority: libc::c_int, message: &str);
}

/// Writes to the system logger and to files on disk.
pub struct SystemSink {
    pub facility: libc::c_int,
}

impl Default for SystemSink {
    fn default() -> Self {
        SystemSink {
            facility: libc::LOG_AUTHPRIV,
        }
    }
}

impl LogSink for SystemSink {
    fn open_log(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(PRIVATE_FILE_MODE)
            .open(path)
    }

    fn syslog(&self, priority: libc::c_int, message: &str) {
        crate::system::syslog(priority, self.facility, message);
    }
}

/// Extra JSON members supplied by the caller, added after the standard ones.
pub type InfoCallback<'a> = &'a dyn Fn(&mut Map<String, Value>);

impl Eventlog {
    /// The session id shown as `TSID=`: a sequence path like `00/00/1A` collapses to
    /// `00001A`, anything else is shown as is.
    fn tsid(&self) -> Option<String> {
        let file = self.iolog_file.as_deref()?;
        let bytes = file.as_bytes();
        let is_sessid = bytes.len() == 8
            && bytes[2] == b'/'
            && bytes[5] == b'/'
            && [0, 1, 3, 4, 6, 7]
                .iter()
                .all(|&i| bytes[i].is_ascii_alphanumeric());

        if is_sessid {
            Some(file.split('/').collect())
        } else {
            Some(file.to_string())
        }
    }

    /// A log line in the traditional sudo format.
    pub fn new_logline(&self, message: Option<&str>, errstr: Option<&str>) -> String {
        let mut line = String::new();

        if let Some(message) = message {
            line.push_str(message);
            line.push_str(if errstr.is_some() { " : " } else { " ; " });
        }
        if let Some(errstr) = errstr {
            line.push_str(errstr);
            line.push_str(" ; ");
        }

        let env = if self.env_add.is_empty() {
            None
        } else {
            Some(self.env_add.join(" "))
        };
        let fields = [
            ("HOST=", self.submithost.clone()),
            ("TTY=", self.ttyname.clone()),
            ("CHROOT=", self.runchroot.clone()),
            ("PWD=", self.runcwd.clone()),
            ("USER=", Some(self.runuser.clone()).filter(|user| !user.is_empty())),
            ("GROUP=", self.rungroup.clone()),
            ("TSID=", self.tsid()),
            ("ENV=", env),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                line.push_str(name);
                line.push_str(&value);
                line.push_str(" ; ");
            }
        }

        if !self.command.is_empty() {
            line.push_str("COMMAND=");
            line.push_str(&self.command);
            for arg in self.argv.iter().skip(1) {
                line.push(' ');
                line.push_str(arg);
            }
        }

        line
    }

    /// The details of this event as JSON members, the same keys as used in `log.json`.
    pub fn json_info(&self, map: &mut Map<String, Value>) {
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };

        put("command", self.command.clone().into());
        if !self.argv.is_empty() {
            put("runargv", self.argv.clone().into());
        }
        if !self.envp.is_empty() {
            put("runenv", self.envp.clone().into());
        }
        put("runuser", self.runuser.clone().into());
        if let Some(uid) = self.runuid {
            put("runuid", uid.into());
        }
        if let Some(group) = &self.rungroup {
            put("rungroup", group.clone().into());
        }
        if let Some(gid) = self.rungid {
            put("rungid", gid.into());
        }
        put("submituser", self.submituser.clone().into());
        let optional = [
            ("submitgroup", &self.submitgroup),
            ("submithost", &self.submithost),
            ("submitcwd", &self.cwd),
            ("runcwd", &self.runcwd),
            ("runchroot", &self.runchroot),
            ("ttyname", &self.ttyname),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                put(key, value.clone().into());
            }
        }
        if self.lines > 0 {
            put("lines", self.lines.into());
        }
        if self.columns > 0 {
            put("columns", self.columns.into());
        }
    }
}

fn json_timestamp(time: TimeSpec, time_fmt: &str) -> Value {
    let mut stamp = Map::new();
    stamp.insert("seconds".into(), time.secs().into());
    stamp.insert("nanoseconds".into(), time.nsecs().into());
    if let Some(iso) = format_time(time.secs(), "%Y%m%d%H%M%SZ", true) {
        stamp.insert("iso8601".into(), iso.into());
    }
    if let Some(local) = format_time(time.secs(), time_fmt, false) {
        stamp.insert("localtime".into(), local.into());
    }
    Value::Object(stamp)
}

/// Split a sudo-format line into syslog messages prefixed with the user name, so that none
/// exceeds `maxlen` bytes. Breaks happen at the last space that fits where possible.
pub fn syslog_messages(line: &str, user: &str, maxlen: usize) -> Vec<String> {
    const FIRST: &str = "%8s : %s";
    const CONTINUED: &str = "%8s : (command continued) %s";

    let mut messages = Vec::new();
    let mut rest = line;
    let mut overhead = FIRST.len() - 5 + user.len();

    while !rest.is_empty() {
        let room = maxlen.saturating_sub(overhead).max(1);
        let piece;
        if rest.len() > room {
            let mut cut = room;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            let end = rest[..cut].rfind(' ').unwrap_or(cut);
            piece = &rest[..end];
            rest = rest[end..].trim_start_matches(' ');
        } else {
            piece = rest;
            rest = "";
        }

        if messages.is_empty() {
            messages.push(format!("{user:>8} : {piece}"));
        } else {
            messages.push(format!("{user:>8} : (command continued) {piece}"));
        }
        overhead = CONTINUED.len() - 5 + user.len();
    }

    messages
}

pub struct EventLogger<'a, S: LogSink> {
    config: &'a EventlogConfig,
    sink: S,
}

impl<'a, S: LogSink> EventLogger<'a, S> {
    pub fn new(config: &'a EventlogConfig, sink: S) -> Self {
        EventLogger { config, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn accept(&self, details: &Eventlog, info: Option<InfoCallback<'_>>) -> io::Result<()> {
        if self.config.log_type.is_none() {
            return Ok(());
        }
        self.log(
            EventType::Accept,
            None,
            None,
            details,
            details.submit_time,
            info,
        )
    }

    pub fn reject(
        &self,
        details: &Eventlog,
        reason: &str,
        info: Option<InfoCallback<'_>>,
    ) -> io::Result<()> {
        self.log(
            EventType::Reject,
            Some(reason),
            None,
            details,
            details.submit_time,
            info,
        )
    }

    pub fn alert(
        &self,
        details: &Eventlog,
        alert_time: TimeSpec,
        reason: &str,
        errstr: Option<&str>,
    ) -> io::Result<()> {
        self.log(
            EventType::Alert,
            Some(reason),
            errstr,
            details,
            alert_time,
            None,
        )
    }

    /// Both destinations are attempted; the first failure is reported.
    fn log(
        &self,
        event_type: EventType,
        reason: Option<&str>,
        errstr: Option<&str>,
        details: &Eventlog,
        event_time: TimeSpec,
        info: Option<InfoCallback<'_>>,
    ) -> io::Result<()> {
        let mut result = Ok(());
        if self.config.log_type.syslog {
            self.do_syslog(event_type, reason, errstr, details, event_time, info);
        }
        if self.config.log_type.file {
            let logged = match self.config.format {
                LogFormat::Sudo => self.do_logfile_sudo(reason, errstr, details),
                LogFormat::Json => {
                    self.do_logfile_json(event_type, reason, errstr, details, event_time, info)
                }
            };
            if let Err(err) = logged {
                iolog_warn!("unable to write log file {}: {err}", self.config.logpath.display());
                result = Err(err);
            }
        }
        result
    }

    fn do_syslog(
        &self,
        event_type: EventType,
        reason: Option<&str>,
        errstr: Option<&str>,
        details: &Eventlog,
        event_time: TimeSpec,
        info: Option<InfoCallback<'_>>,
    ) {
        let Some(priority) = self.config.priority(event_type) else {
            return;
        };

        match self.config.format {
            LogFormat::Sudo => {
                let line = details.new_logline(reason, errstr);
                for message in
                    syslog_messages(&line, &details.submituser, self.config.syslog_maxlen)
                {
                    self.sink.syslog(priority, &message);
                }
            }
            LogFormat::Json => {
                let json = self.format_json(
                    event_type, reason, errstr, details, event_time, info, true,
                );
                self.sink.syslog(priority, &format!("@cee:{{{json} }}"));
            }
        }
    }

    fn do_logfile_sudo(
        &self,
        reason: Option<&str>,
        errstr: Option<&str>,
        details: &Eventlog,
    ) -> io::Result<()> {
        let mut file = self.sink.open_log(&self.config.logpath)?;
        let line = details.new_logline(reason, errstr);
        let result = (|| {
            let lock = FileLock::exclusive(&file, false)?;
            let time = format_time(details.submit_time.secs(), &self.config.time_fmt, false);
            file.seek(SeekFrom::End(0))?;
            writeln!(
                file,
                "{} : {} : {line}",
                time.as_deref().unwrap_or("invalid date"),
                details.submituser
            )?;
            file.flush()?;
            lock.unlock()
        })();
        self.sink.close_log(file);
        result
    }

    /// The log file holds a single JSON object with one member per event; an existing file is
    /// assumed to end in `"\n}\n"`, which is overwritten.
    fn do_logfile_json(
        &self,
        event_type: EventType,
        reason: Option<&str>,
        errstr: Option<&str>,
        details: &Eventlog,
        event_time: TimeSpec,
        info: Option<InfoCallback<'_>>,
    ) -> io::Result<()> {
        let mut file = self.sink.open_log(&self.config.logpath)?;
        let json = self.format_json(event_type, reason, errstr, details, event_time, info, false);
        let result = (|| {
            let lock = FileLock::exclusive(&file, false)?;
            if file.metadata()?.len() == 0 {
                file.write_all(b"{")?;
            } else {
                file.seek(SeekFrom::End(-3))?;
                file.write_all(b",")?;
            }
            write!(file, "\n{json}\n}}\n")?;
            file.flush()?;
            lock.unlock()
        })();
        self.sink.close_log(file);
        result
    }

    /// A `"type": { ... }` member; the caller supplies the enclosing braces.
    #[allow(clippy::too_many_arguments)]
    fn format_json(
        &self,
        event_type: EventType,
        reason: Option<&str>,
        errstr: Option<&str>,
        details: &Eventlog,
        event_time: TimeSpec,
        info: Option<InfoCallback<'_>>,
        compact: bool,
    ) -> String {
        let mut object = Map::new();
        if let Some(reason) = reason {
            object.insert("reason".into(), reason.into());
        }
        if let Some(errstr) = errstr {
            object.insert("error".into(), errstr.into());
        }
        match TimeSpec::now() {
            Ok(now) => {
                object.insert(
                    "server_time".into(),
                    json_timestamp(now, &self.config.time_fmt),
                );
            }
            Err(err) => dev_warn!("unable to read the clock: {err}"),
        }
        object.insert(
            event_type.time_key().into(),
            json_timestamp(event_time, &self.config.time_fmt),
        );
        if let Some(path) = &details.iolog_path {
            object.insert("iolog_path".into(), path.as_str().into());
        }
        if let Some(info) = info {
            info(&mut object);
        }

        let object = Value::Object(object);
        let body = if compact {
            object.to_string()
        } else {
            serde_json::to_string_pretty(&object).unwrap_or_else(|_| object.to_string())
        };
        format!("\"{}\": {body}", event_type.as_str())
    }
}
