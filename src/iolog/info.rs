//! Session info stored next to the recording: `log.json`, and the three line `log` file
//! understood by older tools.
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Error, WithPath};
use crate::eventlog::Eventlog;
use crate::system::file::write_atomically;
use crate::system::time::TimeSpec;

const RUNAS_DEFAULT: &str = "root";

#[derive(Serialize, Deserialize)]
struct Timestamp {
    seconds: i64,
    #[serde(default)]
    nanoseconds: i64,
}

#[derive(Serialize, Deserialize, Default)]
struct LogJson {
    timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    columns: Option<i32>,
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lines: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    runargv: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    runenv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rungid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rungroup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runuid: Option<u32>,
    runuser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runchroot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runcwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submitcwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submithost: Option<String>,
    submituser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttyname: Option<String>,
}

impl From<&Eventlog> for LogJson {
    fn from(evlog: &Eventlog) -> Self {
        LogJson {
            timestamp: Some(Timestamp {
                seconds: evlog.submit_time.secs(),
                nanoseconds: evlog.submit_time.nsecs(),
            }),
            columns: Some(evlog.columns).filter(|&n| n > 0),
            command: Some(evlog.command.clone()),
            lines: Some(evlog.lines).filter(|&n| n > 0),
            runargv: evlog.argv.clone(),
            runenv: evlog.envp.clone(),
            rungid: evlog.rungid,
            rungroup: evlog.rungroup.clone(),
            runuid: evlog.runuid,
            runuser: Some(evlog.runuser.clone()),
            runchroot: evlog.runchroot.clone(),
            runcwd: evlog.runcwd.clone(),
            submitcwd: evlog.cwd.clone(),
            submithost: evlog.submithost.clone(),
            submituser: Some(evlog.submituser.clone()),
            ttyname: evlog.ttyname.clone(),
        }
    }
}

impl TryFrom<LogJson> for Eventlog {
    type Error = Error;

    fn try_from(json: LogJson) -> Result<Self, Error> {
        let timestamp = json.timestamp.ok_or(Error::MissingField("timestamp"))?;

        Ok(Eventlog {
            submit_time: TimeSpec::new(timestamp.seconds, timestamp.nanoseconds),
            submituser: json.submituser.ok_or(Error::MissingField("submituser"))?,
            runuser: json.runuser.ok_or(Error::MissingField("runuser"))?,
            command: json.command.ok_or(Error::MissingField("command"))?,
            columns: json.columns.unwrap_or(0),
            lines: json.lines.unwrap_or(0),
            argv: json.runargv,
            envp: json.runenv,
            rungid: json.rungid,
            rungroup: json.rungroup,
            runuid: json.runuid,
            runchroot: json.runchroot,
            runcwd: json.runcwd,
            cwd: json.submitcwd,
            submithost: json.submithost,
            ttyname: json.ttyname,
            ..Default::default()
        })
    }
}

fn parse_log_json(text: &str) -> Result<Eventlog, Error> {
    let json: LogJson = serde_json::from_str(text)
        .map_err(|err| Error::Corrupt(format!("log.json: {err}")))?;
    json.try_into()
}

/// Parse the legacy `log` file:
///
/// ```text
/// timestamp:user:runuser:rungroup:tty[:lines:cols]
/// cwd
/// command with arguments
/// ```
fn parse_legacy_log(text: &str) -> Result<Eventlog, Error> {
    let mut lines = text.split('\n');
    let (Some(header), Some(cwd), Some(command)) = (lines.next(), lines.next(), lines.next())
    else {
        return Err(Error::InvalidLogInfo("not enough lines".to_string()));
    };

    let missing = |what: &str| Error::InvalidLogInfo(format!("{what} field is missing"));
    let mut fields = header.splitn(5, ':');
    let timestamp = fields.next().filter(|f| !f.is_empty()).ok_or_else(|| missing("time stamp"))?;
    let timestamp: i64 = timestamp
        .parse()
        .ok()
        .filter(|&t| t >= 0)
        .ok_or_else(|| Error::InvalidLogInfo(format!("time stamp {timestamp}: invalid")))?;
    let submituser = fields.next().filter(|f| !f.is_empty()).ok_or_else(|| missing("user"))?;
    let runuser = fields
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| missing("runas user"))?;
    let rungroup = fields.next().ok_or_else(|| missing("runas group"))?;
    let tty_and_size = fields.next().ok_or_else(|| missing("tty"))?;

    let mut size = tty_and_size.split(':');
    let ttyname = size.next().unwrap_or_default();
    let mut dimension = || {
        size.next()
            .and_then(|n| n.parse::<i32>().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(0)
    };
    let rows = dimension();
    let cols = dimension();

    let argv: Vec<String> = command.split(' ').map(str::to_string).collect();

    Ok(Eventlog {
        submit_time: TimeSpec::new(timestamp, 0),
        submituser: submituser.to_string(),
        runuser: runuser.to_string(),
        rungroup: Some(rungroup.to_string()).filter(|group| !group.is_empty()),
        ttyname: Some(ttyname.to_string()),
        lines: rows,
        columns: cols,
        cwd: Some(cwd.to_string()),
        command: argv[0].clone(),
        argv,
        ..Default::default()
    })
}

/// Read the session info of the recording in `dir`, preferring `log.json`.
pub fn read_info(dir: &Path) -> Result<Eventlog, Error> {
    let json_path = dir.join("log.json");
    match fs::read_to_string(&json_path) {
        Ok(text) => return parse_log_json(&text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::Io(Some(json_path), err)),
    }

    let legacy_path = dir.join("log");
    let text = fs::read_to_string(&legacy_path).at(&legacy_path)?;
    parse_legacy_log(&text)
}

fn legacy_log(evlog: &Eventlog) -> Vec<u8> {
    let or = |value: &str, default: &'static str| -> String {
        if value.is_empty() {
            default.to_string()
        } else {
            value.to_string()
        }
    };

    let mut out = Vec::new();
    // writing to a Vec cannot fail
    let _ = writeln!(
        out,
        "{}:{}:{}:{}:{}:{}:{}\n{}",
        evlog.submit_time.secs(),
        or(&evlog.submituser, "unknown"),
        or(&evlog.runuser, RUNAS_DEFAULT),
        evlog.rungroup.as_deref().unwrap_or_default(),
        evlog.ttyname.as_deref().unwrap_or("unknown"),
        evlog.lines,
        evlog.columns,
        evlog.cwd.as_deref().unwrap_or("unknown"),
    );
    let _ = write!(out, "{}", or(&evlog.command, "unknown"));
    for arg in evlog.argv.iter().skip(1) {
        let _ = write!(out, " {arg}");
    }
    out.push(b'\n');
    out
}

/// Write both info files into `dir`.
pub fn write_info(dir: &Path, evlog: &Eventlog) -> Result<(), Error> {
    let legacy_path = dir.join("log");
    write_atomically(&legacy_path, &legacy_log(evlog)).at(&legacy_path)?;

    let json_path = dir.join("log.json");
    let mut json = serde_json::to_vec_pretty(&LogJson::from(evlog))
        .map_err(|err| Error::Corrupt(err.to_string()))?;
    json.push(b'\n');
    write_atomically(&json_path, &json).at(&json_path)
}
