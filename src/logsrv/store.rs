//! A message handler that stores sessions as local I/O log directories and logs their
//! accept, reject and alert events.
use std::path::{Path, PathBuf};

use super::handler::ClientMessageHandler;
use super::proto::{
    eventlog_from_info, AcceptMessage, AlertMessage, ChangeWindowSize, CommandSuspend,
    ExitMessage, IoBuffer, RejectMessage, RestartMessage,
};
use super::Error;
use crate::eventlog::{EventLogger, Eventlog, LogSink};
use crate::iolog::{expand_path, IoEvent, IoLogFiles, IoLogWriter, PathEscapes};
use crate::log::{dev_info, iolog_info};
use crate::system::signal::signal_number;

const SESSION_FILE: &str = "%{seq}";

pub struct LogStore<'a, S: LogSink> {
    iolog_dir: PathBuf,
    logger: EventLogger<'a, S>,
    flush: bool,
    evlog: Option<Eventlog>,
    writer: Option<IoLogWriter>,
    log_id: Option<String>,
}

impl<'a, S: LogSink> LogStore<'a, S> {
    pub fn new(iolog_dir: impl Into<PathBuf>, logger: EventLogger<'a, S>, flush: bool) -> Self {
        LogStore {
            iolog_dir: iolog_dir.into(),
            logger,
            flush,
            evlog: None,
            writer: None,
            log_id: None,
        }
    }

    /// The directory the current session is recorded in.
    pub fn session_dir(&self) -> Option<&Path> {
        self.writer.as_ref().map(IoLogWriter::path)
    }

    pub fn logger(&self) -> &EventLogger<'a, S> {
        &self.logger
    }

    fn writer(&mut self) -> Result<&mut IoLogWriter, Error> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::Protocol("I/O before the session was accepted".to_string()))
    }

    fn create_session(&mut self, evlog: &mut Eventlog) -> Result<(), Error> {
        let escapes = PathEscapes {
            user: &evlog.submituser,
            group: evlog.submitgroup.as_deref().unwrap_or_default(),
            runas_user: &evlog.runuser,
            runas_group: evlog.rungroup.as_deref().unwrap_or_default(),
            hostname: evlog.submithost.as_deref().unwrap_or_default(),
            command: &evlog.command,
        };
        let dir_template = self.iolog_dir.to_string_lossy();
        let dir = expand_path(&dir_template, SESSION_FILE, &escapes)?;
        let relative = dir
            .strip_prefix(&self.iolog_dir)
            .unwrap_or(&dir)
            .to_string_lossy()
            .into_owned();

        evlog.iolog_path = Some(dir.to_string_lossy().into_owned());
        evlog.iolog_file = Some(relative.clone());
        self.writer = Some(IoLogWriter::create(&dir, evlog, self.flush)?);
        self.log_id = Some(relative);
        Ok(())
    }
}

impl<S: LogSink> ClientMessageHandler for LogStore<'_, S> {
    fn accept(&mut self, msg: &AcceptMessage, _: &[u8]) -> Result<(), Error> {
        if self.evlog.is_some() {
            return Err(Error::Protocol("session already started".to_string()));
        }
        let mut evlog = eventlog_from_info(msg.submit_time, &msg.info_msgs)?;
        if msg.expect_iobufs {
            self.create_session(&mut evlog)?;
        }
        self.logger.accept(&evlog, None)?;
        self.evlog = Some(evlog);
        Ok(())
    }

    fn reject(&mut self, msg: &RejectMessage, _: &[u8]) -> Result<(), Error> {
        let evlog = eventlog_from_info(msg.submit_time, &msg.info_msgs)?;
        self.logger.reject(&evlog, &msg.reason, None)?;
        Ok(())
    }

    fn exit(&mut self, msg: &ExitMessage, _: &[u8]) -> Result<(), Error> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        if !msg.error.is_empty() {
            iolog_info!("command failed: {}", msg.error);
        } else if !msg.signal.is_empty() {
            dev_info!("command killed by SIG{}", msg.signal);
        } else {
            dev_info!("command exited with status {}", msg.exit_value);
        }
        Ok(())
    }

    fn restart(&mut self, msg: &RestartMessage, _: &[u8]) -> Result<(), Error> {
        if self.writer.is_some() {
            return Err(Error::Protocol("session already started".to_string()));
        }
        let relative = Path::new(&msg.log_id);
        if relative.is_absolute() || relative.components().any(|c| c.as_os_str() == "..") {
            return Err(Error::Protocol(format!("invalid log id {}", msg.log_id)));
        }
        let dir = self.iolog_dir.join(relative);

        let mut files = IoLogFiles::open(&dir)?;
        files.seek_to(msg.resume_point)?;
        files.truncate()?;
        self.evlog = Some(files.info()?);
        drop(files);

        self.writer = Some(IoLogWriter::append(&dir, self.flush)?);
        self.log_id = Some(msg.log_id.clone());
        Ok(())
    }

    fn alert(&mut self, msg: &AlertMessage, _: &[u8]) -> Result<(), Error> {
        let evlog = if msg.info_msgs.is_empty() {
            self.evlog.clone().unwrap_or_default()
        } else {
            eventlog_from_info(msg.alert_time, &msg.info_msgs)?
        };
        self.logger.alert(&evlog, msg.alert_time, &msg.reason, None)?;
        Ok(())
    }

    fn iobuf(&mut self, event: IoEvent, msg: &IoBuffer, _: &[u8]) -> Result<(), Error> {
        self.writer()?.write_io(event, msg.delay, &msg.data)?;
        Ok(())
    }

    fn winsize(&mut self, msg: &ChangeWindowSize, _: &[u8]) -> Result<(), Error> {
        let (Ok(rows), Ok(cols)) = (u32::try_from(msg.rows), u32::try_from(msg.cols)) else {
            return Err(Error::Protocol(format!(
                "invalid window size {}x{}",
                msg.rows, msg.cols
            )));
        };
        self.writer()?.write_winsize(msg.delay, rows, cols)?;
        Ok(())
    }

    fn suspend(&mut self, msg: &CommandSuspend, _: &[u8]) -> Result<(), Error> {
        let signal = signal_number(&msg.signal)
            .ok_or_else(|| Error::Protocol(format!("unknown signal {}", msg.signal)))?;
        self.writer()?.write_suspend(msg.delay, signal)?;
        Ok(())
    }

    fn log_id(&self) -> Option<String> {
        self.log_id.clone()
    }
}
