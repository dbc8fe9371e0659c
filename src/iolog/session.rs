use std::path::Path;

use super::{expand_path, Error as IoLogError, IoEvent, IoLogConfig, IoLogWriter, PathEscapes};
use crate::common::Error;
use crate::eventlog::Eventlog;
use crate::log::{dev_info, dev_warn, iolog_warn};
use crate::logsrv::client::{
    error_exit_message, exit_message, ClientClosure, ClientConfig, NoSource,
};
use crate::logsrv::proto::{info_messages, ChangeWindowSize, ClientMessage, CommandSuspend, IoBuffer};
use crate::logsrv::transport::{Stream, Transport};
use crate::logsrv::Error as LogServerError;
use crate::system::signal::{short_signal_name, SignalNumber};
use crate::system::time::TimeSpec;
use crate::system::wait::WaitStatus;

/// Where the events of a recorded session end up.
pub trait IoLogBackend {
    fn log_io(&mut self, event: IoEvent, delay: TimeSpec, data: &[u8]) -> Result<(), Error>;

    fn log_winsize(&mut self, delay: TimeSpec, lines: u32, cols: u32) -> Result<(), Error>;

    fn log_suspend(&mut self, delay: TimeSpec, signal: SignalNumber) -> Result<(), Error>;

    /// The command is done, either with `status` or because it could not run at all.
    fn close(&mut self, run_time: TimeSpec, status: Result<WaitStatus, &str>) -> Result<(), Error>;
}

impl IoLogBackend for IoLogWriter {
    fn log_io(&mut self, event: IoEvent, delay: TimeSpec, data: &[u8]) -> Result<(), Error> {
        Ok(self.write_io(event, delay, data)?)
    }

    fn log_winsize(&mut self, delay: TimeSpec, lines: u32, cols: u32) -> Result<(), Error> {
        Ok(self.write_winsize(delay, lines, cols)?)
    }

    fn log_suspend(&mut self, delay: TimeSpec, signal: SignalNumber) -> Result<(), Error> {
        Ok(self.write_suspend(delay, signal)?)
    }

    fn close(&mut self, _: TimeSpec, _: Result<WaitStatus, &str>) -> Result<(), Error> {
        Ok(self.flush()?)
    }
}

impl<S: Stream> IoLogBackend for ClientClosure<S> {
    fn log_io(&mut self, event: IoEvent, delay: TimeSpec, data: &[u8]) -> Result<(), Error> {
        let buffer = IoBuffer {
            delay,
            data: data.to_vec(),
        };
        let message = match event {
            IoEvent::TtyIn => ClientMessage::TtyIn(buffer),
            IoEvent::TtyOut => ClientMessage::TtyOut(buffer),
            IoEvent::Stdin => ClientMessage::Stdin(buffer),
            IoEvent::Stdout => ClientMessage::Stdout(buffer),
            IoEvent::Stderr => ClientMessage::Stderr(buffer),
            IoEvent::WinSize | IoEvent::Suspend => {
                return Err(IoLogError::Corrupt(format!("{event:?} does not carry data")).into())
            }
        };
        self.send(message)?;
        Ok(self.flush()?)
    }

    fn log_winsize(&mut self, delay: TimeSpec, lines: u32, cols: u32) -> Result<(), Error> {
        self.send(ClientMessage::WinSize(ChangeWindowSize {
            delay,
            rows: lines as i32,
            cols: cols as i32,
        }))?;
        Ok(self.flush()?)
    }

    fn log_suspend(&mut self, delay: TimeSpec, signal: SignalNumber) -> Result<(), Error> {
        self.send(ClientMessage::Suspend(CommandSuspend {
            delay,
            signal: short_signal_name(signal),
        }))?;
        Ok(self.flush()?)
    }

    fn close(&mut self, run_time: TimeSpec, status: Result<WaitStatus, &str>) -> Result<(), Error> {
        let message = match status {
            Ok(status) => exit_message(run_time, status),
            Err(error) => error_exit_message(run_time, error),
        };
        self.send(message)?;
        self.run(&mut NoSource)?;
        ClientClosure::close(self);
        Ok(())
    }
}

/// Records the I/O of one command, to a local directory or to the first log server that
/// accepts the session.
///
/// With `ignore_iolog_errors` set, the first failure is reported once and turns the
/// session into a no-op instead of failing the command.
pub struct IoLogSession {
    backend: Option<Box<dyn IoLogBackend>>,
    config: IoLogConfig,
    start_time: TimeSpec,
    last_time: TimeSpec,
    disabled: bool,
    warned: bool,
}

impl IoLogSession {
    /// Start recording the command described by `evlog`. For local recordings the session
    /// directory is stored in `evlog` before its info files are written.
    pub fn open(config: IoLogConfig, evlog: &mut Eventlog) -> Result<Self, Error> {
        let backend = if config.log_servers.is_empty() {
            open_local(&config, evlog)
        } else {
            open_remote(&config, evlog)
        };

        match backend {
            Ok(backend) => IoLogSession::new(config, Some(backend)),
            Err(err) if config.ignore_iolog_errors => {
                iolog_warn!("unable to open I/O log: {err}");
                let mut session = IoLogSession::new(config, None)?;
                session.disabled = true;
                session.warned = true;
                Ok(session)
            }
            Err(err) => Err(err),
        }
    }

    /// A session that records to `backend`.
    pub fn with_backend(config: IoLogConfig, backend: Box<dyn IoLogBackend>) -> Result<Self, Error> {
        IoLogSession::new(config, Some(backend))
    }

    fn new(config: IoLogConfig, backend: Option<Box<dyn IoLogBackend>>) -> Result<Self, Error> {
        let now = TimeSpec::monotonic()?;
        Ok(IoLogSession {
            backend,
            config,
            start_time: now,
            last_time: now,
            disabled: false,
            warned: false,
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Time since the previous recorded event.
    fn delay(&mut self) -> Result<TimeSpec, Error> {
        let now = TimeSpec::monotonic()?;
        let delay = now.saturating_since(self.last_time);
        self.last_time = now;
        Ok(delay)
    }

    fn check(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if self.config.ignore_iolog_errors => {
                self.disabled = true;
                self.backend = None;
                if !self.warned {
                    self.warned = true;
                    iolog_warn!("unable to write to I/O log: {err}");
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn with_backend_do<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut dyn IoLogBackend, TimeSpec) -> Result<(), Error>,
    {
        if self.disabled {
            return Ok(());
        }
        let delay = self.delay()?;
        let result = match self.backend.as_deref_mut() {
            Some(backend) => f(backend, delay),
            None => Ok(()),
        };
        self.check(result)
    }

    pub fn log_io(&mut self, event: IoEvent, data: &[u8]) -> Result<(), Error> {
        if !self.config.records(event) || data.is_empty() {
            return Ok(());
        }
        self.with_backend_do(|backend, delay| backend.log_io(event, delay, data))
    }

    pub fn log_winsize(&mut self, lines: u32, cols: u32) -> Result<(), Error> {
        if !self.config.records(IoEvent::WinSize) {
            return Ok(());
        }
        self.with_backend_do(|backend, delay| backend.log_winsize(delay, lines, cols))
    }

    pub fn log_suspend(&mut self, signal: SignalNumber) -> Result<(), Error> {
        if !self.config.records(IoEvent::Suspend) {
            return Ok(());
        }
        self.with_backend_do(|backend, delay| backend.log_suspend(delay, signal))
    }

    /// Finish the recording. `status` is the command's wait status, or the reason it could
    /// not be executed.
    pub fn close(mut self, status: Result<WaitStatus, &str>) -> Result<(), Error> {
        if self.disabled {
            return Ok(());
        }
        let run_time = TimeSpec::monotonic()?.saturating_since(self.start_time);
        let result = match self.backend.as_deref_mut() {
            Some(backend) => backend.close(run_time, status),
            None => Ok(()),
        };
        self.check(result)
    }
}

fn open_local(config: &IoLogConfig, evlog: &mut Eventlog) -> Result<Box<dyn IoLogBackend>, Error> {
    let dir_template = config.iolog_dir.to_string_lossy();
    let dir = {
        let escapes = PathEscapes {
            user: &evlog.submituser,
            group: evlog.submitgroup.as_deref().unwrap_or_default(),
            runas_user: &evlog.runuser,
            runas_group: evlog.rungroup.as_deref().unwrap_or_default(),
            hostname: evlog.submithost.as_deref().unwrap_or_default(),
            command: &evlog.command,
        };
        expand_path(&dir_template, &config.iolog_file, &escapes)?
    };

    evlog.iolog_file = Some(relative_to(&dir, &config.iolog_dir));
    evlog.iolog_path = Some(dir.to_string_lossy().into_owned());
    let writer = IoLogWriter::create(&dir, evlog, config.iolog_flush)?;
    dev_info!("recording session in {}", dir.display());
    Ok(Box::new(writer))
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn open_remote(config: &IoLogConfig, evlog: &mut Eventlog) -> Result<Box<dyn IoLogBackend>, Error> {
    let client_config = ClientConfig {
        submit_time: evlog.submit_time,
        info: info_messages(evlog),
        timeout: config.server_timeout,
        ..Default::default()
    };

    for address in &config.log_servers {
        let attempt = Transport::open(address, &config.tls, config.server_timeout, config.keepalive)
            .and_then(|transport| {
                let mut client =
                    ClientClosure::connect(transport, client_config.clone(), &mut NoSource)?;
                client.flush()?;
                Ok(client)
            });
        match attempt {
            Ok(client) => {
                dev_info!("sending I/O log to {address}");
                return Ok(Box::new(client));
            }
            Err(err) => dev_warn!("unable to use log server {address}: {err}"),
        }
    }
    Err(LogServerError::Unreachable.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iolog::IoLogFiles;
    use crate::logsrv::handler::serve;
    use crate::logsrv::journal::{Journal, JournalReader};
    use crate::logsrv::transport::ServerAddress;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::thread;

    fn config(dir: &Path) -> IoLogConfig {
        IoLogConfig {
            log_input: true,
            log_output: true,
            iolog_dir: dir.to_path_buf(),
            iolog_file: "%{seq}".to_string(),
            iolog_flush: true,
            ignore_iolog_errors: false,
            log_servers: Vec::new(),
            server_timeout: Some(std::time::Duration::from_secs(10)),
            keepalive: false,
            tls: Default::default(),
        }
    }

    fn evlog() -> Eventlog {
        Eventlog {
            command: "/usr/bin/id".to_string(),
            argv: vec!["id".to_string()],
            runuser: "root".to_string(),
            submituser: "alice".to_string(),
            submithost: Some("box".to_string()),
            submit_time: TimeSpec::new(1700000000, 0),
            ..Default::default()
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl IoLogBackend for Recorder {
        fn log_io(&mut self, event: IoEvent, _: TimeSpec, data: &[u8]) -> Result<(), Error> {
            if self.fail {
                return Err(IoLogError::Corrupt("disk full".to_string()).into());
            }
            let data = String::from_utf8_lossy(data);
            self.seen.borrow_mut().push(format!("{event:?} {data}"));
            Ok(())
        }

        fn log_winsize(&mut self, _: TimeSpec, lines: u32, cols: u32) -> Result<(), Error> {
            self.seen.borrow_mut().push(format!("winsize {lines}x{cols}"));
            Ok(())
        }

        fn log_suspend(&mut self, _: TimeSpec, signal: SignalNumber) -> Result<(), Error> {
            self.seen.borrow_mut().push(format!("suspend {signal}"));
            Ok(())
        }

        fn close(&mut self, _: TimeSpec, status: Result<WaitStatus, &str>) -> Result<(), Error> {
            let status = match status {
                Ok(status) => format!("{:?}", status.exit_status()),
                Err(error) => error.to_string(),
            };
            self.seen.borrow_mut().push(format!("close {status}"));
            Ok(())
        }
    }

    #[test]
    fn unrecorded_streams_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.log_input = false;
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();

        let mut session = IoLogSession::with_backend(config, Box::new(recorder)).unwrap();
        session.log_io(IoEvent::TtyIn, b"secret").unwrap();
        session.log_io(IoEvent::TtyOut, b"").unwrap();
        session.log_io(IoEvent::TtyOut, b"hello").unwrap();
        session.log_winsize(24, 80).unwrap();
        session.close(Err("command not found")).unwrap();

        assert_eq!(
            *seen.borrow(),
            ["TtyOut hello", "winsize 24x80", "close command not found"]
        );
    }

    #[test]
    fn errors_are_fatal_unless_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Recorder {
            fail: true,
            ..Default::default()
        };

        let mut session =
            IoLogSession::with_backend(config(dir.path()), Box::new(failing.clone())).unwrap();
        assert!(matches!(
            session.log_io(IoEvent::Stdout, b"x"),
            Err(Error::IoLog(IoLogError::Corrupt(_)))
        ));

        let mut config = config(dir.path());
        config.ignore_iolog_errors = true;
        let mut session = IoLogSession::with_backend(config, Box::new(failing.clone())).unwrap();
        session.log_io(IoEvent::Stdout, b"x").unwrap();
        assert!(session.is_disabled());
        session.log_winsize(24, 80).unwrap();
        session.close(Err("gone")).unwrap();
        assert!(failing.seen.borrow().is_empty());
    }

    #[test]
    fn local_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut evlog = evlog();

        let mut session = IoLogSession::open(config(dir.path()), &mut evlog).unwrap();
        session.log_io(IoEvent::TtyOut, b"uid=0").unwrap();
        session.log_io(IoEvent::TtyIn, b"q").unwrap();
        session.close(Ok(WaitStatus::exited(0))).unwrap();

        assert_eq!(evlog.iolog_file.as_deref(), Some("00/00/01"));
        let path = dir.path().join("00/00/01");
        assert_eq!(evlog.iolog_path, Some(path.to_string_lossy().into_owned()));

        let mut files = IoLogFiles::open(&path).unwrap();
        assert_eq!(files.info().unwrap().command, "/usr/bin/id");
        let mut events = Vec::new();
        while let Some(record) = files.read_record().unwrap() {
            let data = files.read_data(&record).unwrap();
            events.push((record.event, data));
        }
        assert_eq!(
            events,
            [
                (IoEvent::TtyOut, b"uid=0".to_vec()),
                (IoEvent::TtyIn, b"q".to_vec()),
            ]
        );
    }

    #[test]
    fn unusable_directory_is_ignored_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let mut config = config(&blocker);
        config.ignore_iolog_errors = true;
        let mut evlog = evlog();
        let mut session = IoLogSession::open(config.clone(), &mut evlog).unwrap();
        assert!(session.is_disabled());
        session.log_io(IoEvent::TtyOut, b"x").unwrap();
        session.close(Ok(WaitStatus::exited(0))).unwrap();

        config.ignore_iolog_errors = false;
        assert!(IoLogSession::open(config, &mut evlog).is_err());
    }

    #[test]
    fn remote_recording() {
        let relay = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let relay_dir = relay.path().to_path_buf();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut journal = Journal::new(&relay_dir);
            serve(&mut stream, &mut journal, "test").unwrap();
            journal.finished_path().map(Path::to_path_buf)
        });

        let mut config = config(relay.path());
        config.log_servers = vec![ServerAddress::new("127.0.0.1", port, false)];
        let mut evlog = evlog();
        let mut session = IoLogSession::open(config, &mut evlog).unwrap();
        session.log_io(IoEvent::Stdout, b"uid=0").unwrap();
        session.close(Ok(WaitStatus::exited(3))).unwrap();

        let finished = server.join().unwrap().unwrap();
        let messages: Vec<ClientMessage> = JournalReader::open(&finished)
            .unwrap()
            .map(|message| message.unwrap())
            .collect();
        let names: Vec<&str> = messages.iter().map(|message| message.name()).collect();
        assert_eq!(names, ["AcceptMessage", "StdoutBuf", "ExitMessage"]);
        assert!(matches!(&messages[2], ClientMessage::Exit(exit) if exit.exit_value == 3));
    }
}
