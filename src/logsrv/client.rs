//! The client side of a log server connection.
//!
//! A [`ClientClosure`] is driven by readiness callbacks: [`on_readable`] and [`on_writable`]
//! are called by an event loop when the connection's descriptor is ready, and
//! [`interest`] tells that loop which events to wait for. Messages come either from an
//! [`IoSource`] that is pulled whenever the write queue drains (replaying a recording), or
//! are pushed with [`send`] (a live session).
//!
//! [`on_readable`]: ClientClosure::on_readable
//! [`on_writable`]: ClientClosure::on_writable
//! [`interest`]: ClientClosure::interest
//! [`send`]: ClientClosure::send
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::buffer::{ConnectionBuffer, WriteQueue};
use super::proto::{
    AcceptMessage, ClientHello, ClientMessage, ExitMessage, InfoMessage, RejectMessage,
    RestartMessage, ServerMessage,
};
use super::transport::{IoStatus, Stream};
use super::Error;
use crate::log::{dev_debug, dev_info, dev_warn};
use crate::system::poll::{PollEvent, PollSet};
use crate::system::signal::short_signal_name;
use crate::system::time::TimeSpec;
use crate::system::wait::WaitStatus;

/// Connection states, in the order a session moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    Error,
    RecvHello,
    SendRestart,
    SendAccept,
    SendReject,
    SendIo,
    SendExit,
    Closing,
    Finished,
}

/// Produces the messages of a session, in order, ending with an `ExitMessage`.
pub trait IoSource {
    /// The next message, or `None` if there is nothing to send right now.
    fn next_message(&mut self) -> Result<Option<ClientMessage>, Error>;
}

/// For sessions whose messages are pushed with [`ClientClosure::send`].
pub struct NoSource;

impl IoSource for NoSource {
    fn next_message(&mut self) -> Result<Option<ClientMessage>, Error> {
        Ok(None)
    }
}

impl IoSource for VecDeque<ClientMessage> {
    fn next_message(&mut self) -> Result<Option<ClientMessage>, Error> {
        Ok(self.pop_front())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPoint {
    pub log_id: String,
    pub resume_point: TimeSpec,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub submit_time: TimeSpec,
    pub info: Vec<InfoMessage>,
    /// Send a `RejectMessage` with this reason instead of accepting.
    pub reject: Option<String>,
    /// Resume an earlier session instead of starting a new one.
    pub restart: Option<RestartPoint>,
    /// Only record the accept event; no I/O follows.
    pub accept_only: bool,
    /// Introduce ourselves before the server does.
    pub client_id: Option<String>,
    /// Limit on every wait for the server.
    pub timeout: Option<Duration>,
}

pub struct ClientClosure<S> {
    stream: S,
    state: ClientState,
    config: ClientConfig,
    read_buf: ConnectionBuffer,
    write_queue: WriteQueue,
    elapsed: TimeSpec,
    committed: TimeSpec,
    log_id: Option<String>,
    source_idle: bool,
    // messages are pushed with `send`, so only the exit message ends the session
    pushed: bool,
    // a TLS read needs the socket to be writable
    write_instead_of_read: bool,
    // a TLS write needs the socket to be readable
    read_instead_of_write: bool,
}

/// The exit message for a command that finished with `status` after `run_time`.
pub fn exit_message(run_time: TimeSpec, status: WaitStatus) -> ClientMessage {
    let mut exit = ExitMessage {
        run_time,
        ..Default::default()
    };
    if let Some(signal) = status.term_signal() {
        exit.signal = short_signal_name(signal);
        exit.dumped_core = status.core_dumped();
        exit.exit_value = signal | 128;
    } else {
        exit.exit_value = status.exit_status().unwrap_or(0);
    }
    ClientMessage::Exit(exit)
}

/// The exit message for a command that could not be run.
pub fn error_exit_message(run_time: TimeSpec, error: &str) -> ClientMessage {
    ClientMessage::Exit(ExitMessage {
        run_time,
        error: error.to_string(),
        ..Default::default()
    })
}

impl<S: Stream> ClientClosure<S> {
    /// Most messages queued from an [`IoSource`] at once.
    const BATCH: usize = 32;

    pub fn new(stream: S, config: ClientConfig) -> Result<Self, Error> {
        let mut client = ClientClosure {
            stream,
            state: ClientState::RecvHello,
            config,
            read_buf: ConnectionBuffer::new(),
            write_queue: WriteQueue::new(),
            elapsed: TimeSpec::ZERO,
            committed: TimeSpec::ZERO,
            log_id: None,
            source_idle: false,
            pushed: false,
            write_instead_of_read: false,
            read_instead_of_write: false,
        };
        if let Some(client_id) = &client.config.client_id {
            let hello = ClientMessage::Hello(ClientHello {
                client_id: client_id.clone(),
            });
            client.write_queue.push_message(&hello.encode())?;
        }
        Ok(client)
    }

    /// Complete the TLS handshake, if any, and wait for the server's greeting; on return the
    /// first message of the session is queued.
    pub fn connect(stream: S, config: ClientConfig, source: &mut dyn IoSource) -> Result<Self, Error> {
        let mut client = Self::new(stream, config)?;
        client.await_hello(source)?;
        Ok(client)
    }

    fn await_hello(&mut self, source: &mut dyn IoSource) -> Result<(), Error> {
        let deadline = self.deadline();
        loop {
            let status = self.stream.handshake();
            match self.check(status)? {
                IoStatus::Done(_) => break,
                IoStatus::WantWrite => self.wait(&[PollEvent::Writable], deadline)?,
                IoStatus::WantRead | IoStatus::WouldBlock => {
                    self.wait(&[PollEvent::Readable], deadline)?
                }
            };
        }

        while self.state == ClientState::RecvHello {
            let interest = self.interest();
            for event in self.wait(&interest, deadline)? {
                match event {
                    PollEvent::Readable => self.on_readable(source)?,
                    PollEvent::Writable => self.on_writable(source)?,
                }
            }
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.timeout.map(|timeout| Instant::now() + timeout)
    }

    fn wait(&mut self, events: &[PollEvent], deadline: Option<Instant>) -> Result<Vec<PollEvent>, Error> {
        let mut set = PollSet::new();
        for &event in events {
            set.add_fd(event, &self.stream, event);
        }
        let timeout = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let ready = set.poll(timeout);
        let ready = self.check(ready.map_err(Error::from))?;
        if ready.is_empty() {
            self.state = ClientState::Error;
            return Err(Error::Timeout);
        }
        Ok(ready)
    }

    fn check<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if result.is_err() {
            self.state = ClientState::Error;
        }
        result
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ClientState::Finished
    }

    /// Sum of the delays of the I/O messages queued so far.
    pub fn elapsed(&self) -> TimeSpec {
        self.elapsed
    }

    /// The latest point the server reported as stored.
    pub fn committed(&self) -> TimeSpec {
        self.committed
    }

    /// The identifier the server assigned to this session, to restart it with.
    pub fn log_id(&self) -> Option<&str> {
        self.log_id.as_deref()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn close(&mut self) {
        self.stream.close();
    }

    /// The readiness events the connection is waiting for; empty once it is done.
    pub fn interest(&self) -> Vec<PollEvent> {
        if matches!(self.state, ClientState::Error | ClientState::Finished) {
            return Vec::new();
        }
        let mut events = vec![PollEvent::Readable];
        let writing = match self.state {
            ClientState::SendIo => !self.write_queue.is_empty() || !self.source_idle,
            _ => !self.write_queue.is_empty(),
        };
        if writing || self.write_instead_of_read {
            events.push(PollEvent::Writable);
        }
        events
    }

    /// Queue one message of the session.
    pub fn send(&mut self, message: ClientMessage) -> Result<(), Error> {
        self.pushed = true;
        self.queue(message)
    }

    fn queue(&mut self, message: ClientMessage) -> Result<(), Error> {
        if let Some(delay) = message.delay() {
            self.elapsed += delay;
        }
        if matches!(message, ClientMessage::Exit(_)) {
            self.state = ClientState::SendExit;
        }
        self.source_idle = false;
        let encoded = message.encode();
        let result = self.write_queue.push_message(&encoded);
        self.check(result)
    }

    pub fn on_readable(&mut self, source: &mut dyn IoSource) -> Result<(), Error> {
        let result = if self.read_instead_of_write {
            self.read_instead_of_write = false;
            self.write_pending(source)
        } else {
            self.read_pending()
        };
        self.check(result)
    }

    pub fn on_writable(&mut self, source: &mut dyn IoSource) -> Result<(), Error> {
        let result = if self.write_instead_of_read {
            self.write_instead_of_read = false;
            self.read_pending()
        } else {
            self.write_pending(source)
        };
        self.check(result)
    }

    fn read_pending(&mut self) -> Result<(), Error> {
        match self.stream.read_nb(self.read_buf.spare_mut())? {
            IoStatus::Done(0) => return self.on_eof(),
            IoStatus::Done(n) => self.read_buf.commit(n),
            IoStatus::WantWrite => {
                self.write_instead_of_read = true;
                return Ok(());
            }
            IoStatus::WantRead | IoStatus::WouldBlock => return Ok(()),
        }

        while let Some(frame) = self.read_buf.next_frame()? {
            let message = ServerMessage::decode(&frame)?;
            self.handle_server_message(message)?;
        }
        Ok(())
    }

    fn on_eof(&mut self) -> Result<(), Error> {
        match self.state {
            ClientState::Closing if !self.expects_commit() => {
                self.state = ClientState::Finished;
                Ok(())
            }
            ClientState::Closing if self.committed == self.elapsed => {
                self.state = ClientState::Finished;
                Ok(())
            }
            ClientState::Finished => Ok(()),
            _ => Err(Error::Protocol("premature EOF".to_string())),
        }
    }

    fn nothing_left(&self) -> bool {
        if !self.write_queue.is_empty() {
            return false;
        }
        match self.state {
            ClientState::Closing => true,
            ClientState::SendIo => self.source_idle && !self.pushed,
            _ => false,
        }
    }

    fn expects_commit(&self) -> bool {
        self.config.restart.is_some()
            || (self.config.reject.is_none() && !self.config.accept_only)
    }

    fn write_pending(&mut self, source: &mut dyn IoSource) -> Result<(), Error> {
        loop {
            let Some(pending) = self.write_queue.front() else {
                if self.completion(source)? {
                    continue;
                }
                return Ok(());
            };
            match self.stream.write_nb(pending)? {
                IoStatus::Done(0) | IoStatus::WouldBlock | IoStatus::WantWrite => return Ok(()),
                IoStatus::Done(n) => self.write_queue.advance(n),
                IoStatus::WantRead => {
                    self.read_instead_of_write = true;
                    return Ok(());
                }
            }
        }
    }

    /// Advance the state once everything queued has been sent; returns whether new
    /// messages were queued.
    fn completion(&mut self, source: &mut dyn IoSource) -> Result<bool, Error> {
        match self.state {
            ClientState::SendAccept if self.config.accept_only => {
                self.state = ClientState::Closing;
                Ok(false)
            }
            ClientState::SendAccept | ClientState::SendRestart => {
                self.state = ClientState::SendIo;
                self.fill(source)
            }
            ClientState::SendIo => self.fill(source),
            ClientState::SendReject | ClientState::SendExit => {
                dev_debug!("all messages sent, waiting for the server");
                self.state = ClientState::Closing;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn fill(&mut self, source: &mut dyn IoSource) -> Result<bool, Error> {
        let mut queued = false;
        while self.state == ClientState::SendIo && self.write_queue.len() < Self::BATCH {
            match source.next_message()? {
                Some(message) => {
                    self.queue(message)?;
                    queued = true;
                }
                None => {
                    self.source_idle = true;
                    break;
                }
            }
        }
        Ok(queued)
    }

    fn start_session(&mut self) -> Result<(), Error> {
        let config = &self.config;
        let (message, state) = if let Some(restart) = &config.restart {
            let message = ClientMessage::Restart(RestartMessage {
                log_id: restart.log_id.clone(),
                resume_point: restart.resume_point,
            });
            // the resumed stream continues from the restart point
            self.elapsed = restart.resume_point;
            self.committed = restart.resume_point;
            (message, ClientState::SendRestart)
        } else if let Some(reason) = &config.reject {
            let message = ClientMessage::Reject(RejectMessage {
                submit_time: config.submit_time,
                reason: reason.clone(),
                info_msgs: config.info.clone(),
            });
            (message, ClientState::SendReject)
        } else {
            let message = ClientMessage::Accept(AcceptMessage {
                submit_time: config.submit_time,
                info_msgs: config.info.clone(),
                expect_iobufs: !config.accept_only,
            });
            (message, ClientState::SendAccept)
        };
        self.write_queue.push_message(&message.encode())?;
        self.state = state;
        Ok(())
    }

    fn handle_server_message(&mut self, message: ServerMessage) -> Result<(), Error> {
        match message {
            ServerMessage::Hello(hello) => {
                if self.state != ClientState::RecvHello {
                    return Err(Error::Protocol(format!(
                        "unexpected ServerHello in state {:?}",
                        self.state
                    )));
                }
                if hello.server_id.is_empty() {
                    return Err(Error::Protocol("invalid ServerHello".to_string()));
                }
                dev_info!("server: {}", hello.server_id);
                if !hello.redirect.is_empty() {
                    dev_warn!("ignoring redirect to {}", hello.redirect);
                }
                self.start_session()
            }
            ServerMessage::CommitPoint(point) => {
                if self.state < ClientState::SendIo {
                    return Err(Error::Protocol(format!(
                        "unexpected commit point in state {:?}",
                        self.state
                    )));
                }
                dev_debug!("commit point: {point}");
                self.committed = point;
                if self.committed == self.elapsed && self.nothing_left() {
                    dev_debug!("all I/O committed");
                    self.state = ClientState::Finished;
                }
                Ok(())
            }
            ServerMessage::LogId(id) => {
                dev_info!("remote log ID: {id}");
                self.log_id = Some(id);
                Ok(())
            }
            ServerMessage::Error(reason) => Err(Error::Server(reason)),
            ServerMessage::Abort(reason) => Err(Error::Aborted(reason)),
        }
    }

    /// Run the connection on its own until `done` holds, waiting at most the configured
    /// timeout for each step.
    fn drive(
        &mut self,
        source: &mut dyn IoSource,
        done: impl Fn(&Self) -> bool,
    ) -> Result<(), Error> {
        while !done(&*self) {
            let interest = self.interest();
            if interest.is_empty() {
                return Err(Error::Protocol(format!(
                    "connection stopped in state {:?}",
                    self.state
                )));
            }
            let deadline = self.deadline();
            for event in self.wait(&interest, deadline)? {
                match event {
                    PollEvent::Readable => self.on_readable(source)?,
                    PollEvent::Writable => self.on_writable(source)?,
                }
            }
        }
        Ok(())
    }

    /// Send everything `source` produces and wait for the final commit point.
    pub fn run(&mut self, source: &mut dyn IoSource) -> Result<(), Error> {
        self.drive(source, |client| client.is_finished())
    }

    /// Wait until all queued messages are written.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.drive(&mut NoSource, |client| {
            client.write_queue.is_empty() && !client.write_instead_of_read
        })
    }
}
