//! Server side handling of client messages.
use std::io::{self, Read, Write};

use super::proto::{
    frame, AcceptMessage, AlertMessage, ChangeWindowSize, ClientMessage, CommandSuspend,
    ExitMessage, IoBuffer, RejectMessage, RestartMessage, ServerHello, ServerMessage,
    MESSAGE_SIZE_MAX,
};
use super::Error;
use crate::iolog::IoEvent;
use crate::log::{dev_info, dev_warn};
use crate::system::time::TimeSpec;

/// What a server does with each kind of client message. Every method also receives the
/// message exactly as it was received, for handlers that store it unchanged.
pub trait ClientMessageHandler {
    fn accept(&mut self, msg: &AcceptMessage, raw: &[u8]) -> Result<(), Error>;

    fn reject(&mut self, msg: &RejectMessage, raw: &[u8]) -> Result<(), Error>;

    fn exit(&mut self, msg: &ExitMessage, raw: &[u8]) -> Result<(), Error>;

    fn restart(&mut self, msg: &RestartMessage, raw: &[u8]) -> Result<(), Error>;

    fn alert(&mut self, msg: &AlertMessage, raw: &[u8]) -> Result<(), Error>;

    fn iobuf(&mut self, event: IoEvent, msg: &IoBuffer, raw: &[u8]) -> Result<(), Error>;

    fn winsize(&mut self, msg: &ChangeWindowSize, raw: &[u8]) -> Result<(), Error>;

    fn suspend(&mut self, msg: &CommandSuspend, raw: &[u8]) -> Result<(), Error>;

    /// The identifier a client can later restart this session with.
    fn log_id(&self) -> Option<String>;
}

/// Route one decoded message to the handler method for its kind.
pub fn dispatch<H: ClientMessageHandler + ?Sized>(
    handler: &mut H,
    message: &ClientMessage,
    raw: &[u8],
) -> Result<(), Error> {
    match message {
        ClientMessage::Accept(msg) => handler.accept(msg, raw),
        ClientMessage::Reject(msg) => handler.reject(msg, raw),
        ClientMessage::Exit(msg) => handler.exit(msg, raw),
        ClientMessage::Restart(msg) => handler.restart(msg, raw),
        ClientMessage::Alert(msg) => handler.alert(msg, raw),
        ClientMessage::TtyIn(msg) => handler.iobuf(IoEvent::TtyIn, msg, raw),
        ClientMessage::TtyOut(msg) => handler.iobuf(IoEvent::TtyOut, msg, raw),
        ClientMessage::Stdin(msg) => handler.iobuf(IoEvent::Stdin, msg, raw),
        ClientMessage::Stdout(msg) => handler.iobuf(IoEvent::Stdout, msg, raw),
        ClientMessage::Stderr(msg) => handler.iobuf(IoEvent::Stderr, msg, raw),
        ClientMessage::WinSize(msg) => handler.winsize(msg, raw),
        ClientMessage::Suspend(msg) => handler.suspend(msg, raw),
        ClientMessage::Hello(hello) => {
            dev_info!("client: {}", hello.client_id);
            Ok(())
        }
    }
}

fn read_message<R: Read>(stream: &mut R) -> Result<Option<Vec<u8>>, Error> {
    let mut len = [0; 4];
    match stream.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(len) as usize;
    if len > MESSAGE_SIZE_MAX {
        return Err(Error::TooLarge(len));
    }
    let mut raw = vec![0; len];
    stream.read_exact(&mut raw)?;
    Ok(Some(raw))
}

fn write_message<W: Write>(stream: &mut W, message: &ServerMessage) -> Result<(), Error> {
    stream.write_all(&frame(&message.encode())?)?;
    Ok(())
}

/// Serve one client connection on a blocking stream until the session ends: greet the
/// client, hand every message to `handler`, and acknowledge stored I/O with commit points.
pub fn serve<S, H>(stream: &mut S, handler: &mut H, server_id: &str) -> Result<(), Error>
where
    S: Read + Write,
    H: ClientMessageHandler + ?Sized,
{
    let hello = ServerHello {
        server_id: server_id.to_string(),
        ..Default::default()
    };
    write_message(stream, &ServerMessage::Hello(hello))?;

    let mut elapsed = TimeSpec::ZERO;
    while let Some(raw) = read_message(stream)? {
        let message = ClientMessage::decode(&raw)?;
        if let Err(err) = dispatch(handler, &message, &raw) {
            dev_warn!("{}: {err}", message.name());
            write_message(stream, &ServerMessage::Error(err.to_string()))?;
            return Err(err);
        }

        match &message {
            ClientMessage::Accept(_) | ClientMessage::Restart(_) => {
                if let ClientMessage::Restart(restart) = &message {
                    elapsed = restart.resume_point;
                }
                if let Some(log_id) = handler.log_id() {
                    write_message(stream, &ServerMessage::LogId(log_id))?;
                }
            }
            ClientMessage::Exit(_) => {
                write_message(stream, &ServerMessage::CommitPoint(elapsed))?;
                break;
            }
            ClientMessage::Reject(_) => break,
            other => {
                if let Some(delay) = other.delay() {
                    elapsed += delay;
                    write_message(stream, &ServerMessage::CommitPoint(elapsed))?;
                }
            }
        }
    }
    Ok(())
}
