//! Non-blocking connections to a log server, plain TCP or TLS.
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::Error;
use crate::cutils::cerr;

pub const DEFAULT_PORT: u16 = 30343;
pub const DEFAULT_PORT_TLS: u16 = 30344;

/// One entry of the `log_servers` list: `host[:port][(tls)]`, with IPv6 hosts in brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16, tls: bool) -> Self {
        ServerAddress {
            host: host.to_string(),
            port,
            tls,
        }
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(entry: &str) -> Result<Self, Error> {
        let invalid = || Error::Address(entry.to_string());
        let (rest, tls) = match entry.strip_suffix("(tls)") {
            Some(rest) => (rest, true),
            None => (entry, false),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match rest.rsplit_once(':') {
                // a bare IPv6 address has no port
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tls => DEFAULT_PORT_TLS,
            None => DEFAULT_PORT,
        };

        Ok(ServerAddress::new(host, port, tls))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "{}:{}", self.host, self.port)?;
        }
        if self.tls {
            f.write_str("(tls)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub ca_bundle: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    /// Defaults to the certificate file.
    pub key: Option<PathBuf>,
    pub verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            ca_bundle: None,
            cert: None,
            key: None,
            verify: true,
        }
    }
}

/// The outcome of one non-blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// Transferred this many bytes; 0 on a read means the peer closed the connection.
    Done(usize),
    WouldBlock,
    /// The TLS layer has to read before the operation can make progress.
    WantRead,
    /// The TLS layer has to write before the operation can make progress.
    WantWrite,
}

pub trait Stream: AsRawFd {
    fn read_nb(&mut self, buf: &mut [u8]) -> Result<IoStatus, Error>;

    fn write_nb(&mut self, buf: &[u8]) -> Result<IoStatus, Error>;

    /// Advance the TLS handshake; `Done` once the connection is usable.
    fn handshake(&mut self) -> Result<IoStatus, Error> {
        Ok(IoStatus::Done(0))
    }

    fn close(&mut self);
}

fn status(result: io::Result<usize>) -> Result<IoStatus, Error> {
    match result {
        Ok(n) => Ok(IoStatus::Done(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(IoStatus::WouldBlock),
        Err(err) => Err(err.into()),
    }
}

impl Stream for TcpStream {
    fn read_nb(&mut self, buf: &mut [u8]) -> Result<IoStatus, Error> {
        status(self.read(buf))
    }

    fn write_nb(&mut self, buf: &[u8]) -> Result<IoStatus, Error> {
        status(self.write(buf))
    }

    fn close(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

impl Stream for UnixStream {
    fn read_nb(&mut self, buf: &mut [u8]) -> Result<IoStatus, Error> {
        status(self.read(buf))
    }

    fn write_nb(&mut self, buf: &[u8]) -> Result<IoStatus, Error> {
        status(self.write(buf))
    }

    fn close(&mut self) {
        let _ = UnixStream::shutdown(self, Shutdown::Both);
    }
}

fn set_keepalive(fd: RawFd) -> io::Result<()> {
    let on: libc::c_int = 1;
    cerr(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            (&on as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Open a non-blocking TCP connection to the first address `address` resolves to that
/// accepts it within `timeout`.
pub fn connect_tcp(
    address: &ServerAddress,
    timeout: Option<Duration>,
    keepalive: bool,
) -> Result<TcpStream, Error> {
    let mut last_error = None;
    for addr in (address.host.as_str(), address.port).to_socket_addrs()? {
        let result = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match result {
            Ok(stream) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                if keepalive {
                    set_keepalive(stream.as_raw_fd())?;
                }
                return Ok(stream);
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.map_or(Error::Unreachable, Error::from))
}

/// A connection as chosen by the server entry.
pub enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(tls::TlsStream),
}

impl Transport {
    pub fn open(
        address: &ServerAddress,
        tls_config: &TlsConfig,
        timeout: Option<Duration>,
        keepalive: bool,
    ) -> Result<Self, Error> {
        let stream = connect_tcp(address, timeout, keepalive)?;
        if !address.tls {
            return Ok(Transport::Plain(stream));
        }
        #[cfg(feature = "tls")]
        {
            tls::TlsStream::start(tls_config, &address.host, stream).map(Transport::Tls)
        }
        #[cfg(not(feature = "tls"))]
        {
            let _ = tls_config;
            Err(Error::Tls("TLS support is not available".to_string()))
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Transport::Plain(stream) => stream.as_raw_fd(),
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.as_raw_fd(),
        }
    }
}

impl Stream for Transport {
    fn read_nb(&mut self, buf: &mut [u8]) -> Result<IoStatus, Error> {
        match self {
            Transport::Plain(stream) => stream.read_nb(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.read_nb(buf),
        }
    }

    fn write_nb(&mut self, buf: &[u8]) -> Result<IoStatus, Error> {
        match self {
            Transport::Plain(stream) => stream.write_nb(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.write_nb(buf),
        }
    }

    fn handshake(&mut self) -> Result<IoStatus, Error> {
        match self {
            Transport::Plain(stream) => stream.handshake(),
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.handshake(),
        }
    }

    fn close(&mut self) {
        match self {
            Transport::Plain(stream) => stream.close(),
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.close(),
        }
    }
}

#[cfg(feature = "tls")]
mod tls {
    use std::net::TcpStream;
    use std::os::fd::{AsRawFd, RawFd};

    use openssl::ssl::{
        ErrorCode, HandshakeError, MidHandshakeSslStream, SslConnector, SslFiletype, SslMethod,
        SslStream, SslVerifyMode,
    };

    use super::{IoStatus, Stream, TlsConfig};
    use crate::logsrv::Error;

    fn tls_error(err: impl std::fmt::Display) -> Error {
        Error::Tls(err.to_string())
    }

    enum State {
        Handshaking(MidHandshakeSslStream<TcpStream>),
        Connected(SslStream<TcpStream>),
        Failed,
    }

    pub struct TlsStream {
        fd: RawFd,
        state: State,
    }

    fn connector(config: &TlsConfig) -> Result<SslConnector, Error> {
        let mut builder = SslConnector::builder(SslMethod::tls_client()).map_err(tls_error)?;
        if let Some(ca_bundle) = &config.ca_bundle {
            builder.set_ca_file(ca_bundle).map_err(tls_error)?;
        }
        if let Some(cert) = &config.cert {
            builder.set_certificate_chain_file(cert).map_err(tls_error)?;
            let key = config.key.as_ref().unwrap_or(cert);
            builder
                .set_private_key_file(key, SslFiletype::PEM)
                .map_err(tls_error)?;
        }
        if !config.verify {
            builder.set_verify(SslVerifyMode::NONE);
        }
        Ok(builder.build())
    }

    fn want(code: ErrorCode) -> Option<IoStatus> {
        match code {
            ErrorCode::WANT_READ => Some(IoStatus::WantRead),
            ErrorCode::WANT_WRITE => Some(IoStatus::WantWrite),
            _ => None,
        }
    }

    fn transfer_status(result: Result<usize, openssl::ssl::Error>) -> Result<IoStatus, Error> {
        let err = match result {
            Ok(n) => return Ok(IoStatus::Done(n)),
            Err(err) => err,
        };
        if err.code() == ErrorCode::ZERO_RETURN {
            return Ok(IoStatus::Done(0));
        }
        if let Some(status) = want(err.code()) {
            return Ok(status);
        }
        match err.into_io_error() {
            Ok(io) if io.kind() == std::io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
            Ok(io) => Err(io.into()),
            Err(err) => Err(tls_error(err)),
        }
    }

    impl TlsStream {
        pub fn start(config: &TlsConfig, host: &str, stream: TcpStream) -> Result<Self, Error> {
            let fd = stream.as_raw_fd();
            let mut connect = connector(config)?.configure().map_err(tls_error)?;
            if !config.verify {
                connect.set_verify_hostname(false);
            }
            let state = match connect.connect(host, stream) {
                Ok(stream) => State::Connected(stream),
                Err(HandshakeError::WouldBlock(mid)) => State::Handshaking(mid),
                Err(HandshakeError::Failure(mid)) => return Err(tls_error(mid.error())),
                Err(HandshakeError::SetupFailure(err)) => return Err(tls_error(err)),
            };
            Ok(TlsStream { fd, state })
        }
    }

    impl AsRawFd for TlsStream {
        fn as_raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    impl Stream for TlsStream {
        fn read_nb(&mut self, buf: &mut [u8]) -> Result<IoStatus, Error> {
            match &mut self.state {
                State::Connected(stream) => transfer_status(stream.ssl_read(buf)),
                _ => Err(Error::Tls("read before the handshake completed".to_string())),
            }
        }

        fn write_nb(&mut self, buf: &[u8]) -> Result<IoStatus, Error> {
            match &mut self.state {
                State::Connected(stream) => transfer_status(stream.ssl_write(buf)),
                _ => Err(Error::Tls("write before the handshake completed".to_string())),
            }
        }

        fn handshake(&mut self) -> Result<IoStatus, Error> {
            match std::mem::replace(&mut self.state, State::Failed) {
                State::Connected(stream) => {
                    self.state = State::Connected(stream);
                    Ok(IoStatus::Done(0))
                }
                State::Handshaking(mid) => match mid.handshake() {
                    Ok(stream) => {
                        self.state = State::Connected(stream);
                        Ok(IoStatus::Done(0))
                    }
                    Err(HandshakeError::WouldBlock(mid)) => {
                        let status = want(mid.error().code()).unwrap_or(IoStatus::WantRead);
                        self.state = State::Handshaking(mid);
                        Ok(status)
                    }
                    Err(HandshakeError::Failure(mid)) => Err(tls_error(mid.error())),
                    Err(HandshakeError::SetupFailure(err)) => Err(tls_error(err)),
                },
                State::Failed => Err(Error::Tls("handshake already failed".to_string())),
            }
        }

        fn close(&mut self) {
            if let State::Connected(stream) = &mut self.state {
                let _ = stream.shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::TcpListener;

    #[test]
    fn server_entries() {
        let parse = |entry: &str| entry.parse::<ServerAddress>().unwrap();
        assert_eq!(parse("logsrv"), ServerAddress::new("logsrv", DEFAULT_PORT, false));
        assert_eq!(parse("logsrv(tls)"), ServerAddress::new("logsrv", DEFAULT_PORT_TLS, true));
        assert_eq!(parse("10.0.0.1:4000(tls)"), ServerAddress::new("10.0.0.1", 4000, true));
        assert_eq!(parse("[::1]:5000"), ServerAddress::new("::1", 5000, false));
        assert_eq!(parse("[fe80::1]"), ServerAddress::new("fe80::1", DEFAULT_PORT, false));
        assert_eq!(parse("::1"), ServerAddress::new("::1", DEFAULT_PORT, false));

        for entry in ["bad:port", "", ":30343", "[::1", "[::1]x", "host:70000"] {
            assert!(entry.parse::<ServerAddress>().is_err(), "{entry:?}");
        }
    }

    #[test]
    fn entries_display_as_written() {
        for entry in ["logsrv:30343", "[::1]:5000(tls)"] {
            assert_eq!(entry.parse::<ServerAddress>().unwrap().to_string(), entry);
        }
    }

    #[test]
    fn nonblocking_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = ServerAddress::new("127.0.0.1", port, false);

        let mut stream =
            Transport::open(&address, &TlsConfig::default(), Some(Duration::from_secs(5)), true)
                .unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        assert!(!stream.is_tls());
        assert_eq!(stream.handshake().unwrap(), IoStatus::Done(0));

        let mut buf = [0; 16];
        assert_eq!(stream.read_nb(&mut buf).unwrap(), IoStatus::WouldBlock);
        assert_eq!(stream.write_nb(b"ping").unwrap(), IoStatus::Done(4));

        let mut received = [0; 4];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"ping");

        drop(peer);
        let status = loop {
            match stream.read_nb(&mut buf).unwrap() {
                IoStatus::WouldBlock => std::thread::sleep(Duration::from_millis(10)),
                status => break status,
            }
        };
        assert_eq!(status, IoStatus::Done(0));
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn tls_entries_need_the_feature() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = ServerAddress::new("127.0.0.1", port, true);
        assert!(matches!(
            Transport::open(&address, &TlsConfig::default(), None, false),
            Err(Error::Tls(_))
        ));
    }
}
