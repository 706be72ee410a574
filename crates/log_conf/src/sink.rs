//! Terminal handlers writing formatted records to streams, files, sockets, syslog and redis.

#[cfg(feature = "redis")]
mod redis;
mod syslog;

use std::{
    fmt,
    io::{self, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
    path::Path,
    str::FromStr,
};

#[cfg(unix)]
use std::os::unix::net::{UnixDatagram, UnixStream};

use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[cfg(feature = "redis")]
pub(crate) use self::redis::split_host_port;
#[cfg(feature = "redis")]
pub use self::redis::{RedisHandler, redis_handler};
pub use self::syslog::{
    Severity, SyslogHandler, SyslogSink, SyslogWriter, syslog_handler, syslog_net_handler,
};
use crate::{
    LoggerError,
    format::Format,
    handler::{HandlerMut, LazyHandler, SyncHandler},
    record::Record,
};

/// Formats records and writes each one to `W` with a single `write_all` call.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    format: Box<dyn Format>,
}

impl<W: Write + Send + fmt::Debug> WriterSink<W> {
    /// Creates a sink writing records encoded by `format` to `writer`.
    pub fn new(writer: W, format: Box<dyn Format>) -> Self {
        Self { writer, format }
    }
}

impl<W: Write + Send + fmt::Debug> HandlerMut for WriterSink<W> {
    fn log_mut(&mut self, record: &Record) -> Result<(), LoggerError> {
        let bytes = self.format.format(record)?;
        self.writer.write_all(&bytes)?;
        Ok(())
    }
}

/// The handler built for `stream`, `file` and `net` configurations.
pub type StreamHandler<W> = LazyHandler<SyncHandler<WriterSink<W>>>;

/// Wraps `writer` into a thread-safe handler evaluating lazy values before formatting.
pub fn stream_handler<W: Write + Send + fmt::Debug>(
    writer: W,
    format: Box<dyn Format>,
) -> StreamHandler<W> {
    LazyHandler::new(SyncHandler::new(WriterSink::new(writer, format)))
}

/// Appends formatted records to the file at `path`, creating it and its parent directories if
/// needed.
///
/// # Errors
///
/// Returns [`LoggerError::Configuration`] if `path` does not name a file, and
/// [`LoggerError::FileAppenderInitialization`] if the file cannot be opened.
pub fn file_handler(
    path: &Path,
    format: Box<dyn Format>,
) -> Result<StreamHandler<RollingFileAppender>, LoggerError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            LoggerError::bad_configuration(
                path.display().to_string(),
                "path does not name a file",
            )
        })?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)?;

    Ok(stream_handler(appender, format))
}

/// Dials `address` over `network` and writes formatted records to the connection.
///
/// # Errors
///
/// Returns [`LoggerError::Io`] if the connection cannot be established.
pub fn net_handler(
    network: Network,
    address: &str,
    format: Box<dyn Format>,
) -> Result<StreamHandler<NetConn>, LoggerError> {
    let conn = NetConn::dial(network, address)?;
    Ok(stream_handler(conn, format))
}

/// The transports accepted by `net` and `syslog_net` configurations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    /// TCP over IPv4 or IPv6.
    Tcp,

    /// TCP over IPv4 only.
    Tcp4,

    /// TCP over IPv6 only.
    Tcp6,

    /// UDP over IPv4 or IPv6.
    Udp,

    /// UDP over IPv4 only.
    Udp4,

    /// UDP over IPv6 only.
    Udp6,

    /// Unix domain stream socket.
    Unix,

    /// Unix domain datagram socket.
    Unixgram,
}

/// Error returned when a string does not name a [`Network`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown network `{0}`, expected one of tcp, tcp4, tcp6, udp, udp4, udp6, unix, unixgram")]
pub struct ParseNetworkError(pub String);

impl Network {
    /// The configuration name of this network.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
            Self::Udp => "udp",
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
            Self::Unix => "unix",
            Self::Unixgram => "unixgram",
        }
    }

    fn accepts(self, address: &SocketAddr) -> bool {
        match self {
            Self::Tcp4 | Self::Udp4 => address.is_ipv4(),
            Self::Tcp6 | Self::Udp6 => address.is_ipv6(),
            _ => true,
        }
    }
}

impl FromStr for Network {
    type Err = ParseNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            "udp" => Ok(Self::Udp),
            "udp4" => Ok(Self::Udp4),
            "udp6" => Ok(Self::Udp6),
            "unix" => Ok(Self::Unix),
            "unixgram" => Ok(Self::Unixgram),
            other => Err(ParseNetworkError(other.to_owned())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An established connection of one of the [`Network`] kinds.
///
/// Every write on a datagram connection is sent as a single datagram.
#[derive(Debug)]
pub enum NetConn {
    /// A connected TCP stream.
    Tcp(TcpStream),

    /// A UDP socket connected to its peer.
    Udp(UdpSocket),

    /// A connected Unix stream socket.
    #[cfg(unix)]
    Unix(UnixStream),

    /// A Unix datagram socket connected to its peer.
    #[cfg(unix)]
    Unixgram(UnixDatagram),
}

impl NetConn {
    /// Connects to `address` over `network`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the last attempted address, or an error if `address` resolves
    /// to no address usable with `network`.
    pub fn dial(network: Network, address: &str) -> io::Result<Self> {
        match network {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
                Self::dial_each(network, address, |addr| TcpStream::connect(addr).map(Self::Tcp))
            }
            Network::Udp | Network::Udp4 | Network::Udp6 => {
                Self::dial_each(network, address, |addr| {
                    let local: SocketAddr = if addr.is_ipv4() {
                        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
                    } else {
                        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
                    };
                    let socket = UdpSocket::bind(local)?;
                    socket.connect(addr)?;
                    Ok(Self::Udp(socket))
                })
            }
            #[cfg(unix)]
            Network::Unix => UnixStream::connect(address).map(Self::Unix),
            #[cfg(unix)]
            Network::Unixgram => {
                let socket = UnixDatagram::unbound()?;
                socket.connect(address)?;
                Ok(Self::Unixgram(socket))
            }
            #[cfg(not(unix))]
            Network::Unix | Network::Unixgram => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    fn dial_each(
        network: Network,
        address: &str,
        connect: impl Fn(SocketAddr) -> io::Result<Self>,
    ) -> io::Result<Self> {
        let mut last_error = None;
        for addr in address.to_socket_addrs()? {
            if !network.accepts(&addr) {
                continue;
            }
            match connect(addr) {
                Ok(conn) => return Ok(conn),
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address found for `{address}`"),
            )
        }))
    }
}

impl Write for NetConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Udp(socket) => socket.send(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unixgram(socket) => socket.send(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
            _ => Ok(()),
        }
    }
}
