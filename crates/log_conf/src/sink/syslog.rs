//! System log sinks, local (over the well-known Unix sockets) and remote.

use std::io::Write;

use time::{OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};

use super::{NetConn, Network};
use crate::{
    LoggerError,
    format::Format,
    handler::{HandlerMut, LazyHandler, SyncHandler},
    record::{Level, Record},
};

/// Facility `user`, shifted into the priority value.
const FACILITY_USER: u8 = 1 << 3;

/// Sockets of the local syslog daemon, tried in order.
#[cfg(unix)]
const LOCAL_SOCKETS: [&str; 3] = ["/dev/log", "/var/run/syslog", "/var/run/log"];

/// Syslog severities that records map onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Critical conditions.
    Crit,

    /// Error conditions.
    Err,

    /// Warning conditions.
    Warning,

    /// Informational messages.
    Info,

    /// Debug-level messages.
    Debug,
}

impl Severity {
    /// The numeric severity code.
    pub fn code(self) -> u8 {
        match self {
            Self::Crit => 2,
            Self::Err => 3,
            Self::Warning => 4,
            Self::Info => 6,
            Self::Debug => 7,
        }
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        match level {
            Level::Crit => Self::Crit,
            Level::Error => Self::Err,
            Level::Warn => Self::Warning,
            Level::Info => Self::Info,
            Level::Debug => Self::Debug,
        }
    }
}

/// A connection to a syslog daemon.
#[derive(Debug)]
pub struct SyslogWriter {
    conn: NetConn,
    local: bool,
    tag: String,
    hostname: String,
    pid: u32,
}

impl SyslogWriter {
    /// Connects to the local syslog daemon.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Io`] if no local syslog socket accepts a connection.
    pub fn local(tag: impl Into<String>) -> Result<Self, LoggerError> {
        let conn = Self::dial_local()?;
        Ok(Self::new(conn, true, tag.into()))
    }

    /// Connects to a remote syslog daemon at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Io`] if the connection cannot be established.
    pub fn dial(
        network: Network,
        address: &str,
        tag: impl Into<String>,
    ) -> Result<Self, LoggerError> {
        let conn = NetConn::dial(network, address)?;
        Ok(Self::new(conn, false, tag.into()))
    }

    fn new(conn: NetConn, local: bool, tag: String) -> Self {
        Self {
            conn,
            local,
            tag,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
        }
    }

    #[cfg(unix)]
    fn dial_local() -> std::io::Result<NetConn> {
        let mut last_error = None;
        for path in LOCAL_SOCKETS {
            for network in [Network::Unixgram, Network::Unix] {
                match NetConn::dial(network, path) {
                    Ok(conn) => return Ok(conn),
                    Err(error) => last_error = Some(error),
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no local syslog socket")
        }))
    }

    #[cfg(not(unix))]
    fn dial_local() -> std::io::Result<NetConn> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "local syslog is not supported on this platform",
        ))
    }

    /// Renders one syslog line. Local daemons get the short BSD timestamp and no host name.
    fn render(&self, time: OffsetDateTime, severity: Severity, message: &str) -> String {
        let priority = FACILITY_USER | severity.code();
        let newline = if message.ends_with('\n') { "" } else { "\n" };

        if self.local {
            let timestamp = time
                .format(format_description!(
                    "[month repr:short] [day padding:space] [hour]:[minute]:[second]"
                ))
                .unwrap_or_default();
            format!(
                "<{priority}>{timestamp} {}[{}]: {message}{newline}",
                self.tag, self.pid
            )
        } else {
            let timestamp = time.format(&Rfc3339).unwrap_or_default();
            format!(
                "<{priority}>{timestamp} {} {}[{}]: {message}{newline}",
                self.hostname, self.tag, self.pid
            )
        }
    }

    /// Sends `message` with the given severity.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Io`] if the write fails.
    pub fn write_message(&mut self, severity: Severity, message: &str) -> Result<(), LoggerError> {
        let line = self.render(OffsetDateTime::now_utc(), severity, message);
        self.conn.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Formats records and sends them to syslog with the severity of their level.
#[derive(Debug)]
pub struct SyslogSink {
    writer: SyslogWriter,
    format: Box<dyn Format>,
}

impl SyslogSink {
    /// Creates a sink sending records encoded by `format` through `writer`.
    pub fn new(writer: SyslogWriter, format: Box<dyn Format>) -> Self {
        Self { writer, format }
    }
}

impl HandlerMut for SyslogSink {
    fn log_mut(&mut self, record: &Record) -> Result<(), LoggerError> {
        let bytes = self.format.format(record)?;
        let message = String::from_utf8_lossy(&bytes);
        self.writer
            .write_message(Severity::from(record.level), message.trim())
    }
}

/// The handler built for `syslog` and `syslog_net` configurations.
pub type SyslogHandler = LazyHandler<SyncHandler<SyslogSink>>;

/// Sends formatted records to the local syslog daemon under `tag`.
///
/// # Errors
///
/// Returns [`LoggerError::Io`] if the daemon cannot be reached.
pub fn syslog_handler(tag: &str, format: Box<dyn Format>) -> Result<SyslogHandler, LoggerError> {
    let writer = SyslogWriter::local(tag)?;
    Ok(LazyHandler::new(SyncHandler::new(SyslogSink::new(writer, format))))
}

/// Sends formatted records to the syslog daemon at `address` under `tag`.
///
/// # Errors
///
/// Returns [`LoggerError::Io`] if the daemon cannot be reached.
pub fn syslog_net_handler(
    network: Network,
    address: &str,
    tag: &str,
    format: Box<dyn Format>,
) -> Result<SyslogHandler, LoggerError> {
    let writer = SyslogWriter::dial(network, address, tag)?;
    Ok(LazyHandler::new(SyncHandler::new(SyslogSink::new(writer, format))))
}
