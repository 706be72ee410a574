//! Publishes JSON-encoded records to a redis channel.

use std::fmt;

use crate::{
    LoggerError,
    format::{Format, JsonFormat},
    handler::{HandlerMut, SyncHandler},
    record::Record,
};

/// Port used when a redis address omits one.
const DEFAULT_PORT: u16 = 6379;

/// Splits a `host[:port]` address, bracketed IPv6 hosts included, defaulting the port to 6379.
pub(crate) fn split_host_port(address: &str) -> Result<(&str, u16), String> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated IPv6 host in `{address}`"))?;
        match rest {
            "" => (host, None),
            _ => (
                host,
                Some(rest.strip_prefix(':').ok_or_else(|| {
                    format!("unexpected characters after host in `{address}`")
                })?),
            ),
        }
    } else {
        match address.split_once(':') {
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            // A bare IPv6 address.
            Some(_) => (address, None),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(format!("missing host in `{address}`"));
    }
    let port = match port {
        Some(port) => port
            .parse()
            .map_err(|_| format!("invalid port `{port}` in `{address}`"))?,
        None => DEFAULT_PORT,
    };
    Ok((host, port))
}

/// Publishes every record, encoded as compact JSON, to a redis channel over one connection.
///
/// The connection is opened once and never re-established; a failed publish is returned to
/// the caller.
pub struct RedisHandler {
    connection: redis::Connection,
    channel: String,
    address: String,
}

impl RedisHandler {
    /// Connects to the redis server at `address` (`host[:port]`).
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Configuration`] for a malformed address and
    /// [`LoggerError::Redis`] if the server cannot be reached.
    pub fn connect(address: &str, channel: impl Into<String>) -> Result<Self, LoggerError> {
        let (host, port) = split_host_port(address)
            .map_err(|reason| LoggerError::bad_configuration(address, reason))?;
        let url = if host.contains(':') {
            format!("redis://[{host}]:{port}/")
        } else {
            format!("redis://{host}:{port}/")
        };

        let client = redis::Client::open(url)?;
        let connection = client.get_connection()?;
        tracing::debug!(address, "Connected to redis");

        Ok(Self {
            connection,
            channel: channel.into(),
            address: address.to_owned(),
        })
    }
}

impl fmt::Debug for RedisHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHandler")
            .field("address", &self.address)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl HandlerMut for RedisHandler {
    fn log_mut(&mut self, record: &Record) -> Result<(), LoggerError> {
        let payload = JsonFormat::compact().format(record)?;
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query::<i64>(&mut self.connection)?;
        Ok(())
    }
}

/// Connects to redis at `address` and returns a thread-safe handler publishing to `channel`.
///
/// # Errors
///
/// See [`RedisHandler::connect`].
pub fn redis_handler(
    address: &str,
    channel: &str,
) -> Result<SyncHandler<RedisHandler>, LoggerError> {
    RedisHandler::connect(address, channel).map(SyncHandler::new)
}
