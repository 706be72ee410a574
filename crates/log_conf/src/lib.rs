//! `log_conf` builds trees of log handlers from small, recursively structured configuration
//! values.
//!
//! It offers:
//! - [`Record`], [`Level`] and [`Ctx`] primitives, and a [`Logger`] context that hands records to
//!   an installed [`Handler`].
//! - A fixed vocabulary of handlers: filters ([`LevelFilterHandler`], [`MatchFilterHandler`]),
//!   routers ([`MultiHandler`], [`FailoverHandler`]), annotators ([`CallerFileHandler`], ...),
//!   buffering and serialization wrappers, and sinks writing to streams, files, sockets, syslog
//!   and redis.
//! - [`HandlerConf`], the configuration form of a handler tree, parsed from any serde value and
//!   interpreted by [`HandlerConf::build`] (or [`make_handler`] in a single step).
//! - [`basic`] and [`noop`], two ready-made recipes.
//! - With the `tracing` feature, a [`HandlerLayer`] that feeds [`tracing`] events into a
//!   [`Logger`].
//!
//! A handler configuration is a sequence whose first element names a handler kind, followed by
//! the arguments of that kind. Arguments may themselves be handler configurations:
//!
//! ```
//! use log_conf::{Level, Logger, Record, ctx, make_handler};
//! use serde_json::json;
//!
//! let handler = make_handler(&json!(
//!     ["level_filter", "warn", ["multi", ["discard"], ["sync", ["discard"]]]]
//! ))?;
//!
//! let logger = Logger::root(handler);
//! logger.warn("disk almost full", ctx! { "free_mb" => 12 });
//! # Ok::<(), log_conf::LoggerError>(())
//! ```

mod conf;
mod format;
mod handler;
mod logger;
mod record;
mod sink;

#[cfg(feature = "tracing")]
mod bridge;

use std::io::IsTerminal;

#[cfg(feature = "tracing")]
pub use self::bridge::HandlerLayer;
#[cfg(feature = "redis")]
pub use self::sink::{RedisHandler, redis_handler};
pub use self::{
    conf::{HandlerConf, MAX_NESTING_DEPTH, ParseStreamTargetError, StreamTarget, make_handler},
    format::{
        Format, FormatConf, JsonFormat, LogfmtFormat, ParseFormatError, TerminalFormat,
        make_formatter,
    },
    handler::{
        BufferedHandler, CallerFileHandler, CallerFuncHandler, CallerStackHandler,
        ChannelHandler, DiscardHandler, FailoverHandler, Handler, HandlerMut, LazyHandler,
        LevelFilterHandler, MatchFilterHandler, MultiHandler, ParseStackFormatError, StackFormat,
        SyncHandler,
    },
    logger::Logger,
    record::{CallSite, Ctx, Lazy, Level, ParseLevelError, Record, Value},
    sink::{
        NetConn, Network, ParseNetworkError, Severity, StreamHandler, SyslogHandler, SyslogSink,
        SyslogWriter, WriterSink, file_handler, net_handler, stream_handler, syslog_handler,
        syslog_net_handler,
    },
};

mod keys {
    pub(crate) const TIME: &str = "t";
    pub(crate) const LEVEL: &str = "lvl";
    pub(crate) const MESSAGE: &str = "msg";
    pub(crate) const CALLER: &str = "caller";
    pub(crate) const FN: &str = "fn";
    pub(crate) const STACK: &str = "stack";
    pub(crate) const FAILOVER_ERR_PREFIX: &str = "failover_err_";

    /// Name of the field carrying the message of a `tracing` event.
    #[cfg(feature = "tracing")]
    pub(crate) const TRACING_MESSAGE: &str = "message";

    #[cfg(feature = "tracing")]
    pub(crate) static RESERVED_KEYS: std::sync::LazyLock<rustc_hash::FxHashSet<&'static str>> =
        std::sync::LazyLock::new(|| [TIME, LEVEL, MESSAGE].iter().copied().collect());
}

/// Errors that can occur while building or running handlers.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// The configuration is malformed: unknown kind, wrong argument count or type, or an
    /// unparsable argument value. `location` names the offending node (`$`, `$[2][1]`, ...) or
    /// argument.
    #[error("Bad configuration at {location}: {reason}")]
    Configuration {
        /// The configuration node or argument at fault.
        location: String,

        /// What is wrong with it.
        reason: String,
    },

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// Represents an error during initialization of the file appender.
    #[error("Failed to initialize file appender: {0}")]
    FileAppenderInitialization(#[from] tracing_appender::rolling::InitError),

    /// Represents an I/O error while connecting or writing a sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Represents an error from the redis connection.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The worker thread of a buffered handler is no longer receiving records.
    #[error("Buffered handler is disconnected from its worker")]
    Disconnected,
}

impl LoggerError {
    pub(crate) fn bad_configuration(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is the "bad configuration" error, as opposed to a transport or I/O failure.
    pub fn is_bad_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Builds the configuration used by [`basic`].
///
/// The resulting tree is
/// `level_filter(level, caller_file(multi(<file branch>, <stream branch>)))`, where the file
/// branch writes JSON to `path` (or discards, if `path` is empty) and the stream branch writes to
/// standard error (or discards, if `quiet`). The stream branch uses the `terminal` format when
/// standard output is attached to a terminal, and `json` otherwise.
///
/// # Errors
///
/// Returns [`LoggerError::Configuration`] if `level` does not name a level.
pub fn basic_conf(path: &str, level: &str, quiet: bool) -> Result<HandlerConf, LoggerError> {
    basic_conf_for(path, level, quiet, std::io::stdout().is_terminal())
}

fn basic_conf_for(
    path: &str,
    level: &str,
    quiet: bool,
    stdout_is_terminal: bool,
) -> Result<HandlerConf, LoggerError> {
    let level = level
        .parse::<Level>()
        .map_err(|error| LoggerError::bad_configuration("$[1]", error.to_string()))?;

    let file = if path.is_empty() {
        HandlerConf::Discard
    } else {
        HandlerConf::File {
            path: path.into(),
            format: FormatConf::Json,
        }
    };

    let stream = if quiet {
        HandlerConf::Discard
    } else {
        HandlerConf::Stream {
            stream: StreamTarget::Stderr,
            format: if stdout_is_terminal {
                FormatConf::Terminal
            } else {
                FormatConf::Json
            },
        }
    };

    Ok(HandlerConf::LevelFilter {
        level,
        inner: Box::new(HandlerConf::CallerFile(Box::new(HandlerConf::Multi(vec![
            file, stream,
        ])))),
    })
}

/// Builds a handler that writes records at or above `level` to a JSON file at `path` (unless
/// `path` is empty) and to standard error (unless `quiet`), annotating each record with its
/// caller. See [`basic_conf`] for the exact tree.
///
/// # Errors
///
/// Returns [`LoggerError`] if `level` is invalid or the file cannot be opened.
pub fn basic(path: &str, level: &str, quiet: bool) -> Result<Box<dyn Handler>, LoggerError> {
    let conf = basic_conf(path, level, quiet)?;
    tracing::debug!(%conf, "Building basic log handler");
    conf.build()
}

/// Returns a handler that discards every record.
pub fn noop() -> Box<dyn Handler> {
    Box::new(DiscardHandler)
}
