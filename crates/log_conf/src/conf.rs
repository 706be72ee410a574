//! The handler configuration language.
//!
//! A configuration node is a sequence `[kind, args...]`. [`HandlerConf::from_value`] validates
//! a raw node tree depth first into a [`HandlerConf`], and [`HandlerConf::build`] instantiates
//! the handlers it describes.
//!
//! | kind           | arguments                                        |
//! |----------------|--------------------------------------------------|
//! | `buffered`     | size, handler                                    |
//! | `caller_file`  | handler                                          |
//! | `caller_func`  | handler                                          |
//! | `caller_stack` | stack format (`%s`, `%+v`, ...), handler         |
//! | `discard`      |                                                  |
//! | `failover`     | handler...                                       |
//! | `file`         | path, format                                     |
//! | `lazy`         | handler                                          |
//! | `level_filter` | level, handler                                   |
//! | `match_filter` | key, value, handler                              |
//! | `multi`        | handler...                                       |
//! | `net`          | network, address, format                         |
//! | `stream`       | `stdout`, `stderr` or `""`, format               |
//! | `sync`         | handler                                          |
//! | `syslog`       | tag, format                                      |
//! | `syslog_net`   | network, address, tag, format                    |
//! | `redis`        | address (`host[:port]`), channel                 |

use std::{fmt, io, iter, path::PathBuf, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    LoggerError,
    format::FormatConf,
    handler::{
        BufferedHandler, CallerFileHandler, CallerFuncHandler, CallerStackHandler,
        DiscardHandler, FailoverHandler, Handler, LazyHandler, LevelFilterHandler,
        MatchFilterHandler, MultiHandler, StackFormat, SyncHandler,
    },
    record::Level,
    sink::{Network, file_handler, net_handler, stream_handler, syslog_handler, syslog_net_handler},
};

/// The standard stream a `stream` handler writes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamTarget {
    /// Standard output.
    Stdout,

    /// Standard error, also selected by an empty name.
    #[default]
    Stderr,
}

/// Error returned when a string does not name a [`StreamTarget`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown stream `{0}`, expected stdout, stderr or an empty string")]
pub struct ParseStreamTargetError(pub String);

impl StreamTarget {
    /// The configuration name of this stream.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl FromStr for StreamTarget {
    type Err = ParseStreamTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "stderr" | "" => Ok(Self::Stderr),
            other => Err(ParseStreamTargetError(other.to_owned())),
        }
    }
}

/// A validated handler configuration tree.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerConf {
    /// Queues up to `size` records for a worker thread feeding `inner`.
    Buffered {
        /// Capacity of the queue.
        size: usize,

        /// Handler fed by the worker.
        inner: Box<HandlerConf>,
    },

    /// Adds the emitting file and line.
    CallerFile(Box<HandlerConf>),

    /// Adds the emitting function.
    CallerFunc(Box<HandlerConf>),

    /// Adds the stack of the emitting call.
    CallerStack {
        /// How frames are rendered.
        format: StackFormat,

        /// Handler receiving annotated records.
        inner: Box<HandlerConf>,
    },

    /// Drops everything.
    Discard,

    /// Tries each handler in order until one succeeds.
    Failover(Vec<HandlerConf>),

    /// Appends to a file.
    File {
        /// File to append to.
        path: PathBuf,

        /// Record encoding.
        format: FormatConf,
    },

    /// Evaluates lazy context values.
    Lazy(Box<HandlerConf>),

    /// Drops records below `level`.
    LevelFilter {
        /// Minimum severity.
        level: Level,

        /// Handler receiving the remaining records.
        inner: Box<HandlerConf>,
    },

    /// Drops records whose `key` is not `value`.
    MatchFilter {
        /// Context key, or `lvl`/`msg`.
        key: String,

        /// Expected value.
        value: Value,

        /// Handler receiving matching records.
        inner: Box<HandlerConf>,
    },

    /// Hands each record to every handler.
    Multi(Vec<HandlerConf>),

    /// Writes to a network connection.
    Net {
        /// Transport.
        network: Network,

        /// Remote address.
        address: String,

        /// Record encoding.
        format: FormatConf,
    },

    /// Writes to a standard stream.
    Stream {
        /// Stream written to.
        stream: StreamTarget,

        /// Record encoding.
        format: FormatConf,
    },

    /// Serializes access to the inner handler.
    Sync(Box<HandlerConf>),

    /// Writes to the local syslog daemon.
    Syslog {
        /// Syslog tag.
        tag: String,

        /// Record encoding.
        format: FormatConf,
    },

    /// Writes to a remote syslog daemon.
    SyslogNet {
        /// Transport.
        network: Network,

        /// Daemon address.
        address: String,

        /// Syslog tag.
        tag: String,

        /// Record encoding.
        format: FormatConf,
    },

    /// Publishes JSON records to a redis channel. Always built behind a `sync` wrapper.
    #[cfg(feature = "redis")]
    Redis {
        /// Server address, `host[:port]`.
        address: String,

        /// Channel published to.
        channel: String,
    },
}

/// Deepest nesting of handler configurations accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Positional arguments of the node being parsed.
struct Args<'a> {
    location: &'a str,
    kind: &'a str,
    values: &'a [Value],
    depth: usize,
}

impl<'a> Args<'a> {
    fn location_of(&self, index: usize) -> String {
        format!("{}[{}]", self.location, index + 1)
    }

    fn error(&self, index: usize, reason: impl Into<String>) -> LoggerError {
        LoggerError::bad_configuration(self.location_of(index), reason)
    }

    fn expect_arity(&self, arity: usize) -> Result<(), LoggerError> {
        if self.values.len() == arity {
            Ok(())
        } else {
            Err(LoggerError::bad_configuration(
                self.location,
                format!(
                    "`{}` takes {arity} argument(s), got {}",
                    self.kind,
                    self.values.len()
                ),
            ))
        }
    }

    fn value(&self, index: usize) -> Result<&'a Value, LoggerError> {
        self.values
            .get(index)
            .ok_or_else(|| self.error(index, "missing argument"))
    }

    fn string(&self, index: usize) -> Result<&'a str, LoggerError> {
        self.value(index)?
            .as_str()
            .ok_or_else(|| self.error(index, "expected a string"))
    }

    fn parsed<T>(&self, index: usize) -> Result<T, LoggerError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.string(index)?
            .parse()
            .map_err(|error: T::Err| self.error(index, error.to_string()))
    }

    fn size(&self, index: usize) -> Result<usize, LoggerError> {
        self.value(index)?
            .as_u64()
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| self.error(index, "expected a non-negative integer"))
    }

    fn format(&self, index: usize) -> Result<FormatConf, LoggerError> {
        FormatConf::from_value_at(self.value(index)?, &self.location_of(index))
    }

    fn handler(&self, index: usize) -> Result<Box<HandlerConf>, LoggerError> {
        HandlerConf::parse(self.value(index)?, &self.location_of(index), self.depth + 1)
            .map(Box::new)
    }

    fn handlers(&self) -> Result<Vec<HandlerConf>, LoggerError> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                HandlerConf::parse(value, &self.location_of(index), self.depth + 1)
            })
            .collect()
    }
}

impl HandlerConf {
    /// Validates a raw configuration tree.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Configuration`] naming the first invalid node, found depth first.
    /// Trees nesting more than [`MAX_NESTING_DEPTH`] configurations are invalid.
    pub fn from_value(value: &Value) -> Result<Self, LoggerError> {
        Self::parse(value, "$", 1)
    }

    /// Parses and validates a configuration written as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::JsonSerialization`] for malformed JSON and
    /// [`LoggerError::Configuration`] for an invalid tree.
    pub fn from_json_str(json: &str) -> Result<Self, LoggerError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    fn parse(value: &Value, location: &str, depth: usize) -> Result<Self, LoggerError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(LoggerError::bad_configuration(
                location,
                format!("handler configurations nest deeper than {MAX_NESTING_DEPTH} levels"),
            ));
        }

        let nodes = value.as_array().ok_or_else(|| {
            LoggerError::bad_configuration(location, "handler configuration must be a sequence")
        })?;
        let (kind, values) = nodes.split_first().ok_or_else(|| {
            LoggerError::bad_configuration(location, "handler configuration is empty")
        })?;
        let kind = kind.as_str().ok_or_else(|| {
            LoggerError::bad_configuration(format!("{location}[0]"), "handler kind must be a string")
        })?;

        tracing::trace!(location, kind, "Parsing handler configuration");
        let args = Args {
            location,
            kind,
            values,
            depth,
        };

        let conf = match kind {
            "buffered" => {
                args.expect_arity(2)?;
                Self::Buffered {
                    size: args.size(0)?,
                    inner: args.handler(1)?,
                }
            }
            "caller_file" => {
                args.expect_arity(1)?;
                Self::CallerFile(args.handler(0)?)
            }
            "caller_func" => {
                args.expect_arity(1)?;
                Self::CallerFunc(args.handler(0)?)
            }
            "caller_stack" => {
                args.expect_arity(2)?;
                Self::CallerStack {
                    format: args.parsed(0)?,
                    inner: args.handler(1)?,
                }
            }
            "discard" => {
                args.expect_arity(0)?;
                Self::Discard
            }
            "failover" => Self::Failover(args.handlers()?),
            "file" => {
                args.expect_arity(2)?;
                let path = PathBuf::from(args.string(0)?);
                if path.file_name().is_none() {
                    return Err(args.error(0, "path does not name a file"));
                }
                Self::File {
                    path,
                    format: args.format(1)?,
                }
            }
            "lazy" => {
                args.expect_arity(1)?;
                Self::Lazy(args.handler(0)?)
            }
            "level_filter" => {
                args.expect_arity(2)?;
                Self::LevelFilter {
                    level: args.parsed(0)?,
                    inner: args.handler(1)?,
                }
            }
            "match_filter" => {
                args.expect_arity(3)?;
                Self::MatchFilter {
                    key: args.string(0)?.to_owned(),
                    value: args.value(1)?.clone(),
                    inner: args.handler(2)?,
                }
            }
            "multi" => Self::Multi(args.handlers()?),
            "net" => {
                args.expect_arity(3)?;
                Self::Net {
                    network: args.parsed(0)?,
                    address: args.string(1)?.to_owned(),
                    format: args.format(2)?,
                }
            }
            "stream" => {
                args.expect_arity(2)?;
                Self::Stream {
                    stream: args.parsed(0)?,
                    format: args.format(1)?,
                }
            }
            "sync" => {
                args.expect_arity(1)?;
                Self::Sync(args.handler(0)?)
            }
            "syslog" => {
                args.expect_arity(2)?;
                Self::Syslog {
                    tag: args.string(0)?.to_owned(),
                    format: args.format(1)?,
                }
            }
            "syslog_net" => {
                args.expect_arity(4)?;
                Self::SyslogNet {
                    network: args.parsed(0)?,
                    address: args.string(1)?.to_owned(),
                    tag: args.string(2)?.to_owned(),
                    format: args.format(3)?,
                }
            }
            #[cfg(feature = "redis")]
            "redis" => {
                args.expect_arity(2)?;
                let address = args.string(0)?;
                crate::sink::split_host_port(address).map_err(|reason| args.error(0, reason))?;
                Self::Redis {
                    address: address.to_owned(),
                    channel: args.string(1)?.to_owned(),
                }
            }
            other => {
                return Err(LoggerError::bad_configuration(
                    location,
                    format!("unknown handler kind `{other}`"),
                ))
            }
        };

        Ok(conf)
    }

    /// The kind naming this node in the raw form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffered { .. } => "buffered",
            Self::CallerFile(_) => "caller_file",
            Self::CallerFunc(_) => "caller_func",
            Self::CallerStack { .. } => "caller_stack",
            Self::Discard => "discard",
            Self::Failover(_) => "failover",
            Self::File { .. } => "file",
            Self::Lazy(_) => "lazy",
            Self::LevelFilter { .. } => "level_filter",
            Self::MatchFilter { .. } => "match_filter",
            Self::Multi(_) => "multi",
            Self::Net { .. } => "net",
            Self::Stream { .. } => "stream",
            Self::Sync(_) => "sync",
            Self::Syslog { .. } => "syslog",
            Self::SyslogNet { .. } => "syslog_net",
            #[cfg(feature = "redis")]
            Self::Redis { .. } => "redis",
        }
    }

    /// Converts the tree back into its raw sequence form.
    pub fn to_value(&self) -> Value {
        let args: Vec<Value> = match self {
            Self::Buffered { size, inner } => vec![Value::from(*size), inner.to_value()],
            Self::CallerFile(inner)
            | Self::CallerFunc(inner)
            | Self::Lazy(inner)
            | Self::Sync(inner) => vec![inner.to_value()],
            Self::CallerStack { format, inner } => {
                vec![Value::from(format.as_str()), inner.to_value()]
            }
            Self::Discard => Vec::new(),
            Self::Failover(inner) | Self::Multi(inner) => {
                inner.iter().map(Self::to_value).collect()
            }
            Self::File { path, format } => vec![
                Value::from(path.to_string_lossy().into_owned()),
                Value::from(format.as_str()),
            ],
            Self::LevelFilter { level, inner } => {
                vec![Value::from(level.as_str()), inner.to_value()]
            }
            Self::MatchFilter { key, value, inner } => {
                vec![Value::from(key.as_str()), value.clone(), inner.to_value()]
            }
            Self::Net {
                network,
                address,
                format,
            } => vec![
                Value::from(network.as_str()),
                Value::from(address.as_str()),
                Value::from(format.as_str()),
            ],
            Self::Stream { stream, format } => {
                vec![Value::from(stream.as_str()), Value::from(format.as_str())]
            }
            Self::Syslog { tag, format } => {
                vec![Value::from(tag.as_str()), Value::from(format.as_str())]
            }
            Self::SyslogNet {
                network,
                address,
                tag,
                format,
            } => vec![
                Value::from(network.as_str()),
                Value::from(address.as_str()),
                Value::from(tag.as_str()),
                Value::from(format.as_str()),
            ],
            #[cfg(feature = "redis")]
            Self::Redis { address, channel } => {
                vec![Value::from(address.as_str()), Value::from(channel.as_str())]
            }
        };

        Value::Array(iter::once(Value::from(self.kind())).chain(args).collect())
    }

    /// Instantiates the handlers described by this tree.
    ///
    /// Every call creates new handlers: files are reopened and connections re-established.
    ///
    /// # Errors
    ///
    /// Returns the error of the first sink that cannot be opened or connected.
    pub fn build(&self) -> Result<Box<dyn Handler>, LoggerError> {
        tracing::trace!(kind = self.kind(), "Building handler");

        let handler: Box<dyn Handler> = match self {
            Self::Buffered { size, inner } => {
                Box::new(BufferedHandler::new(*size, inner.build()?)?)
            }
            Self::CallerFile(inner) => Box::new(CallerFileHandler::new(inner.build()?)),
            Self::CallerFunc(inner) => Box::new(CallerFuncHandler::new(inner.build()?)),
            Self::CallerStack { format, inner } => {
                Box::new(CallerStackHandler::new(*format, inner.build()?))
            }
            Self::Discard => Box::new(DiscardHandler),
            Self::Failover(inner) => Box::new(FailoverHandler::new(build_all(inner)?)),
            Self::File { path, format } => Box::new(file_handler(path, format.build())?),
            Self::Lazy(inner) => Box::new(LazyHandler::new(inner.build()?)),
            Self::LevelFilter { level, inner } => {
                Box::new(LevelFilterHandler::new(*level, inner.build()?))
            }
            Self::MatchFilter { key, value, inner } => Box::new(MatchFilterHandler::new(
                key.as_str(),
                value.clone(),
                inner.build()?,
            )),
            Self::Multi(inner) => Box::new(MultiHandler::new(build_all(inner)?)),
            Self::Net {
                network,
                address,
                format,
            } => Box::new(net_handler(*network, address, format.build())?),
            Self::Stream { stream, format } => match stream {
                StreamTarget::Stdout => Box::new(stream_handler(io::stdout(), format.build())),
                StreamTarget::Stderr => Box::new(stream_handler(io::stderr(), format.build())),
            },
            Self::Sync(inner) => Box::new(SyncHandler::new(inner.build()?)),
            Self::Syslog { tag, format } => Box::new(syslog_handler(tag, format.build())?),
            Self::SyslogNet {
                network,
                address,
                tag,
                format,
            } => Box::new(syslog_net_handler(*network, address, tag, format.build())?),
            #[cfg(feature = "redis")]
            Self::Redis { address, channel } => {
                Box::new(crate::sink::redis_handler(address, channel)?)
            }
        };

        Ok(handler)
    }
}

fn build_all(confs: &[HandlerConf]) -> Result<Vec<Box<dyn Handler>>, LoggerError> {
    confs.iter().map(HandlerConf::build).collect()
}

impl fmt::Display for HandlerConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl FromStr for HandlerConf {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json_str(s)
    }
}

impl Serialize for HandlerConf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HandlerConf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Validates `conf` and instantiates the handler tree it describes.
///
/// # Errors
///
/// Returns [`LoggerError::Configuration`] for an invalid tree, or the error of the first sink
/// that cannot be opened or connected.
pub fn make_handler(conf: &Value) -> Result<Box<dyn Handler>, LoggerError> {
    HandlerConf::from_value(conf)?.build()
}
