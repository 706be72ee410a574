//! Log record primitives: severity levels, context values and the [`Record`] type that every
//! handler consumes.

use std::{fmt, panic::Location, path::Path, str::FromStr, sync::Arc};

use time::OffsetDateTime;

/// Severity of a log record.
///
/// Levels are ordered from the least to the most severe, so a level filter passes every
/// record whose level is greater than or equal to its threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Diagnostic detail.
    Debug,

    /// Normal operational messages.
    Info,

    /// Something unexpected that does not prevent progress.
    Warn,

    /// A failed operation.
    Error,

    /// A failure requiring immediate attention.
    Crit,
}

impl Level {
    /// All levels, from the least to the most severe.
    pub const ALL: [Self; 5] = [Self::Debug, Self::Info, Self::Warn, Self::Error, Self::Crit];

    /// The four-letter name used when rendering records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "dbug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "eror",
            Self::Crit => "crit",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`Level`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown level `{0}`, expected one of debug, info, warn, error, crit")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" | "dbug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" | "eror" => Ok(Self::Error),
            "crit" => Ok(Self::Crit),
            other => Err(ParseLevelError(other.to_owned())),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// A context value whose computation is deferred until a `lazy` handler evaluates it.
#[derive(Clone)]
pub struct Lazy(Arc<dyn Fn() -> serde_json::Value + Send + Sync>);

impl Lazy {
    /// Wraps a closure computing the value.
    pub fn new(f: impl Fn() -> serde_json::Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Runs the closure.
    pub fn evaluate(&self) -> serde_json::Value {
        (self.0)()
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Lazy(..)")
    }
}

/// The value half of a context pair.
#[derive(Clone, Debug)]
pub enum Value {
    /// An already computed value.
    Json(serde_json::Value),

    /// A value computed on demand.
    Lazy(Lazy),
}

impl Value {
    /// Placeholder rendered for a lazy value that was never evaluated.
    pub const UNEVALUATED: &'static str = "<lazy>";

    /// Returns the computed value, or `None` for an unevaluated lazy value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Lazy(_) => None,
        }
    }

    /// Returns the value as it should be rendered by formatters.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Lazy(_) => serde_json::Value::from(Self::UNEVALUATED),
        }
    }
}

impl PartialEq<serde_json::Value> for Value {
    fn eq(&self, other: &serde_json::Value) -> bool {
        self.as_json() == Some(other)
    }
}

macro_rules! impl_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Json(serde_json::Value::from(value))
                }
            }
        )*
    };
}

impl_value_from!(&str, String, bool, i32, i64, u32, u64, f64);

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Lazy> for Value {
    fn from(value: Lazy) -> Self {
        Self::Lazy(value)
    }
}

/// Ordered key-value context attached to a record or a logger.
///
/// Keys may repeat; pairs keep their insertion order.
#[derive(Clone, Debug, Default)]
pub struct Ctx(Vec<(String, Value)>);

impl Ctx {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(key, value);
        self
    }

    /// Appends a pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.push((key.into(), value.into()));
    }

    /// Returns the value of the first pair with the given key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterates over the pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates mutably over the values in order.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.0.iter_mut().map(|(_, v)| v)
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the context holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends all pairs of `other`, keeping their order.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

impl<K, V> FromIterator<(K, V)> for Ctx
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Builds a [`Ctx`] from `key => value` pairs.
///
/// ```
/// let ctx = log_conf::ctx! { "component" => "db", "attempt" => 3 };
/// assert_eq!(ctx.len(), 2);
/// ```
#[macro_export]
macro_rules! ctx {
    () => { $crate::Ctx::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::Ctx::new()$(.with($key, $value))+
    };
}

/// Source location that emitted a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    /// Source file path as recorded by the compiler.
    pub file: &'static str,

    /// Line within `file`.
    pub line: u32,

    /// Module path of the emitting code, when known.
    pub module_path: Option<&'static str>,
}

impl CallSite {
    /// Captures the location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            module_path: None,
        }
    }

    /// The last component of [`file`][Self::file].
    pub fn file_name(&self) -> &str {
        Path::new(self.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(self.file)
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_name(), self.line)
    }
}

/// A single log event flowing through a handler tree.
#[derive(Clone, Debug)]
pub struct Record {
    /// When the record was created (UTC).
    pub time: OffsetDateTime,

    /// Severity.
    pub level: Level,

    /// Human-readable message.
    pub message: String,

    /// Structured context.
    pub ctx: Ctx,

    /// Where the record was emitted.
    pub call_site: CallSite,
}

impl Record {
    /// Creates a record stamped with the current time and the caller's location.
    #[track_caller]
    pub fn new(level: Level, message: impl Into<String>, ctx: Ctx) -> Self {
        Self {
            time: OffsetDateTime::now_utc(),
            level,
            message: message.into(),
            ctx,
            call_site: CallSite::caller(),
        }
    }

    /// Returns a copy of the record with one more context pair.
    pub(crate) fn annotated(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut record = self.clone();
        record.ctx.push(key, value);
        record
    }
}
