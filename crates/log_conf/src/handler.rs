//! Runnable handlers: the [`Handler`] and [`HandlerMut`] traits and the filtering, routing and
//! wrapping handlers a configuration tree is made of.

mod buffered;
mod caller;

use std::{borrow::Cow, fmt, sync::Arc};

use parking_lot::Mutex;

pub use self::{
    buffered::{BufferedHandler, ChannelHandler},
    caller::{
        CallerFileHandler, CallerFuncHandler, CallerStackHandler, ParseStackFormatError,
        StackFormat,
    },
};
use crate::{
    LoggerError, keys,
    record::{Level, Record, Value},
};

/// A handler that may be shared between threads and invoked concurrently.
pub trait Handler: fmt::Debug + Send + Sync {
    /// Acts on `record`: filters it, routes it, annotates it or writes it out.
    ///
    /// # Errors
    ///
    /// Returns the error of the sink or child handler that failed.
    fn log(&self, record: &Record) -> Result<(), LoggerError>;
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        (**self).log(record)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        (**self).log(record)
    }
}

/// A handler that needs exclusive access while it handles a record, such as a sink owning a
/// writer or a socket.
///
/// Wrap one in a [`SyncHandler`] to obtain a [`Handler`].
pub trait HandlerMut: fmt::Debug + Send {
    /// Acts on `record`.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying writer or connection.
    fn log_mut(&mut self, record: &Record) -> Result<(), LoggerError>;
}

impl<H: Handler> HandlerMut for H {
    fn log_mut(&mut self, record: &Record) -> Result<(), LoggerError> {
        self.log(record)
    }
}

/// Drops every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardHandler;

impl Handler for DiscardHandler {
    fn log(&self, _record: &Record) -> Result<(), LoggerError> {
        Ok(())
    }
}

/// Passes records at or above a severity threshold to the inner handler.
#[derive(Debug)]
pub struct LevelFilterHandler<H = Box<dyn Handler>> {
    level: Level,
    inner: H,
}

impl<H: Handler> LevelFilterHandler<H> {
    /// Creates a filter dropping records less severe than `level`.
    pub fn new(level: Level, inner: H) -> Self {
        Self { level, inner }
    }
}

impl<H: Handler> Handler for LevelFilterHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        if record.level >= self.level {
            self.inner.log(record)
        } else {
            Ok(())
        }
    }
}

/// Passes records carrying a given value under a given key to the inner handler.
///
/// The key `lvl` is compared with the record level, `msg` with the record message, and any
/// other key with the first context pair of that name. Records lacking the key are dropped.
#[derive(Debug)]
pub struct MatchFilterHandler<H = Box<dyn Handler>> {
    key: String,
    value: serde_json::Value,
    inner: H,
}

impl<H: Handler> MatchFilterHandler<H> {
    /// Creates a filter passing records whose `key` equals `value`.
    pub fn new(key: impl Into<String>, value: serde_json::Value, inner: H) -> Self {
        Self {
            key: key.into(),
            value,
            inner,
        }
    }

    fn matches(&self, record: &Record) -> bool {
        match self.key.as_str() {
            keys::LEVEL => self
                .value
                .as_str()
                .and_then(|name| name.parse::<Level>().ok())
                .is_some_and(|level| level == record.level),
            keys::MESSAGE => self.value.as_str() == Some(record.message.as_str()),
            key => record
                .ctx
                .get(key)
                .is_some_and(|value| *value == self.value),
        }
    }
}

impl<H: Handler> Handler for MatchFilterHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        if self.matches(record) {
            self.inner.log(record)
        } else {
            Ok(())
        }
    }
}

/// Hands every record to each of its children.
///
/// Errors of individual children are not reported; the record still reaches the remaining
/// children.
#[derive(Debug)]
pub struct MultiHandler<H = Box<dyn Handler>> {
    handlers: Vec<H>,
}

impl<H: Handler> MultiHandler<H> {
    /// Creates a fan-out over `handlers`.
    pub fn new(handlers: Vec<H>) -> Self {
        Self { handlers }
    }
}

impl<H: Handler> Handler for MultiHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        for handler in &self.handlers {
            if let Err(error) = handler.log(record) {
                tracing::trace!(?error, "Child of multi handler failed");
            }
        }
        Ok(())
    }
}

/// Tries its children in order until one of them accepts the record.
///
/// When child `i` fails, the record handed to the following children carries an extra
/// `failover_err_<i>` pair holding the error message. If every child fails, the last error is
/// returned.
#[derive(Debug)]
pub struct FailoverHandler<H = Box<dyn Handler>> {
    handlers: Vec<H>,
}

impl<H: Handler> FailoverHandler<H> {
    /// Creates a failover chain over `handlers`, tried in order.
    pub fn new(handlers: Vec<H>) -> Self {
        Self { handlers }
    }
}

impl<H: Handler> Handler for FailoverHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        let mut current = Cow::Borrowed(record);
        let mut last_error = None;

        for (index, handler) in self.handlers.iter().enumerate() {
            match handler.log(&current) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    current
                        .to_mut()
                        .ctx
                        .push(format!("{}{index}", keys::FAILOVER_ERR_PREFIX), error.to_string());
                    last_error = Some(error);
                }
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}

/// Serializes access to a [`HandlerMut`], making it a [`Handler`].
#[derive(Debug)]
pub struct SyncHandler<H> {
    inner: Mutex<H>,
}

impl<H: HandlerMut> SyncHandler<H> {
    /// Wraps `inner` in a mutex.
    pub fn new(inner: H) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Unwraps the inner handler.
    pub fn into_inner(self) -> H {
        self.inner.into_inner()
    }
}

impl<H: HandlerMut> Handler for SyncHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        self.inner.lock().log_mut(record)
    }
}

/// Evaluates every [`Lazy`][crate::Lazy] context value before handing the record on.
#[derive(Debug)]
pub struct LazyHandler<H = Box<dyn Handler>> {
    inner: H,
}

impl<H: Handler> LazyHandler<H> {
    /// Wraps `inner`.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for LazyHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        let has_lazy = record
            .ctx
            .iter()
            .any(|(_, value)| matches!(value, Value::Lazy(_)));
        if !has_lazy {
            return self.inner.log(record);
        }

        let mut evaluated = record.clone();
        for value in evaluated.ctx.values_mut() {
            if let Value::Lazy(lazy) = value {
                *value = Value::Json(lazy.evaluate());
            }
        }
        self.inner.log(&evaluated)
    }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::{test_utils::*, *};
    use crate::{Ctx, ctx, record::Lazy};

    fn boxed(handler: impl Handler + 'static) -> Box<dyn Handler> {
        Box::new(handler)
    }

    #[rstest]
    #[case(Level::Debug, false)]
    #[case(Level::Info, false)]
    #[case(Level::Warn, true)]
    #[case(Level::Error, true)]
    #[case(Level::Crit, true)]
    fn level_filter_passes_at_or_above_threshold(#[case] level: Level, #[case] passes: bool) {
        let recorder = Recorder::default();
        let handler = LevelFilterHandler::new(Level::Warn, recorder.clone());
        handler.log(&Record::new(level, "m", Ctx::new())).unwrap();
        assert_eq!(recorder.records().len(), usize::from(passes));
    }

    #[test]
    fn match_filter_compares_first_context_pair() {
        let recorder = Recorder::default();
        let handler = MatchFilterHandler::new("component", json!("db"), recorder.clone());

        handler
            .log(&Record::new(Level::Info, "db", ctx! { "component" => "db" }))
            .unwrap();
        handler
            .log(&Record::new(Level::Info, "web", ctx! { "component" => "web" }))
            .unwrap();
        handler
            .log(&Record::new(Level::Info, "missing", Ctx::new()))
            .unwrap();
        handler
            .log(&Record::new(
                Level::Info,
                "shadowed",
                ctx! { "component" => "web", "component" => "db" },
            ))
            .unwrap();

        assert_eq!(recorder.messages(), vec!["db"]);
    }

    #[test]
    fn match_filter_uses_json_equality() {
        let recorder = Recorder::default();
        let handler = MatchFilterHandler::new("n", json!(1), recorder.clone());
        handler
            .log(&Record::new(Level::Info, "int", ctx! { "n" => 1 }))
            .unwrap();
        handler
            .log(&Record::new(Level::Info, "float", ctx! { "n" => 1.0 }))
            .unwrap();
        assert_eq!(recorder.messages(), vec!["int"]);
    }

    #[test]
    fn match_filter_special_cases_level_and_message() {
        let recorder = Recorder::default();
        let by_level = MatchFilterHandler::new("lvl", json!("error"), recorder.clone());
        by_level.log(&Record::new(Level::Error, "kept", Ctx::new())).unwrap();
        by_level.log(&Record::new(Level::Warn, "dropped", Ctx::new())).unwrap();

        let by_message = MatchFilterHandler::new("msg", json!("hello"), recorder.clone());
        by_message.log(&Record::new(Level::Info, "hello", Ctx::new())).unwrap();
        by_message.log(&Record::new(Level::Info, "bye", Ctx::new())).unwrap();

        assert_eq!(recorder.messages(), vec!["kept", "hello"]);
    }

    #[test]
    fn multi_reaches_every_child_despite_errors() {
        let first = Recorder::default();
        let second = Recorder::default();
        let handler = MultiHandler::new(vec![
            boxed(first.clone()),
            boxed(Failing),
            boxed(second.clone()),
        ]);

        handler.log(&Record::new(Level::Info, "fan out", Ctx::new())).unwrap();

        assert_eq!(first.messages(), vec!["fan out"]);
        assert_eq!(second.messages(), vec!["fan out"]);
    }

    #[test]
    fn failover_annotates_later_attempts() {
        let recorder = Recorder::default();
        let handler = FailoverHandler::new(vec![
            boxed(Failing),
            boxed(Failing),
            boxed(recorder.clone()),
        ]);

        handler.log(&Record::new(Level::Info, "retry", Ctx::new())).unwrap();

        let records = recorder.records();
        assert_eq!(records.len(), 1);
        let keys: Vec<&str> = records[0].ctx.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["failover_err_0", "failover_err_1"]);
        assert!(records[0].ctx.get("failover_err_0").unwrap()
            == &json!("I/O error: sink unavailable"));
    }

    #[test]
    fn failover_stops_at_first_success() {
        let first = Recorder::default();
        let second = Recorder::default();
        let handler = FailoverHandler::new(vec![boxed(first.clone()), boxed(second.clone())]);

        handler.log(&Record::new(Level::Info, "once", Ctx::new())).unwrap();

        assert_eq!(first.messages(), vec!["once"]);
        assert!(second.records().is_empty());
        assert!(first.records()[0].ctx.is_empty());
    }

    #[test]
    fn failover_returns_last_error_when_all_fail() {
        let handler = FailoverHandler::new(vec![boxed(Failing), boxed(Failing)]);
        let error = handler
            .log(&Record::new(Level::Info, "lost", Ctx::new()))
            .unwrap_err();
        assert!(matches!(error, LoggerError::Io(_)));
    }

    #[test]
    fn empty_failover_succeeds() {
        let handler = FailoverHandler::<Box<dyn Handler>>::new(Vec::new());
        assert!(handler.log(&Record::new(Level::Info, "none", Ctx::new())).is_ok());
    }

    #[test]
    fn lazy_evaluates_deferred_values() {
        let recorder = Recorder::default();
        let handler = LazyHandler::new(recorder.clone());
        let ctx = Ctx::new()
            .with("eager", 1)
            .with("deferred", Lazy::new(|| json!("computed")));

        handler.log(&Record::new(Level::Info, "lazy", ctx)).unwrap();

        let records = recorder.records();
        assert!(records[0].ctx.get("eager").unwrap() == &json!(1));
        assert!(records[0].ctx.get("deferred").unwrap() == &json!("computed"));
    }

    #[derive(Debug, Default)]
    struct Counter(usize);

    impl HandlerMut for Counter {
        fn log_mut(&mut self, _record: &Record) -> Result<(), LoggerError> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn sync_serializes_concurrent_writers() {
        let handler = Arc::new(SyncHandler::new(Counter::default()));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handler = Arc::clone(&handler);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        handler.log(&Record::new(Level::Info, "tick", Ctx::new())).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let handler = Arc::try_unwrap(handler).unwrap();
        assert_eq!(handler.into_inner().0, 400);
    }
}
