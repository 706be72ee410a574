//! Logger contexts: an installed handler plus the context prepended to every record.

use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;

use crate::{
    LoggerError,
    conf::{HandlerConf, StreamTarget},
    format::FormatConf,
    handler::Handler,
    record::{Ctx, Level, Record},
};

type Slot = Arc<ArcSwap<Box<dyn Handler>>>;

/// Forwards to whatever handler is currently installed in a parent logger.
struct ParentHandler {
    slot: Slot,
}

impl fmt::Debug for ParentHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParentHandler").finish()
    }
}

impl Handler for ParentHandler {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        self.slot.load().log(record)
    }
}

/// Hands records to an installed [`Handler`], prefixing their context with the logger's own.
///
/// Loggers form a tree: a child created with [`Logger::child`] extends its parent's context and
/// logs through its parent's current handler until it is given one of its own with
/// [`Logger::set_handler`]. Cloning a logger yields a handle sharing the same handler slot.
#[derive(Clone)]
pub struct Logger {
    ctx: Arc<Ctx>,
    slot: Slot,
}

impl Logger {
    /// Creates a root logger with an empty context.
    pub fn root(handler: impl Handler + 'static) -> Self {
        let handler: Box<dyn Handler> = Box::new(handler);
        Self {
            ctx: Arc::new(Ctx::new()),
            slot: Arc::new(ArcSwap::from_pointee(handler)),
        }
    }

    /// Creates a root logger writing `terminal`-formatted records to standard error.
    ///
    /// # Errors
    ///
    /// Returns the error of building the default handler.
    pub fn with_default_handler() -> Result<Self, LoggerError> {
        let conf = HandlerConf::Stream {
            stream: StreamTarget::Stderr,
            format: FormatConf::Terminal,
        };
        Ok(Self::root(conf.build()?))
    }

    /// Creates a child logger whose context is this logger's context followed by `ctx`, the
    /// counterpart of `log15`'s `Logger.New`.
    pub fn child(&self, ctx: Ctx) -> Self {
        let mut merged = (*self.ctx).clone();
        merged.extend(ctx);

        let parent: Box<dyn Handler> = Box::new(ParentHandler {
            slot: Arc::clone(&self.slot),
        });
        Self {
            ctx: Arc::new(merged),
            slot: Arc::new(ArcSwap::from_pointee(parent)),
        }
    }

    /// The context prepended to every record.
    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// Replaces the handler of this logger and of every child still forwarding to it.
    ///
    /// Records being logged concurrently may reach either the old or the new handler.
    pub fn set_handler(&self, handler: impl Handler + 'static) {
        let handler: Box<dyn Handler> = Box::new(handler);
        self.slot.store(Arc::new(handler));
    }

    /// The handler currently installed.
    pub fn handler(&self) -> Arc<Box<dyn Handler>> {
        self.slot.load_full()
    }

    /// Prefixes the context of `record` with the logger context and hands it to the handler.
    ///
    /// # Errors
    ///
    /// Returns the error of the installed handler.
    pub fn log(&self, mut record: Record) -> Result<(), LoggerError> {
        if !self.ctx.is_empty() {
            let mut ctx = (*self.ctx).clone();
            ctx.extend(std::mem::take(&mut record.ctx));
            record.ctx = ctx;
        }
        self.slot.load().log(&record)
    }

    /// Logs a message at `level`, attributing it to the caller.
    ///
    /// # Errors
    ///
    /// Returns the error of the installed handler.
    #[track_caller]
    pub fn write(
        &self,
        level: Level,
        message: impl Into<String>,
        ctx: Ctx,
    ) -> Result<(), LoggerError> {
        self.log(Record::new(level, message, ctx))
    }

    /// Logs at [`Level::Debug`], ignoring handler errors.
    #[track_caller]
    pub fn debug(&self, message: impl Into<String>, ctx: Ctx) {
        let _ = self.write(Level::Debug, message, ctx);
    }

    /// Logs at [`Level::Info`], ignoring handler errors.
    #[track_caller]
    pub fn info(&self, message: impl Into<String>, ctx: Ctx) {
        let _ = self.write(Level::Info, message, ctx);
    }

    /// Logs at [`Level::Warn`], ignoring handler errors.
    #[track_caller]
    pub fn warn(&self, message: impl Into<String>, ctx: Ctx) {
        let _ = self.write(Level::Warn, message, ctx);
    }

    /// Logs at [`Level::Error`], ignoring handler errors.
    #[track_caller]
    pub fn error(&self, message: impl Into<String>, ctx: Ctx) {
        let _ = self.write(Level::Error, message, ctx);
    }

    /// Logs at [`Level::Crit`], ignoring handler errors.
    #[track_caller]
    pub fn crit(&self, message: impl Into<String>, ctx: Ctx) {
        let _ = self.write(Level::Crit, message, ctx);
    }

    /// Logs a formatted message at [`Level::Debug`].
    ///
    /// ```
    /// # let logger = log_conf::Logger::root(log_conf::DiscardHandler);
    /// logger.printf(format_args!("retrying in {}s", 5));
    /// ```
    #[track_caller]
    pub fn printf(&self, args: fmt::Arguments<'_>) {
        self.debug(args.to_string(), Ctx::new());
    }

    /// Logs a formatted message at [`Level::Error`], then panics with it.
    ///
    /// # Panics
    ///
    /// Always.
    #[track_caller]
    #[allow(clippy::panic)]
    pub fn panicf(&self, args: fmt::Arguments<'_>) -> ! {
        let message = args.to_string();
        self.error(message.as_str(), Ctx::new());
        panic!("{message}")
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("ctx", &self.ctx)
            .field("handler", &**self.slot.load())
            .finish()
    }
}
