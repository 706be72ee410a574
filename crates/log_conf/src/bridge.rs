//! Provides a [`tracing_subscriber::Layer`] ([`HandlerLayer`]) turning `tracing` events into
//! records for a [`Logger`].

mod storage;

use time::OffsetDateTime;
use tracing::{
    Event, Id, Subscriber,
    span::{Attributes, Record as SpanValues},
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

use self::storage::FieldStorage;
use crate::{
    logger::Logger,
    record::{CallSite, Ctx, Level, Record},
};

/// Target prefix of the events this crate emits about itself.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// A [`tracing_subscriber::Layer`] that logs every `tracing` event through a [`Logger`].
///
/// Each event becomes a [`Record`] with the level of the event, its `message` field (or its
/// target, if it has none) as message, and the fields of the enclosing spans followed by the
/// event fields as context. Fields named like the record keys (`t`, `lvl`, `msg`) are renamed
/// to `field.<name>`.
///
/// Events emitted by this crate itself are skipped, so that diagnostics about a failing handler
/// never loop back into it. Handler errors are ignored.
///
/// ```
/// use log_conf::{HandlerLayer, Logger, make_handler};
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let logger = Logger::root(make_handler(&serde_json::json!(["discard"]))?);
/// let subscriber = tracing_subscriber::registry().with(HandlerLayer::new(logger));
///
/// tracing::subscriber::with_default(subscriber, || {
///     tracing::info!(user = "ann", "Signed in");
/// });
/// # Ok::<(), log_conf::LoggerError>(())
/// ```
#[derive(Clone, Debug)]
pub struct HandlerLayer {
    logger: Logger,
}

impl HandlerLayer {
    /// Creates a layer logging through `logger`.
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for HandlerLayer {
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        // Inherit the fields of the parent span, if any.
        let mut storage = span
            .parent()
            .and_then(|parent| parent.extensions().get::<FieldStorage>().cloned())
            .unwrap_or_default();

        attrs.record(&mut storage);
        span.extensions_mut().insert(storage);
    }

    fn on_record(&self, id: &Id, values: &SpanValues<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut extensions = span.extensions_mut();
        if let Some(storage) = extensions.get_mut::<FieldStorage>() {
            values.record(storage);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) {
            return;
        }

        let mut record_ctx = Ctx::new();
        if let Some(span) = ctx.event_span(event) {
            if let Some(storage) = span.extensions().get::<FieldStorage>() {
                storage.append_to(&mut record_ctx);
            }
        }

        let mut fields = FieldStorage::default();
        event.record(&mut fields);
        fields.append_to(&mut record_ctx);

        let record = Record {
            time: OffsetDateTime::now_utc(),
            level: Level::from(*metadata.level()),
            message: fields
                .take_message()
                .unwrap_or_else(|| metadata.target().to_owned()),
            ctx: record_ctx,
            call_site: CallSite {
                file: metadata.file().unwrap_or("<unknown>"),
                line: metadata.line().unwrap_or_default(),
                module_path: metadata.module_path(),
            },
        };

        let _ = self.logger.log(record);
    }
}
