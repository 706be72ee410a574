//! Field storage filled by the `tracing` visitor for spans and events.

use std::{borrow::Cow, fmt};

use tracing::field::{Field, Visit};

use crate::{keys, record::Ctx};

/// Prefix given to field names that collide with the keys of the record itself.
const RESERVED_PREFIX: &str = "field.";

/// Key-value pairs recorded for a span or an event, in recording order.
#[derive(Clone, Debug, Default)]
pub(crate) struct FieldStorage {
    values: Vec<(Cow<'static, str>, serde_json::Value)>,

    /// The `message` field of an event, if any.
    message: Option<String>,
}

impl FieldStorage {
    /// Records a pair, replacing the value of an earlier pair with the same key.
    pub(crate) fn record_value(&mut self, key: &'static str, value: serde_json::Value) {
        let key = if keys::RESERVED_KEYS.contains(key) {
            Cow::Owned(format!("{RESERVED_PREFIX}{key}"))
        } else {
            Cow::Borrowed(key)
        };

        match self.values.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, existing)) => *existing = value,
            None => self.values.push((key, value)),
        }
    }

    pub(crate) fn take_message(&mut self) -> Option<String> {
        self.message.take()
    }

    /// Appends every recorded pair to `ctx`.
    pub(crate) fn append_to(&self, ctx: &mut Ctx) {
        for (key, value) in &self.values {
            ctx.push(key.as_ref(), value.clone());
        }
    }

    fn record_json(&mut self, field: &Field, value: serde_json::Value) {
        if field.name() == keys::TRACING_MESSAGE {
            if self.message.is_none() {
                self.message = Some(value.to_string());
            }
        } else {
            self.record_value(field.name(), value);
        }
    }
}

impl Visit for FieldStorage {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_json(field, serde_json::Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_json(field, serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_json(field, serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_json(field, serde_json::Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == keys::TRACING_MESSAGE {
            self.message = Some(value.to_owned());
        } else {
            self.record_value(field.name(), serde_json::Value::from(value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            keys::TRACING_MESSAGE => {
                if self.message.is_none() {
                    self.message = Some(format!("{value:?}"));
                }
            }
            // Metadata of records forwarded from the `log` crate.
            name if name.starts_with("log.") => (),
            name => {
                let name = name.strip_prefix("r#").unwrap_or(name);
                self.record_value(name, serde_json::Value::from(format!("{value:?}")));
            }
        }
    }
}
