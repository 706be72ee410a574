//! Formatters encoding a [`Record`] into bytes, and the builder selecting one by name.

use std::{fmt, io, str::FromStr};

use nu_ansi_term::Color;
use serde::Serialize;
use serde_json::ser::{CompactFormatter, Formatter, PrettyFormatter};
use time::{format_description::well_known::Rfc3339, macros::format_description};

use crate::{
    LoggerError, keys,
    record::{Level, Record},
};

/// Messages shorter than this are padded in the terminal format so that context lines up.
const TERMINAL_MESSAGE_WIDTH: usize = 40;

/// Encodes records into bytes.
pub trait Format: fmt::Debug + Send + Sync {
    /// Encodes `record`, including a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::JsonSerialization`] if a JSON encoding fails.
    fn format(&self, record: &Record) -> Result<Vec<u8>, LoggerError>;
}

impl<F: Format + ?Sized> Format for Box<F> {
    fn format(&self, record: &Record) -> Result<Vec<u8>, LoggerError> {
        (**self).format(record)
    }
}

/// The names accepted by [`make_formatter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatConf {
    /// Compact, single-line JSON.
    Json,

    /// Indented JSON with colorized keys.
    JsonPretty,

    /// `key=value` pairs.
    Logfmt,

    /// Colorized output meant for interactive terminals.
    Terminal,
}

/// Error returned when a string does not name a [`FormatConf`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown format `{0}`, expected one of json, json_pretty, logfmt, terminal")]
pub struct ParseFormatError(pub String);

impl FormatConf {
    /// The configuration name of this format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::JsonPretty => "json_pretty",
            Self::Logfmt => "logfmt",
            Self::Terminal => "terminal",
        }
    }

    /// Instantiates the formatter.
    pub fn build(self) -> Box<dyn Format> {
        match self {
            Self::Json => Box::new(JsonFormat::compact()),
            Self::JsonPretty => Box::new(JsonFormat::pretty()),
            Self::Logfmt => Box::new(LogfmtFormat),
            Self::Terminal => Box::new(TerminalFormat),
        }
    }

    /// Parses a format selector found at `location` in a configuration.
    pub(crate) fn from_value_at(
        value: &serde_json::Value,
        location: &str,
    ) -> Result<Self, LoggerError> {
        let name = value.as_str().ok_or_else(|| {
            LoggerError::bad_configuration(location, "format must be a string")
        })?;
        name.parse()
            .map_err(|error: ParseFormatError| {
                LoggerError::bad_configuration(location, error.to_string())
            })
    }
}

impl FromStr for FormatConf {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "json_pretty" => Ok(Self::JsonPretty),
            "logfmt" => Ok(Self::Logfmt),
            "terminal" => Ok(Self::Terminal),
            other => Err(ParseFormatError(other.to_owned())),
        }
    }
}

impl fmt::Display for FormatConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constructs the formatter named by `conf`, which must be one of the strings `json`,
/// `json_pretty`, `logfmt` or `terminal`.
///
/// # Errors
///
/// Returns [`LoggerError::Configuration`] if `conf` is not a string or names no known format.
pub fn make_formatter(conf: &serde_json::Value) -> Result<Box<dyn Format>, LoggerError> {
    FormatConf::from_value_at(conf, "$").map(FormatConf::build)
}

/// Formats records as JSON objects holding the time, level, message and every context pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFormat {
    pretty: bool,
}

impl JsonFormat {
    /// Single-line JSON, one record per line.
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    /// Indented JSON with colorized keys, one blank-line-free object per record.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    fn to_map(record: &Record) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();

        if let Ok(time) = record.time.format(&Rfc3339) {
            map.insert(keys::TIME.to_owned(), time.into());
        }
        map.insert(keys::LEVEL.to_owned(), record.level.as_str().into());
        map.insert(keys::MESSAGE.to_owned(), record.message.clone().into());

        for (key, value) in record.ctx.iter() {
            map.insert(key.to_owned(), value.to_json());
        }

        map
    }

    fn serialize<F: Formatter>(
        map: &serde_json::Map<String, serde_json::Value>,
        formatter: F,
    ) -> Result<Vec<u8>, LoggerError> {
        let mut buffer = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        map.serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }
}

impl Format for JsonFormat {
    fn format(&self, record: &Record) -> Result<Vec<u8>, LoggerError> {
        let map = Self::to_map(record);
        if self.pretty {
            Self::serialize(&map, ColorizedFormatter::new(Color::Blue))
        } else {
            Self::serialize(&map, CompactFormatter)
        }
    }
}

/// Pretty JSON formatter that wraps object keys in ANSI color escapes.
struct ColorizedFormatter {
    inner: PrettyFormatter<'static>,
    key_color: Color,
}

impl ColorizedFormatter {
    fn new(key_color: Color) -> Self {
        Self {
            inner: PrettyFormatter::new(),
            key_color,
        }
    }
}

impl Formatter for ColorizedFormatter {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)?;
        write!(writer, "{}", self.key_color.prefix())
    }

    fn end_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        write!(writer, "{}", self.key_color.suffix())?;
        self.inner.end_object_key(writer)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }
}

/// Formats records as `t=... lvl=... msg=... key=value ...` lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogfmtFormat;

impl Format for LogfmtFormat {
    fn format(&self, record: &Record) -> Result<Vec<u8>, LoggerError> {
        let time = record
            .time
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
            ))
            .unwrap_or_default();

        let mut pairs = vec![
            (keys::TIME, time),
            (keys::LEVEL, record.level.as_str().to_owned()),
            (keys::MESSAGE, escape(&record.message)),
        ];
        pairs.extend(
            record
                .ctx
                .iter()
                .map(|(key, value)| (key, format_value(&value.to_json()))),
        );

        let mut line = String::new();
        write_pairs(&mut line, pairs, None);
        Ok(line.into_bytes())
    }
}

/// Formats records for humans: a colored level, the time, the padded message and colorized
/// `key=value` context.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalFormat;

impl TerminalFormat {
    fn level_color(level: Level) -> Color {
        match level {
            Level::Crit => Color::Purple,
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Cyan,
        }
    }
}

impl Format for TerminalFormat {
    fn format(&self, record: &Record) -> Result<Vec<u8>, LoggerError> {
        let color = Self::level_color(record.level);
        let time = record
            .time
            .format(format_description!("[month]-[day]|[hour]:[minute]:[second]"))
            .unwrap_or_default();

        let mut line = format!(
            "{}[{time}] {} ",
            color.paint(record.level.as_str().to_uppercase()),
            record.message
        );

        let message_width = record.message.chars().count();
        if !record.ctx.is_empty() && message_width < TERMINAL_MESSAGE_WIDTH {
            line.push_str(&" ".repeat(TERMINAL_MESSAGE_WIDTH - message_width));
        }

        let pairs = record
            .ctx
            .iter()
            .map(|(key, value)| (key, format_value(&value.to_json())));
        write_pairs(&mut line, pairs, Some(color));
        Ok(line.into_bytes())
    }
}

/// Appends space-separated `key=value` pairs and a newline to `line`.
fn write_pairs<'a>(
    line: &mut String,
    pairs: impl IntoIterator<Item = (&'a str, String)>,
    key_color: Option<Color>,
) {
    for (index, (key, value)) in pairs.into_iter().enumerate() {
        if index > 0 {
            line.push(' ');
        }
        match key_color {
            Some(color) => line.push_str(&color.paint(key).to_string()),
            None => line.push_str(key),
        }
        line.push('=');
        line.push_str(&value);
    }
    line.push('\n');
}

/// Renders a context value for logfmt output.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "nil".to_owned(),
        serde_json::Value::Bool(value) => value.to_string(),
        serde_json::Value::Number(number) if number.is_f64() => number
            .as_f64()
            .map_or_else(|| number.to_string(), |float| format!("{float:.3}")),
        serde_json::Value::Number(number) => number.to_string(),
        serde_json::Value::String(string) => escape(string),
        structured => escape(&structured.to_string()),
    }
}

/// Escapes backslashes, quotes and line breaks, and quotes the result if it contains whitespace,
/// control characters, `=` or `"`.
fn escape(s: &str) -> String {
    let mut needs_quotes = false;
    let mut escaped = String::with_capacity(s.len() + 2);

    for c in s.chars() {
        if c <= ' ' || c == '=' || c == '"' {
            needs_quotes = true;
        }
        match c {
            '\\' | '"' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }

    if needs_quotes {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::{Ctx, ctx, record::Lazy};

    fn record(level: Level, message: &str, ctx: Ctx) -> Record {
        let mut record = Record::new(level, message, ctx);
        record.time = datetime!(2024-03-05 07:08:09 UTC);
        record
    }

    #[test]
    fn json_is_a_single_line_with_record_keys_and_context() {
        let record = record(Level::Warn, "disk low", ctx! { "free_mb" => 12, "mount" => "/" });
        let output = JsonFormat::compact().format(&record).unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!({
                "t": "2024-03-05T07:08:09Z",
                "lvl": "warn",
                "msg": "disk low",
                "free_mb": 12,
                "mount": "/",
            })
        );
    }

    #[test]
    fn pretty_json_is_indented_and_colorizes_keys() {
        let record = record(Level::Info, "ready", ctx! { "port" => 8080 });
        let text = String::from_utf8(JsonFormat::pretty().format(&record).unwrap()).unwrap();

        assert!(text.starts_with("{\n  "));
        assert!(text.ends_with("}\n"));
        let key = format!("{}\"port\"{}", Color::Blue.prefix(), Color::Blue.suffix());
        assert!(text.contains(&format!("{key}: 8080")));
    }

    #[test]
    fn json_renders_unevaluated_lazy_values_as_placeholder() {
        let record = record(
            Level::Info,
            "lazy",
            Ctx::new().with("value", Lazy::new(|| json!(1))),
        );
        let parsed: serde_json::Value =
            serde_json::from_slice(&JsonFormat::compact().format(&record).unwrap()).unwrap();
        assert_eq!(parsed["value"], json!("<lazy>"));
    }

    #[test]
    fn logfmt_writes_record_keys_then_context() {
        let record = record(
            Level::Error,
            "query failed",
            ctx! { "table" => "users", "elapsed" => 1.5, "rows" => 3, "cached" => false },
        );
        let text = String::from_utf8(LogfmtFormat.format(&record).unwrap()).unwrap();
        assert_eq!(
            text,
            "t=2024-03-05T07:08:09+0000 lvl=eror msg=\"query failed\" table=users \
             elapsed=1.500 rows=3 cached=false\n"
        );
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("", "")]
    #[case("two words", "\"two words\"")]
    #[case("a=b", "\"a=b\"")]
    #[case("say \"hi\"", "\"say \\\"hi\\\"\"")]
    #[case("line\nbreak", "\"line\\nbreak\"")]
    #[case("back\\slash", "back\\\\slash")]
    fn logfmt_escapes_strings(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape(input), expected);
    }

    #[test]
    fn logfmt_renders_null_and_structured_values() {
        assert_eq!(format_value(&json!(null)), "nil");
        assert_eq!(format_value(&json!([1, 2])), "[1,2]");
        assert_eq!(format_value(&json!({"a": "b c"})), "\"{\\\"a\\\":\\\"b c\\\"}\"");
    }

    #[test]
    fn terminal_pads_short_messages_when_context_follows() {
        let record = record(Level::Info, "started", ctx! { "port" => 80 });
        let text = String::from_utf8(TerminalFormat.format(&record).unwrap()).unwrap();

        let expected = format!(
            "{}[03-05|07:08:09] started {}{}=80\n",
            Color::Green.paint("INFO"),
            " ".repeat(TERMINAL_MESSAGE_WIDTH - "started".len()),
            Color::Green.paint("port"),
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn terminal_without_context_is_not_padded() {
        let record = record(Level::Crit, "halt", Ctx::new());
        let text = String::from_utf8(TerminalFormat.format(&record).unwrap()).unwrap();
        assert_eq!(
            text,
            format!("{}[03-05|07:08:09] halt \n", Color::Purple.paint("CRIT"))
        );
    }

    #[rstest]
    #[case(json!("json"), FormatConf::Json)]
    #[case(json!("json_pretty"), FormatConf::JsonPretty)]
    #[case(json!("logfmt"), FormatConf::Logfmt)]
    #[case(json!("terminal"), FormatConf::Terminal)]
    fn selects_formats_by_name(#[case] conf: serde_json::Value, #[case] expected: FormatConf) {
        assert_eq!(FormatConf::from_value_at(&conf, "$").unwrap(), expected);
        assert!(make_formatter(&conf).is_ok());
    }

    #[rstest]
    #[case(json!("unknown"))]
    #[case(json!(""))]
    #[case(json!("JSON"))]
    #[case(json!(1))]
    #[case(json!(null))]
    #[case(json!(["json"]))]
    fn rejects_unknown_or_non_string_formats(#[case] conf: serde_json::Value) {
        let error = make_formatter(&conf).unwrap_err();
        assert!(error.is_bad_configuration());
    }
}
