//! Handlers annotating records with the location that emitted them.

use std::{fmt, path::Path, str::FromStr};

use super::Handler;
use crate::{
    LoggerError, keys,
    record::{CallSite, Record},
};

/// Function name used when the emitting module is unknown.
const UNKNOWN_FUNCTION: &str = "???";

/// Adds `caller=<file>:<line>` to every record.
#[derive(Debug)]
pub struct CallerFileHandler<H = Box<dyn Handler>> {
    inner: H,
}

impl<H: Handler> CallerFileHandler<H> {
    /// Wraps `inner`.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for CallerFileHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        self.inner
            .log(&record.annotated(keys::CALLER, record.call_site.to_string()))
    }
}

/// Adds `fn=<function>` to every record: the fully qualified function containing the call
/// site, resolved from the current stack.
///
/// When the call site cannot be found in the stack, the module path of the record is used
/// instead, or `???` if that is unknown too.
#[derive(Debug)]
pub struct CallerFuncHandler<H = Box<dyn Handler>> {
    inner: H,
}

impl<H: Handler> CallerFuncHandler<H> {
    /// Wraps `inner`.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for CallerFuncHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        let function = call_site_function(&record.call_site)
            .or_else(|| record.call_site.module_path.map(str::to_owned))
            .unwrap_or_else(|| UNKNOWN_FUNCTION.to_owned());
        self.inner.log(&record.annotated(keys::FN, function))
    }
}

/// How each frame of a captured stack is rendered, selected by a printf-style verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StackFormat {
    /// `%s`: file name.
    File,

    /// `%+s`: full file path.
    FullFile,

    /// `%d`: line number.
    Line,

    /// `%n`: function name.
    Func,

    /// `%+n`: fully qualified function name.
    FullFunc,

    /// `%v`: `file:line`.
    FileLine,

    /// `%+v`: `path:line`.
    FullFileLine,
}

/// Error returned when a string is not one of the [`StackFormat`] verbs.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown stack format `{0}`, expected one of %s, %+s, %d, %n, %+n, %v, %+v")]
pub struct ParseStackFormatError(pub String);

impl StackFormat {
    /// The verb selecting this format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "%s",
            Self::FullFile => "%+s",
            Self::Line => "%d",
            Self::Func => "%n",
            Self::FullFunc => "%+n",
            Self::FileLine => "%v",
            Self::FullFileLine => "%+v",
        }
    }

    fn render_frame(self, frame: &StackFrame) -> String {
        let file_name = Path::new(&frame.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&frame.file);
        let short_function = frame
            .function
            .rsplit_once("::")
            .map_or(frame.function.as_str(), |(_, name)| name);

        match self {
            Self::File => file_name.to_owned(),
            Self::FullFile => frame.file.clone(),
            Self::Line => frame.line.to_string(),
            Self::Func => short_function.to_owned(),
            Self::FullFunc => frame.function.clone(),
            Self::FileLine => format!("{file_name}:{}", frame.line),
            Self::FullFileLine => format!("{}:{}", frame.file, frame.line),
        }
    }

    /// Renders `frames` as `[frame frame ...]`.
    pub(crate) fn render(self, frames: &[StackFrame]) -> String {
        let rendered: Vec<String> = frames
            .iter()
            .map(|frame| self.render_frame(frame))
            .collect();
        format!("[{}]", rendered.join(" "))
    }
}

impl FromStr for StackFormat {
    type Err = ParseStackFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "%s" => Ok(Self::File),
            "%+s" => Ok(Self::FullFile),
            "%d" => Ok(Self::Line),
            "%n" => Ok(Self::Func),
            "%+n" => Ok(Self::FullFunc),
            "%v" => Ok(Self::FileLine),
            "%+v" => Ok(Self::FullFileLine),
            other => Err(ParseStackFormatError(other.to_owned())),
        }
    }
}

impl fmt::Display for StackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved frame of a captured stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StackFrame {
    pub(crate) function: String,
    pub(crate) file: String,
    pub(crate) line: u32,
}

impl StackFrame {
    /// Frames of the standard library and the process startup code.
    fn is_runtime(&self) -> bool {
        self.file.starts_with("/rustc/") || self.function.starts_with("std::rt::")
    }

    fn is_call_site(&self, call_site: &CallSite) -> bool {
        let (frame_file, site_file) = (Path::new(&self.file), Path::new(call_site.file));
        self.line == call_site.line
            && (frame_file.ends_with(site_file) || site_file.ends_with(frame_file))
    }
}

/// Captures the current stack and keeps the frames from `call_site` outwards, without runtime
/// frames. Returns `None` if `call_site` is not part of the stack.
fn capture_from(call_site: &CallSite) -> Option<Vec<StackFrame>> {
    let backtrace = backtrace::Backtrace::new();

    let frames: Vec<StackFrame> = backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .filter_map(|symbol| {
            Some(StackFrame {
                function: symbol
                    .name()
                    .map_or_else(|| UNKNOWN_FUNCTION.to_owned(), |name| format!("{name:#}")),
                file: symbol.filename()?.to_str()?.to_owned(),
                line: symbol.lineno()?,
            })
        })
        .collect();

    let start = frames
        .iter()
        .position(|frame| frame.is_call_site(call_site))?;

    Some(
        frames
            .into_iter()
            .skip(start)
            .filter(|frame| !frame.is_runtime())
            .collect(),
    )
}

/// The function containing `call_site`, if its frame can be resolved.
fn call_site_function(call_site: &CallSite) -> Option<String> {
    capture_from(call_site)?
        .into_iter()
        .next()
        .map(|frame| frame.function)
        .filter(|function| function != UNKNOWN_FUNCTION)
}

/// Adds `stack=[...]` to every record: the stack from the emitting call site outwards, each
/// frame rendered with a [`StackFormat`].
///
/// Nothing is added when the call site cannot be found in the captured stack, for instance
/// when the binary carries no debug information.
#[derive(Debug)]
pub struct CallerStackHandler<H = Box<dyn Handler>> {
    format: StackFormat,
    inner: H,
}

impl<H: Handler> CallerStackHandler<H> {
    /// Wraps `inner`, rendering frames with `format`.
    pub fn new(format: StackFormat, inner: H) -> Self {
        Self { format, inner }
    }
}

impl<H: Handler> Handler for CallerStackHandler<H> {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        match capture_from(&record.call_site) {
            Some(frames) if !frames.is_empty() => self
                .inner
                .log(&record.annotated(keys::STACK, self.format.render(&frames))),
            _ => self.inner.log(record),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        handler::test_utils::Recorder,
        record::{Ctx, Level},
    };

    #[test]
    fn caller_file_adds_basename_and_line() {
        let recorder = Recorder::default();
        let handler = CallerFileHandler::new(recorder.clone());
        let record = Record::new(Level::Info, "here", Ctx::new());

        handler.log(&record).unwrap();

        let expected = format!("caller.rs:{}", record.call_site.line);
        assert!(recorder.records()[0].ctx.get("caller").unwrap() == &json!(expected));
    }

    fn unresolvable(module_path: Option<&'static str>) -> Record {
        let mut record = Record::new(Level::Info, "elsewhere", Ctx::new());
        record.call_site = CallSite {
            file: "does/not/exist.rs",
            line: 1,
            module_path,
        };
        record
    }

    #[inline(never)]
    fn emit_from_named_function(handler: &CallerFuncHandler<Recorder>) {
        handler.log(&Record::new(Level::Info, "named", Ctx::new())).unwrap();
    }

    #[test]
    fn caller_func_names_the_calling_function() {
        let recorder = Recorder::default();
        let handler = CallerFuncHandler::new(recorder.clone());

        emit_from_named_function(&handler);

        let records = recorder.records();
        let function = records[0].ctx.get("fn").unwrap().as_json().unwrap();
        assert!(function
            .as_str()
            .unwrap()
            .ends_with("caller::tests::emit_from_named_function"));
    }

    #[test]
    fn caller_func_falls_back_to_module_path_or_placeholder() {
        let recorder = Recorder::default();
        let handler = CallerFuncHandler::new(recorder.clone());

        handler.log(&unresolvable(Some("app::db"))).unwrap();
        handler.log(&unresolvable(None)).unwrap();

        let records = recorder.records();
        assert!(records[0].ctx.get("fn").unwrap() == &json!("app::db"));
        assert!(records[1].ctx.get("fn").unwrap() == &json!("???"));
    }

    #[rstest]
    #[case("%s", StackFormat::File)]
    #[case("%+s", StackFormat::FullFile)]
    #[case("%d", StackFormat::Line)]
    #[case("%n", StackFormat::Func)]
    #[case("%+n", StackFormat::FullFunc)]
    #[case("%v", StackFormat::FileLine)]
    #[case("%+v", StackFormat::FullFileLine)]
    fn parses_stack_verbs(#[case] verb: &str, #[case] expected: StackFormat) {
        assert_eq!(verb.parse::<StackFormat>(), Ok(expected));
        assert_eq!(expected.as_str(), verb);
    }

    #[rstest]
    #[case("")]
    #[case("v")]
    #[case("%x")]
    #[case("%+d")]
    fn rejects_unknown_stack_verbs(#[case] verb: &str) {
        assert!(verb.parse::<StackFormat>().is_err());
    }

    #[rstest]
    #[case(StackFormat::File, "[main.rs lib.rs]")]
    #[case(StackFormat::FullFile, "[/src/app/main.rs /src/db/lib.rs]")]
    #[case(StackFormat::Line, "[10 20]")]
    #[case(StackFormat::Func, "[main connect]")]
    #[case(StackFormat::FullFunc, "[app::main db::pool::connect]")]
    #[case(StackFormat::FileLine, "[main.rs:10 lib.rs:20]")]
    #[case(StackFormat::FullFileLine, "[/src/app/main.rs:10 /src/db/lib.rs:20]")]
    fn renders_frames_with_each_verb(#[case] format: StackFormat, #[case] expected: &str) {
        let frames = vec![
            StackFrame {
                function: "app::main".to_owned(),
                file: "/src/app/main.rs".to_owned(),
                line: 10,
            },
            StackFrame {
                function: "db::pool::connect".to_owned(),
                file: "/src/db/lib.rs".to_owned(),
                line: 20,
            },
        ];
        assert_eq!(format.render(&frames), expected);
    }

    #[test]
    fn caller_stack_skips_records_from_unknown_locations() {
        let recorder = Recorder::default();
        let handler = CallerStackHandler::new(StackFormat::FileLine, recorder.clone());

        handler.log(&unresolvable(None)).unwrap();

        assert!(recorder.records()[0].ctx.get("stack").is_none());
    }

    #[test]
    fn caller_stack_starts_at_the_call_site() {
        let recorder = Recorder::default();
        let handler = CallerStackHandler::new(StackFormat::File, recorder.clone());

        handler.log(&Record::new(Level::Info, "traced", Ctx::new())).unwrap();

        let records = recorder.records();
        let stack = records[0].ctx.get("stack").unwrap().as_json().unwrap();
        assert!(stack.as_str().unwrap().starts_with("[caller.rs"));
    }
}
