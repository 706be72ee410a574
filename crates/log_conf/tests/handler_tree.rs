//! End-to-end checks of handler trees built from configuration values.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, missing_docs)]

use std::{
    io::{self, Write},
    net::TcpListener,
    sync::Arc,
    time::Duration,
};

use log_conf::{
    Ctx, FormatConf, Handler, HandlerConf, Level, LevelFilterHandler, Logger, LoggerError,
    Record, basic, ctx, make_formatter, make_handler, stream_handler,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};

#[derive(Clone, Debug, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn json_lines(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[rstest]
#[case(json!("json"))]
#[case(json!("json_pretty"))]
#[case(json!("logfmt"))]
#[case(json!("terminal"))]
fn known_formatters_build(#[case] conf: Value) {
    assert!(make_formatter(&conf).is_ok());
}

#[test]
fn unknown_formatter_is_a_bad_configuration() {
    assert!(make_formatter(&json!("unknown")).unwrap_err().is_bad_configuration());
}

#[test]
fn unknown_handler_is_a_bad_configuration() {
    assert!(make_handler(&json!(["unknown"])).unwrap_err().is_bad_configuration());
}

#[test]
fn nested_errors_name_the_failing_node() {
    let error = make_handler(&json!([
        "multi",
        ["discard"],
        ["level_filter", "loud", ["discard"]]
    ]))
    .unwrap_err();
    assert!(error.to_string().starts_with("Bad configuration at $[2][1]:"));
}

#[test]
fn buffered_discard_never_fails() {
    let handler = make_handler(&json!(["buffered", 5, ["discard"]])).unwrap();
    for level in Level::ALL {
        assert!(handler.log(&Record::new(level, "buffered", Ctx::new())).is_ok());
    }
}

#[test]
fn level_filter_drops_less_severe_records() {
    let buffer = SharedBuffer::default();
    let handler = LevelFilterHandler::new(
        Level::Warn,
        stream_handler(buffer.clone(), FormatConf::Json.build()),
    );

    handler.log(&Record::new(Level::Debug, "quiet", Ctx::new())).unwrap();
    assert!(buffer.lines().is_empty());

    handler.log(&Record::new(Level::Error, "loud", Ctx::new())).unwrap();
    let lines = buffer.lines();
    assert_eq!(lines.len(), 1);
    let parsed: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(parsed["msg"], json!("loud"));
    assert_eq!(parsed["lvl"], json!("eror"));
}

#[test]
fn multi_file_and_discard_writes_one_line() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("app.log");
    let handler = make_handler(&json!([
        "multi",
        ["file", path.to_str().unwrap(), "json"],
        ["discard"]
    ]))
    .unwrap();

    handler.log(&Record::new(Level::Info, "once", Ctx::new())).unwrap();
    drop(handler);

    let lines = json_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["msg"], json!("once"));
}

#[test]
fn match_filter_routes_on_context() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("db.log");
    let handler = make_handler(&json!([
        "match_filter",
        "component",
        "db",
        ["file", path.to_str().unwrap(), "json"]
    ]))
    .unwrap();

    handler
        .log(&Record::new(Level::Info, "kept", ctx! { "component" => "db" }))
        .unwrap();
    handler
        .log(&Record::new(Level::Info, "dropped", ctx! { "component" => "web" }))
        .unwrap();
    drop(handler);

    let messages: Vec<Value> = json_lines(&path).into_iter().map(|line| line["msg"].clone()).collect();
    assert_eq!(messages, vec![json!("kept")]);
}

#[test]
fn each_stdout_stream_build_is_independent() {
    let conf = HandlerConf::from_value(&json!(["stream", "stdout", "json"])).unwrap();

    let first = conf.build().unwrap();
    let second = conf.build().unwrap();

    first.log(&Record::new(Level::Info, "first", Ctx::new())).unwrap();
    drop(first);
    second.log(&Record::new(Level::Info, "second", Ctx::new())).unwrap();
}

#[test]
fn each_build_opens_its_own_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let conf = HandlerConf::from_value(&json!(["net", "tcp", address, "logfmt"])).unwrap();

    let first = conf.build().unwrap();
    let second = conf.build().unwrap();

    let (first_peer, _) = listener.accept().unwrap();
    let (second_peer, _) = listener.accept().unwrap();
    assert_ne!(first_peer.peer_addr().unwrap(), second_peer.peer_addr().unwrap());

    drop((first, second));
}

#[cfg(feature = "redis")]
#[test]
fn unreachable_redis_is_a_transport_error() {
    let error = make_handler(&json!(["redis", "127.0.0.1:1", "logs"])).unwrap_err();
    assert!(!error.is_bad_configuration());
    assert!(matches!(error, LoggerError::Redis(_)));
}

#[test]
fn unreachable_net_is_an_io_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let error = make_handler(&json!(["net", "tcp", address, "json"])).unwrap_err();
    assert!(matches!(error, LoggerError::Io(_)));
}

#[derive(Debug, serde::Deserialize)]
struct Settings {
    handler: HandlerConf,
}

#[test]
fn configurations_deserialize_from_toml() {
    let settings: Settings = toml::from_str(
        r#"
        handler = ["level_filter", "info", ["multi", ["discard"], ["sync", ["discard"]]]]
        "#,
    )
    .unwrap();

    assert_eq!(
        settings.handler.to_value(),
        json!(["level_filter", "info", ["multi", ["discard"], ["sync", ["discard"]]]])
    );
}

#[test]
fn invalid_toml_configurations_are_rejected() {
    let result = toml::from_str::<Settings>(r#"handler = ["buffered", "five", ["discard"]]"#);
    assert!(result.unwrap_err().to_string().contains("Bad configuration at $[1]"));
}

#[test]
fn basic_writes_filtered_annotated_json() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("basic.log");
    let logger = Logger::root(basic(path.to_str().unwrap(), "info", true).unwrap());

    logger.debug("hidden", Ctx::new());
    logger.info("shown", ctx! { "user" => "ann" });
    drop(logger);

    let lines = json_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["msg"], json!("shown"));
    assert_eq!(lines[0]["user"], json!("ann"));
    assert!(lines[0]["caller"]
        .as_str()
        .unwrap()
        .starts_with("handler_tree.rs:"));
}

#[test]
fn buffered_file_is_flushed_on_drop() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("buffered.log");
    let handler = make_handler(&json!([
        "buffered",
        1,
        ["file", path.to_str().unwrap(), "logfmt"]
    ]))
    .unwrap();

    for index in 0..5 {
        handler
            .log(&Record::new(Level::Info, format!("record-{index}"), Ctx::new()))
            .unwrap();
    }
    drop(handler);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 5);
    assert!(contents.lines().last().unwrap().ends_with("msg=record-4"));
}

#[test]
fn udp_syslog_receives_records() {
    let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let address = receiver.local_addr().unwrap().to_string();
    let handler = make_handler(&json!(["syslog_net", "udp", address, "app", "logfmt"])).unwrap();

    handler.log(&Record::new(Level::Info, "hello", Ctx::new())).unwrap();

    let mut buf = [0_u8; 1024];
    let len = receiver.recv(&mut buf).unwrap();
    let datagram = String::from_utf8_lossy(&buf[..len]).into_owned();
    assert!(datagram.starts_with("<14>"));
    assert!(datagram.trim_end().ends_with("msg=hello"));
}
