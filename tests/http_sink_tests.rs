use invstream::engine::cursor::IterCursor;
use invstream::engine::pump::{PumpOutcome, pump};
use invstream::sink::{Framing, HttpSink, OutputSink, ResponseStream, Watermarks};
use invstream::{CursorError, Row, SinkError};
use serde_json::json;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// In-memory response stream; clones share the buffer.
#[derive(Clone, Default)]
struct SharedBuf {
    bytes: Arc<Mutex<Vec<u8>>>,
    delay: Option<Duration>,
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(d) = self.delay {
            thread::sleep(d);
        }
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseStream for SharedBuf {}

/// Consumer that hung up.
struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseStream for BrokenPipe {}

const HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";

/// Body of a chunked response, and whether the terminating chunk arrived.
fn dechunk(mut rest: &str) -> (String, bool) {
    let mut body = String::new();
    loop {
        let Some(eol) = rest.find("\r\n") else {
            return (body, false);
        };
        let len = usize::from_str_radix(&rest[..eol], 16).unwrap();
        rest = &rest[eol + 2..];
        if len == 0 {
            return (body, rest == "\r\n");
        }
        body.push_str(&rest[..len]);
        assert_eq!(&rest[len..len + 2], "\r\n");
        rest = &rest[len + 2..];
    }
}

fn docs(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row {
            id: format!("r{i}"),
            jsonb: Some(json!({ "id": format!("r{i}"), "n": i })),
        })
        .collect()
}

fn roomy() -> Watermarks {
    Watermarks::new(1 << 20, 1 << 18)
}

// --- framing ---

#[test]
fn test_chunked_response_is_one_json_array() {
    let buf = SharedBuf::default();
    let mut sink = HttpSink::new(buf.clone(), Framing::Chunked, roomy()).unwrap();
    let report = pump(IterCursor::from_rows(docs(3), 2), &mut sink, None);
    assert_eq!(report.outcome, PumpOutcome::Completed);

    let out = buf.text();
    assert!(out.starts_with(HEAD));
    let (body, terminated) = dechunk(&out[HEAD.len()..]);
    assert!(terminated);
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed, json!([
        {"id": "r0", "n": 0},
        {"id": "r1", "n": 1},
        {"id": "r2", "n": 2},
    ]));
}

#[test]
fn test_empty_result_is_empty_array() {
    let buf = SharedBuf::default();
    let mut sink = HttpSink::new(buf.clone(), Framing::Chunked, roomy()).unwrap();
    let report = pump(IterCursor::from_rows(Vec::new(), 10), &mut sink, None);
    assert_eq!(report.outcome, PumpOutcome::Completed);
    let out = buf.text();
    let (body, terminated) = dechunk(&out[HEAD.len()..]);
    assert_eq!(body, "[]");
    assert!(terminated);
}

#[test]
fn test_identity_framing_writes_bare_body() {
    let buf = SharedBuf::default();
    let mut sink = HttpSink::new(buf.clone(), Framing::Identity, roomy()).unwrap();
    let rows = vec![Row::id_only("a"), Row::id_only("b")];
    pump(IterCursor::from_rows(rows, 10), &mut sink, None);
    assert_eq!(buf.text(), r#"[{"id":"a"},{"id":"b"}]"#);
}

// --- error responses ---

#[test]
fn test_error_response_before_first_byte() {
    let buf = SharedBuf::default();
    let mut sink = HttpSink::new(buf.clone(), Framing::Chunked, roomy()).unwrap();
    let body = json!({"errors": [{"message": "bad field"}]});
    sink.respond_error(400, "Bad Request", &body).unwrap();

    let out = buf.text();
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(out.contains(&format!("Content-Length: {}\r\n", body.to_string().len())));
    assert!(out.ends_with(&body.to_string()));
    assert!(!out.contains("Transfer-Encoding"));
}

#[test]
fn test_no_error_response_after_output_began() {
    let buf = SharedBuf::default();
    let mut sink = HttpSink::new(buf.clone(), Framing::Chunked, roomy()).unwrap();
    sink.write(&Row::id_only("a")).unwrap();
    assert!(sink.header_sent());
    let err = sink
        .respond_error(500, "Internal Server Error", &json!({}))
        .unwrap_err();
    assert_eq!(err, SinkError::Finished);
    sink.finish().unwrap();
    assert!(!buf.text().contains("500"));
}

#[test]
fn test_blocking_socket_carries_complete_chunked_response() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    });
    let (server, _) = listener.accept().unwrap();

    // Tight marks so the pump parks on the socket's drain signal along the way.
    let mut sink = HttpSink::new(server, Framing::Chunked, Watermarks::new(4096, 1024)).unwrap();
    let report = pump(IterCursor::from_rows(docs(500), 50), &mut sink, None);
    assert_eq!(report.outcome, PumpOutcome::Completed);
    assert_eq!(report.rows_emitted, 500);
    drop(sink);

    let out = client.join().unwrap();
    assert!(out.starts_with(HEAD));
    let (body, terminated) = dechunk(&out[HEAD.len()..]);
    assert!(terminated);
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let items = parsed.as_array().unwrap();
    assert_eq!(items.len(), 500);
    assert_eq!(items[0], json!({"id": "r0", "n": 0}));
    assert_eq!(items[499], json!({"id": "r499", "n": 499}));
}

#[test]
fn test_mid_stream_failure_drops_connection_without_terminator() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        let mut out = String::new();
        let _ = stream.read_to_string(&mut out);
        out
    });
    let (server, _) = listener.accept().unwrap();

    let mut sink = HttpSink::new(server, Framing::Chunked, roomy()).unwrap();
    let items = docs(3)
        .into_iter()
        .map(Ok)
        .chain(std::iter::once(Err(CursorError::Read("page torn".into()))));
    let report = pump(IterCursor::new(items, 10), &mut sink, None);
    assert!(matches!(report.outcome, PumpOutcome::FailedMidStream(_)));

    // Bytes still queued at the failure are dropped with the connection.
    let out = client.join().unwrap();
    if !out.is_empty() {
        assert!(out.starts_with(HEAD));
        let (_, terminated) = dechunk(&out[HEAD.len()..]);
        assert!(!terminated);
    }
}

// --- flow control ---

#[test]
fn test_slow_consumer_triggers_drain_waits() {
    let buf = SharedBuf {
        delay: Some(Duration::from_millis(1)),
        ..Default::default()
    };
    let mut sink = HttpSink::new(buf.clone(), Framing::Chunked, Watermarks::new(64, 16)).unwrap();
    let report = pump(IterCursor::from_rows(docs(200), 25), &mut sink, None);
    assert_eq!(report.outcome, PumpOutcome::Completed);
    assert_eq!(report.rows_emitted, 200);
    assert!(report.drain_waits > 0);

    let out = buf.text();
    let (body, terminated) = dechunk(&out[HEAD.len()..]);
    assert!(terminated);
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed.len(), 200);
    assert_eq!(parsed[199]["n"], 199);
}

#[test]
fn test_departed_consumer_is_disconnect() {
    let mut sink = HttpSink::new(BrokenPipe, Framing::Chunked, Watermarks::new(1, 0)).unwrap();
    let report = pump(IterCursor::from_rows(docs(1_000), 100), &mut sink, None);
    assert_eq!(report.outcome, PumpOutcome::Disconnected);
    assert_eq!(report.rows_emitted, 1);
}
