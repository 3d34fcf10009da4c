//! Integration tests for the thread-pooled connection server
//!
//! # Test Coverage
//!
//! - State machine: start, double start, stop, restart
//! - Requests over real TCP sockets, including keep-alive
//! - Graceful shutdown waiting for in-flight requests, not for idle ones
//! - Shedding with a bare 503 when the bounded queue is full
//! - Idle connections released by the socket timeout
//!
//! Every server binds `127.0.0.1:0` so tests can run in parallel.

mod common;

use arbor::config::SectionConfig;
use arbor::hooks::HookRegistry;
use arbor::lifecycle::Engine;
use arbor::server::{Server, ServerError, ServerState};
use arbor::tree::{handler_fn, HandlerOutcome, TreeNode};
use arbor::worker_pool::BackpressureMode;
use common::http::{get, parse_response, send_request};
use common::test_server::{test_config, TestServer};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn hello_engine() -> Engine {
    let root = TreeNode::new()
        .with_handler(handler_fn("index", |_| Ok(HandlerOutcome::from("hello"))))
        .with_child(
            "echo",
            TreeNode::new().with_handler(handler_fn("default", |call| {
                Ok(HandlerOutcome::from(call.args().join("/")))
            })),
        );
    Engine::new(root, HookRegistry::new(), SectionConfig::new())
}

/// Engine whose `/slow` handler reports on `started`, then waits for `release`.
fn gated_engine(
    started: crossbeam_channel::Sender<()>,
    release: crossbeam_channel::Receiver<()>,
    finished: Arc<AtomicUsize>,
) -> Engine {
    let root = TreeNode::new().with_handler(handler_fn("slow", move |_| {
        started.send(()).ok();
        release.recv_timeout(Duration::from_secs(5)).ok();
        finished.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerOutcome::from("done"))
    }));
    Engine::new(root, HookRegistry::new(), SectionConfig::new())
}

/// Read one response with a `Content-Length` body off a persistent stream.
fn read_one(reader: &mut BufReader<TcpStream>) -> (String, Vec<(String, String)>, String) {
    let mut status = String::new();
    reader.read_line(&mut status).unwrap();
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (n, v) = line.split_once(':').unwrap();
        headers.push((n.trim().to_string(), v.trim().to_string()));
    }
    let len: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0; len];
    reader.read_exact(&mut body).unwrap();
    (status.trim_end().to_string(), headers, String::from_utf8(body).unwrap())
}

#[test]
fn test_start_serve_stop() {
    let server = Server::new(hello_engine(), test_config(2));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());

    let addr = server.start().unwrap();
    assert_eq!(server.state(), ServerState::Started);
    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), Some(addr));
    server.wait_ready().unwrap();

    let resp = get(&addr, "/");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "hello");

    server.stop().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(matches!(server.stop(), Err(ServerError::NotStarted)));
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_double_start_is_rejected() {
    let ts = TestServer::start(hello_engine(), test_config(1));
    assert!(matches!(ts.server.start(), Err(ServerError::AlreadyStarted)));
    assert_eq!(ts.server.state(), ServerState::Started);
    assert_eq!(get(&ts.addr, "/").status, 200);
}

#[test]
fn test_restart_after_stop() {
    let server = Server::new(hello_engine(), test_config(1));
    server.start().unwrap();
    server.stop().unwrap();
    let addr = server.start().unwrap();
    server.wait_ready().unwrap();
    assert_eq!(get(&addr, "/echo/again").text(), "again");
    server.stop().unwrap();
}

#[test]
fn test_bind_failure_leaves_server_stopped() {
    let first = TestServer::start(hello_engine(), test_config(1));
    let mut config = test_config(1);
    config.socket_port = first.addr.port();
    let second = Server::new(hello_engine(), config);
    assert!(matches!(second.start(), Err(ServerError::Bind { .. })));
    assert_eq!(second.state(), ServerState::Stopped);
}

#[test]
fn test_keep_alive_reuses_connection() {
    let ts = TestServer::start(hello_engine(), test_config(1));
    let stream = TcpStream::connect(ts.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    writer
        .write_all(b"GET /echo/one HTTP/1.1\r\nHost: h\r\n\r\n")
        .unwrap();
    let (status, headers, body) = read_one(&mut reader);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert!(!headers.iter().any(|(n, v)| n == "Connection" && v == "close"));
    assert_eq!(body, "one");

    writer
        .write_all(b"GET /echo/two HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (_, headers, body) = read_one(&mut reader);
    assert_eq!(body, "two");
    assert!(headers.iter().any(|(n, v)| n == "Connection" && v == "close"));

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_stop_waits_for_in_flight_requests() {
    const IN_FLIGHT: usize = 3;
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let finished = Arc::new(AtomicUsize::new(0));
    let server = Server::new(
        gated_engine(started_tx, release_rx, Arc::clone(&finished)),
        test_config(IN_FLIGHT),
    );
    let addr = server.start().unwrap();
    server.wait_ready().unwrap();

    let clients: Vec<_> = (0..IN_FLIGHT)
        .map(|_| {
            thread::spawn(move || {
                send_request(&addr, "GET /slow HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
            })
        })
        .collect();
    for _ in 0..IN_FLIGHT {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        for _ in 0..IN_FLIGHT {
            release_tx.send(()).unwrap();
        }
    });
    let begun = Instant::now();
    server.stop().unwrap();
    assert!(begun.elapsed() >= Duration::from_millis(150));
    assert_eq!(finished.load(Ordering::SeqCst), IN_FLIGHT);
    assert_eq!(server.state(), ServerState::Stopped);

    releaser.join().unwrap();
    for client in clients {
        let resp = parse_response(&client.join().unwrap());
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text(), "done");
    }
}

#[test]
fn test_full_queue_sheds_with_503() {
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let finished = Arc::new(AtomicUsize::new(0));
    let mut config = test_config(1);
    config.queue_bound = 1;
    config.backpressure = BackpressureMode::Shed;
    let ts = TestServer::start(gated_engine(started_tx, release_rx, Arc::clone(&finished)), config);
    let addr = ts.addr;
    let metrics = ts.server.metrics().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while metrics.get_completed_count() < 1 {
        assert!(Instant::now() < deadline, "readiness probe never finished");
        thread::sleep(Duration::from_millis(5));
    }

    // occupies the only worker
    let first = thread::spawn(move || {
        send_request(&addr, "GET /slow HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
    });
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // fills the queue
    let second = thread::spawn(move || {
        send_request(&addr, "GET /slow HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
    });
    let deadline = Instant::now() + Duration::from_secs(5);
    while metrics.get_queue_depth() < 1 {
        assert!(Instant::now() < deadline, "second connection never queued");
        thread::sleep(Duration::from_millis(5));
    }

    let shed = parse_response(&send_request(
        &addr,
        "GET /slow HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n",
    ));
    assert_eq!(shed.status, 503);
    assert_eq!(shed.header("Content-Length"), Some("0"));
    assert!(metrics.get_shed_count() >= 1);

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    assert_eq!(parse_response(&first.join().unwrap()).status, 200);
    assert_eq!(parse_response(&second.join().unwrap()).status, 200);
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}

#[test]
fn test_idle_connection_is_released_by_timeout() {
    let mut config = test_config(1);
    config.socket_timeout = Duration::from_millis(200);
    let ts = TestServer::start(hello_engine(), config);

    let mut idle = TcpStream::connect(ts.addr).unwrap();
    idle.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let begun = Instant::now();
    let mut buf = Vec::new();
    idle.read_to_end(&mut buf).unwrap();
    assert!(buf.is_empty());
    assert!(begun.elapsed() < Duration::from_secs(4));

    // the single worker is free again
    assert_eq!(get(&ts.addr, "/").status, 200);
}

#[test]
fn test_stop_does_not_wait_out_idle_keep_alive() {
    let mut config = test_config(1);
    config.socket_timeout = Duration::from_secs(30);
    let server = Server::new(hello_engine(), config);
    let addr = server.start().unwrap();
    server.wait_ready().unwrap();

    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    writer.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
    let (status, _, body) = read_one(&mut reader);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, "hello");

    // the only worker now sits on the idle persistent connection
    let begun = Instant::now();
    server.stop().unwrap();
    assert!(begun.elapsed() < Duration::from_secs(5), "stop took {:?}", begun.elapsed());

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_interrupt_flag_stops_serve_until_interrupted() {
    let server = Arc::new(Server::new(hello_engine(), test_config(1)));
    let flag = server.interrupt_flag();
    let runner = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.serve_until_interrupted())
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.state() != ServerState::Started {
        assert!(Instant::now() < deadline, "server never started");
        thread::sleep(Duration::from_millis(5));
    }
    server.wait_ready().unwrap();
    let addr = server.local_addr().unwrap();
    assert_eq!(get(&addr, "/").status, 200);

    flag.store(true, Ordering::SeqCst);
    runner.join().unwrap().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn test_pool_metrics_count_connections() {
    let ts = TestServer::start(hello_engine(), test_config(2));
    for _ in 0..4 {
        assert_eq!(get(&ts.addr, "/").status, 200);
    }
    let metrics = ts.server.metrics().unwrap();
    // wait_ready's probe connection is counted too
    let deadline = Instant::now() + Duration::from_secs(5);
    while metrics.get_completed_count() < 5 {
        assert!(Instant::now() < deadline, "connections never completed");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(metrics.get_dispatched_count() >= 5);
    assert_eq!(metrics.get_shed_count(), 0);
}
