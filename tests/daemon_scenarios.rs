// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! End-to-end scenarios driven against a running `Daemon` over real sockets
//! (§8.1: "no mock transport"). Most run in `ConcurrencyMode::External` so
//! the test thread drives the reactor itself and response timing is
//! deterministic; scenario 5 needs a daemon that keeps running on its own
//! thread while a handler is suspended, so it uses `SingleThread`.

use mhttpd::logging::ConnectionEvent;
use mhttpd::{Action, ConcurrencyMode, Daemon, DaemonBuilder, Response};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Drives an `External`-mode daemon's reactor until `condition` returns
/// true or the budget of iterations runs out.
fn pump_until(daemon: &mut Daemon, mut condition: impl FnMut() -> bool, iterations: usize) -> bool {
    for _ in 0..iterations {
        daemon.poll();
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn read_available(stream: &mut TcpStream) -> Vec<u8> {
    stream.set_nonblocking(true).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
    out
}

#[test]
fn get_keep_alive_reuse() {
    // Scenario 1: two requests over one socket, one handler call each, one
    // termination callback fired once the daemon stops.
    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();
    let closed = Arc::new(AtomicUsize::new(0));
    let closed2 = closed.clone();

    let config = DaemonBuilder::new(any_addr(), move |_req, buf, _body| {
        hits2.fetch_add(1, Ordering::SeqCst);
        let _ = buf;
        Response::text("ok").into()
    })
    .concurrency_mode(ConcurrencyMode::External)
    .notify_connection(move |_addr, event| {
        if matches!(event, ConnectionEvent::Closed(_)) {
            closed2.fetch_add(1, Ordering::SeqCst);
        }
    })
    .build()
    .unwrap();

    let mut daemon = Daemon::start(config).unwrap();
    let addr = daemon.local_addr();
    let mut client = TcpStream::connect(addr).unwrap();

    client.write_all(b"GET /a HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
    assert!(pump_until(&mut daemon, || hits.load(Ordering::SeqCst) >= 1, 200));

    client.write_all(b"GET /b HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").unwrap();
    assert!(pump_until(&mut daemon, || hits.load(Ordering::SeqCst) >= 2, 200));

    let out = read_available(&mut client);
    let text = String::from_utf8_lossy(&out);
    assert_eq!(text.matches("HTTP/1.1 200").count(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    daemon.stop();
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn client_close_override() {
    // Scenario 2: an explicit `Connection: close` on the request tears the
    // socket down after one handler call even though the response itself
    // says nothing about framing.
    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();

    let config = DaemonBuilder::new(any_addr(), move |_req, _buf, _body| {
        hits2.fetch_add(1, Ordering::SeqCst);
        Response::text("bye").into()
    })
    .concurrency_mode(ConcurrencyMode::External)
    .build()
    .unwrap();

    let mut daemon = Daemon::start(config).unwrap();
    let addr = daemon.local_addr();
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET /x HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").unwrap();

    assert!(pump_until(&mut daemon, || hits.load(Ordering::SeqCst) >= 1, 200));
    let out = read_available(&mut client);
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.contains("Connection: close"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    client.set_nonblocking(false).unwrap();
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "server should have closed the socket after the close-framed response");

    daemon.stop();
}

#[test]
fn server_close_override() {
    // Scenario 3: a keep-alive request whose handler adds its own
    // `Connection: close` forces the socket shut despite the client never
    // asking for it.
    let config = DaemonBuilder::new(any_addr(), |_req, _buf, _body| {
        Response::new(200, vec![("Connection".into(), "close".into())], mhttpd::ResponseBody::from_string("done")).into()
    })
    .concurrency_mode(ConcurrencyMode::External)
    .build()
    .unwrap();

    let mut daemon = Daemon::start(config).unwrap();
    let addr = daemon.local_addr();
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();

    for _ in 0..200 {
        daemon.poll();
        std::thread::sleep(Duration::from_millis(5));
        let out = read_available(&mut client);
        if !out.is_empty() {
            let text = String::from_utf8_lossy(&out);
            assert_eq!(text.matches("Connection: close").count(), 1);
            assert!(!text.to_ascii_lowercase().contains("keep-alive"));
            break;
        }
    }

    client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    client.set_nonblocking(false).unwrap();
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "server should have closed the socket after a handler-forced close");

    daemon.stop();
}

#[test]
fn chunked_upload_end_to_end() {
    // Scenario 4: a chunked POST delivers the cumulative body, followed by
    // a final empty invocation.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let finals = Arc::new(AtomicUsize::new(0));
    let finals2 = finals.clone();

    let config = DaemonBuilder::new(any_addr(), move |_req, _buf, body| {
        if body.is_empty() {
            finals2.fetch_add(1, Ordering::SeqCst);
        } else {
            seen2.lock().unwrap().extend_from_slice(body);
        }
        Action::Continue
    })
    .concurrency_mode(ConcurrencyMode::External)
    .build()
    .unwrap();

    let mut daemon = Daemon::start(config).unwrap();
    let addr = daemon.local_addr();
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(
            b"POST /up HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n",
        )
        .unwrap();

    assert!(pump_until(&mut daemon, || finals.load(Ordering::SeqCst) >= 1, 200));
    assert_eq!(&seen.lock().unwrap()[..], b"Hello World");
    assert_eq!(finals.load(Ordering::SeqCst), 1);

    daemon.stop();
}

#[test]
fn suspend_and_resume_completes_the_response() {
    // Scenario 5: a handler suspends on its first invocation after stashing
    // `req.conn_key`, a separate thread later calls `Daemon::resume` with it,
    // and the handler's second invocation (post-resume) produces the actual
    // response. `SingleThread` mode is the vehicle here, since it's the one
    // that keeps a reactor running on its own thread while suspended.
    let conn_key = Arc::new(Mutex::new(None));
    let conn_key2 = conn_key.clone();
    let ready = Arc::new(AtomicBool::new(false));
    let ready2 = ready.clone();

    let config = DaemonBuilder::new(any_addr(), move |req, _buf, _body| {
        if !ready2.load(Ordering::SeqCst) {
            *conn_key2.lock().unwrap() = req.conn_key;
            return Action::Suspend;
        }
        Response::text("resumed").into()
    })
    .concurrency_mode(ConcurrencyMode::SingleThread)
    .build()
    .unwrap();

    let daemon = Arc::new(Mutex::new(Daemon::start(config).unwrap()));
    let addr = daemon.lock().unwrap().local_addr();
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n").unwrap();

    let key = {
        let mut found = None;
        for _ in 0..200 {
            if let Some(k) = *conn_key.lock().unwrap() {
                found = Some(k);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        found.expect("handler never ran to capture its conn_key")
    };

    let ready3 = ready.clone();
    let daemon2 = daemon.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        ready3.store(true, Ordering::SeqCst);
        daemon2.lock().unwrap().resume(key).unwrap();
    });

    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.contains("resumed"));

    daemon.lock().unwrap().stop();
}

#[test]
fn idle_connection_times_out_within_budget() {
    // Scenario 6: a connection that sends half a request line and stalls is
    // forced closed within its configured timeout, with a termination
    // callback reporting the timeout.
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let reasons2 = reasons.clone();

    let config = DaemonBuilder::new(any_addr(), |_req, _buf, _body| Response::text("unreached").into())
        .concurrency_mode(ConcurrencyMode::External)
        .connection_timeout(Duration::from_millis(200))
        .notify_connection(move |_addr, event| {
            reasons2.lock().unwrap().push(format!("{:?}", event));
        })
        .build()
        .unwrap();

    let mut daemon = Daemon::start(config).unwrap();
    let addr = daemon.local_addr();
    let _client = TcpStream::connect(addr).unwrap();
    let mut half_open = TcpStream::connect(addr).unwrap();
    half_open.write_all(b"GET /sta").unwrap();

    let start = Instant::now();
    let closed = pump_until(
        &mut daemon,
        {
            let reasons = reasons.clone();
            move || reasons.lock().unwrap().iter().any(|r| r.contains("Timeout"))
        },
        400,
    );
    assert!(closed, "expected a timeout-reason notify-connection callback");
    assert!(start.elapsed() < Duration::from_secs(2), "timeout took far longer than the configured budget");

    daemon.stop();
}
